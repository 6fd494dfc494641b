use serde::{Deserialize, Serialize};
use std::iter::Sum;
use std::ops::{Add, AddAssign};

/// Token counters reported by a language model call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LmUsage {
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl LmUsage {
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    pub fn total_tokens(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

impl Add for LmUsage {
    type Output = LmUsage;

    fn add(self, other: LmUsage) -> Self {
        LmUsage {
            input_tokens: self.input_tokens + other.input_tokens,
            output_tokens: self.output_tokens + other.output_tokens,
        }
    }
}

impl AddAssign for LmUsage {
    fn add_assign(&mut self, other: LmUsage) {
        *self = *self + other;
    }
}

impl Sum for LmUsage {
    fn sum<I: Iterator<Item = LmUsage>>(iter: I) -> Self {
        iter.fold(LmUsage::default(), Add::add)
    }
}
