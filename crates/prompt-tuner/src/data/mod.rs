pub mod example;
pub mod prediction;

pub use example::*;
pub use prediction::*;
