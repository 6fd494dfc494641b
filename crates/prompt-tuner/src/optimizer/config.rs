//! Fully enumerated optimizer configurations.
//!
//! Every config can be built in code (`CoproConfig::builder().breadth(4).build()`)
//! or parsed from JSON with [`OptimizerConfig::from_json`]. JSON keys use the
//! camelCase names (`maxLabeled`, `numVariations`, ...); unknown keys and
//! out-of-range values are rejected before any search starts.

use bon::Builder;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::ConfigError;

pub trait OptimizerConfig: Sized + DeserializeOwned {
    fn validate(&self) -> Result<(), ConfigError>;

    fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }
}

fn at_least_one(field: &'static str, value: usize) -> Result<(), ConfigError> {
    if value == 0 {
        return Err(ConfigError::out_of_range(field, value, ">= 1"));
    }
    Ok(())
}

fn unit_interval(field: &'static str, value: f32) -> Result<(), ConfigError> {
    if !(0.0..=1.0).contains(&value) {
        return Err(ConfigError::out_of_range(field, value, "[0, 1]"));
    }
    Ok(())
}

fn temperature_range(value: f32) -> Result<(), ConfigError> {
    if !(0.0..=2.0).contains(&value) {
        return Err(ConfigError::out_of_range("temperature", value, "[0, 2]"));
    }
    Ok(())
}

/// Configuration for [`BootstrapOptimizer`](crate::BootstrapOptimizer).
#[derive(Clone, Debug, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct BootstrapConfig {
    /// Labeled training examples used verbatim as demonstrations.
    #[builder(default = 16)]
    pub max_labeled: usize,
    /// Teacher-generated demonstrations accepted per round.
    #[builder(default = 4)]
    pub max_bootstrapped: usize,
    #[builder(default = 1)]
    pub max_rounds: usize,
    /// Minimum metric score for a teacher output to become a demonstration.
    #[builder(default = 1.0)]
    pub acceptance_threshold: f32,
    /// Stop as soon as a round's score reaches this value.
    pub early_stopping_threshold: Option<f32>,
    #[builder(default = 8)]
    pub max_concurrency: usize,
    pub seed: Option<u64>,
    #[builder(default = false)]
    pub verbose: bool,
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        BootstrapConfig::builder().build()
    }
}

impl OptimizerConfig for BootstrapConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("maxRounds", self.max_rounds)?;
        at_least_one("maxConcurrency", self.max_concurrency)?;
        unit_interval("acceptanceThreshold", self.acceptance_threshold)?;
        if let Some(threshold) = self.early_stopping_threshold {
            unit_interval("earlyStoppingThreshold", threshold)?;
        }
        Ok(())
    }
}

/// Configuration for [`CoproOptimizer`](crate::CoproOptimizer).
#[derive(Clone, Debug, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct CoproConfig {
    /// Beam width: candidates kept between iterations.
    #[builder(default = 4)]
    pub breadth: usize,
    /// Iterations of mutate-score-prune. `0` returns the base prompt.
    #[builder(default = 3)]
    pub depth: usize,
    /// Mutations requested per beam candidate per iteration.
    #[builder(default = 3)]
    pub num_variations: usize,
    /// Sampling temperature for variation requests.
    #[builder(default = 1.4)]
    pub temperature: f32,
    /// Training examples shown to the prompt model as context.
    #[builder(default = 3)]
    pub sample_size: usize,
    #[builder(default = 8)]
    pub max_concurrency: usize,
    pub seed: Option<u64>,
    #[builder(default = false)]
    pub verbose: bool,
}

impl Default for CoproConfig {
    fn default() -> Self {
        CoproConfig::builder().build()
    }
}

impl OptimizerConfig for CoproConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("breadth", self.breadth)?;
        at_least_one("numVariations", self.num_variations)?;
        at_least_one("sampleSize", self.sample_size)?;
        at_least_one("maxConcurrency", self.max_concurrency)?;
        temperature_range(self.temperature)
    }
}

/// How [`RandomSearchOptimizer`](crate::RandomSearchOptimizer) proposes candidates.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchStrategy {
    /// Perturb the base prompt through the prompt model.
    Mutation,
    /// Recombine fragments of the best prompts and demo sets found so far.
    Crossover,
    /// Reorder and resample the prompt's sentences; no model needed.
    #[default]
    Random,
}

impl SearchStrategy {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Mutation => "mutation",
            Self::Crossover => "crossover",
            Self::Random => "random",
        }
    }
}

/// Configuration for [`RandomSearchOptimizer`](crate::RandomSearchOptimizer).
#[derive(Clone, Debug, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct RandomSearchConfig {
    #[builder(default = 8)]
    pub num_candidates: usize,
    /// Hard cap on example-level evaluation calls, baseline included.
    #[builder(default = 200)]
    pub budget: usize,
    #[builder(default)]
    pub strategy: SearchStrategy,
    /// Upper bound on demonstrations sampled per candidate.
    #[builder(default = 4)]
    pub max_demos: usize,
    #[builder(default = 1.0)]
    pub temperature: f32,
    #[builder(default = 8)]
    pub max_concurrency: usize,
    pub seed: Option<u64>,
    #[builder(default = false)]
    pub verbose: bool,
}

impl Default for RandomSearchConfig {
    fn default() -> Self {
        RandomSearchConfig::builder().build()
    }
}

impl OptimizerConfig for RandomSearchConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        at_least_one("numCandidates", self.num_candidates)?;
        at_least_one("budget", self.budget)?;
        at_least_one("maxConcurrency", self.max_concurrency)?;
        temperature_range(self.temperature)
    }
}

/// Reduction applied to numeric ensemble outputs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Reducer {
    #[default]
    Mean,
    Median,
    Min,
    Max,
}

impl Reducer {
    pub fn reduce(&self, values: &[f64]) -> Option<f64> {
        if values.is_empty() {
            return None;
        }
        let value = match self {
            Self::Mean => values.iter().sum::<f64>() / values.len() as f64,
            Self::Median => {
                let mut sorted = values.to_vec();
                sorted.sort_by(f64::total_cmp);
                let mid = sorted.len() / 2;
                if sorted.len() % 2 == 0 {
                    (sorted[mid - 1] + sorted[mid]) / 2.0
                } else {
                    sorted[mid]
                }
            }
            Self::Min => values.iter().copied().fold(f64::INFINITY, f64::min),
            Self::Max => values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
        };
        Some(value)
    }
}

/// How ensemble member outputs are combined.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VotingMode {
    /// Reduce numerically when every vote parses as a number, otherwise vote.
    #[default]
    Auto,
    /// Always take the majority label.
    Majority,
    /// Always reduce numerically; non-numeric votes abstain.
    Reduce,
}

/// Configuration for [`EnsembleOptimizer`](crate::EnsembleOptimizer).
#[derive(Clone, Debug, Default, PartialEq, Builder, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct EnsembleConfig {
    #[builder(default)]
    pub reducer: Reducer,
    #[builder(default)]
    pub voting_mode: VotingMode,
}

impl OptimizerConfig for EnsembleConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        Ok(())
    }
}
