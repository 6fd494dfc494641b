//! Pure scoring functions.
//!
//! Every metric returns a score in `[0, 1]` and is deterministic for identical
//! inputs. Text comparisons go through [`normalize_text`] (case-folding plus
//! whitespace trimming and collapsing).

use std::collections::HashSet;
use std::sync::Arc;

use crate::{ConfigError, Example, ExampleInput, Prediction};

/// Context passed to a metric when the prediction came out of a bootstrapping
/// step rather than a plain evaluation pass.
///
/// Metrics can use it to be stricter about which outputs are good enough to
/// become demonstrations.
#[derive(Clone, Debug)]
pub struct Trace {
    /// Prompt installed on the module that produced the output.
    pub prompt: String,
    pub input: ExampleInput,
    pub output: String,
}

/// Scores one prediction against its labeled example.
///
/// Any `Fn(&Example, &Prediction) -> f32` closure is a metric that ignores the
/// trace.
pub trait Metric: Send + Sync {
    fn score(&self, example: &Example, prediction: &Prediction, trace: Option<&Trace>) -> f32;
}

impl<F> Metric for F
where
    F: Fn(&Example, &Prediction) -> f32 + Send + Sync,
{
    fn score(&self, example: &Example, prediction: &Prediction, _trace: Option<&Trace>) -> f32 {
        self(example, prediction)
    }
}

pub fn normalize_text(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

/// Maps NaN to 0 and clamps everything else into `[0, 1]`.
pub fn clamp_score(score: f32) -> f32 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

fn normalized_answers(example: &Example) -> Vec<String> {
    example
        .output
        .acceptable()
        .iter()
        .map(|answer| normalize_text(answer))
        .collect()
}

/// Share of `prediction`'s tokens that also occur in `answer`.
fn token_overlap(prediction: &str, answer: &str) -> f32 {
    let predicted: Vec<&str> = prediction.split_whitespace().collect();
    if predicted.is_empty() {
        return 0.0;
    }
    let accepted: HashSet<&str> = answer.split_whitespace().collect();
    let hits = predicted
        .iter()
        .filter(|token| accepted.contains(*token))
        .count();
    hits as f32 / predicted.len() as f32
}

/// Normalized equality against any acceptable answer.
///
/// With `frac` set, a prediction whose token overlap with some acceptable
/// answer reaches `frac` also counts as a match; below that the overlap itself
/// is returned.
#[derive(Clone, Copy, Debug, Default)]
pub struct ExactMatch {
    frac: Option<f32>,
}

impl ExactMatch {
    pub fn new() -> Self {
        Self { frac: None }
    }

    pub fn with_frac(frac: f32) -> Result<Self, ConfigError> {
        if !(frac > 0.0 && frac <= 1.0) {
            return Err(ConfigError::out_of_range("frac", frac, "(0, 1]"));
        }
        Ok(Self { frac: Some(frac) })
    }
}

impl Metric for ExactMatch {
    fn score(&self, example: &Example, prediction: &Prediction, _trace: Option<&Trace>) -> f32 {
        let answers = normalized_answers(example);
        if answers.is_empty() {
            return 0.0;
        }

        let predicted = normalize_text(&prediction.output);
        if answers.iter().any(|answer| *answer == predicted) {
            return 1.0;
        }

        let Some(frac) = self.frac else {
            return 0.0;
        };
        let overlap = answers
            .iter()
            .map(|answer| token_overlap(&predicted, answer))
            .fold(0.0, f32::max);
        if overlap >= frac { 1.0 } else { clamp_score(overlap) }
    }
}

/// Normalized Levenshtein similarity of at least `threshold` against any
/// acceptable answer.
#[derive(Clone, Copy, Debug)]
pub struct FuzzyMatch {
    threshold: f32,
}

impl FuzzyMatch {
    pub fn new(threshold: f32) -> Result<Self, ConfigError> {
        if !(0.0..=1.0).contains(&threshold) {
            return Err(ConfigError::out_of_range("threshold", threshold, "[0, 1]"));
        }
        Ok(Self { threshold })
    }

    pub fn similarity(a: &str, b: &str) -> f32 {
        strsim::normalized_levenshtein(&normalize_text(a), &normalize_text(b)) as f32
    }
}

impl Default for FuzzyMatch {
    fn default() -> Self {
        Self { threshold: 0.8 }
    }
}

impl Metric for FuzzyMatch {
    fn score(&self, example: &Example, prediction: &Prediction, _trace: Option<&Trace>) -> f32 {
        let best = example
            .output
            .acceptable()
            .iter()
            .map(|answer| Self::similarity(&prediction.output, answer))
            .fold(None, |best: Option<f32>, s| Some(best.map_or(s, |b| b.max(s))));

        match best {
            Some(similarity) if similarity >= self.threshold => 1.0,
            _ => 0.0,
        }
    }
}

/// Expected answer appears inside one of the prediction's context passages.
#[derive(Clone, Copy, Debug, Default)]
pub struct PassageMatch;

impl Metric for PassageMatch {
    fn score(&self, example: &Example, prediction: &Prediction, _trace: Option<&Trace>) -> f32 {
        let passages: Vec<String> = prediction
            .passages()
            .iter()
            .map(|passage| normalize_text(passage))
            .collect();

        let found = normalized_answers(example)
            .iter()
            .filter(|answer| !answer.is_empty())
            .any(|answer| passages.iter().any(|passage| passage.contains(answer.as_str())));
        if found { 1.0 } else { 0.0 }
    }
}

/// Predicted output contains the expected text.
#[derive(Clone, Copy, Debug, Default)]
pub struct ContainsMatch;

impl Metric for ContainsMatch {
    fn score(&self, example: &Example, prediction: &Prediction, _trace: Option<&Trace>) -> f32 {
        let predicted = normalize_text(&prediction.output);
        let found = normalized_answers(example)
            .iter()
            .filter(|answer| !answer.is_empty())
            .any(|answer| predicted.contains(answer.as_str()));
        if found { 1.0 } else { 0.0 }
    }
}

/// Both sides parse as numbers within an absolute `tolerance` of each other.
#[derive(Clone, Copy, Debug)]
pub struct NumericMatch {
    tolerance: f64,
}

impl NumericMatch {
    pub fn new(tolerance: f64) -> Result<Self, ConfigError> {
        if !(tolerance.is_finite() && tolerance >= 0.0) {
            return Err(ConfigError::out_of_range("tolerance", tolerance, ">= 0"));
        }
        Ok(Self { tolerance })
    }
}

impl Default for NumericMatch {
    fn default() -> Self {
        Self { tolerance: 1e-6 }
    }
}

pub fn parse_number(text: &str) -> Option<f64> {
    text.trim()
        .replace(',', "")
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite())
}

impl Metric for NumericMatch {
    fn score(&self, example: &Example, prediction: &Prediction, _trace: Option<&Trace>) -> f32 {
        let Some(predicted) = parse_number(&prediction.output) else {
            return 0.0;
        };
        let within = example
            .output
            .acceptable()
            .iter()
            .filter_map(|answer| parse_number(answer))
            .any(|expected| (predicted - expected).abs() <= self.tolerance);
        if within { 1.0 } else { 0.0 }
    }
}

/// Weighted average `Σ(wᵢ·sᵢ) / Σwᵢ` over a list of metrics.
///
/// Weights need not sum to 1.
#[derive(Clone)]
pub struct CompositeMetric {
    parts: Vec<(Arc<dyn Metric>, f32)>,
    total_weight: f32,
}

impl CompositeMetric {
    pub fn new(parts: Vec<(Arc<dyn Metric>, f32)>) -> Result<Self, ConfigError> {
        if parts.is_empty() {
            return Err(ConfigError::Empty {
                what: "composite metric",
            });
        }
        for (index, (_, weight)) in parts.iter().enumerate() {
            if !(weight.is_finite() && *weight >= 0.0) {
                return Err(ConfigError::InvalidWeight {
                    index,
                    weight: *weight,
                });
            }
        }
        let total_weight: f32 = parts.iter().map(|(_, weight)| weight).sum();
        if total_weight <= 0.0 {
            return Err(ConfigError::out_of_range(
                "total weight",
                total_weight,
                "> 0",
            ));
        }
        Ok(Self {
            parts,
            total_weight,
        })
    }
}

impl Metric for CompositeMetric {
    fn score(&self, example: &Example, prediction: &Prediction, trace: Option<&Trace>) -> f32 {
        let weighted: f32 = self
            .parts
            .iter()
            .map(|(metric, weight)| weight * clamp_score(metric.score(example, prediction, trace)))
            .sum();
        clamp_score(weighted / self.total_weight)
    }
}
