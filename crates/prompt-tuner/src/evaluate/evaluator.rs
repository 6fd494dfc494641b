use bon::Builder;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use super::metrics::{Metric, clamp_score};
use crate::{Example, LmUsage, Module};

/// An example whose `predict` call failed. It scored 0 but did not abort the pass.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationFailure {
    pub index: usize,
    pub error: String,
}

/// Outcome of running a module over a dataset.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EvaluationResult {
    /// Arithmetic mean of `individual_scores`; 0 for an empty dataset.
    pub score: f32,
    /// One score per dataset example, in dataset order.
    pub individual_scores: Vec<f32>,
    pub failures: Vec<EvaluationFailure>,
    pub usage: LmUsage,
    pub evaluation_time_ms: u64,
}

impl EvaluationResult {
    /// Example-level evaluation calls this result consumed.
    pub fn calls(&self) -> usize {
        self.individual_scores.len()
    }

    pub fn is_failure(&self, index: usize) -> bool {
        self.failures.iter().any(|failure| failure.index == index)
    }
}

pub fn average_score(scores: &[f32]) -> f32 {
    if scores.is_empty() {
        return 0.0;
    }
    scores.iter().sum::<f32>() / scores.len() as f32
}

struct ExampleOutcome {
    index: usize,
    score: f32,
    usage: LmUsage,
    error: Option<String>,
}

struct Tally {
    scores: Vec<f32>,
    failures: Vec<EvaluationFailure>,
    usage: LmUsage,
}

impl Tally {
    fn new(len: usize) -> Self {
        Self {
            scores: vec![0.0; len],
            failures: Vec::new(),
            usage: LmUsage::default(),
        }
    }

    fn record(mut self, outcome: ExampleOutcome) -> Self {
        self.scores[outcome.index] = outcome.score;
        self.usage += outcome.usage;
        if let Some(error) = outcome.error {
            self.failures.push(EvaluationFailure {
                index: outcome.index,
                error,
            });
        }
        self
    }

    fn finish(self, elapsed: Duration) -> EvaluationResult {
        EvaluationResult {
            score: average_score(&self.scores),
            individual_scores: self.scores,
            failures: self.failures,
            usage: self.usage,
            evaluation_time_ms: elapsed.as_millis() as u64,
        }
    }
}

async fn score_example(
    module: &dyn Module,
    metric: &dyn Metric,
    index: usize,
    example: &Example,
) -> ExampleOutcome {
    match module.predict(&example.input).await {
        Ok(prediction) => ExampleOutcome {
            index,
            score: clamp_score(metric.score(example, &prediction, None)),
            usage: prediction.usage(),
            error: None,
        },
        Err(err) => {
            let error = format!("{:#}", anyhow::Error::new(err));
            warn!(index, error = %error, "prediction failed; example scored as 0");
            ExampleOutcome {
                index,
                score: 0.0,
                usage: LmUsage::default(),
                error: Some(error),
            }
        }
    }
}

/// Runs a module over a dataset and scores every example.
///
/// Up to `max_concurrency` predictions are in flight at once. Results are folded
/// back in dataset order, so `individual_scores[i]` always belongs to
/// `dataset[i]` regardless of completion order.
#[derive(Builder, Clone, Copy, Debug)]
pub struct Evaluator {
    #[builder(default = 8)]
    pub max_concurrency: usize,
}

impl Default for Evaluator {
    fn default() -> Self {
        Evaluator::builder().build()
    }
}

impl Evaluator {
    #[tracing::instrument(
        name = "tuner.evaluate",
        level = "debug",
        skip_all,
        fields(examples = dataset.len(), max_concurrency = self.max_concurrency)
    )]
    pub async fn evaluate(
        &self,
        module: &dyn Module,
        dataset: &[Example],
        metric: &dyn Metric,
    ) -> EvaluationResult {
        let started = Instant::now();

        let pending: Vec<_> = dataset
            .iter()
            .enumerate()
            .map(|(index, example)| score_example(module, metric, index, example))
            .collect();
        let tally = stream::iter(pending)
            .buffered(self.max_concurrency.max(1))
            .fold(Tally::new(dataset.len()), |tally, outcome| async move {
                tally.record(outcome)
            })
            .await;

        let result = tally.finish(started.elapsed());
        debug!(
            score = result.score,
            failures = result.failures.len(),
            "evaluation complete"
        );
        result
    }
}

/// Evaluates with the default concurrency ceiling.
pub async fn evaluate(
    module: &dyn Module,
    dataset: &[Example],
    metric: &dyn Metric,
) -> EvaluationResult {
    Evaluator::default().evaluate(module, dataset, metric).await
}
