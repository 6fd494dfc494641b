use async_trait::async_trait;
use futures::future::join_all;
use indexmap::IndexMap;
use tracing::{debug, warn};

use super::{EnsembleConfig, OptimizationResult, Optimizer, OptimizerConfig, VotingMode};
use crate::evaluate::{EvaluationResult, Evaluator, Metric, normalize_text, parse_number};
use crate::{
    ConfigError, Example, ExampleInput, LmUsage, Module, OptimizeError, PredictError, Prediction,
};

/// Builds [`Ensemble`]s from finished optimization runs.
///
/// Not a search algorithm: it only combines modules that were optimized
/// elsewhere.
///
/// ```ignore
/// let combiner = EnsembleOptimizer::new(EnsembleConfig::default())?;
/// let ensemble = combiner
///     .compile(&[&bootstrap, &copro], &qa, &trainset, Some(&valset), &metric)
///     .await?;
/// let report = ensemble.evaluate(&valset, &metric).await;
/// ```
#[derive(Clone, Debug, Default)]
pub struct EnsembleOptimizer {
    config: EnsembleConfig,
}

impl EnsembleOptimizer {
    pub fn new(config: EnsembleConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Members are registered in `results` order, which decides vote ties.
    pub fn combine(&self, results: Vec<OptimizationResult>) -> Result<Ensemble, ConfigError> {
        self.from_modules(results.into_iter().map(|result| result.best_module).collect())
    }

    pub fn from_modules(&self, members: Vec<Box<dyn Module>>) -> Result<Ensemble, ConfigError> {
        if members.is_empty() {
            return Err(ConfigError::Empty {
                what: "ensemble members",
            });
        }
        Ok(Ensemble {
            members,
            config: self.config.clone(),
        })
    }

    /// Runs every optimizer against the same inputs concurrently and combines
    /// their best modules. The first failed run fails the whole call.
    #[tracing::instrument(
        name = "tuner.ensemble.compile",
        level = "debug",
        skip_all,
        fields(optimizers = optimizers.len())
    )]
    pub async fn compile(
        &self,
        optimizers: &[&dyn Optimizer],
        module: &dyn Module,
        trainset: &[Example],
        valset: Option<&[Example]>,
        metric: &dyn Metric,
    ) -> Result<Ensemble, OptimizeError> {
        if optimizers.is_empty() {
            return Err(ConfigError::Empty {
                what: "ensemble optimizers",
            }
            .into());
        }

        let runs = join_all(
            optimizers
                .iter()
                .map(|optimizer| optimizer.optimize(module, trainset, valset, metric)),
        )
        .await;

        let mut results = Vec::with_capacity(runs.len());
        for (optimizer, run) in optimizers.iter().zip(runs) {
            let result = run?;
            debug!(
                optimizer = optimizer.name(),
                score = result.final_score,
                "ensemble member optimized"
            );
            results.push(result);
        }
        Ok(self.combine(results)?)
    }
}

/// Scores of an ensemble next to the scores of each member on the same data.
#[derive(Clone, Debug)]
pub struct EnsembleEvaluation {
    pub ensemble: EvaluationResult,
    /// In member registration order.
    pub members: Vec<EvaluationResult>,
}

/// Several modules answering as one.
///
/// `predict` asks every member concurrently. A failing member abstains; the
/// call fails only when every member fails. Numeric answers are reduced with
/// the configured [`Reducer`](super::Reducer), anything else goes to a
/// majority vote on normalized text, ties going to the label seen first in
/// member order.
#[derive(Clone)]
pub struct Ensemble {
    members: Vec<Box<dyn Module>>,
    config: EnsembleConfig,
}

/// Integral values print without a fractional part.
fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        value.to_string()
    }
}

impl Ensemble {
    pub fn members(&self) -> &[Box<dyn Module>] {
        &self.members
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Evaluates with the default concurrency ceiling.
    pub async fn evaluate(&self, dataset: &[Example], metric: &dyn Metric) -> EnsembleEvaluation {
        self.evaluate_with(&Evaluator::default(), dataset, metric)
            .await
    }

    #[tracing::instrument(
        name = "tuner.ensemble.evaluate",
        level = "debug",
        skip_all,
        fields(members = self.members.len(), examples = dataset.len())
    )]
    pub async fn evaluate_with(
        &self,
        evaluator: &Evaluator,
        dataset: &[Example],
        metric: &dyn Metric,
    ) -> EnsembleEvaluation {
        let ensemble = evaluator.evaluate(self, dataset, metric).await;
        let members = join_all(
            self.members
                .iter()
                .map(|member| evaluator.evaluate(member.as_ref(), dataset, metric)),
        )
        .await;
        EnsembleEvaluation { ensemble, members }
    }

    fn reduce(&self, votes: &[Prediction]) -> Option<Prediction> {
        let numeric: Vec<(usize, f64)> = votes
            .iter()
            .enumerate()
            .filter_map(|(i, vote)| parse_number(&vote.output).map(|value| (i, value)))
            .collect();
        if numeric.is_empty() {
            return None;
        }
        let values: Vec<f64> = numeric.iter().map(|(_, value)| *value).collect();
        let value = self.config.reducer.reduce(&values)?;
        let mut combined = votes[numeric[0].0].clone();
        combined.output = format_number(value);
        Some(combined)
    }

    fn majority(votes: &[Prediction]) -> Option<Prediction> {
        let mut tally: IndexMap<String, (usize, usize)> = IndexMap::new();
        for (i, vote) in votes.iter().enumerate() {
            tally.entry(normalize_text(&vote.output)).or_insert((0, i)).0 += 1;
        }

        let mut winner: Option<(usize, usize)> = None;
        for (count, first) in tally.values() {
            if winner.is_none_or(|(best, _)| *count > best) {
                winner = Some((*count, *first));
            }
        }
        winner.map(|(_, first)| votes[first].clone())
    }

    fn combine_votes(&self, votes: Vec<Prediction>) -> Option<Prediction> {
        if votes.len() == 1 {
            return votes.into_iter().next();
        }
        let usage: LmUsage = votes.iter().map(Prediction::usage).sum();
        let all_numeric = votes
            .iter()
            .all(|vote| parse_number(&vote.output).is_some());

        let combined = match self.config.voting_mode {
            VotingMode::Auto if all_numeric => self.reduce(&votes),
            VotingMode::Auto | VotingMode::Majority => Self::majority(&votes),
            VotingMode::Reduce => self.reduce(&votes).or_else(|| Self::majority(&votes)),
        };
        combined.map(|prediction| prediction.with_usage(usage))
    }
}

#[async_trait]
impl Module for Ensemble {
    #[tracing::instrument(
        name = "tuner.ensemble.predict",
        level = "trace",
        skip_all,
        fields(members = self.members.len())
    )]
    async fn predict(&self, input: &ExampleInput) -> Result<Prediction, PredictError> {
        if let [only] = self.members.as_slice() {
            return only.predict(input).await;
        }
        let outcomes = join_all(self.members.iter().map(|member| member.predict(input))).await;

        let mut votes = Vec::with_capacity(outcomes.len());
        for (index, outcome) in outcomes.into_iter().enumerate() {
            match outcome {
                Ok(prediction) => votes.push(prediction),
                Err(err) => {
                    let error = format!("{:#}", anyhow::Error::new(err));
                    warn!(member = index, error = %error, "ensemble member abstained");
                }
            }
        }

        self.combine_votes(votes)
            .ok_or(PredictError::AllMembersFailed {
                members: self.members.len(),
            })
    }

    /// The first member's instruction.
    fn prompt(&self) -> String {
        self.members
            .first()
            .map(|member| member.prompt())
            .unwrap_or_default()
    }

    /// Installs `prompt` on every member.
    fn set_prompt(&mut self, prompt: String) {
        for member in &mut self.members {
            member.set_prompt(prompt.clone());
        }
    }

    fn box_clone(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }
}
