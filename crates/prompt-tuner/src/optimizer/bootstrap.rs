use async_trait::async_trait;
use futures::future::join_all;
use rand::rngs::StdRng;
use rand::seq::index;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    BootstrapConfig, OptimizationResult, Optimizer, OptimizerConfig, RoundRecord, RunLedger,
    describe_candidate, rng_from_seed,
};
use crate::evaluate::{Evaluator, Metric, Trace, clamp_score};
use crate::{
    ConfigError, Demonstrated, Example, ExpectedOutput, LanguageModel, Module, OptimizeError,
    Predict,
};

/// Few-shot demonstration synthesis.
///
/// Each round picks up to `max_labeled` training examples the base module
/// already handles well, asks a teacher to answer further training examples,
/// and keeps the teacher outputs whose metric score reaches
/// `acceptance_threshold` (at most `max_bootstrapped`). The labeled and
/// bootstrapped examples are prepended to the base instruction as
/// demonstrations. The unaugmented module is always a candidate, so the result
/// never scores below it on the evaluation set.
///
/// Without a teacher model the base module itself, primed with the labeled
/// demonstrations, acts as the teacher.
///
/// ```ignore
/// let bootstrap = BootstrapOptimizer::new(
///     BootstrapConfig::builder().max_labeled(4).max_rounds(3).seed(7).build(),
///     Some(teacher_lm),
/// )?;
/// let result = bootstrap.optimize(&qa, &trainset, Some(&valset), &ExactMatch::new()).await?;
/// ```
#[derive(Clone)]
pub struct BootstrapOptimizer {
    config: BootstrapConfig,
    teacher: Option<Arc<dyn LanguageModel>>,
}

/// Teacher outputs gathered for one round.
struct Bootstrapped {
    demos: Vec<Example>,
    failures: usize,
}

impl BootstrapOptimizer {
    pub fn new(
        config: BootstrapConfig,
        teacher: Option<Arc<dyn LanguageModel>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config, teacher })
    }

    pub fn config(&self) -> &BootstrapConfig {
        &self.config
    }

    /// Training indices considered in `round`, ranked best-handled first.
    ///
    /// Ties keep dataset order.
    fn ranked_pool(&self, round: usize, scores: &[f32], rng: &mut StdRng) -> Vec<usize> {
        let len = scores.len();
        let mut pool: Vec<usize> = if round == 1 {
            (0..len).collect()
        } else {
            let size = len.min(self.config.max_labeled + self.config.max_bootstrapped);
            index::sample(rng, len, size).into_vec()
        };
        pool.sort_unstable();
        pool.sort_by(|a, b| scores[*b].total_cmp(&scores[*a]));
        pool
    }

    fn teacher_module(&self, module: &dyn Module, labeled: &[Example]) -> Demonstrated {
        match &self.teacher {
            Some(lm) => {
                let predict = Predict::builder()
                    .lm(Arc::clone(lm))
                    .instruction(module.prompt())
                    .build();
                Demonstrated::new(&predict, labeled.to_vec())
            }
            None => Demonstrated::new(module, labeled.to_vec()),
        }
    }

    /// Runs the teacher over `candidates` in chunks of `max_concurrency`,
    /// stopping once `max_bootstrapped` outputs are accepted.
    #[tracing::instrument(
        name = "tuner.bootstrap.teach",
        level = "debug",
        skip_all,
        fields(candidates = candidates.len())
    )]
    async fn bootstrap_demos(
        &self,
        teacher: &Demonstrated,
        candidates: &[&Example],
        metric: &dyn Metric,
        ledger: &mut RunLedger,
    ) -> Bootstrapped {
        let mut gathered = Bootstrapped {
            demos: Vec::new(),
            failures: 0,
        };
        if self.config.max_bootstrapped == 0 {
            return gathered;
        }

        let prompt = teacher.composed_prompt();
        for chunk in candidates.chunks(self.config.max_concurrency) {
            let outcomes =
                join_all(chunk.iter().map(|example| teacher.predict(&example.input))).await;

            for (example, outcome) in chunk.iter().zip(outcomes) {
                let prediction = match outcome {
                    Ok(prediction) => prediction,
                    Err(err) => {
                        let error = format!("{:#}", anyhow::Error::new(err));
                        warn!(error = %error, "teacher prediction failed; skipping example");
                        gathered.failures += 1;
                        continue;
                    }
                };
                ledger.record_generation(prediction.usage());

                if gathered.demos.len() >= self.config.max_bootstrapped {
                    continue;
                }
                let trace = Trace {
                    prompt: prompt.clone(),
                    input: example.input.clone(),
                    output: prediction.output.clone(),
                };
                let score = clamp_score(metric.score(example, &prediction, Some(&trace)));
                if score >= self.config.acceptance_threshold {
                    gathered.demos.push(Example {
                        input: example.input.clone(),
                        output: ExpectedOutput::Single(prediction.output),
                    });
                } else {
                    debug!(score, "teacher output rejected");
                }
            }

            if gathered.demos.len() >= self.config.max_bootstrapped {
                break;
            }
        }
        gathered
    }
}

#[async_trait]
impl Optimizer for BootstrapOptimizer {
    fn name(&self) -> &'static str {
        "bootstrap"
    }

    #[tracing::instrument(
        name = "tuner.bootstrap.optimize",
        level = "debug",
        skip_all,
        fields(train = trainset.len(), rounds = self.config.max_rounds)
    )]
    async fn optimize(
        &self,
        module: &dyn Module,
        trainset: &[Example],
        valset: Option<&[Example]>,
        metric: &dyn Metric,
    ) -> Result<OptimizationResult, OptimizeError> {
        if trainset.is_empty() {
            return Err(OptimizeError::EmptyTrainset);
        }
        let evalset = valset.unwrap_or(trainset);
        let evaluator = Evaluator::builder()
            .max_concurrency(self.config.max_concurrency)
            .build();
        let mut rng = rng_from_seed(self.config.seed);
        let mut ledger = RunLedger::default();

        let baseline = evaluator.evaluate(module, evalset, metric).await;
        ledger.record_evaluation(&baseline);
        let selection = match valset {
            Some(_) => {
                let scored = evaluator.evaluate(module, trainset, metric).await;
                ledger.record_evaluation(&scored);
                scored
            }
            None => baseline.clone(),
        };

        let mut best_module = module.box_clone();
        let mut best_score = baseline.score;
        ledger.push_round(
            self.name(),
            self.config.verbose,
            RoundRecord {
                round: 0,
                score: best_score,
                candidate: describe_candidate(&module.prompt(), module.demos().len()),
                evaluated: 1,
                kept: 1,
                failures: baseline.failures.len(),
                generation_failures: 0,
            },
        );

        for round in 1..=self.config.max_rounds {
            let pool = self.ranked_pool(round, &selection.individual_scores, &mut rng);
            let take = self.config.max_labeled.min(pool.len());
            let labeled: Vec<Example> = pool[..take].iter().map(|&i| trainset[i].clone()).collect();
            let remaining: Vec<&Example> = pool[take..].iter().map(|&i| &trainset[i]).collect();

            let teacher = self.teacher_module(module, &labeled);
            let bootstrapped = self
                .bootstrap_demos(&teacher, &remaining, metric, &mut ledger)
                .await;

            let mut demos = labeled;
            let accepted = bootstrapped.demos.len();
            demos.extend(bootstrapped.demos);
            let candidate = Demonstrated::new(module, demos);
            let result = evaluator.evaluate(&candidate, evalset, metric).await;
            ledger.record_evaluation(&result);

            debug!(
                round,
                labeled = take,
                bootstrapped = accepted,
                score = result.score,
                "bootstrap candidate scored"
            );
            if result.score > best_score {
                best_score = result.score;
                best_module = candidate.box_clone();
            }

            ledger.push_round(
                self.name(),
                self.config.verbose,
                RoundRecord {
                    round,
                    score: best_score,
                    candidate: describe_candidate(&best_module.prompt(), best_module.demos().len()),
                    evaluated: 1,
                    kept: 1,
                    failures: result.failures.len(),
                    generation_failures: bootstrapped.failures,
                },
            );

            if let Some(threshold) = self.config.early_stopping_threshold {
                if result.score >= threshold {
                    debug!(round, score = result.score, threshold, "early stopping");
                    break;
                }
            }
        }

        Ok(ledger.finish(best_module, best_score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_round_ranks_everything_with_stable_ties() {
        let optimizer = BootstrapOptimizer::new(BootstrapConfig::default(), None).unwrap();
        let mut rng = rng_from_seed(Some(1));
        let pool = optimizer.ranked_pool(1, &[0.0, 1.0, 0.5, 1.0], &mut rng);
        assert_eq!(pool, vec![1, 3, 2, 0]);
    }

    #[test]
    fn later_rounds_sample_a_bounded_pool() {
        let config = BootstrapConfig::builder()
            .max_labeled(2)
            .max_bootstrapped(1)
            .build();
        let optimizer = BootstrapOptimizer::new(config, None).unwrap();
        let mut rng = rng_from_seed(Some(1));
        let pool = optimizer.ranked_pool(2, &[0.0; 10], &mut rng);
        assert_eq!(pool.len(), 3);
        assert!(pool.windows(2).all(|pair| pair[0] < pair[1]));
    }
}
