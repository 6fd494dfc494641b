use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rand::seq::index;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::warn;

use super::{
    CoproConfig, OptimizationResult, Optimizer, OptimizerConfig, PromptingTips, RoundRecord,
    RunLedger, clean_instruction, describe_candidate, rng_from_seed,
};
use crate::data::format_demos;
use crate::evaluate::{Evaluator, Metric};
use crate::{
    ConfigError, Example, GenerateOptions, LMResponse, LanguageModel, LmError, Module,
    OptimizeError,
};

/// Beam search over instructions.
///
/// COPRO keeps the `breadth` best instructions found so far. Every iteration it
/// asks the prompt model for `num_variations` rewrites of each beam member,
/// scores the new instructions on the evaluation set, and prunes the merged
/// pool back to `breadth` (ties prefer earlier-discovered candidates). The
/// base module's demonstrations are carried over unchanged.
///
/// # Cost
///
/// Per iteration: `beam × num_variations` prompt-model calls, then one full
/// evaluation per distinct new instruction.
///
/// ```ignore
/// let copro = CoproOptimizer::new(CoproConfig::builder().breadth(4).depth(2).build(), prompt_lm)?;
/// let result = copro.optimize(&qa, &trainset, None, &ExactMatch::new()).await?;
/// ```
#[derive(Clone)]
pub struct CoproOptimizer {
    config: CoproConfig,
    prompt_model: Arc<dyn LanguageModel>,
    tips: PromptingTips,
}

#[derive(Clone, Debug)]
struct BeamEntry {
    instruction: String,
    score: f32,
}

impl CoproOptimizer {
    pub fn new(
        config: CoproConfig,
        prompt_model: Arc<dyn LanguageModel>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            prompt_model,
            tips: PromptingTips::default_tips(),
        })
    }

    pub fn with_tips(mut self, tips: PromptingTips) -> Self {
        self.tips = tips;
        self
    }

    pub fn config(&self) -> &CoproConfig {
        &self.config
    }

    fn variation_request(&self, instruction: &str, context: &[Example], tip: Option<&str>) -> String {
        let mut request = String::from(
            "You are refining the instruction given to a language model for the task below.\n\n",
        );
        request.push_str(&format!("Current instruction:\n{instruction}\n\n"));
        if !context.is_empty() {
            request.push_str(&format!("Task examples:\n{}\n\n", format_demos(context)));
        }
        if let Some(tip) = tip {
            request.push_str(&format!("Consider this advice: {tip}\n\n"));
        }
        request.push_str("Write one improved instruction. Reply with the instruction only.");
        request
    }

    fn candidate(base: &dyn Module, instruction: &str) -> Box<dyn Module> {
        let mut candidate = base.box_clone();
        candidate.set_prompt(instruction.to_string());
        candidate
    }
}

#[async_trait]
impl Optimizer for CoproOptimizer {
    fn name(&self) -> &'static str {
        "copro"
    }

    #[tracing::instrument(
        name = "tuner.copro.optimize",
        level = "debug",
        skip_all,
        fields(breadth = self.config.breadth, depth = self.config.depth)
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
        let options = GenerateOptions::default().with_temperature(self.config.temperature);
        let mut rng = rng_from_seed(self.config.seed);
        let mut ledger = RunLedger::default();
        let demo_count = module.demos().len();

        let baseline = evaluator.evaluate(module, evalset, metric).await;
        ledger.record_evaluation(&baseline);
        let mut beam = vec![BeamEntry {
            instruction: module.prompt(),
            score: baseline.score,
        }];
        let mut seen: HashSet<String> = beam.iter().map(|e| e.instruction.clone()).collect();
        ledger.push_round(
            self.name(),
            self.config.verbose,
            RoundRecord {
                round: 0,
                score: baseline.score,
                candidate: describe_candidate(&beam[0].instruction, demo_count),
                evaluated: 1,
                kept: 1,
                failures: baseline.failures.len(),
                generation_failures: 0,
            },
        );

        for depth in 1..=self.config.depth {
            let size = self.config.sample_size.min(trainset.len());
            let mut picked = index::sample(&mut rng, trainset.len(), size).into_vec();
            picked.sort_unstable();
            let context: Vec<Example> = picked.iter().map(|&i| trainset[i].clone()).collect();

            let requests: Vec<String> = beam
                .iter()
                .enumerate()
                .flat_map(|(b, entry)| {
                    (0..self.config.num_variations).map(move |v| (b, v, entry))
                })
                .map(|(b, v, entry)| {
                    let tip = self.tips.get(b * self.config.num_variations + v + depth);
                    self.variation_request(&entry.instruction, &context, tip)
                })
                .collect();

            let pending: Vec<_> = requests
                .iter()
                .map(|request| self.prompt_model.generate(request, &options))
                .collect();
            let replies: Vec<Result<LMResponse, LmError>> = stream::iter(pending)
                .buffered(self.config.max_concurrency)
                .collect()
                .await;

            let mut generation_failures = 0;
            let mut last_error = None;
            let mut fresh = Vec::new();
            for reply in replies {
                let outcome = reply.and_then(|response| {
                    ledger.record_generation(response.usage);
                    let instruction = clean_instruction(&response.text);
                    if instruction.is_empty() {
                        Err(LmError::EmptyResponse {
                            model: self.prompt_model.model_name().to_string(),
                        })
                    } else {
                        Ok(instruction)
                    }
                });
                match outcome {
                    Ok(instruction) => {
                        if seen.insert(instruction.clone()) {
                            fresh.push(instruction);
                        }
                    }
                    Err(err) => {
                        let error = format!("{:#}", anyhow::Error::new(err.clone()));
                        warn!(depth, error = %error, "variation request failed; skipping");
                        generation_failures += 1;
                        last_error = Some(err);
                    }
                }
            }

            if generation_failures == requests.len() {
                if let Some(source) = last_error {
                    return Err(OptimizeError::Generation {
                        stage: "copro variation",
                        source,
                    });
                }
            }

            let mut failures = 0;
            for instruction in &fresh {
                let candidate = Self::candidate(module, instruction);
                let result = evaluator.evaluate(candidate.as_ref(), evalset, metric).await;
                ledger.record_evaluation(&result);
                failures += result.failures.len();
                beam.push(BeamEntry {
                    instruction: instruction.clone(),
                    score: result.score,
                });
            }

            beam.sort_by(|a, b| b.score.total_cmp(&a.score));
            beam.truncate(self.config.breadth);

            ledger.push_round(
                self.name(),
                self.config.verbose,
                RoundRecord {
                    round: depth,
                    score: beam[0].score,
                    candidate: describe_candidate(&beam[0].instruction, demo_count),
                    evaluated: fresh.len(),
                    kept: beam.len(),
                    failures,
                    generation_failures,
                },
            );
        }

        let best = &beam[0];
        Ok(ledger.finish(Self::candidate(module, &best.instruction), best.score))
    }
}
