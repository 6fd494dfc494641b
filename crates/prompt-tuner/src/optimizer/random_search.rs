use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use rand::Rng;
use rand::rngs::StdRng;
use rand::seq::{SliceRandom, index};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{
    OptimizationResult, Optimizer, OptimizerConfig, PromptingTips, RandomSearchConfig,
    RoundRecord, RunLedger, SearchStrategy, clean_instruction, describe_candidate, rng_from_seed,
};
use crate::data::format_demos;
use crate::evaluate::{Evaluator, Metric};
use crate::{
    ConfigError, Demonstrated, Example, GenerateOptions, LanguageModel, LmError, Module,
    OptimizeError,
};

/// Budgeted stochastic search over instructions and demonstration subsets.
///
/// Candidates come from one fixed [`SearchStrategy`]; each also samples up to
/// `max_demos` demonstrations from the training set. Scoring one candidate
/// costs one evaluation call per evaluation-set example, and the baseline
/// counts too. A candidate whose evaluation would overrun `budget` is never
/// started, so the run issues at most `budget` calls. Unscored candidates take
/// no part in best-selection.
///
/// ```ignore
/// let search = RandomSearchOptimizer::new(
///     RandomSearchConfig::builder().num_candidates(6).budget(60).seed(3).build(),
///     None,
/// )?;
/// let result = search.optimize(&qa, &trainset, Some(&valset), &ExactMatch::new()).await?;
/// assert!(result.evaluation_calls <= 60);
/// ```
#[derive(Clone)]
pub struct RandomSearchOptimizer {
    config: RandomSearchConfig,
    prompt_model: Option<Arc<dyn LanguageModel>>,
    tips: PromptingTips,
}

#[derive(Clone, Debug)]
struct Candidate {
    instruction: String,
    demos: Vec<Example>,
}

impl Candidate {
    fn key(&self) -> String {
        format!("{}\u{0}{}", self.instruction, format_demos(&self.demos))
    }

    fn build(&self, base: &dyn Module) -> Demonstrated {
        let mut module = Demonstrated::new(base, self.demos.clone());
        module.set_prompt(self.instruction.clone());
        module
    }
}

#[derive(Clone, Debug)]
struct Scored {
    candidate: Candidate,
    score: f32,
}

fn split_sentences(text: &str) -> Vec<String> {
    let mut sentences = Vec::new();
    let mut current = String::new();
    for ch in text.chars() {
        if ch == '\n' {
            push_sentence(&mut sentences, &mut current);
            continue;
        }
        current.push(ch);
        if matches!(ch, '.' | '!' | '?') {
            push_sentence(&mut sentences, &mut current);
        }
    }
    push_sentence(&mut sentences, &mut current);
    sentences
}

fn push_sentence(sentences: &mut Vec<String>, current: &mut String) {
    let sentence = current.trim();
    if !sentence.is_empty() {
        sentences.push(sentence.to_string());
    }
    current.clear();
}

/// Joins `head` of one prompt with the tail of another at random cut points.
fn crossover_instruction<R: Rng + ?Sized>(a: &str, b: &str, rng: &mut R) -> String {
    let left = split_sentences(a);
    let right = split_sentences(b);
    let cut_left = rng.gen_range(0..=left.len());
    let cut_right = rng.gen_range(0..=right.len());

    let mut child: Vec<String> = left[..cut_left].to_vec();
    for sentence in &right[cut_right..] {
        if !child.contains(sentence) {
            child.push(sentence.clone());
        }
    }
    if child.is_empty() {
        return a.to_string();
    }
    child.join(" ")
}

/// Pools both parents' demonstrations and draws a random subset.
fn crossover_demos<R: Rng + ?Sized>(
    a: &[Example],
    b: &[Example],
    max_demos: usize,
    rng: &mut R,
) -> Vec<Example> {
    let mut pool: Vec<Example> = a.to_vec();
    for demo in b {
        if !pool.contains(demo) {
            pool.push(demo.clone());
        }
    }
    pool.shuffle(rng);
    let take = rng.gen_range(0..=max_demos.min(pool.len()));
    pool.truncate(take);
    pool
}

/// Budget accounting in example-level evaluation calls.
#[derive(Debug)]
struct Budget {
    limit: usize,
    spent: usize,
}

impl Budget {
    fn try_spend(&mut self, cost: usize) -> bool {
        if self.spent + cost > self.limit {
            return false;
        }
        self.spent += cost;
        true
    }
}

/// Mutable state of one search run.
struct SearchRun<'a> {
    module: &'a dyn Module,
    evalset: &'a [Example],
    metric: &'a dyn Metric,
    evaluator: Evaluator,
    verbose: bool,
    budget: Budget,
    cost: usize,
    ledger: RunLedger,
    seen: HashSet<String>,
    scored: Vec<Scored>,
    /// Generation failures not yet attributed to a round.
    pending_failures: usize,
    best_module: Box<dyn Module>,
    best_score: f32,
}

impl SearchRun<'_> {
    /// Scores `candidate` if it is new and affordable. Returns `false` once the
    /// budget cannot cover another evaluation.
    async fn score(&mut self, candidate: Candidate) -> bool {
        if !self.seen.insert(candidate.key()) {
            debug!("duplicate candidate skipped");
            return true;
        }
        if !self.budget.try_spend(self.cost) {
            debug!(
                spent = self.budget.spent,
                limit = self.budget.limit,
                "budget exhausted; remaining candidates left unscored"
            );
            return false;
        }

        let module = candidate.build(self.module);
        let result = self.evaluator.evaluate(&module, self.evalset, self.metric).await;
        self.ledger.record_evaluation(&result);
        if result.score > self.best_score {
            self.best_score = result.score;
            self.best_module = module.box_clone();
        }
        self.scored.push(Scored {
            candidate,
            score: result.score,
        });

        self.ledger.push_round(
            "random_search",
            self.verbose,
            RoundRecord {
                round: self.scored.len() - 1,
                score: self.best_score,
                candidate: describe_candidate(
                    &self.best_module.prompt(),
                    self.best_module.demos().len(),
                ),
                evaluated: 1,
                kept: self.scored.len(),
                failures: result.failures.len(),
                generation_failures: std::mem::take(&mut self.pending_failures),
            },
        );
        true
    }

    /// Scored candidates, best first, ties in scoring order.
    fn ranked(&self) -> Vec<&Scored> {
        let mut ranked: Vec<&Scored> = self.scored.iter().collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));
        ranked
    }
}

impl RandomSearchOptimizer {
    /// Rejects `mutation` without a prompt model.
    pub fn new(
        config: RandomSearchConfig,
        prompt_model: Option<Arc<dyn LanguageModel>>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if config.strategy == SearchStrategy::Mutation && prompt_model.is_none() {
            return Err(ConfigError::MissingPromptModel {
                strategy: config.strategy.name(),
            });
        }
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

    pub fn config(&self) -> &RandomSearchConfig {
        &self.config
    }

    fn sample_demos(&self, trainset: &[Example], rng: &mut StdRng) -> Vec<Example> {
        let take = rng.gen_range(0..=self.config.max_demos.min(trainset.len()));
        let mut picked = index::sample(rng, trainset.len(), take).into_vec();
        picked.sort_unstable();
        picked.into_iter().map(|i| trainset[i].clone()).collect()
    }

    /// Model-free variant: shuffle the sentences, drop one, or add a tip.
    fn restructure(&self, instruction: &str, rng: &mut StdRng) -> String {
        let mut sentences = split_sentences(instruction);
        let operation = if sentences.len() < 2 {
            2
        } else {
            rng.gen_range(0..3)
        };
        match operation {
            0 => sentences.shuffle(rng),
            1 => {
                let drop = rng.gen_range(0..sentences.len());
                sentences.remove(drop);
            }
            _ => {
                if let Some(tip) = self.tips.choose(rng) {
                    let at = rng.gen_range(0..=sentences.len());
                    sentences.insert(at, tip.to_string());
                }
            }
        }
        sentences.join(" ")
    }

    fn mutation_request(instruction: &str, tip: Option<&str>) -> String {
        let mut request = String::from(
            "Rewrite the instruction below for a language model. Keep the task the same but \
             change the wording.\n\n",
        );
        request.push_str(&format!("Instruction:\n{instruction}\n\n"));
        if let Some(tip) = tip {
            request.push_str(&format!("Consider this advice: {tip}\n\n"));
        }
        request.push_str("Reply with the rewritten instruction only.");
        request
    }

    /// Asks the prompt model for `count` rewrites. Failed or empty replies are
    /// dropped; the run fails only if every request fails.
    #[tracing::instrument(
        name = "tuner.random_search.mutate",
        level = "debug",
        skip_all,
        fields(count = count)
    )]
    async fn mutate(
        &self,
        lm: &dyn LanguageModel,
        instruction: &str,
        count: usize,
        rng: &mut StdRng,
        ledger: &mut RunLedger,
    ) -> Result<(Vec<String>, usize), OptimizeError> {
        let requests: Vec<String> = (0..count)
            .map(|_| Self::mutation_request(instruction, self.tips.choose(rng)))
            .collect();
        let options = GenerateOptions::default().with_temperature(self.config.temperature);

        let pending: Vec<_> = requests
            .iter()
            .map(|request| lm.generate(request, &options))
            .collect();
        let replies: Vec<_> = stream::iter(pending)
            .buffered(self.config.max_concurrency)
            .collect()
            .await;

        let mut rewrites = Vec::new();
        let mut failures = 0;
        let mut last_error = None;
        for reply in replies {
            let outcome = reply.and_then(|response| {
                ledger.record_generation(response.usage);
                let rewrite = clean_instruction(&response.text);
                if rewrite.is_empty() {
                    Err(LmError::EmptyResponse {
                        model: lm.model_name().to_string(),
                    })
                } else {
                    Ok(rewrite)
                }
            });
            match outcome {
                Ok(rewrite) => rewrites.push(rewrite),
                Err(err) => {
                    let error = format!("{:#}", anyhow::Error::new(err.clone()));
                    warn!(error = %error, "mutation request failed; skipping candidate");
                    failures += 1;
                    last_error = Some(err);
                }
            }
        }

        match last_error {
            Some(source) if rewrites.is_empty() => Err(OptimizeError::Generation {
                stage: "random search mutation",
                source,
            }),
            _ => Ok((rewrites, failures)),
        }
    }

    /// First-generation instructions: model rewrites for `mutation`, random
    /// restructuring otherwise. Crossover never calls the prompt model.
    async fn seed_instructions(
        &self,
        instruction: &str,
        count: usize,
        rng: &mut StdRng,
        ledger: &mut RunLedger,
    ) -> Result<(Vec<String>, usize), OptimizeError> {
        match (&self.prompt_model, self.config.strategy) {
            (Some(lm), SearchStrategy::Mutation) => {
                self.mutate(lm.as_ref(), instruction, count, rng, ledger).await
            }
            _ => Ok((
                (0..count).map(|_| self.restructure(instruction, rng)).collect(),
                0,
            )),
        }
    }
}

#[async_trait]
impl Optimizer for RandomSearchOptimizer {
    fn name(&self) -> &'static str {
        "random_search"
    }

    #[tracing::instrument(
        name = "tuner.random_search.optimize",
        level = "debug",
        skip_all,
        fields(
            strategy = self.config.strategy.name(),
            candidates = self.config.num_candidates,
            budget = self.config.budget
        )
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
        let mut rng = rng_from_seed(self.config.seed);
        let mut run = SearchRun {
            module,
            evalset,
            metric,
            evaluator: Evaluator::builder()
                .max_concurrency(self.config.max_concurrency)
                .build(),
            verbose: self.config.verbose,
            budget: Budget {
                limit: self.config.budget,
                spent: 0,
            },
            cost: evalset.len().max(1),
            ledger: RunLedger::default(),
            seen: HashSet::new(),
            scored: Vec::new(),
            pending_failures: 0,
            best_module: module.box_clone(),
            best_score: f32::NEG_INFINITY,
        };

        let base = Candidate {
            instruction: module.prompt(),
            demos: module.demos().to_vec(),
        };
        run.seen.insert(base.key());
        if !run.budget.try_spend(run.cost) {
            return Err(OptimizeError::Exhausted {
                budget: self.config.budget,
                used: run.budget.spent,
            });
        }
        let baseline = run.evaluator.evaluate(module, evalset, metric).await;
        run.ledger.record_evaluation(&baseline);
        run.best_score = baseline.score;
        run.scored.push(Scored {
            candidate: base.clone(),
            score: baseline.score,
        });
        run.ledger.push_round(
            self.name(),
            self.config.verbose,
            RoundRecord {
                round: 0,
                score: baseline.score,
                candidate: describe_candidate(&base.instruction, base.demos.len()),
                evaluated: 1,
                kept: 1,
                failures: baseline.failures.len(),
                generation_failures: 0,
            },
        );

        let total = self.config.num_candidates;
        let first_generation = match self.config.strategy {
            SearchStrategy::Crossover => total.div_ceil(2),
            _ => total,
        };
        let (instructions, generation_failures) = self
            .seed_instructions(&base.instruction, first_generation, &mut rng, &mut run.ledger)
            .await?;
        run.pending_failures = generation_failures;

        let mut exhausted = false;
        for instruction in instructions {
            let candidate = Candidate {
                instruction,
                demos: self.sample_demos(trainset, &mut rng),
            };
            if !run.score(candidate).await {
                exhausted = true;
                break;
            }
        }

        if self.config.strategy == SearchStrategy::Crossover && !exhausted {
            for _ in first_generation..total {
                let child = {
                    let ranked = run.ranked();
                    let parents = &ranked[..ranked.len().min(4)];
                    let a = parents[rng.gen_range(0..parents.len())];
                    let b = parents[rng.gen_range(0..parents.len())];
                    Candidate {
                        instruction: crossover_instruction(
                            &a.candidate.instruction,
                            &b.candidate.instruction,
                            &mut rng,
                        ),
                        demos: crossover_demos(
                            &a.candidate.demos,
                            &b.candidate.demos,
                            self.config.max_demos,
                            &mut rng,
                        ),
                    }
                };
                if !run.score(child).await {
                    break;
                }
            }
        }

        debug!(
            scored = run.scored.len(),
            spent = run.budget.spent,
            evaluation_calls = run.ledger.evaluation_calls(),
            "random search finished"
        );
        Ok(run.ledger.finish(run.best_module, run.best_score))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentences_split_on_terminators_and_newlines() {
        assert_eq!(
            split_sentences("Answer briefly. Use digits!\nNo units"),
            vec!["Answer briefly.", "Use digits!", "No units"]
        );
        assert!(split_sentences("   ").is_empty());
    }

    #[test]
    fn budget_refuses_overruns() {
        let mut budget = Budget { limit: 5, spent: 0 };
        assert!(budget.try_spend(3));
        assert!(!budget.try_spend(3));
        assert!(budget.try_spend(2));
        assert_eq!(budget.spent, 5);
    }

    #[test]
    fn crossover_keeps_sentences_from_the_parents() {
        let mut rng = rng_from_seed(Some(11));
        for _ in 0..20 {
            let child = crossover_instruction("A one. A two.", "B one. B two.", &mut rng);
            for sentence in split_sentences(&child) {
                assert!(["A one.", "A two.", "B one.", "B two."].contains(&sentence.as_str()));
            }
        }
    }

    #[test]
    fn crossover_demos_respect_the_cap() {
        let mut rng = rng_from_seed(Some(5));
        let a = vec![Example::new("1", "1"), Example::new("2", "2")];
        let b = vec![Example::new("2", "2"), Example::new("3", "3")];
        for _ in 0..20 {
            let demos = crossover_demos(&a, &b, 2, &mut rng);
            assert!(demos.len() <= 2);
        }
    }
}
