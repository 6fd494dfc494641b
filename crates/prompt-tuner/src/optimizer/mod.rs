//! Search algorithms that improve a module's prompt and demonstrations.
//!
//! Every optimizer consumes a base [`Module`], a training set, an optional
//! validation set and a [`Metric`], and resolves with an
//! [`OptimizationResult`]. The base module is never mutated: candidates are
//! clones, and the returned `best_module` is a fresh clone the caller owns.
//!
//! | Optimizer | Searches | Needs a prompt model |
//! |---|---|---|
//! | [`BootstrapOptimizer`] | demonstration sets | optional teacher |
//! | [`CoproOptimizer`] | instructions (beam search) | yes |
//! | [`RandomSearchOptimizer`] | instructions + demo subsets | only for `mutation` |
//! | [`EnsembleOptimizer`] | nothing; combines results | no |

pub mod bootstrap;
pub mod config;
pub mod copro;
pub mod ensemble;
pub mod random_search;
pub mod tips;

pub use bootstrap::*;
pub use config::*;
pub use copro::*;
pub use ensemble::*;
pub use random_search::*;
pub use tips::*;

use async_trait::async_trait;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};

use crate::evaluate::{EvaluationResult, Metric};
use crate::utils::truncate;
use crate::{Example, LmUsage, Module, OptimizeError};

#[async_trait]
pub trait Optimizer: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runs the search. Scores are measured on `valset`, or on `trainset` when
    /// no validation set is given.
    async fn optimize(
        &self,
        module: &dyn Module,
        trainset: &[Example],
        valset: Option<&[Example]>,
        metric: &dyn Metric,
    ) -> Result<OptimizationResult, OptimizeError>;
}

/// One step of a search, as reported in [`OptimizationResult::rounds`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RoundRecord {
    /// 0 is the unoptimized baseline.
    pub round: usize,
    /// Best score known after this round.
    pub score: f32,
    /// Short description of the best candidate after this round.
    pub candidate: String,
    /// Candidates scored during this round.
    pub evaluated: usize,
    /// Candidates retained after this round (the beam, for COPRO).
    pub kept: usize,
    /// Example-level `predict` failures across this round's evaluations.
    pub failures: usize,
    /// Candidate-generation calls that failed or returned unusable text.
    pub generation_failures: usize,
}

/// Outcome of an optimization run.
#[derive(Clone)]
pub struct OptimizationResult {
    /// Best configuration found, decoupled from the optimizer's search state.
    pub best_module: Box<dyn Module>,
    pub final_score: f32,
    pub rounds: Vec<RoundRecord>,
    /// Tokens spent on evaluation and candidate generation.
    pub usage: LmUsage,
    /// Example-level evaluation calls consumed.
    pub evaluation_calls: usize,
}

impl fmt::Debug for OptimizationResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimizationResult")
            .field("prompt", &self.best_module.prompt())
            .field("demos", &self.best_module.demos().len())
            .field("final_score", &self.final_score)
            .field("rounds", &self.rounds)
            .field("usage", &self.usage)
            .field("evaluation_calls", &self.evaluation_calls)
            .finish()
    }
}

/// Usage and call accounting for one `optimize` call.
#[derive(Debug, Default)]
pub(crate) struct RunLedger {
    usage: LmUsage,
    evaluation_calls: usize,
    rounds: Vec<RoundRecord>,
}

impl RunLedger {
    pub(crate) fn record_evaluation(&mut self, result: &EvaluationResult) {
        self.usage += result.usage;
        self.evaluation_calls += result.calls();
    }

    pub(crate) fn record_generation(&mut self, usage: LmUsage) {
        self.usage += usage;
    }

    pub(crate) fn evaluation_calls(&self) -> usize {
        self.evaluation_calls
    }

    pub(crate) fn push_round(&mut self, optimizer: &'static str, verbose: bool, record: RoundRecord) {
        report_round(optimizer, verbose, &record);
        self.rounds.push(record);
    }

    pub(crate) fn finish(self, best_module: Box<dyn Module>, final_score: f32) -> OptimizationResult {
        OptimizationResult {
            best_module,
            final_score,
            rounds: self.rounds,
            usage: self.usage,
            evaluation_calls: self.evaluation_calls,
        }
    }
}

/// The single random source for one `optimize` call.
pub(crate) fn rng_from_seed(seed: Option<u64>) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    }
}

pub(crate) fn describe_candidate(prompt: &str, demos: usize) -> String {
    let flat = prompt.split_whitespace().collect::<Vec<_>>().join(" ");
    let shown = truncate(&flat, 80);
    let ellipsis = if shown.len() < flat.len() { "..." } else { "" };
    format!("\"{shown}{ellipsis}\" with {demos} demo(s)")
}

/// Normalizes a prompt-model reply into a bare instruction.
pub(crate) fn clean_instruction(text: &str) -> String {
    let mut cleaned = text.trim();
    for prefix in ["Improved instruction:", "Instruction:"] {
        if let Some(rest) = cleaned.strip_prefix(prefix) {
            cleaned = rest.trim_start();
        }
    }
    cleaned
        .trim_matches(|c| c == '"' || c == '`')
        .trim()
        .to_string()
}

/// Emits per-round diagnostics; `verbose` only raises the level.
pub(crate) fn report_round(optimizer: &'static str, verbose: bool, record: &RoundRecord) {
    if verbose {
        info!(
            optimizer,
            round = record.round,
            score = record.score,
            evaluated = record.evaluated,
            kept = record.kept,
            failures = record.failures,
            generation_failures = record.generation_failures,
            candidate = %record.candidate,
            "round complete"
        );
    } else {
        debug!(
            optimizer,
            round = record.round,
            score = record.score,
            evaluated = record.evaluated,
            kept = record.kept,
            "round complete"
        );
    }
}
