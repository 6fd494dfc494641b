//! Evaluation and metrics for measuring module performance.
//!
//! The evaluation loop is simple: run the module on each example, score the
//! prediction with a [`Metric`], fold the scores into an [`EvaluationResult`].
//! Optimizers use this internally, but you can also call [`evaluate`] directly
//! to benchmark a module before and after optimization.
//!
//! A failed `predict` scores 0 for its example and is listed in
//! [`EvaluationResult::failures`]. It never aborts the pass.

pub mod evaluator;
pub mod metrics;

pub use evaluator::*;
pub use metrics::*;
