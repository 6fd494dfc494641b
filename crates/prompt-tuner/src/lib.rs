//! Prompt and few-shot optimization over pluggable language models.
//!
//! A [`Module`] maps an input to a [`Prediction`] under a prompt it lets you
//! read and replace. An [`Optimizer`] searches for a better prompt or a better
//! set of demonstrations, scoring candidates with a [`Metric`] through the
//! [`Evaluator`], and returns the best configuration it found.
//!
//! ```ignore
//! let lm: Arc<dyn LanguageModel> = Arc::new(my_provider);
//! let qa = Predict::builder().lm(lm.clone()).instruction("Answer the question.").build();
//!
//! let copro = CoproOptimizer::new(CoproConfig::default(), lm)?;
//! let result = copro.optimize(&qa, &trainset, Some(&valset), &ExactMatch::new()).await?;
//! println!("{:.2} -> {}", result.final_score, result.best_module.prompt());
//! ```

pub mod core;
pub mod data;
pub mod evaluate;
pub mod optimizer;
pub mod utils;

pub use core::*;
pub use data::*;
pub use evaluate::*;
pub use optimizer::*;
pub use utils::*;

/// Builds a `Vec<Example>` from `input => output` pairs.
///
/// ```ignore
/// let trainset = examples! {
///     "2 + 2?" => "4",
///     "3 + 3?" => "6",
/// };
/// ```
#[macro_export]
macro_rules! examples {
    { $($input:expr => $output:expr),* $(,)? } => {
        vec![$($crate::Example::new($input, $output)),*]
    };
}
