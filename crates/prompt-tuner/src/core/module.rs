use async_trait::async_trait;
use bon::Builder;
use std::sync::Arc;

use crate::data::format_demos;
use crate::{Example, ExampleInput, GenerateOptions, LanguageModel, PredictError, Prediction};

/// Maps an input to a [`Prediction`] under a mutable prompt configuration.
///
/// Optimizers never mutate the module they are given. They work on
/// [`box_clone`](Module::box_clone) copies and hand back a fresh clone, so a caller
/// cannot reach internal search state through the returned module.
#[async_trait]
pub trait Module: Send + Sync {
    async fn predict(&self, input: &ExampleInput) -> Result<Prediction, PredictError>;

    /// The base instruction, without any demonstrations.
    fn prompt(&self) -> String;

    fn set_prompt(&mut self, prompt: String);

    /// Few-shot demonstrations formatted into this module's context.
    fn demos(&self) -> &[Example] {
        &[]
    }

    /// Independent copy with the same prompt and demonstrations.
    fn box_clone(&self) -> Box<dyn Module>;

    /// Copy of this module with any demonstration augmentation removed.
    fn without_demos(&self) -> Box<dyn Module> {
        self.box_clone()
    }
}

impl Clone for Box<dyn Module> {
    fn clone(&self) -> Self {
        self.box_clone()
    }
}

/// Plain prompt-only module: instruction + input, one language model call.
///
/// ```ignore
/// let qa = Predict::builder()
///     .lm(lm)
///     .instruction("Answer with a single number.")
///     .build();
/// ```
#[derive(Builder, Clone)]
pub struct Predict {
    lm: Arc<dyn LanguageModel>,
    #[builder(into, default)]
    instruction: String,
    #[builder(default)]
    options: GenerateOptions,
}

impl Predict {
    /// The full text sent to the language model for `input`.
    pub fn render(&self, input: &ExampleInput) -> String {
        let instruction = self.instruction.trim_end();
        if instruction.is_empty() {
            format!("Input: {input}\nOutput:")
        } else {
            format!("{instruction}\n\nInput: {input}\nOutput:")
        }
    }
}

#[async_trait]
impl Module for Predict {
    #[tracing::instrument(
        name = "tuner.predict",
        level = "trace",
        skip(self, input),
        fields(model = self.lm.model_name())
    )]
    async fn predict(&self, input: &ExampleInput) -> Result<Prediction, PredictError> {
        let prompt = self.render(input);
        let response = self.lm.generate(&prompt, &self.options).await?;
        Ok(Prediction::new(response.text.trim()).with_usage(response.usage))
    }

    fn prompt(&self) -> String {
        self.instruction.clone()
    }

    fn set_prompt(&mut self, prompt: String) {
        self.instruction = prompt;
    }

    fn box_clone(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }
}

/// Demonstration-augmented module.
///
/// Wraps any module and installs `demonstrations + instruction` as the inner
/// module's prompt. [`prompt`](Module::prompt) still reports the bare
/// instruction, so prompt-search optimizers can rewrite it without touching
/// the demonstrations.
#[derive(Clone)]
pub struct Demonstrated {
    inner: Box<dyn Module>,
    instruction: String,
    demos: Vec<Example>,
}

fn compose_prompt(instruction: &str, demos: &[Example]) -> String {
    if demos.is_empty() {
        instruction.to_string()
    } else {
        format!("{}\n\n{instruction}", format_demos(demos))
    }
}

impl Demonstrated {
    /// Replaces any demonstrations `base` already carries with `demos`.
    pub fn new(base: &dyn Module, demos: Vec<Example>) -> Self {
        let mut inner = base.without_demos();
        let instruction = inner.prompt();
        inner.set_prompt(compose_prompt(&instruction, &demos));
        Self {
            inner,
            instruction,
            demos,
        }
    }

    /// The prompt actually installed on the wrapped module.
    pub fn composed_prompt(&self) -> String {
        self.inner.prompt()
    }
}

#[async_trait]
impl Module for Demonstrated {
    async fn predict(&self, input: &ExampleInput) -> Result<Prediction, PredictError> {
        self.inner.predict(input).await
    }

    fn prompt(&self) -> String {
        self.instruction.clone()
    }

    fn set_prompt(&mut self, prompt: String) {
        self.inner.set_prompt(compose_prompt(&prompt, &self.demos));
        self.instruction = prompt;
    }

    fn demos(&self) -> &[Example] {
        &self.demos
    }

    fn box_clone(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }

    fn without_demos(&self) -> Box<dyn Module> {
        let mut base = self.inner.box_clone();
        base.set_prompt(self.instruction.clone());
        base
    }
}
