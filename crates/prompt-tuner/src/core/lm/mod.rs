mod config;
mod usage;

pub use config::*;
pub use usage::*;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tracing::trace;

use crate::LmError;

/// A single completion returned by [`LanguageModel::generate`].
#[derive(Clone, Debug, PartialEq)]
pub struct LMResponse {
    /// Text produced by the model.
    pub text: String,
    /// Token usage reported for this call.
    pub usage: LmUsage,
}

impl LMResponse {
    pub fn new(text: impl Into<String>, usage: LmUsage) -> Self {
        Self {
            text: text.into(),
            usage,
        }
    }
}

/// Opaque text-generation capability.
///
/// This is the single suspension point for network or compute work. It backs
/// [`Predict`](crate::Predict) modules and is used directly by optimizers to
/// propose new prompt text. Timeouts and cancellation belong to the
/// implementation; callers only see the returned [`LmError`].
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn generate(&self, prompt: &str, options: &GenerateOptions)
    -> Result<LMResponse, LmError>;

    fn model_name(&self) -> &str;
}

type Responder = Arc<dyn Fn(&str, &GenerateOptions) -> Result<String, LmError> + Send + Sync>;

/// One call recorded by [`DummyLM`].
#[derive(Clone, Debug)]
pub struct LmCall {
    pub prompt: String,
    pub options: GenerateOptions,
    pub response: Option<String>,
}

/// In-memory language model used for deterministic tests and demos.
///
/// Responses come from a closure over the prompt. Clones share the same
/// call history, so a clone handed to a module can be inspected afterwards.
#[derive(Clone)]
pub struct DummyLM {
    model: String,
    responder: Responder,
    history: Arc<Mutex<Vec<LmCall>>>,
}

impl DummyLM {
    /// Answers every prompt with `respond(prompt)`.
    pub fn new<F>(respond: F) -> Self
    where
        F: Fn(&str) -> String + Send + Sync + 'static,
    {
        Self::with_responder(move |prompt, _| Ok(respond(prompt)))
    }

    /// Full control over the reply, including failures and option inspection.
    pub fn with_responder<F>(respond: F) -> Self
    where
        F: Fn(&str, &GenerateOptions) -> Result<String, LmError> + Send + Sync + 'static,
    {
        Self {
            model: "dummy".to_string(),
            responder: Arc::new(respond),
            history: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Cycles through `responses` in order, one per call.
    pub fn scripted<S: Into<String>>(responses: Vec<S>) -> Self {
        let responses: Vec<String> = responses.into_iter().map(Into::into).collect();
        let cursor = AtomicUsize::new(0);
        Self::with_responder(move |_, _| {
            if responses.is_empty() {
                return Ok(String::new());
            }
            let idx = cursor.fetch_add(1, Ordering::SeqCst) % responses.len();
            Ok(responses[idx].clone())
        })
    }

    /// Fails every call with a provider error.
    pub fn failing(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::with_responder(move |_, _| {
            Err(LmError::Provider {
                model: "dummy".to_string(),
                message: message.clone(),
            })
        })
    }

    pub fn with_model_name(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Returns up to `n` recorded calls, most recent first.
    pub fn inspect_history(&self, n: usize) -> Vec<LmCall> {
        let history = self.history.lock().unwrap_or_else(|e| e.into_inner());
        history.iter().rev().take(n).cloned().collect()
    }

    pub fn call_count(&self) -> usize {
        self.history.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

fn word_count(text: &str) -> u64 {
    text.split_whitespace().count() as u64
}

#[async_trait]
impl LanguageModel for DummyLM {
    async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<LMResponse, LmError> {
        let result = (self.responder)(prompt, options);
        trace!(model = %self.model, ok = result.is_ok(), "dummy generation");

        self.history
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(LmCall {
                prompt: prompt.to_string(),
                options: options.clone(),
                response: result.as_ref().ok().cloned(),
            });

        let text = result?;
        let usage = LmUsage::new(word_count(prompt), word_count(&text));
        Ok(LMResponse { text, usage })
    }

    fn model_name(&self) -> &str {
        &self.model
    }
}
