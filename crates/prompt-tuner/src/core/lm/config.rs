use bon::Builder;
use serde::{Deserialize, Serialize};

/// Per-call sampling options passed to [`LanguageModel::generate`](super::LanguageModel::generate).
///
/// Implementations map these onto whatever their provider understands and may
/// ignore the ones they can't honor.
#[derive(Clone, Debug, PartialEq, Builder, Serialize, Deserialize)]
pub struct GenerateOptions {
    /// Sampling temperature. Higher values increase lexical diversity.
    #[builder(default = 0.7)]
    pub temperature: f32,
    /// Maximum tokens requested for the completion.
    #[builder(default = 512)]
    pub max_tokens: u32,
    /// Sequences at which generation should stop.
    #[builder(default)]
    pub stop: Vec<String>,
    /// Optional deterministic seed when the provider supports it.
    pub seed: Option<u64>,
}

impl Default for GenerateOptions {
    fn default() -> Self {
        GenerateOptions::builder().build()
    }
}

impl GenerateOptions {
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}
