use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::LmUsage;

/// Optional side information attached to a [`Prediction`].
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct PredictionMetadata {
    pub usage: LmUsage,
    /// Context passages the module retrieved or was given, if any.
    #[serde(default)]
    pub passages: Vec<String>,
    #[serde(default)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// What a module produced for one input. Never mutated after creation.
#[derive(Serialize, Deserialize, Default, Debug, Clone, PartialEq)]
pub struct Prediction {
    pub output: String,
    pub metadata: Option<PredictionMetadata>,
}

impl Prediction {
    pub fn new(output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            metadata: None,
        }
    }

    pub fn with_usage(mut self, usage: LmUsage) -> Self {
        self.metadata.get_or_insert_with(Default::default).usage = usage;
        self
    }

    pub fn with_passages<S: Into<String>>(mut self, passages: Vec<S>) -> Self {
        self.metadata.get_or_insert_with(Default::default).passages =
            passages.into_iter().map(Into::into).collect();
        self
    }

    pub fn usage(&self) -> LmUsage {
        self.metadata
            .as_ref()
            .map(|meta| meta.usage)
            .unwrap_or_default()
    }

    pub fn passages(&self) -> &[String] {
        self.metadata
            .as_ref()
            .map(|meta| meta.passages.as_slice())
            .unwrap_or(&[])
    }
}
