use std::time::Duration;

/// Coarse error classification for retry and routing logic.
///
/// Use [`LmError::class`] to get this. `Temporary` errors are generally retryable;
/// `BadResponse` means the model answered with something unusable.
#[derive(Debug, Copy, Clone, Eq, PartialEq)]
pub enum ErrorClass {
    /// Transient failure such as a rate limit or timeout.
    Temporary,
    /// The model responded, but the text can't be used.
    BadResponse,
    /// A provider-side or caller-side bug.
    Internal,
}

/// A single [`LanguageModel::generate`](crate::LanguageModel::generate) call failed.
///
/// Optimizers treat this as a failure of the one candidate that needed the call,
/// unless the call was producing the only candidates for the next round.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LmError {
    /// A provider-specific error that doesn't fit the other categories.
    #[error("provider error from {model}: {message}")]
    Provider { model: String, message: String },

    /// The provider rate-limited the request.
    #[error("rate limited by {model}")]
    RateLimit {
        model: String,
        retry_after: Option<Duration>,
    },

    /// The request exceeded the timeout configured on the model.
    #[error("request to {model} timed out after {after:?}")]
    Timeout { model: String, after: Duration },

    /// The model returned nothing usable (empty or whitespace-only text).
    #[error("{model} returned an empty response")]
    EmptyResponse { model: String },
}

impl LmError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::RateLimit { .. } | Self::Timeout { .. } => ErrorClass::Temporary,
            Self::EmptyResponse { .. } => ErrorClass::BadResponse,
            Self::Provider { .. } => ErrorClass::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self.class(), ErrorClass::Temporary | ErrorClass::BadResponse)
    }
}

/// Failure from a [`Module::predict`](crate::Module::predict) invocation.
///
/// During evaluation a failed prediction scores 0 for its example and is
/// recorded in [`EvaluationResult::failures`](crate::EvaluationResult::failures),
/// so it stays distinguishable from a genuinely wrong answer.
#[derive(Debug, thiserror::Error)]
pub enum PredictError {
    /// The underlying language model failed.
    #[error("language model call failed")]
    Lm {
        #[source]
        source: LmError,
    },

    /// A caller-provided module failed for its own reasons.
    #[error("module failed: {message}")]
    Module { message: String },

    /// Every ensemble member failed on the same input.
    #[error("all {members} ensemble member(s) failed")]
    AllMembersFailed { members: usize },
}

impl From<LmError> for PredictError {
    fn from(source: LmError) -> Self {
        Self::Lm { source }
    }
}

impl From<anyhow::Error> for PredictError {
    fn from(error: anyhow::Error) -> Self {
        Self::Module {
            message: format!("{error:#}"),
        }
    }
}

/// An optimizer or metric configuration was rejected before any search began.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("`{field}` = {value} is out of range (expected {expected})")]
    OutOfRange {
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("strategy `{strategy}` requires a prompt model")]
    MissingPromptModel { strategy: &'static str },

    #[error("weight #{index} = {weight} must be finite and non-negative")]
    InvalidWeight { index: usize, weight: f32 },

    #[error("{what} must not be empty")]
    Empty { what: &'static str },

    #[error("invalid configuration document: {0}")]
    Parse(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn out_of_range(
        field: &'static str,
        value: impl std::fmt::Display,
        expected: &'static str,
    ) -> Self {
        Self::OutOfRange {
            field,
            value: value.to_string(),
            expected,
        }
    }
}

/// An optimization run failed as a whole.
///
/// Partial degradation (some candidates or examples failed) never produces this;
/// the run resolves with an [`OptimizationResult`](crate::OptimizationResult) instead.
#[derive(Debug, thiserror::Error)]
pub enum OptimizeError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("training set is empty")]
    EmptyTrainset,

    /// Candidate generation failed with no surviving candidates for the next step.
    #[error("candidate generation failed during {stage}")]
    Generation {
        stage: &'static str,
        #[source]
        source: LmError,
    },

    /// The budget ran out before any candidate could be scored.
    #[error("evaluation budget of {budget} exhausted after {used} call(s) with no scored candidate")]
    Exhausted { budget: usize, used: usize },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lm_error_classes() {
        let timeout = LmError::Timeout {
            model: "m".to_string(),
            after: Duration::from_secs(3),
        };
        assert_eq!(timeout.class(), ErrorClass::Temporary);
        assert!(timeout.is_retryable());

        let provider = LmError::Provider {
            model: "m".to_string(),
            message: "bad key".to_string(),
        };
        assert!(!provider.is_retryable());
    }

    #[test]
    fn anyhow_errors_become_module_failures() {
        let err: PredictError = anyhow::anyhow!("index out of range").into();
        assert!(matches!(err, PredictError::Module { ref message } if message.contains("index")));
    }
}
