use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Input side of an [`Example`]: free text or a structured key-value mapping.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExampleInput {
    Text(String),
    Fields(IndexMap<String, Value>),
}

impl ExampleInput {
    pub fn field(&self, key: &str) -> Option<&Value> {
        match self {
            Self::Text(_) => None,
            Self::Fields(fields) => fields.get(key),
        }
    }
}

impl fmt::Display for ExampleInput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(text) => write!(f, "{text}"),
            Self::Fields(fields) => {
                for (idx, (key, value)) in fields.iter().enumerate() {
                    if idx > 0 {
                        writeln!(f)?;
                    }
                    match value {
                        Value::String(s) => write!(f, "{key}: {s}")?,
                        other => write!(f, "{key}: {other}")?,
                    }
                }
                Ok(())
            }
        }
    }
}

impl From<&str> for ExampleInput {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<String> for ExampleInput {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<IndexMap<String, Value>> for ExampleInput {
    fn from(fields: IndexMap<String, Value>) -> Self {
        Self::Fields(fields)
    }
}

/// Ground truth of an [`Example`]: one answer, or a set of acceptable answers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ExpectedOutput {
    Single(String),
    AnyOf(Vec<String>),
}

impl ExpectedOutput {
    /// Every answer that counts as correct. Empty only for an empty `AnyOf`.
    pub fn acceptable(&self) -> &[String] {
        match self {
            Self::Single(answer) => std::slice::from_ref(answer),
            Self::AnyOf(answers) => answers,
        }
    }

    /// The answer used when the example is rendered as a demonstration.
    pub fn primary(&self) -> Option<&str> {
        self.acceptable().first().map(String::as_str)
    }
}

impl fmt::Display for ExpectedOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.primary().unwrap_or_default())
    }
}

impl From<&str> for ExpectedOutput {
    fn from(answer: &str) -> Self {
        Self::Single(answer.to_string())
    }
}

impl From<String> for ExpectedOutput {
    fn from(answer: String) -> Self {
        Self::Single(answer)
    }
}

impl From<Vec<String>> for ExpectedOutput {
    fn from(answers: Vec<String>) -> Self {
        Self::AnyOf(answers)
    }
}

/// One labeled training or validation instance.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Example {
    pub input: ExampleInput,
    pub output: ExpectedOutput,
}

impl Example {
    pub fn new(input: impl Into<ExampleInput>, output: impl Into<ExpectedOutput>) -> Self {
        Self {
            input: input.into(),
            output: output.into(),
        }
    }

    pub fn any_of<S: Into<String>>(input: impl Into<ExampleInput>, answers: Vec<S>) -> Self {
        Self {
            input: input.into(),
            output: ExpectedOutput::AnyOf(answers.into_iter().map(Into::into).collect()),
        }
    }

    /// Renders the example as a numbered few-shot demonstration.
    pub fn format_demo(&self, number: usize) -> String {
        format!(
            "Example {number}:\nInput: {}\nOutput: {}",
            self.input, self.output
        )
    }
}

/// Renders demonstrations as one block, separated by blank lines.
pub fn format_demos(demos: &[Example]) -> String {
    demos
        .iter()
        .enumerate()
        .map(|(idx, demo)| demo.format_demo(idx + 1))
        .collect::<Vec<_>>()
        .join("\n\n")
}
