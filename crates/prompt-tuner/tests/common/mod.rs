#![allow(dead_code)]

use prompt_tuner::{DummyLM, Example, Predict, examples};
use std::sync::Arc;

/// The query of a rendered prompt: the text after the last `Input: `.
pub fn query(prompt: &str) -> &str {
    let tail = prompt
        .rsplit_once("Input: ")
        .map(|(_, tail)| tail)
        .unwrap_or(prompt);
    tail.split("\nOutput:").next().unwrap_or(tail).trim()
}

/// Evaluates `a + b + ...`.
pub fn solve(question: &str) -> Option<i64> {
    question
        .trim_end_matches('?')
        .split('+')
        .map(|term| term.trim().parse::<i64>().ok())
        .sum()
}

pub fn has_demos(prompt: &str) -> bool {
    prompt.contains("Example 1:")
}

/// Answers sums correctly when `competent(prompt)` holds, otherwise says "-1".
pub fn arithmetic_lm(competent: fn(&str) -> bool) -> DummyLM {
    DummyLM::new(move |prompt| {
        if competent(prompt) {
            solve(query(prompt)).map_or("?".to_string(), |sum| sum.to_string())
        } else {
            "-1".to_string()
        }
    })
}

pub fn predict(lm: &DummyLM, instruction: &str) -> Predict {
    Predict::builder()
        .lm(Arc::new(lm.clone()))
        .instruction(instruction)
        .build()
}

pub fn sums() -> Vec<Example> {
    examples! {
        "1 + 1" => "2",
        "2 + 3" => "5",
        "4 + 4" => "8",
        "10 + 5" => "15",
        "7 + 6" => "13",
        "9 + 9" => "18",
    }
}
