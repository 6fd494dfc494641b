mod common;

use async_trait::async_trait;
use common::{arithmetic_lm, predict, sums};
use prompt_tuner::{
    DummyLM, ExactMatch, Example, ExampleInput, Evaluator, Module, PredictError, Prediction,
    evaluate,
};
use rstest::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

/// Echoes the input, fails on inputs containing "boom", and records how many
/// predictions were in flight at once.
#[derive(Clone, Default)]
struct EchoModule {
    in_flight: Arc<AtomicUsize>,
    peak: Arc<AtomicUsize>,
}

#[async_trait]
impl Module for EchoModule {
    async fn predict(&self, input: &ExampleInput) -> Result<Prediction, PredictError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(5)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let text = input.to_string();
        if text.contains("boom") {
            return Err(anyhow::anyhow!("exploded on {text}").into());
        }
        Ok(Prediction::new(text))
    }

    fn prompt(&self) -> String {
        String::new()
    }

    fn set_prompt(&mut self, _prompt: String) {}

    fn box_clone(&self) -> Box<dyn Module> {
        Box::new(self.clone())
    }
}

#[tokio::test]
async fn constant_correct_answer_scores_one() {
    let lm = DummyLM::new(|_| "4".to_string());
    let module = predict(&lm, "");
    let dataset = vec![Example::new("2+2?", "4")];

    let result = evaluate(&module, &dataset, &ExactMatch::new()).await;

    assert_eq!(result.score, 1.0);
    assert_eq!(result.individual_scores, vec![1.0]);
}

#[tokio::test]
async fn scores_every_example_in_dataset_order() {
    let lm = arithmetic_lm(|_| true);
    let module = predict(&lm, "Add the numbers.");
    let mut dataset = sums();
    dataset.push(Example::new("1 + 2", "4"));

    let result = evaluate(&module, &dataset, &ExactMatch::new()).await;

    assert_eq!(result.individual_scores.len(), dataset.len());
    assert_eq!(result.individual_scores.last(), Some(&0.0));
    assert!(result.individual_scores[..6].iter().all(|s| *s == 1.0));
    assert!((result.score - 6.0 / 7.0).abs() < 1e-6);
    assert!(result.failures.is_empty());
    assert_eq!(result.calls(), 7);
    assert_eq!(lm.call_count(), 7);
}

#[tokio::test]
async fn failed_predictions_score_zero_without_aborting() {
    let dataset = vec![
        Example::new("alpha", "alpha"),
        Example::new("boom", "boom"),
        Example::new("gamma", "gamma"),
    ];

    let result = evaluate(&EchoModule::default(), &dataset, &ExactMatch::new()).await;

    assert_eq!(result.individual_scores, vec![1.0, 0.0, 1.0]);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].index, 1);
    assert!(result.failures[0].error.contains("exploded"));
    assert!(result.is_failure(1));
    assert!(!result.is_failure(0));
}

#[tokio::test]
async fn empty_dataset_scores_zero() {
    let result = evaluate(&EchoModule::default(), &[], &ExactMatch::new()).await;
    assert_eq!(result.score, 0.0);
    assert_eq!(result.calls(), 0);
}

#[rstest]
#[case(1)]
#[case(2)]
#[case(4)]
#[tokio::test]
async fn respects_the_concurrency_ceiling(#[case] limit: usize) {
    let module = EchoModule::default();
    let dataset: Vec<Example> = (0..12)
        .map(|i| Example::new(format!("item {i}"), format!("item {i}")))
        .collect();

    let result = Evaluator::builder()
        .max_concurrency(limit)
        .build()
        .evaluate(&module, &dataset, &ExactMatch::new())
        .await;

    assert_eq!(result.score, 1.0);
    assert!(module.peak.load(Ordering::SeqCst) <= limit);
}

#[tokio::test]
async fn metric_scores_are_clamped() {
    let dataset = vec![Example::new("a", "a"), Example::new("b", "b")];
    let generous = |_: &Example, _: &Prediction| -> f32 { 5.0 };
    let broken = |_: &Example, _: &Prediction| -> f32 { f32::NAN };

    let high = evaluate(&EchoModule::default(), &dataset, &generous).await;
    let nan = evaluate(&EchoModule::default(), &dataset, &broken).await;

    assert_eq!(high.score, 1.0);
    assert_eq!(nan.score, 0.0);
}

#[tokio::test]
async fn usage_is_accumulated_across_examples() {
    let lm = arithmetic_lm(|_| true);
    let module = predict(&lm, "Add.");

    let result = evaluate(&module, &sums(), &ExactMatch::new()).await;

    assert!(result.usage.input_tokens > 0);
    assert_eq!(result.usage.output_tokens, 6);
}
