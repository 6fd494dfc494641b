mod common;

use common::{arithmetic_lm, has_demos, predict, sums};
use prompt_tuner::{
    BootstrapConfig, BootstrapOptimizer, ConfigError, DummyLM, ExactMatch, LanguageModel,
    OptimizeError, Optimizer, evaluate,
};
use rstest::*;
use std::sync::Arc;

fn optimizer(config: BootstrapConfig, teacher: Option<DummyLM>) -> BootstrapOptimizer {
    BootstrapOptimizer::new(
        config,
        teacher.map(|lm| Arc::new(lm) as Arc<dyn LanguageModel>),
    )
    .unwrap()
}

#[tokio::test]
async fn demonstrations_lift_a_module_that_needs_them() {
    let lm = arithmetic_lm(has_demos);
    let base = predict(&lm, "Add the numbers.");
    let trainset = sums();
    let config = BootstrapConfig::builder().max_labeled(2).seed(1).build();

    let result = optimizer(config, None)
        .optimize(&base, &trainset, None, &ExactMatch::new())
        .await
        .unwrap();

    assert_eq!(result.rounds[0].round, 0);
    assert_eq!(result.rounds[0].score, 0.0);
    assert_eq!(result.final_score, 1.0);
    assert!(!result.best_module.demos().is_empty());
    assert_eq!(result.best_module.prompt(), "Add the numbers.");

    let rescored = evaluate(result.best_module.as_ref(), &trainset, &ExactMatch::new()).await;
    assert_eq!(rescored.score, result.final_score);
}

#[rstest]
#[case(1, 2)]
#[case(2, 0)]
#[case(0, 3)]
#[tokio::test]
async fn never_exceeds_the_demo_caps(#[case] max_labeled: usize, #[case] max_bootstrapped: usize) {
    let lm = arithmetic_lm(has_demos);
    let teacher = arithmetic_lm(|_| true);
    let base = predict(&lm, "Add the numbers.");
    let config = BootstrapConfig::builder()
        .max_labeled(max_labeled)
        .max_bootstrapped(max_bootstrapped)
        .max_rounds(3)
        .seed(9)
        .build();

    let result = optimizer(config, Some(teacher))
        .optimize(&base, &sums(), None, &ExactMatch::new())
        .await
        .unwrap();

    assert!(result.best_module.demos().len() <= max_labeled + max_bootstrapped);
    assert_eq!(result.final_score, 1.0);
}

#[tokio::test]
async fn teacher_outputs_below_the_threshold_are_rejected() {
    let lm = arithmetic_lm(has_demos);
    let teacher = DummyLM::new(|_| "banana".to_string());
    let base = predict(&lm, "Add the numbers.");
    let config = BootstrapConfig::builder()
        .max_labeled(2)
        .max_bootstrapped(4)
        .build();

    let result = optimizer(config, Some(teacher.clone()))
        .optimize(&base, &sums(), None, &ExactMatch::new())
        .await
        .unwrap();

    assert_eq!(result.best_module.demos().len(), 2);
    assert_eq!(teacher.call_count(), 4);
    assert!(
        result.best_module.demos().iter().all(|demo| demo.output.primary() != Some("banana"))
    );
}

#[tokio::test]
async fn teacher_prompts_carry_the_labeled_demonstrations() {
    let lm = arithmetic_lm(has_demos);
    let teacher = arithmetic_lm(|_| true);
    let base = predict(&lm, "Add the numbers.");
    let config = BootstrapConfig::builder()
        .max_labeled(1)
        .max_bootstrapped(1)
        .build();

    let result = optimizer(config, Some(teacher.clone()))
        .optimize(&base, &sums(), None, &ExactMatch::new())
        .await
        .unwrap();

    let demos = result.best_module.demos();
    assert_eq!(demos.len(), 2);
    assert_eq!(demos[0], sums()[0]);
    assert_eq!(demos[1].output.primary(), Some("5"));
    let first_teacher_prompt = teacher.inspect_history(usize::MAX).pop().unwrap().prompt;
    assert!(first_teacher_prompt.starts_with("Example 1:\nInput: 1 + 1\nOutput: 2"));
}

#[tokio::test]
async fn never_regresses_below_the_baseline() {
    let lm = arithmetic_lm(|prompt| !has_demos(prompt));
    let base = predict(&lm, "Add the numbers.");

    let result = optimizer(BootstrapConfig::builder().max_rounds(3).seed(4).build(), None)
        .optimize(&base, &sums(), None, &ExactMatch::new())
        .await
        .unwrap();

    assert_eq!(result.final_score, 1.0);
    assert!(result.best_module.demos().is_empty());
    assert!(result.rounds.iter().all(|round| round.score == 1.0));
}

#[tokio::test]
async fn stops_early_once_the_threshold_is_reached() {
    let lm = arithmetic_lm(has_demos);
    let base = predict(&lm, "Add the numbers.");
    let config = BootstrapConfig::builder()
        .max_rounds(5)
        .early_stopping_threshold(1.0)
        .build();

    let result = optimizer(config, None)
        .optimize(&base, &sums(), None, &ExactMatch::new())
        .await
        .unwrap();

    assert_eq!(result.rounds.len(), 2);
}

#[tokio::test]
async fn counts_evaluation_calls_on_both_sets() {
    let lm = arithmetic_lm(has_demos);
    let base = predict(&lm, "Add the numbers.");
    let data = sums();
    let (trainset, valset) = data.split_at(4);

    let result = optimizer(BootstrapConfig::default(), None)
        .optimize(&base, trainset, Some(valset), &ExactMatch::new())
        .await
        .unwrap();

    // baseline on val, selection on train, one candidate on val
    assert_eq!(result.evaluation_calls, 2 + 4 + 2);
    assert!(result.usage.total_tokens() > 0);
}

#[tokio::test]
async fn failing_teacher_is_recovered_per_example() {
    let lm = arithmetic_lm(has_demos);
    let base = predict(&lm, "Add the numbers.");
    let config = BootstrapConfig::builder().max_labeled(2).build();

    let result = optimizer(config, Some(DummyLM::failing("teacher offline")))
        .optimize(&base, &sums(), None, &ExactMatch::new())
        .await
        .unwrap();

    assert_eq!(result.rounds[1].generation_failures, 4);
    assert_eq!(result.best_module.demos().len(), 2);
    assert_eq!(result.final_score, 1.0);
}

#[tokio::test]
async fn seeded_runs_are_reproducible() {
    let lm = arithmetic_lm(has_demos);
    let base = predict(&lm, "Add the numbers.");
    let config = BootstrapConfig::builder()
        .max_labeled(1)
        .max_bootstrapped(1)
        .max_rounds(4)
        .seed(42)
        .build();
    let bootstrap = optimizer(config, Some(arithmetic_lm(|_| true)));

    let first = bootstrap
        .optimize(&base, &sums(), None, &ExactMatch::new())
        .await
        .unwrap();
    let second = bootstrap
        .optimize(&base, &sums(), None, &ExactMatch::new())
        .await
        .unwrap();

    assert_eq!(first.rounds, second.rounds);
}

#[tokio::test]
async fn verbose_only_changes_diagnostics() {
    let lm = arithmetic_lm(has_demos);
    let base = predict(&lm, "Add the numbers.");
    let quiet = BootstrapConfig::builder().seed(3).max_rounds(2).build();
    let loud = BootstrapConfig {
        verbose: true,
        ..quiet.clone()
    };

    let a = optimizer(quiet, None)
        .optimize(&base, &sums(), None, &ExactMatch::new())
        .await
        .unwrap();
    let b = optimizer(loud, None)
        .optimize(&base, &sums(), None, &ExactMatch::new())
        .await
        .unwrap();

    assert_eq!(a.rounds, b.rounds);
}

#[tokio::test]
async fn empty_trainset_is_rejected() {
    let lm = arithmetic_lm(has_demos);
    let base = predict(&lm, "Add.");

    let err = optimizer(BootstrapConfig::default(), None)
        .optimize(&base, &[], None, &ExactMatch::new())
        .await
        .unwrap_err();

    assert!(matches!(err, OptimizeError::EmptyTrainset));
}

#[rstest]
#[case(BootstrapConfig::builder().acceptance_threshold(1.5).build(), "acceptanceThreshold")]
#[case(BootstrapConfig::builder().max_rounds(0).build(), "maxRounds")]
#[case(BootstrapConfig::builder().max_concurrency(0).build(), "maxConcurrency")]
#[case(BootstrapConfig::builder().early_stopping_threshold(-0.1).build(), "earlyStoppingThreshold")]
fn invalid_configs_are_rejected(#[case] config: BootstrapConfig, #[case] expected: &str) {
    match BootstrapOptimizer::new(config, None) {
        Err(ConfigError::OutOfRange { field, .. }) => assert_eq!(field, expected),
        other => panic!("expected OutOfRange, got {:?}", other.err()),
    }
}
