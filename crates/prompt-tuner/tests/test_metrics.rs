use prompt_tuner::{
    CompositeMetric, ConfigError, ContainsMatch, ExactMatch, Example, FuzzyMatch, Metric,
    NumericMatch, PassageMatch, Prediction, normalize_text,
};
use rstest::*;
use std::sync::Arc;

fn score(metric: &dyn Metric, expected: &str, predicted: &str) -> f32 {
    metric.score(
        &Example::new("q", expected),
        &Prediction::new(predicted),
        None,
    )
}

#[rstest]
#[case("Paris", "Paris", 1.0)]
#[case("Paris", "  paris ", 1.0)]
#[case("New   York", "new york", 1.0)]
#[case("Paris", "Lyon", 0.0)]
#[case("Paris", "Paris, France", 0.0)]
fn exact_match_compares_normalized_text(
    #[case] expected: &str,
    #[case] predicted: &str,
    #[case] want: f32,
) {
    assert_eq!(score(&ExactMatch::new(), expected, predicted), want);
}

#[rstest]
fn exact_match_accepts_any_listed_answer() {
    let example = Example::any_of("2 + 2", vec!["4", "four"]);
    let metric = ExactMatch::new();

    assert_eq!(metric.score(&example, &Prediction::new("Four"), None), 1.0);
    assert_eq!(metric.score(&example, &Prediction::new("5"), None), 0.0);
}

#[rstest]
fn exact_match_with_no_acceptable_answers_scores_zero() {
    let example = Example::any_of("anything", Vec::<String>::new());
    assert_eq!(
        ExactMatch::new().score(&example, &Prediction::new(""), None),
        0.0
    );
}

#[rstest]
fn exact_match_fraction_mode() {
    let lenient = ExactMatch::with_frac(0.5).unwrap();
    assert_eq!(score(&lenient, "Eiffel Tower", "the eiffel tower"), 1.0);

    let strict = ExactMatch::with_frac(0.9).unwrap();
    let partial = score(&strict, "Eiffel Tower", "the eiffel tower");
    assert!((partial - 2.0 / 3.0).abs() < 1e-6);

    assert_eq!(score(&strict, "Eiffel Tower", "louvre"), 0.0);
}

#[rstest]
#[case(0.0)]
#[case(-0.5)]
#[case(1.5)]
#[case(f32::NAN)]
fn exact_match_rejects_invalid_fractions(#[case] frac: f32) {
    assert!(matches!(
        ExactMatch::with_frac(frac),
        Err(ConfigError::OutOfRange { field: "frac", .. })
    ));
}

#[rstest]
#[case(0.8, "colour", "color", 1.0)]
#[case(0.9, "colour", "color", 0.0)]
#[case(0.8, "Paris", "PARIS", 1.0)]
#[case(0.8, "Paris", "Berlin", 0.0)]
fn fuzzy_match_applies_the_threshold(
    #[case] threshold: f32,
    #[case] expected: &str,
    #[case] predicted: &str,
    #[case] want: f32,
) {
    let metric = FuzzyMatch::new(threshold).unwrap();
    assert_eq!(score(&metric, expected, predicted), want);
}

#[rstest]
fn fuzzy_similarity_is_normalized() {
    assert_eq!(FuzzyMatch::similarity("abc", "ABC"), 1.0);
    assert!(FuzzyMatch::similarity("abc", "xyz") < 0.01);
    assert!(FuzzyMatch::new(1.2).is_err());
}

#[rstest]
fn passage_match_looks_inside_context_passages() {
    let example = Example::new("Who wrote Hamlet?", "Shakespeare");
    let grounded = Prediction::new("unknown").with_passages(vec![
        "Macbeth is a tragedy.",
        "Hamlet was written by William SHAKESPEARE around 1600.",
    ]);
    let ungrounded = Prediction::new("Shakespeare");

    assert_eq!(PassageMatch.score(&example, &grounded, None), 1.0);
    assert_eq!(PassageMatch.score(&example, &ungrounded, None), 0.0);
}

#[rstest]
fn passage_match_ignores_empty_expectations() {
    let example = Example::new("q", "");
    let prediction = Prediction::new("x").with_passages(vec!["some passage"]);
    assert_eq!(PassageMatch.score(&example, &prediction, None), 0.0);
}

#[rstest]
#[case("Paris", "The answer is paris.", 1.0)]
#[case("Paris", "Lyon", 0.0)]
#[case("", "anything", 0.0)]
fn contains_match(#[case] expected: &str, #[case] predicted: &str, #[case] want: f32) {
    assert_eq!(score(&ContainsMatch, expected, predicted), want);
}

#[rstest]
#[case("1000", "1,000", 1.0)]
#[case("3.14159", "3.14159", 1.0)]
#[case("42", " 42 ", 1.0)]
#[case("42", "forty-two", 0.0)]
#[case("42", "43", 0.0)]
fn numeric_match_default_tolerance(
    #[case] expected: &str,
    #[case] predicted: &str,
    #[case] want: f32,
) {
    assert_eq!(score(&NumericMatch::default(), expected, predicted), want);
}

#[rstest]
fn numeric_match_with_tolerance() {
    let metric = NumericMatch::new(0.01).unwrap();
    assert_eq!(score(&metric, "3.14159", "3.14"), 1.0);
    assert_eq!(score(&metric, "3.14159", "3.2"), 0.0);
    assert!(NumericMatch::new(-1.0).is_err());
}

#[rstest]
#[case("10.4", 1.0)]
#[case("9.5", 1.0)]
#[case("11", 0.0)]
#[case("ten", 0.0)]
fn numeric_match_half_unit_tolerance(#[case] predicted: &str, #[case] want: f32) {
    let metric = NumericMatch::new(0.5).unwrap();
    assert_eq!(score(&metric, "10", predicted), want);
}

#[rstest]
fn composite_of_exact_and_fuzzy_is_one_on_a_perfect_match() {
    let metric = CompositeMetric::new(vec![
        (Arc::new(ExactMatch::new()) as Arc<dyn Metric>, 1.0),
        (Arc::new(FuzzyMatch::default()) as Arc<dyn Metric>, 1.0),
    ])
    .unwrap();

    assert_eq!(score(&metric, "Paris", "Paris"), 1.0);
}

#[rstest]
fn composite_metric_is_a_weighted_average() {
    let metric = CompositeMetric::new(vec![
        (Arc::new(ExactMatch::new()) as Arc<dyn Metric>, 1.0),
        (Arc::new(ContainsMatch) as Arc<dyn Metric>, 3.0),
    ])
    .unwrap();

    assert_eq!(score(&metric, "Paris", "Paris, France"), 0.75);
    assert_eq!(score(&metric, "Paris", "Paris"), 1.0);
    assert_eq!(score(&metric, "Paris", "Rome"), 0.0);
}

#[rstest]
fn composite_metric_validates_weights() {
    assert!(matches!(
        CompositeMetric::new(Vec::new()),
        Err(ConfigError::Empty { .. })
    ));
    assert!(matches!(
        CompositeMetric::new(vec![(Arc::new(ContainsMatch) as Arc<dyn Metric>, -1.0)]),
        Err(ConfigError::InvalidWeight { index: 0, .. })
    ));
    assert!(matches!(
        CompositeMetric::new(vec![(Arc::new(ContainsMatch) as Arc<dyn Metric>, 0.0)]),
        Err(ConfigError::OutOfRange { .. })
    ));
}

#[rstest]
fn closures_are_metrics() {
    let length_match = |example: &Example, prediction: &Prediction| -> f32 {
        let expected = example.output.primary().unwrap_or_default();
        (expected.len() == prediction.output.len()) as u8 as f32
    };
    assert_eq!(score(&length_match, "abc", "xyz"), 1.0);
    assert_eq!(score(&length_match, "abc", "wxyz"), 0.0);
}

#[rstest]
fn metrics_are_deterministic() {
    let metric = FuzzyMatch::default();
    let first = score(&metric, "photosynthesis", "photosynthesys");
    for _ in 0..5 {
        assert_eq!(score(&metric, "photosynthesis", "photosynthesys"), first);
    }
    assert_eq!(normalize_text("  Hello \n World "), "hello world");
}
