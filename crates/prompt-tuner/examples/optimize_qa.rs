/*
Optimizes a small capital-city QA module with every optimizer and combines the
results into an ensemble. Runs offline against an in-memory model.

Run with:
```
RUST_LOG=prompt_tuner=info cargo run --example optimize_qa
```
*/

use anyhow::Result;
use prompt_tuner::{
    BootstrapConfig, BootstrapOptimizer, CoproConfig, CoproOptimizer, DummyLM, EnsembleConfig,
    EnsembleOptimizer, Example, ExactMatch, LanguageModel, Optimizer, Predict,
    RandomSearchConfig, RandomSearchOptimizer, SearchStrategy, evaluate, examples, init_tracing,
};
use std::sync::Arc;

const CAPITALS: &[(&str, &str)] = &[
    ("France", "Paris"),
    ("Japan", "Tokyo"),
    ("Italy", "Rome"),
    ("Kenya", "Nairobi"),
    ("Peru", "Lima"),
    ("Norway", "Oslo"),
    ("Egypt", "Cairo"),
    ("Chile", "Santiago"),
];

/// Knows every capital but only answers with the bare city name when the
/// prompt asks for it or shows an example of it.
fn task_model() -> DummyLM {
    DummyLM::new(|prompt| {
        let question = prompt
            .rsplit_once("Input: ")
            .map(|(_, tail)| tail)
            .unwrap_or(prompt);
        let Some((country, city)) = CAPITALS
            .iter()
            .find(|(country, _)| question.contains(country))
        else {
            return "I don't know.".to_string();
        };
        if prompt.contains("Example 1:") || prompt.contains("only the city") {
            city.to_string()
        } else {
            format!("The capital of {country} is {city}.")
        }
    })
    .with_model_name("capitals-task")
}

/// Rewrites instructions toward terser answers.
fn prompt_model() -> DummyLM {
    DummyLM::scripted(vec![
        "Instruction: Name the capital city.",
        "Answer with only the city name.",
        "Respond in one full sentence.",
    ])
    .with_model_name("capitals-prompter")
}

fn dataset() -> Vec<Example> {
    examples! {
        "What is the capital of France?" => "Paris",
        "What is the capital of Japan?" => "Tokyo",
        "What is the capital of Italy?" => "Rome",
        "What is the capital of Kenya?" => "Nairobi",
        "What is the capital of Peru?" => "Lima",
        "What is the capital of Norway?" => "Oslo",
        "What is the capital of Egypt?" => "Cairo",
        "What is the capital of Chile?" => "Santiago",
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    let lm: Arc<dyn LanguageModel> = Arc::new(task_model());
    let prompter: Arc<dyn LanguageModel> = Arc::new(prompt_model());
    let qa = Predict::builder()
        .lm(lm)
        .instruction("Answer the question.")
        .build();

    let data = dataset();
    let (trainset, valset) = data.split_at(5);
    let metric = ExactMatch::new();

    let baseline = evaluate(&qa, valset, &metric).await;
    println!("baseline: {:.2}", baseline.score);

    let bootstrap = BootstrapOptimizer::new(
        BootstrapConfig::builder()
            .max_labeled(2)
            .max_bootstrapped(2)
            .max_rounds(2)
            .seed(7)
            .verbose(true)
            .build(),
        None,
    )?;
    let copro = CoproOptimizer::new(
        CoproConfig::builder()
            .breadth(2)
            .depth(2)
            .num_variations(2)
            .seed(7)
            .verbose(true)
            .build(),
        prompter.clone(),
    )?;
    let random = RandomSearchOptimizer::new(
        RandomSearchConfig::builder()
            .strategy(SearchStrategy::Mutation)
            .num_candidates(4)
            .budget(40)
            .seed(7)
            .verbose(true)
            .build(),
        Some(prompter),
    )?;

    let optimizers: [&dyn Optimizer; 3] = [&bootstrap, &copro, &random];
    for optimizer in optimizers {
        let result = optimizer
            .optimize(&qa, trainset, Some(valset), &metric)
            .await?;
        println!(
            "{:<14} {:.2} after {} evaluation calls ({} tokens): {:?} with {} demo(s)",
            optimizer.name(),
            result.final_score,
            result.evaluation_calls,
            result.usage.total_tokens(),
            result.best_module.prompt(),
            result.best_module.demos().len(),
        );
    }

    let ensemble = EnsembleOptimizer::new(EnsembleConfig::default())?
        .compile(&optimizers, &qa, trainset, Some(valset), &metric)
        .await?;
    let report = ensemble.evaluate(valset, &metric).await;
    println!("ensemble:      {:.2}", report.ensemble.score);
    for (index, member) in report.members.iter().enumerate() {
        println!("  member {index}: {:.2}", member.score);
    }

    Ok(())
}
