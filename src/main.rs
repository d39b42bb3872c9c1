use anyhow::Context;
use log::info;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use synthboost::cache::Split;
use synthboost::functions::FunctionKind;
use synthboost::learner::{BoostingConfig, BoostingLearner};
use synthboost::problem::{Example, Problem, Supervision};
use synthboost::samples::Value;
use synthboost::types::Type;

const TRAINING_EXAMPLES: usize = 400;
const VALIDATION_EXAMPLES: usize = 200;

/// Positive iff x + y > 0.2, or the color is red; some cells are missing.
fn synthetic_examples(rng: &mut StdRng, n: usize) -> Vec<Example> {
    (0..n)
        .map(|_| {
            let x: f64 = rng.gen_range(-1.0..1.0);
            let y: f64 = rng.gen_range(-1.0..1.0);
            let color: u32 = rng.gen_range(0..3);
            let positive = x + y > 0.2 || color == 0;
            let y_cell = if rng.gen_bool(0.05) { Value::Missing } else { Value::Scalar(y) };
            Example::new(
                vec![Value::Scalar(x), y_cell, Value::Label(color)],
                Supervision::Binary(positive),
            )
        })
        .collect()
}

/// Usage: synthboost [config.json] [model-output.json]
fn main() -> anyhow::Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_micros()
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => BoostingConfig::load(&path).with_context(|| format!("Failed to load config {}", path))?,
        None => BoostingConfig {
            max_iterations: 20,
            verbose: true,
            ..BoostingConfig::default()
        },
    };
    let model_path = args.next();
    info!("Configuration: {:?}", config);

    let mut problem = Problem::new();
    let color = problem.add_enumeration("color", &["red", "green", "blue"]);
    let problem = problem
        .with_input("x", Type::Double)
        .with_input("y", Type::Double)
        .with_input("color", color)
        .with_functions(&[
            FunctionKind::Add,
            FunctionKind::Sub,
            FunctionKind::Greater,
            FunctionKind::Or,
            FunctionKind::EqualsLabel,
        ]);

    let mut rng = StdRng::seed_from_u64(config.seed.wrapping_add(1));
    let training = synthetic_examples(&mut rng, TRAINING_EXAMPLES);
    let validation = synthetic_examples(&mut rng, VALIDATION_EXAMPLES);

    let mut learner = BoostingLearner::new(problem, config).context("Failed to set up the learner")?;
    learner.set_examples(Split::Training, &training)?;
    learner.set_examples(Split::Validation, &validation)?;

    let report = learner.run().context("Boosting failed")?;
    info!(
        "{} weak learners, stop: {}, training loss {:.4}, training error {}",
        report.rounds.len(),
        report.stop,
        report.training_loss,
        report
            .training_error
            .map_or_else(|| "n/a".to_string(), |e| format!("{:.4}", e))
    );

    let model = learner.model()?;
    let rows: Vec<Vec<Value>> = validation.iter().map(|e| e.inputs.clone()).collect();
    let predictions = model.predict_rows(&rows)?;
    let errors = predictions
        .iter()
        .zip(&validation)
        .filter(|(f, e)| (**f >= 0.0) != matches!(e.supervision, Supervision::Binary(true)))
        .count();
    info!(
        "validation error {:.4}\n{}",
        errors as f64 / validation.len() as f64,
        model.describe()
    );

    if let Some(path) = model_path {
        model.save(&path).with_context(|| format!("Failed to write model to {}", path))?;
        info!("Model written to {}", path);
    }
    Ok(())
}
