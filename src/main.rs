use std::error::Error;
use std::fs::{self, File};
use std::path::Path;
use std::time::Instant;

use clap::Parser;
use segeval::config::{load_class_names, EvalArgs};
use segeval::{evaluate, read_samples, BackendRegistry, EvalError, Evaluation};
use tracing::info;

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = EvalArgs::parse();

    // no inference runtime is linked into the binary
    let registry = BackendRegistry::new();
    let mut predictor = registry.predictor_for(args.model_path.as_deref())?;

    let class_names = load_class_names(&args.classes_path)?;
    let samples = read_samples(&args.dataset_file)?;
    info!(
        dataset = %args.dataset_file.display(),
        samples = samples.len(),
        classes = class_names.len(),
        "loaded evaluation archive"
    );

    let start = Instant::now();
    let evaluation = evaluate(
        &mut predictor,
        samples,
        &class_names[..],
        Some(args.model_input_shape),
    )?;

    println!("{}", evaluation.report);

    if args.save_result {
        save_results(&args.result_dir, &evaluation)?;
        info!(dir = %args.result_dir.display(), "saved evaluation results");
    }

    println!(
        "Evaluation time cost: {:.6}s",
        start.elapsed().as_secs_f64()
    );

    Ok(())
}

fn save_results(dir: &Path, evaluation: &Evaluation) -> Result<(), EvalError> {
    fs::create_dir_all(dir).map_err(|e| EvalError::Io {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let create = |name: &str| {
        let path = dir.join(name);
        File::create(&path).map_err(|source| EvalError::Io { path, source })
    };

    evaluation.report.save_to_file(&mut create("report.json")?)?;
    serde_json::to_writer_pretty(
        create("confusion_matrix.json")?,
        &evaluation.matrix.normalized(),
    )?;
    serde_json::to_writer_pretty(create("per_sample.json")?, &evaluation.per_sample)?;
    Ok(())
}
