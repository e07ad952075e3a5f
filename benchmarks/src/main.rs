//! Compares a cross-validated grid search with and without the step cache.
//!
//! Usage:
//!   cargo run --release -p benchmarks                     # synthetic data
//!   cargo run --release -p benchmarks -- data.csv label   # CSV with a target column

use benchmarks::{load_csv, run_search, synthetic_classification, time_fn, BenchmarkStats, SearchReport};
use photonpipe_rs::prelude::*;
use std::error::Error;

const N_FOLDS: usize = 3;

fn template() -> Result<PhotonPipeline, PipelineError> {
    PhotonPipeline::new(vec![
        Node::from(PipelineElement::new("StandardScaler", StandardScaler::new())),
        PipelineElement::new("PCA", Pca::new())
            .with_hyperparameters([("n_components", vec![4.into(), 8.into(), 16.into()])])?
            .into(),
        PipelineElement::new("LR", LogisticRegression::new())
            .with_hyperparameters([
                ("learning_rate", vec![0.01.into(), 0.05.into(), 0.1.into()]),
                ("alpha", vec![0.0.into(), 0.001.into()]),
            ])?
            .into(),
    ])
    .map(|pipe| pipe.with_random_state(0))
}

fn print_report(label: &str, report: &SearchReport, total: std::time::Duration) {
    println!("{label}");
    println!("  total:  {total:.2?} for {} trials", report.n_trials);
    println!("  trials: {}", BenchmarkStats::from_times(report.trial_timer_ms.clone()));
    println!(
        "  cache:  {} hits, {} misses, {} saves",
        report.cache.hits, report.cache.misses, report.cache.saves
    );
    println!("  best:   {:.4}", report.best_score);
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    println!("photonpipe-rs cache benchmark\n");

    let args: Vec<String> = std::env::args().collect();
    let data = match args.as_slice() {
        [_, path, target, ..] => load_csv(path, target)?,
        _ => synthetic_classification(1500, 32, 6, 0)?,
    };
    println!(
        "{} samples, {} features, {N_FOLDS} folds\n",
        data.n_samples(),
        data.n_features()
    );

    let template = template()?;
    let (plain, plain_time) = time_fn(|| run_search(&template, &data, N_FOLDS, None));
    let plain = plain?;
    print_report("without cache", &plain, plain_time);

    let dir = tempfile::tempdir()?;
    let settings = CacheSettings::new()
        .with_caching(true)
        .with_cache_folder(dir.path());
    let (cached, cached_time) = time_fn(|| run_search(&template, &data, N_FOLDS, Some(&settings)));
    let cached = cached?;
    print_report("with cache", &cached, cached_time);

    if plain.best_config != cached.best_config {
        return Err("cached search selected a different configuration".into());
    }
    println!(
        "\nspeedup: {:.2}x",
        plain_time.as_secs_f64() / cached_time.as_secs_f64().max(f64::EPSILON)
    );
    Ok(())
}
