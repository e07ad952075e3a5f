//! Cached Grid Search Example
//!
//! Runs an exhaustive search over a scaler > PCA > logistic regression pipeline on
//! synthetic data with 3-fold cross validation, once without and once with caching.
//! Trials that only change the classifier reuse the cached scaler and PCA outputs.
//!
//! Run with: RUST_LOG=info cargo run --example cached_search

use ndarray::{Array1, Array2};
use photonpipe_rs::prelude::*;
use std::error::Error;
use std::time::Instant;

const N_SAMPLES: usize = 600;
const N_FEATURES: usize = 40;
const N_FOLDS: usize = 3;

fn synthetic_data() -> Result<SampleBatch, ElementError> {
    let mut rng = fastrand::Rng::with_seed(42);
    let x = Array2::from_shape_fn((N_SAMPLES, N_FEATURES), |(_, j)| {
        rng.f64() * (1.0 + j as f64 / 10.0)
    });
    let y = Array1::from_shape_fn(N_SAMPLES, |i| {
        let score = x[[i, 0]] - x[[i, 1]] + 0.5 * x[[i, 2]];
        if score > 0.3 {
            1.0
        } else {
            0.0
        }
    });
    SampleBatch::from_x(x).with_y(y)
}

fn build_pipeline() -> Result<PhotonPipeline, PipelineError> {
    PhotonPipeline::new(vec![
        Node::from(PipelineElement::new("StandardScaler", StandardScaler::new())),
        PipelineElement::new("PCA", Pca::new())
            .with_hyperparameters([("n_components", vec![5.into(), 10.into(), 20.into()])])?
            .into(),
        PipelineElement::new("LR", LogisticRegression::new())
            .with_hyperparameters([
                ("learning_rate", vec![0.05.into(), 0.1.into()]),
                ("alpha", vec![0.0.into(), 0.01.into()]),
            ])?
            .into(),
    ])
    .map(|pipe| pipe.with_random_state(7))
}

/// Every combination of the grid values.
fn grid(hyperparameters: &Hyperparameters) -> Vec<Configuration> {
    hyperparameters
        .iter()
        .fold(vec![Configuration::new()], |configs, (key, values)| {
            configs
                .iter()
                .flat_map(|c| values.iter().map(move |v| c.clone().with(key.clone(), v.clone())))
                .collect()
        })
}

fn accuracy(predictions: &Array1<f64>, y: &Array1<f64>) -> f64 {
    let correct = predictions
        .iter()
        .zip(y.iter())
        .filter(|(p, t)| (*p - *t).abs() < 0.5)
        .count();
    correct as f64 / y.len() as f64
}

fn search(
    data: &SampleBatch,
    settings: Option<CacheSettings>,
) -> Result<(Configuration, f64), Box<dyn Error>> {
    let template = build_pipeline()?;
    let configs = grid(&template.hyperparameters());
    let mut best = (Configuration::new(), f64::MIN);

    for fold in 0..N_FOLDS {
        let (train_idx, test_idx): (Vec<usize>, Vec<usize>) =
            (0..N_SAMPLES).partition(|i| i % N_FOLDS != fold);
        let train = data.select_rows(&train_idx);
        let test = data.select_rows(&test_idx);

        let mut pipe = template.copy_me();
        if let Some(settings) = &settings {
            pipe.set_cache_settings(settings.clone().with_fold_id(format!("fold_{fold}")));
        }

        for config in &configs {
            pipe.set_params(config)?;
            pipe.fit(&train)?;
            let predictions = pipe.predict(test.clone())?;
            let score = accuracy(&predictions, test.y.as_ref().ok_or("test fold has no targets")?);
            if score > best.1 {
                best = (config.clone(), score);
            }
        }
        if let Some(stats) = pipe.cache_stats() {
            println!(
                "  fold {fold}: {} hits, {} misses, hit rate {:.0}%",
                stats.hits,
                stats.misses,
                stats.hit_rate() * 100.0
            );
        }
    }
    Ok(best)
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();
    println!("=== Cached Grid Search ===\n");

    let data = synthetic_data()?;
    let n_trials = grid(&build_pipeline()?.hyperparameters()).len();
    println!("{n_trials} configurations x {N_FOLDS} folds\n");

    let start = Instant::now();
    let (plain_best, plain_score) = search(&data, None)?;
    println!("Without cache: {:.2?}", start.elapsed());

    let cache_dir = tempfile::tempdir()?;
    let settings = CacheSettings::new()
        .with_caching(true)
        .with_cache_folder(cache_dir.path());
    let start = Instant::now();
    let (cached_best, cached_score) = search(&data, Some(settings))?;
    println!("With cache:    {:.2?}", start.elapsed());
    println!(
        "Cache entries: {}",
        CacheManager::count_entries(cache_dir.path())?
    );

    assert_eq!(plain_best, cached_best);
    assert_eq!(plain_score, cached_score);
    println!("\nBest configuration (accuracy {cached_score:.3}):");
    for (key, value) in &cached_best {
        println!("  {key} = {value}");
    }
    Ok(())
}
