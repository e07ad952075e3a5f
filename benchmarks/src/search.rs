//! Cross-validated exhaustive search driver.

use crate::utils::Timer;
use log::info;
use ndarray::Array1;
use photonpipe_rs::{CacheSettings, CacheStats, Configuration, Hyperparameters, PhotonPipeline, PipelineError, SampleBatch};

/// Outcome of one search.
#[derive(Debug, Clone)]
pub struct SearchReport {
    pub best_config: Configuration,
    pub best_score: f64,
    pub n_trials: usize,
    /// Wall time per trial (fit + predict).
    pub trial_timer_ms: Vec<f64>,
    /// Cache counters summed over folds.
    pub cache: CacheStats,
}

/// Every combination of the grid values, in key order.
pub fn grid(hyperparameters: &Hyperparameters) -> Vec<Configuration> {
    hyperparameters
        .iter()
        .fold(vec![Configuration::new()], |configs, (key, values)| {
            configs
                .iter()
                .flat_map(|c| values.iter().map(move |v| c.clone().with(key.clone(), v.clone())))
                .collect()
        })
}

fn accuracy(predictions: &Array1<f64>, y: Option<&Array1<f64>>) -> f64 {
    match y {
        Some(y) if !y.is_empty() => {
            let correct = predictions
                .iter()
                .zip(y.iter())
                .filter(|(p, t)| (*p - *t).abs() < 0.5)
                .count();
            correct as f64 / y.len() as f64
        }
        _ => 0.0,
    }
}

/// Evaluate every grid configuration of `template` with `n_folds`-fold cross validation.
///
/// With `cache`, every fold gets its own fold id in the shared cache folder.
pub fn run_search(
    template: &PhotonPipeline,
    data: &SampleBatch,
    n_folds: usize,
    cache: Option<&CacheSettings>,
) -> Result<SearchReport, PipelineError> {
    let configs = grid(&template.hyperparameters());
    let n = data.n_samples();
    let mut report = SearchReport {
        best_config: Configuration::new(),
        best_score: f64::MIN,
        n_trials: 0,
        trial_timer_ms: Vec::new(),
        cache: CacheStats::default(),
    };

    for fold in 0..n_folds {
        let (train_idx, test_idx): (Vec<usize>, Vec<usize>) =
            (0..n).partition(|i| i % n_folds != fold);
        let train = data.select_rows(&train_idx);
        let test = data.select_rows(&test_idx);

        let mut pipe = template.copy_me();
        if let Some(settings) = cache {
            pipe.set_cache_settings(settings.clone().with_fold_id(format!("fold_{fold}")));
        }

        let mut timer = Timer::new();
        for config in &configs {
            timer.start();
            pipe.set_params(config)?;
            pipe.fit(&train)?;
            let predictions = pipe.predict(test.clone())?;
            timer.stop();

            let score = accuracy(&predictions, test.y.as_ref());
            report.n_trials += 1;
            if score > report.best_score {
                report.best_score = score;
                report.best_config = config.clone();
            }
        }
        info!("fold {fold}: {}", timer.stats());
        report.trial_timer_ms.extend(timer.laps_ms());

        if let Some(stats) = pipe.cache_stats() {
            report.cache.hits += stats.hits;
            report.cache.misses += stats.misses;
            report.cache.saves += stats.saves;
            report.cache.discarded += stats.discarded;
        }
    }
    Ok(report)
}
