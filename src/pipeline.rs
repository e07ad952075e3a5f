//! The caching pipeline executor.
//!
//! A [`PhotonPipeline`] runs an ordered list of named [`Node`]s. If the last node is an
//! estimator it is only fitted during [`fit`](PhotonPipeline::fit) and used by
//! [`predict`](PhotonPipeline::predict); every other node is fitted and then transforms
//! the data for the next one.
//!
//! With caching enabled, the output of every transforming step is stored on disk under a
//! key made of the fold id, the input data, the configuration of that step and everything
//! upstream of it, and the step name. Later runs that share the key load the output instead
//! of recomputing it, so a hyperparameter search that only changes downstream parameters
//! reuses the upstream work. Caching never changes results.
//!
//! # Example
//! ```ignore
//! use photonpipe_rs::prelude::*;
//!
//! let mut pipe = PhotonPipeline::new(vec![
//!     Node::from(PipelineElement::new("StandardScaler", StandardScaler::new())),
//!     PipelineElement::new("PCA", Pca::new()).into(),
//!     PipelineElement::new("LR", LogisticRegression::new()).into(),
//! ])?
//! .with_cache_settings(
//!     CacheSettings::new()
//!         .with_caching(true)
//!         .with_cache_folder("/tmp/photon_cache")
//!         .with_fold_id("outer_0_inner_1"),
//! );
//!
//! pipe.set_params(&Configuration::new().with("PCA__n_components", 5))?;
//! pipe.fit(&train)?;
//! let predictions = pipe.predict(test)?;
//! ```

use crate::cache::{CacheKey, CacheManager, CacheStats};
use crate::config::CacheSettings;
use crate::data::SampleBatch;
use crate::element::preprocessing::PREPROCESSING;
use crate::element::{ElementKind, Node, Preprocessing};
use crate::error::{ElementError, PipelineError, Result};
use crate::params::{join_key, split_key, Configuration, Hyperparameters, ParamValue, SEPARATOR};
use log::{debug, info, warn};
use ndarray::{Array1, Array2};
use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};

/// Fitted states remembered per step for restoring without a refit.
const FIT_SNAPSHOTS_PER_STEP: usize = 4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum CacheMode {
    Off,
    Batch,
    Items,
}

/// What a step's fitted state was derived from.
#[derive(Clone, Debug, PartialEq, Eq)]
struct FitIdentity {
    /// Digest of the step's fit key: fold, input data and relevant configuration.
    key: String,
    /// Digest of the relevant configuration alone.
    config: String,
}

impl FitIdentity {
    fn of(key: &CacheKey) -> Self {
        Self {
            key: key.digest(),
            config: key.config_digest.clone(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum FitState {
    /// Fitted through the cache under a known identity.
    Tracked(FitIdentity),
    /// Fitted without the cache; the configuration behind the state is unknown.
    Untracked,
}

/// Ordered, named steps with optional on-disk memoization of step outputs.
#[derive(Clone, Debug, Default)]
pub struct PhotonPipeline {
    steps: Vec<Node>,
    cache_settings: CacheSettings,
    random_state: Option<u64>,
    current_config: Configuration,
    cache_manager: Option<CacheManager>,
    /// Fitted state each step currently holds. Steps absent here were never fitted.
    fit_states: HashMap<String, FitState>,
    /// Recently fitted nodes per step, least recently used first.
    fit_memo: HashMap<String, VecDeque<(FitIdentity, Node)>>,
    n_features_in: Option<usize>,
}

impl PhotonPipeline {
    pub fn new<I, N>(steps: I) -> Result<Self>
    where
        I: IntoIterator<Item = N>,
        N: Into<Node>,
    {
        let mut pipeline = Self::default();
        for step in steps {
            pipeline.add(step)?;
        }
        Ok(pipeline)
    }

    /// Append a step. Step names must be unique and free of the `__` separator.
    pub fn add(&mut self, node: impl Into<Node>) -> Result<()> {
        let node = node.into();
        let name = node.name();
        if name.is_empty() || name.contains(SEPARATOR) {
            return Err(PipelineError::config(format!(
                "invalid step name '{name}': names must be non-empty and must not contain '{SEPARATOR}'"
            )));
        }
        if self.steps.iter().any(|s| s.name() == name) {
            return Err(PipelineError::config(format!("duplicate step name '{name}'")));
        }
        self.steps.push(node);
        Ok(())
    }

    pub fn with_step(mut self, node: impl Into<Node>) -> Result<Self> {
        self.add(node)?;
        Ok(self)
    }

    /// Insert `preprocessing` as the first step, named `Preprocessing`.
    pub fn add_preprocessing(&mut self, preprocessing: Preprocessing) -> Result<()> {
        if self.steps.iter().any(|s| s.name() == PREPROCESSING) {
            return Err(PipelineError::config("pipeline already has a preprocessing step"));
        }
        self.steps.insert(0, Node::Preprocessing(preprocessing));
        Ok(())
    }

    pub fn steps(&self) -> &[Node] {
        &self.steps
    }

    pub fn step_names(&self) -> Vec<String> {
        self.steps.iter().map(|s| s.name().to_string()).collect()
    }

    pub fn step(&self, name: &str) -> Option<&Node> {
        self.steps.iter().find(|s| s.name() == name)
    }

    pub fn step_mut(&mut self, name: &str) -> Option<&mut Node> {
        self.steps.iter_mut().find(|s| s.name() == name)
    }

    /// Search space of every step, keyed by step path.
    pub fn hyperparameters(&self) -> Hyperparameters {
        self.steps.iter().flat_map(Node::hyperparameters).collect()
    }

    /// The configuration of the current trial.
    pub fn current_config(&self) -> &Configuration {
        &self.current_config
    }

    /// Whether the last step is an estimator.
    pub fn has_estimator(&self) -> bool {
        self.terminal_estimator().is_some()
    }

    fn terminal_estimator(&self) -> Option<usize> {
        match self.steps.last() {
            Some(last) if last.kind() == ElementKind::Estimator => Some(self.steps.len() - 1),
            _ => None,
        }
    }

    fn n_transform_steps(&self) -> usize {
        self.terminal_estimator().unwrap_or(self.steps.len())
    }

    pub fn caching(&self) -> bool {
        self.cache_settings.enabled
    }

    pub fn set_caching(&mut self, enabled: bool) {
        self.cache_settings.enabled = enabled;
    }

    pub fn cache_folder(&self) -> Option<&Path> {
        self.cache_settings.cache_folder.as_deref()
    }

    pub fn set_cache_folder(&mut self, folder: impl Into<PathBuf>) {
        self.cache_settings.cache_folder = Some(folder.into());
    }

    pub fn fold_id(&self) -> &str {
        &self.cache_settings.fold_id
    }

    pub fn set_fold_id(&mut self, fold_id: impl Into<String>) {
        self.cache_settings.fold_id = fold_id.into();
    }

    pub fn cache_settings(&self) -> &CacheSettings {
        &self.cache_settings
    }

    pub fn set_cache_settings(&mut self, settings: CacheSettings) {
        self.cache_settings = settings;
    }

    pub fn with_cache_settings(mut self, settings: CacheSettings) -> Self {
        self.cache_settings = settings;
        self
    }

    /// Usage counters of the cache of the last cached run.
    pub fn cache_stats(&self) -> Option<&CacheStats> {
        self.cache_manager.as_ref().map(CacheManager::stats)
    }

    pub fn random_state(&self) -> Option<u64> {
        self.random_state
    }

    /// Seed pushed to every element declaring a `random_state` parameter before fitting.
    pub fn set_random_state(&mut self, seed: Option<u64>) {
        self.random_state = seed;
    }

    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Deep, independent copy: elements, fitted state, grids and settings. Fitted states
    /// remembered from earlier configurations stay with the original.
    pub fn copy_me(&self) -> Self {
        let mut copy = self.clone();
        copy.fit_memo.clear();
        copy
    }

    /// Configure the pipeline for one trial.
    ///
    /// Every element first returns to its construction-time parameters, then each
    /// `step__param` entry is applied. Keys that do not resolve to a step and parameter
    /// are a configuration error, and a rejected configuration leaves the pipeline as it was.
    pub fn set_params(&mut self, config: &Configuration) -> Result<()> {
        let mut staged = self.steps.clone();
        staged.iter_mut().try_for_each(Node::reset_params)?;
        distribute(&mut staged, config)?;
        self.steps = staged;
        self.current_config = config.clone();
        debug!("applied configuration with {} entries", config.len());
        Ok(())
    }

    /// Apply `config` in place on top of the current parameters.
    pub(crate) fn apply_params(&mut self, config: &Configuration) -> Result<()> {
        distribute(&mut self.steps, config)?;
        for (key, value) in config {
            self.current_config.insert(key.clone(), value.clone());
        }
        Ok(())
    }

    pub(crate) fn reset_params(&mut self) -> Result<()> {
        self.steps.iter_mut().try_for_each(Node::reset_params)?;
        self.current_config = Configuration::new();
        Ok(())
    }

    fn seed_elements(&mut self) -> Result<()> {
        let Some(seed) = self.random_state else {
            return Ok(());
        };
        let seed = i64::try_from(seed).map_err(|_| {
            PipelineError::config(format!("random_state {seed} exceeds the largest supported seed {}", i64::MAX))
        })?;
        let seeds: Configuration = self
            .steps
            .iter()
            .flat_map(|node| {
                node.random_state_paths()
                    .into_iter()
                    .map(move |path| join_key(node.name(), &path))
            })
            .map(|key| (key, ParamValue::Int(seed)))
            .collect();
        if seeds.is_empty() {
            return Ok(());
        }
        self.apply_params(&seeds)
    }

    /// Fit every step in order on the output of the previous one.
    pub fn fit(&mut self, batch: &SampleBatch) -> Result<()> {
        batch.validate()?;
        if self.steps.is_empty() {
            return Err(PipelineError::config("cannot fit a pipeline without steps"));
        }
        self.seed_elements()?;
        self.n_features_in = Some(batch.n_features());

        let mode = self.begin_run(batch)?;
        let n_transform = self.n_transform_steps();
        let mut current = batch.clone();
        for i in 0..n_transform {
            current = self.run_step(i, current, true, mode)?;
        }
        if n_transform < self.steps.len() {
            self.fit_node(n_transform, &current)?;
        }

        info!(
            "fitted pipeline [{}] on {} samples",
            self.step_names().join(" > "),
            batch.n_samples()
        );
        Ok(())
    }

    /// Transform through every step except a terminal estimator.
    pub fn transform(&mut self, batch: SampleBatch) -> Result<SampleBatch> {
        batch.validate()?;
        let mode = self.begin_run(&batch)?;
        let mut current = batch;
        for i in 0..self.n_transform_steps() {
            current = self.run_step(i, current, false, mode)?;
        }
        Ok(current)
    }

    pub fn predict(&mut self, batch: SampleBatch) -> Result<Array1<f64>> {
        let last = match self.terminal_estimator() {
            Some(i) if self.steps[i].can_predict() => i,
            _ => return Err(PipelineError::config("pipeline has no estimator able to predict")),
        };
        let transformed = self.transform(batch)?;
        let name = self.steps[last].name().to_string();
        self.steps[last]
            .predict(transformed)
            .map_err(|e| annotate(&name, e))
    }

    pub fn predict_proba(&mut self, batch: SampleBatch) -> Result<Array2<f64>> {
        let last = match self.terminal_estimator() {
            Some(i) if self.steps[i].can_predict_proba() => i,
            _ => {
                return Err(PipelineError::config(
                    "pipeline has no estimator able to predict probabilities",
                ))
            }
        };
        let transformed = self.transform(batch)?;
        let name = self.steps[last].name().to_string();
        self.steps[last]
            .predict_proba(transformed)
            .map_err(|e| annotate(&name, e))
    }

    /// Map data back through the steps in reverse order. Steps without an inverse pass
    /// the data through unchanged.
    pub fn inverse_transform(&mut self, batch: SampleBatch) -> Result<SampleBatch> {
        batch.validate()?;
        let mut current = batch;
        for i in (0..self.steps.len()).rev() {
            let name = self.steps[i].name().to_string();
            if !self.steps[i].has_inverse() {
                debug!("'{name}' has no inverse transform, passing data through");
                continue;
            }
            current = self.steps[i]
                .inverse_transform(current)
                .map_err(|e| annotate(&name, e))?;
        }
        if let Some(expected) = self.n_features_in {
            if current.n_features() != expected {
                warn!(
                    "inverse transform produced {} features, the pipeline was fitted on {}",
                    current.n_features(),
                    expected
                );
            }
        }
        Ok(current)
    }

    /// Remove the cache entries of this pipeline's fold, including nested cached branches.
    pub fn clear_cache(&mut self) -> Result<usize> {
        self.fit_memo.clear();
        let mut removed = 0;
        if let Some(folder) = self.cache_settings.cache_folder.clone() {
            removed += CacheManager::new(self.cache_settings.fold_id.clone(), folder).clear_cache()?;
        }
        for node in &mut self.steps {
            removed += node.clear_nested_caches()?;
        }
        Ok(removed)
    }

    fn begin_run(&mut self, batch: &SampleBatch) -> Result<CacheMode> {
        if !self.cache_settings.enabled {
            return Ok(CacheMode::Off);
        }
        let folder = self.cache_settings.require_folder()?.to_path_buf();
        let fold_id = self.cache_settings.fold_id.clone();
        for node in &mut self.steps {
            node.inherit_cache_scope(&fold_id, Some(&folder));
        }

        let mut manager = match self.cache_manager.take() {
            Some(m) if m.fold_id() == fold_id && m.cache_folder() == folder.as_path() => m,
            _ => CacheManager::new(fold_id, folder),
        };
        let keying = self
            .cache_settings
            .single_item_caching
            .then_some(self.cache_settings.item_keying);
        let prepared = manager.prepare(&self.step_names(), &self.current_config, Some(batch), keying);
        self.cache_manager = Some(manager);
        prepared?;

        Ok(if keying.is_some() {
            CacheMode::Items
        } else {
            CacheMode::Batch
        })
    }

    fn run_step(&mut self, i: usize, current: SampleBatch, fit: bool, mode: CacheMode) -> Result<SampleBatch> {
        match mode {
            CacheMode::Off => {
                if fit {
                    self.fit_node(i, &current)?;
                }
                self.transform_node(i, current)
            }
            CacheMode::Batch => self.batch_cached_step(i, current, fit),
            CacheMode::Items => {
                let name = self.steps[i].name().to_string();
                let key = self.manager()?.generate_fit_key(&name)?;
                if fit {
                    self.ensure_fitted(i, &name, FitIdentity::of(&key), &current)?;
                } else if !self.serves_cache(&name, &key) {
                    return self.transform_node(i, current);
                }
                self.item_cached_step(i, current)
            }
        }
    }

    fn batch_cached_step(&mut self, i: usize, current: SampleBatch, fit: bool) -> Result<SampleBatch> {
        let name = self.steps[i].name().to_string();
        let key = self.manager()?.generate_cache_key(&name)?;
        if !fit && !self.serves_cache(&name, &key) {
            return self.transform_node(i, current);
        }

        if let Some(cached) = self.cache_io(|m| m.load_key(&key))?.flatten() {
            if fit {
                self.ensure_fitted(i, &name, FitIdentity::of(&key), &current)?;
            }
            return Ok(cached);
        }

        if fit {
            self.fit_node(i, &current)?;
            self.remember_fit(i, &name, FitIdentity::of(&key));
        }
        let output = self.transform_node(i, current)?;
        self.cache_io(|m| m.save_key(&key, &output))?;
        Ok(output)
    }

    /// Whether entries under `key` match what step `name` computes with its current
    /// fitted state. Steps never fitted by this pipeline are served from the cache.
    fn serves_cache(&self, name: &str, key: &CacheKey) -> bool {
        let matches = match self.fit_states.get(name) {
            None => true,
            Some(FitState::Tracked(identity)) => identity.config == key.config_digest,
            Some(FitState::Untracked) => false,
        };
        if !matches {
            debug!("'{name}' holds state not fitted under this configuration, computing without the cache");
        }
        matches
    }

    fn item_cached_step(&mut self, i: usize, current: SampleBatch) -> Result<SampleBatch> {
        let name = self.steps[i].name().to_string();
        let n = current.n_samples();
        if n == 0 {
            return self.transform_node(i, current);
        }
        let n_items = self.manager()?.n_items();
        if n != n_items {
            return Err(PipelineError::config(format!(
                "step '{name}' received {n} samples for {n_items} items; per-item caching needs row-preserving steps"
            )));
        }

        let mut rows: Vec<Option<SampleBatch>> = vec![None; n];
        let mut missing = Vec::new();
        for (j, slot) in rows.iter_mut().enumerate() {
            match self.cache_io(|m| m.load_item(&name, j))?.flatten() {
                Some(row) if row.n_samples() == 1 => *slot = Some(row),
                _ => missing.push(j),
            }
        }

        if !missing.is_empty() {
            debug!("'{name}': computing {} of {n} items", missing.len());
            let computed = self.transform_node(i, current.select_rows(&missing))?;
            if computed.n_samples() != missing.len() {
                return Err(ElementError::InvalidShape {
                    expected: format!("{} rows from '{name}'", missing.len()),
                    got: format!("{} rows", computed.n_samples()),
                }
                .into());
            }
            for (pos, &j) in missing.iter().enumerate() {
                let row = computed.select_rows(&[pos]);
                self.cache_io(|m| m.save_item(&name, j, &row))?;
                rows[j] = Some(row);
            }
        }

        let rows: Vec<SampleBatch> = rows.into_iter().flatten().collect();
        Ok(SampleBatch::concat_rows(&rows)?)
    }

    /// Make sure step `i` holds the fitted state belonging to `identity` without refitting
    /// when that state is already present or remembered.
    fn ensure_fitted(&mut self, i: usize, name: &str, identity: FitIdentity, input: &SampleBatch) -> Result<()> {
        if matches!(self.fit_states.get(name), Some(FitState::Tracked(held)) if *held == identity) {
            debug!("'{name}' is already fitted for this input");
            return Ok(());
        }
        let restored = self.fit_memo.get_mut(name).and_then(|memo| {
            let pos = memo.iter().position(|(id, _)| *id == identity)?;
            let entry = memo.remove(pos)?;
            let node = entry.1.clone();
            memo.push_back(entry);
            Some(node)
        });
        match restored {
            Some(node) => {
                debug!("restoring fitted state of '{name}'");
                self.steps[i] = node;
                self.fit_states.insert(name.to_string(), FitState::Tracked(identity));
            }
            None => {
                self.fit_node(i, input)?;
                self.remember_fit(i, name, identity);
            }
        }
        Ok(())
    }

    fn remember_fit(&mut self, i: usize, name: &str, identity: FitIdentity) {
        let memo = self.fit_memo.entry(name.to_string()).or_default();
        memo.retain(|(id, _)| *id != identity);
        if memo.len() >= FIT_SNAPSHOTS_PER_STEP {
            memo.pop_front();
        }
        memo.push_back((identity.clone(), self.steps[i].clone()));
        self.fit_states.insert(name.to_string(), FitState::Tracked(identity));
    }

    fn fit_node(&mut self, i: usize, batch: &SampleBatch) -> Result<()> {
        let name = self.steps[i].name().to_string();
        self.fit_states.insert(name.clone(), FitState::Untracked);
        debug!("fitting '{name}'");
        self.steps[i].fit(batch).map_err(|e| annotate(&name, e))
    }

    fn transform_node(&mut self, i: usize, batch: SampleBatch) -> Result<SampleBatch> {
        let name = self.steps[i].name().to_string();
        self.steps[i].transform(batch).map_err(|e| annotate(&name, e))
    }

    fn manager(&self) -> Result<&CacheManager> {
        self.cache_manager
            .as_ref()
            .ok_or_else(|| PipelineError::config("cache used before the run was prepared"))
    }

    /// Run a cache operation. With `fallback_on_io_error`, cache failures become `None`
    /// and the caller computes without the cache.
    fn cache_io<T>(&mut self, op: impl FnOnce(&mut CacheManager) -> Result<T>) -> Result<Option<T>> {
        let fallback = self.cache_settings.fallback_on_io_error;
        let manager = self
            .cache_manager
            .as_mut()
            .ok_or_else(|| PipelineError::config("cache used before the run was prepared"))?;
        match op(manager) {
            Ok(value) => Ok(Some(value)),
            Err(e) if fallback && e.is_cache_error() => {
                warn!("cache unavailable, computing without it: {e}");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

/// Route `step__rest` entries to their steps after checking that every key names one.
fn distribute(steps: &mut [Node], config: &Configuration) -> Result<()> {
    for (key, _) in config {
        let head = split_key(key).map(|(head, _)| head).ok_or_else(|| {
            PipelineError::config(format!("'{key}' is not of the form step{SEPARATOR}param"))
        })?;
        if !steps.iter().any(|s| s.name() == head) {
            return Err(PipelineError::config(format!(
                "no step named '{head}' for parameter '{key}'"
            )));
        }
    }
    for step in steps.iter_mut() {
        let scoped = config.scoped(step.name());
        if !scoped.is_empty() {
            step.set_params(&scoped)?;
        }
    }
    Ok(())
}

fn annotate(step: &str, err: PipelineError) -> PipelineError {
    if let PipelineError::Element(inner) = &err {
        warn!("step '{step}' failed: {inner}");
    }
    err
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ItemKeying;
    use crate::data::{Channel, SAMPLE_IDS};
    use crate::element::{
        BaseEstimator, Branch, CallbackElement, PipelineElement, Stack, Switch, Transform,
    };
    use crate::estimators::{LinearRegression, LogisticRegression, MinMaxScaler, Pca, RowPooling, StandardScaler};
    use crate::params::Params;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn init_logging() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn create_test_data() -> SampleBatch {
        let n = 40;
        let x = Array2::from_shape_fn((n, 6), |(i, j)| {
            let t = i as f64 / n as f64;
            ((i * 7 + j * 13) % 11) as f64 * 0.3 + (j as f64 + 1.0) * t + (3.0 * t * (j as f64 + 1.0)).sin()
        });
        let y = Array1::from_shape_fn(n, |i| (i % 2) as f64);
        SampleBatch::from_x(x).with_y(y).unwrap()
    }

    fn create_pipeline() -> PhotonPipeline {
        PhotonPipeline::new(vec![
            Node::from(PipelineElement::new("StandardScaler", StandardScaler::new())),
            PipelineElement::new("PCA", Pca::new())
                .with_hyperparameters([("n_components", vec![3.into(), 4.into()])])
                .unwrap()
                .into(),
            PipelineElement::new("LR", LogisticRegression::new())
                .with_hyperparameters([("learning_rate", vec![0.1.into(), 0.05.into()])])
                .unwrap()
                .into(),
        ])
        .unwrap()
    }

    fn cache_settings(dir: &tempfile::TempDir) -> CacheSettings {
        CacheSettings::new()
            .with_caching(true)
            .with_cache_folder(dir.path())
            .with_fold_id("fold_1")
    }

    fn config(n_components: i64, learning_rate: f64) -> Configuration {
        Configuration::new()
            .with("PCA__n_components", n_components)
            .with("LR__learning_rate", learning_rate)
    }

    fn count_files(dir: &tempfile::TempDir) -> usize {
        CacheManager::count_entries(dir.path()).unwrap()
    }

    /// Wraps an element and counts how often it is fitted and applied.
    #[derive(Clone)]
    struct CountingElement {
        inner: Box<dyn BaseEstimator>,
        fits: Arc<AtomicUsize>,
        transforms: Arc<AtomicUsize>,
    }

    impl CountingElement {
        fn new(inner: impl BaseEstimator + 'static) -> Self {
            Self {
                inner: Box::new(inner),
                fits: Arc::new(AtomicUsize::new(0)),
                transforms: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl BaseEstimator for CountingElement {
        fn type_name(&self) -> &'static str {
            self.inner.type_name()
        }

        fn param_names(&self) -> &'static [&'static str] {
            self.inner.param_names()
        }

        fn set_param(&mut self, name: &str, value: &ParamValue) -> std::result::Result<(), ElementError> {
            self.inner.set_param(name, value)
        }

        fn get_params(&self) -> Params {
            self.inner.get_params()
        }

        fn fit(&mut self, batch: &SampleBatch) -> std::result::Result<(), ElementError> {
            self.fits.fetch_add(1, Ordering::SeqCst);
            self.inner.fit(batch)
        }

        fn as_transformer(&self) -> Option<&dyn Transform> {
            Some(self)
        }

        fn clone_box(&self) -> Box<dyn BaseEstimator> {
            Box::new(self.clone())
        }
    }

    impl Transform for CountingElement {
        fn transform(&self, batch: SampleBatch) -> std::result::Result<SampleBatch, ElementError> {
            self.transforms.fetch_add(1, Ordering::SeqCst);
            self.inner
                .as_transformer()
                .ok_or_else(|| ElementError::Unsupported("inner cannot transform".into()))?
                .transform(batch)
        }
    }

    /// Rewrites x, y and a side channel; only runs when y is present.
    #[derive(Clone, Default)]
    struct YAndCovariatesTransformer {
        calls: Arc<AtomicUsize>,
    }

    impl BaseEstimator for YAndCovariatesTransformer {
        fn type_name(&self) -> &'static str {
            "YAndCovariatesTransformer"
        }

        fn param_names(&self) -> &'static [&'static str] {
            &[]
        }

        fn set_param(&mut self, name: &str, _value: &ParamValue) -> std::result::Result<(), ElementError> {
            Err(ElementError::InvalidParameter(name.to_string()))
        }

        fn get_params(&self) -> Params {
            Params::new()
        }

        fn fit(&mut self, _batch: &SampleBatch) -> std::result::Result<(), ElementError> {
            Ok(())
        }

        fn as_transformer(&self) -> Option<&dyn Transform> {
            Some(self)
        }

        fn clone_box(&self) -> Box<dyn BaseEstimator> {
            Box::new(self.clone())
        }
    }

    impl Transform for YAndCovariatesTransformer {
        fn transform(&self, mut batch: SampleBatch) -> std::result::Result<SampleBatch, ElementError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            batch.x -= 1.0;
            batch.y = batch.y.map(|y| y + 1.0);
            if let Some(Channel::Vector(v)) = batch.kwargs.get("sample1").cloned() {
                batch
                    .kwargs
                    .insert("sample1_edit".to_string(), Channel::Vector(v + 5.0));
            }
            Ok(batch)
        }

        fn needs_y(&self) -> bool {
            true
        }
    }

    #[test]
    fn test_cache_file_counts_across_configurations() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let data = create_test_data();
        let mut pipe = create_pipeline().with_cache_settings(cache_settings(&dir));

        pipe.set_params(&config(3, 0.1)).unwrap();
        pipe.fit(&data).unwrap();
        let first = pipe.transform(data.clone()).unwrap();
        assert_eq!(count_files(&dir), 2);

        // identical configuration: everything is loaded
        pipe.set_params(&config(3, 0.1)).unwrap();
        pipe.fit(&data).unwrap();
        let second = pipe.transform(data.clone()).unwrap();
        assert_eq!(count_files(&dir), 2);
        assert_eq!(first, second);

        // only PCA changed: scaler entry reused, one new PCA entry
        pipe.set_params(&config(4, 0.1)).unwrap();
        pipe.fit(&data).unwrap();
        pipe.transform(data.clone()).unwrap();
        assert_eq!(count_files(&dir), 3);

        // only the estimator changed: no new entries
        pipe.set_params(&config(4, 0.05)).unwrap();
        pipe.fit(&data).unwrap();
        assert_eq!(count_files(&dir), 3);

        let stats = pipe.cache_stats().unwrap();
        assert_eq!(stats.saves, 3);
        assert!(stats.hits > 0);
    }

    #[test]
    fn test_caching_does_not_change_results() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let data = create_test_data();
        let mut plain = create_pipeline();
        let mut cached = create_pipeline().with_cache_settings(cache_settings(&dir));

        for cfg in [config(3, 0.1), config(4, 0.05), config(3, 0.1)] {
            plain.set_params(&cfg).unwrap();
            plain.fit(&data).unwrap();
            cached.set_params(&cfg).unwrap();
            cached.fit(&data).unwrap();

            assert_eq!(
                plain.transform(data.clone()).unwrap(),
                cached.transform(data.clone()).unwrap()
            );
            assert_eq!(
                plain.predict(data.clone()).unwrap(),
                cached.predict(data.clone()).unwrap()
            );
            assert_eq!(
                plain.predict_proba(data.clone()).unwrap(),
                cached.predict_proba(data.clone()).unwrap()
            );
        }
    }

    #[test]
    fn test_transform_after_reconfiguring_uses_held_state() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let data = create_test_data();
        let mut plain = create_pipeline();
        let mut cached = create_pipeline().with_cache_settings(cache_settings(&dir));

        for pipe in [&mut plain, &mut cached] {
            pipe.set_params(&config(3, 0.1)).unwrap();
            pipe.fit(&data).unwrap();
            pipe.set_params(&config(4, 0.1)).unwrap();
            pipe.fit(&data).unwrap();
            // parameters change, fitted state stays that of the last fit
            pipe.set_params(&config(3, 0.1)).unwrap();
        }
        assert_eq!(count_files(&dir), 3);

        let expected = plain.transform(data.clone()).unwrap();
        assert_eq!(expected.n_features(), 4);
        assert_eq!(cached.transform(data.clone()).unwrap(), expected);
        assert_eq!(
            cached.predict(data.clone()).unwrap(),
            plain.predict(data.clone()).unwrap()
        );
        // outputs of the held state are not stored under the new configuration
        assert_eq!(count_files(&dir), 3);

        cached.fit(&data).unwrap();
        assert_eq!(cached.transform(data).unwrap().n_features(), 3);
    }

    #[test]
    fn test_cache_hit_skips_refit() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let data = create_test_data();
        let scaler = CountingElement::new(StandardScaler::new());
        let pca = CountingElement::new(Pca::new());
        let (scaler_fits, pca_fits) = (Arc::clone(&scaler.fits), Arc::clone(&pca.fits));
        let pca_transforms = Arc::clone(&pca.transforms);

        let mut pipe = PhotonPipeline::new(vec![
            Node::from(PipelineElement::new("StandardScaler", scaler)),
            PipelineElement::new("PCA", pca).into(),
            PipelineElement::new("LR", LogisticRegression::new()).into(),
        ])
        .unwrap()
        .with_cache_settings(cache_settings(&dir));

        pipe.set_params(&config(3, 0.1)).unwrap();
        pipe.fit(&data).unwrap();
        let expected = pipe.predict(data.clone()).unwrap();
        assert_eq!(pca_fits.load(Ordering::SeqCst), 1);
        assert_eq!(pca_transforms.load(Ordering::SeqCst), 1);

        pipe.set_params(&config(4, 0.1)).unwrap();
        pipe.fit(&data).unwrap();
        assert_eq!(scaler_fits.load(Ordering::SeqCst), 1);
        assert_eq!(pca_fits.load(Ordering::SeqCst), 2);

        // back to the first configuration: PCA state is restored, not refitted
        pipe.set_params(&config(3, 0.1)).unwrap();
        pipe.fit(&data).unwrap();
        assert_eq!(pca_fits.load(Ordering::SeqCst), 2);
        assert_eq!(pca_transforms.load(Ordering::SeqCst), 2);
        assert_eq!(pipe.predict(data.clone()).unwrap(), expected);
    }

    #[test]
    fn test_held_out_data_is_not_served_from_training_entries() {
        let dir = tempfile::tempdir().unwrap();
        let data = create_test_data();
        let train = data.select_rows(&(0..30).collect::<Vec<_>>());
        let test = data.select_rows(&(30..40).collect::<Vec<_>>());

        let mut cached = create_pipeline().with_cache_settings(cache_settings(&dir));
        let mut plain = create_pipeline();
        for pipe in [&mut cached, &mut plain] {
            pipe.set_params(&config(3, 0.1)).unwrap();
            pipe.fit(&train).unwrap();
        }
        assert_eq!(
            cached.transform(test.clone()).unwrap(),
            plain.transform(test).unwrap()
        );
        assert_eq!(count_files(&dir), 4);
    }

    #[test]
    fn test_copy_me_is_independent() {
        let data = create_test_data();
        let mut original = create_pipeline();
        original.set_params(&config(3, 0.1)).unwrap();
        original.fit(&data).unwrap();
        let before = original.transform(data.clone()).unwrap();

        let mut copy = original.copy_me();
        copy.set_params(&config(4, 0.05)).unwrap();
        copy.fit(&data).unwrap();

        assert_eq!(copy.transform(data.clone()).unwrap().n_features(), 4);
        assert_eq!(original.transform(data.clone()).unwrap(), before);
        assert_eq!(original.current_config(), &config(3, 0.1));
    }

    #[test]
    fn test_invalid_configuration_leaves_state_unchanged() {
        let mut pipe = create_pipeline();
        pipe.set_params(&config(3, 0.1)).unwrap();

        let bad_configs = [
            config(4, 0.1).with("LDA__n_components", 2),
            config(4, 0.1).with("n_components", 2),
            config(4, 0.1).with("PCA__kernel", "rbf"),
        ];
        for bad in &bad_configs {
            let err = pipe.set_params(bad).unwrap_err();
            assert!(matches!(err, PipelineError::Configuration(_)), "{err}");
        }

        assert_eq!(pipe.current_config(), &config(3, 0.1));
        match pipe.step("PCA") {
            Some(Node::Element(e)) => assert_eq!(
                e.base_element().get_params().get("n_components"),
                Some(&ParamValue::Int(3))
            ),
            other => panic!("unexpected step {other:?}"),
        }
    }

    #[test]
    fn test_empty_configuration() {
        let dir = tempfile::tempdir().unwrap();
        let data = create_test_data();
        let mut pipe = create_pipeline().with_cache_settings(cache_settings(&dir));
        pipe.set_params(&Configuration::new()).unwrap();
        pipe.fit(&data).unwrap();
        // PCA keeps every component by default
        assert_eq!(pipe.transform(data).unwrap().n_features(), 6);
        assert_eq!(count_files(&dir), 2);
    }

    #[test]
    fn test_y_transformer_passes_through_without_y() {
        let data = create_test_data()
            .with_channel("sample1", Channel::Vector(Array1::linspace(0.0, 1.0, 40)))
            .unwrap();
        let dummy = YAndCovariatesTransformer::default();
        let calls = Arc::clone(&dummy.calls);
        let mut pipe = PhotonPipeline::new(vec![
            Node::from(PipelineElement::new("Dummy", dummy)),
            PipelineElement::new("SS", StandardScaler::new()).into(),
        ])
        .unwrap();
        pipe.fit(&data).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let with_y = pipe.transform(data.clone()).unwrap();
        assert_eq!(with_y.y, data.y.as_ref().map(|y| y + 1.0));
        assert!(with_y.kwargs.contains_key("sample1_edit"));

        let x_only = SampleBatch::from_x(data.x.clone());
        let out = pipe.transform(x_only.clone()).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert!(out.y.is_none());
        let scaled_directly = pipe.step_mut("SS").unwrap().transform(x_only).unwrap();
        assert_eq!(out.x, scaled_directly.x);
    }

    #[test]
    fn test_inverse_transform_recovers_width() {
        let data = create_test_data();
        let mut pipe = PhotonPipeline::new(vec![
            Node::from(PipelineElement::new("SS", StandardScaler::new())),
            PipelineElement::new("PCA", Pca::new().with_n_components(2)).into(),
        ])
        .unwrap();
        pipe.fit(&data).unwrap();
        let reduced = pipe.transform(data.clone()).unwrap();
        assert_eq!(reduced.n_features(), 2);
        assert_eq!(pipe.inverse_transform(reduced).unwrap().n_features(), 6);

        // lossless with every component
        let mut full = PhotonPipeline::new(vec![
            Node::from(PipelineElement::new("SS", StandardScaler::new())),
            PipelineElement::new("PCA", Pca::new()).into(),
            PipelineElement::new("LR", LogisticRegression::new()).into(),
        ])
        .unwrap();
        full.fit(&data).unwrap();
        let transformed = full.transform(data.clone()).unwrap();
        let restored = full.inverse_transform(transformed).unwrap();
        for (a, b) in restored.x.iter().zip(data.x.iter()) {
            assert!((a - b).abs() < 1e-6);
        }
    }

    #[test]
    fn test_pipeline_without_estimator() {
        let data = create_test_data();
        let mut pipe = PhotonPipeline::new(vec![
            Node::from(PipelineElement::new("SS", StandardScaler::new())),
            PipelineElement::new("PCA", Pca::new().with_n_components(2)).into(),
        ])
        .unwrap();
        assert!(!pipe.has_estimator());
        pipe.fit(&data).unwrap();
        assert_eq!(pipe.transform(data.clone()).unwrap().n_features(), 2);
        assert!(matches!(
            pipe.predict(data.clone()),
            Err(PipelineError::Configuration(_))
        ));

        let mut regression = PhotonPipeline::new(vec![
            Node::from(PipelineElement::new("SS", StandardScaler::new())),
            PipelineElement::new("LinReg", LinearRegression::new()).into(),
        ])
        .unwrap();
        regression.fit(&data).unwrap();
        assert_eq!(regression.predict(data.clone()).unwrap().len(), 40);
        assert!(matches!(
            regression.predict_proba(data),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_single_item_caching() {
        init_logging();
        let dir = tempfile::tempdir().unwrap();
        let ids: Vec<String> = (0..8).map(|i| format!("subject_{i:02}")).collect();
        let data = create_test_data()
            .select_rows(&(0..8).collect::<Vec<_>>())
            .with_channel(SAMPLE_IDS, Channel::Labels(ids))
            .unwrap();

        let mut pipe = PhotonPipeline::new(vec![
            Node::from(
                PipelineElement::new("pool", RowPooling::new())
                    .with_hyperparameters([("pool_size", vec![2.into(), 3.into()])])
                    .unwrap()
                    .with_batch_size(3)
                    .with_workers(2),
            ),
            PipelineElement::new("PCA", Pca::new()).into(),
        ])
        .unwrap()
        .with_cache_settings(cache_settings(&dir).with_single_item_caching(true));

        let cfg = |pool: i64, comps: i64| {
            Configuration::new()
                .with("pool__pool_size", pool)
                .with("PCA__n_components", comps)
        };

        pipe.set_params(&cfg(2, 2)).unwrap();
        pipe.fit(&data).unwrap();
        assert_eq!(count_files(&dir), 16);
        pipe.transform(data.clone()).unwrap();
        assert_eq!(count_files(&dir), 16);

        pipe.set_params(&cfg(2, 1)).unwrap();
        pipe.fit(&data).unwrap();
        assert_eq!(count_files(&dir), 24);

        pipe.set_params(&cfg(3, 1)).unwrap();
        pipe.fit(&data).unwrap();
        assert_eq!(count_files(&dir), 40);

        // a subset of known items is served entirely from the cache
        let subset = data.select_rows(&[0, 1, 2, 3]);
        let cached = pipe.transform(subset.clone()).unwrap();
        assert_eq!(count_files(&dir), 40);

        let mut uncached = pipe.copy_me();
        uncached.set_caching(false);
        let expected = uncached.transform(subset).unwrap();
        assert_eq!(cached.x.dim(), (4, 1));
        for (a, b) in cached.x.iter().zip(expected.x.iter()) {
            assert!((a - b).abs() < 1e-12);
        }
    }

    #[test]
    fn test_single_item_caching_skips_refit() {
        let dir = tempfile::tempdir().unwrap();
        let ids: Vec<String> = (0..10).map(|i| format!("subject_{i:02}")).collect();
        let data = create_test_data()
            .select_rows(&(0..10).collect::<Vec<_>>())
            .with_channel(SAMPLE_IDS, Channel::Labels(ids))
            .unwrap();
        let pca = CountingElement::new(Pca::new());
        let fits = Arc::clone(&pca.fits);
        let mut pipe = PhotonPipeline::new(vec![PipelineElement::new("PCA", pca)])
            .unwrap()
            .with_cache_settings(cache_settings(&dir).with_single_item_caching(true));

        let components = |n: i64| Configuration::new().with("PCA__n_components", n);
        pipe.set_params(&components(2)).unwrap();
        for _ in 0..3 {
            pipe.fit(&data).unwrap();
        }
        assert_eq!(fits.load(Ordering::SeqCst), 1);
        let expected = pipe.transform(data.clone()).unwrap();

        pipe.set_params(&components(3)).unwrap();
        pipe.fit(&data).unwrap();
        assert_eq!(fits.load(Ordering::SeqCst), 2);

        // remembered state of the first configuration is restored
        pipe.set_params(&components(2)).unwrap();
        pipe.fit(&data).unwrap();
        assert_eq!(fits.load(Ordering::SeqCst), 2);
        assert_eq!(pipe.transform(data.clone()).unwrap(), expected);

        // different data is a new fit
        pipe.fit(&data.select_rows(&(0..8).collect::<Vec<_>>())).unwrap();
        assert_eq!(fits.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_fit_memo_is_bounded_and_not_copied() {
        let dir = tempfile::tempdir().unwrap();
        let data = create_test_data();
        let mut pipe = create_pipeline().with_cache_settings(cache_settings(&dir));
        pipe.set_params(&config(3, 0.1)).unwrap();
        for seed in 0..20 {
            pipe.set_random_state(Some(seed));
            pipe.fit(&data).unwrap();
        }

        assert!(pipe.fit_memo.values().all(|memo| memo.len() <= FIT_SNAPSHOTS_PER_STEP));
        assert_eq!(pipe.fit_memo["PCA"].len(), FIT_SNAPSHOTS_PER_STEP);
        assert_eq!(pipe.fit_memo["StandardScaler"].len(), 1);

        let mut copy = pipe.copy_me();
        assert!(copy.fit_memo.is_empty());
        assert_eq!(
            copy.predict(data.clone()).unwrap(),
            pipe.predict(data).unwrap()
        );
    }

    #[test]
    fn test_oversized_random_state_is_configuration_error() {
        let mut pipe = create_pipeline().with_random_state(u64::MAX);
        assert!(matches!(
            pipe.fit(&create_test_data()),
            Err(PipelineError::Configuration(_))
        ));
        pipe.set_random_state(Some(i64::MAX as u64));
        pipe.fit(&create_test_data()).unwrap();
    }

    #[test]
    fn test_single_item_caching_requires_identifiers() {
        let dir = tempfile::tempdir().unwrap();
        let data = create_test_data();
        let settings = cache_settings(&dir).with_single_item_caching(true);
        let mut pipe = PhotonPipeline::new(vec![PipelineElement::new("pool", RowPooling::new())])
            .unwrap()
            .with_cache_settings(settings.clone());
        assert!(matches!(pipe.fit(&data), Err(PipelineError::Configuration(_))));

        pipe.set_cache_settings(settings.with_item_keying(ItemKeying::RowContent));
        pipe.fit(&data).unwrap();
        assert_eq!(count_files(&dir), 40);
    }

    #[test]
    fn test_branch_with_item_caching() {
        let dir = tempfile::tempdir().unwrap();
        let data = create_test_data().select_rows(&[0, 1, 2, 3, 4]);
        let branch = Branch::new("neuro")
            .with(PipelineElement::new("pool", RowPooling::new()))
            .unwrap()
            .with_cache_settings(
                CacheSettings::new()
                    .with_caching(true)
                    .with_cache_folder(dir.path())
                    .with_single_item_caching(true)
                    .with_item_keying(ItemKeying::RowContent),
            );
        let mut pipe = PhotonPipeline::new(vec![
            Node::from(branch),
            PipelineElement::new("LinReg", LinearRegression::new()).into(),
        ])
        .unwrap();
        pipe.fit(&data).unwrap();
        assert_eq!(count_files(&dir), 5);
        assert_eq!(pipe.predict(data).unwrap().len(), 5);
        assert_eq!(count_files(&dir), 5);
    }

    #[test]
    fn test_corrupt_entries_are_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let data = create_test_data();
        let mut pipe = create_pipeline().with_cache_settings(cache_settings(&dir));
        pipe.set_params(&config(3, 0.1)).unwrap();
        pipe.fit(&data).unwrap();
        let expected = pipe.transform(data.clone()).unwrap();

        for entry in std::fs::read_dir(dir.path()).unwrap() {
            std::fs::write(entry.unwrap().path(), b"not a cache entry").unwrap();
        }
        pipe.fit(&data).unwrap();
        assert_eq!(pipe.transform(data).unwrap(), expected);
        assert_eq!(pipe.cache_stats().unwrap().discarded, 2);
        assert_eq!(count_files(&dir), 2);
    }

    #[test]
    fn test_cache_io_error_and_fallback() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, b"x").unwrap();
        let data = create_test_data();
        let settings = CacheSettings::new()
            .with_caching(true)
            .with_cache_folder(blocker.join("cache"));

        let mut pipe = create_pipeline().with_cache_settings(settings.clone());
        pipe.set_params(&config(3, 0.1)).unwrap();
        let err = pipe.fit(&data).unwrap_err();
        assert!(err.is_cache_error());

        pipe.set_cache_settings(settings.with_fallback_on_io_error(true));
        pipe.fit(&data).unwrap();
        let mut plain = create_pipeline();
        plain.set_params(&config(3, 0.1)).unwrap();
        plain.fit(&data).unwrap();
        assert_eq!(
            pipe.predict(data.clone()).unwrap(),
            plain.predict(data).unwrap()
        );
    }

    #[test]
    fn test_caching_requires_folder() {
        let mut pipe = create_pipeline().with_cache_settings(CacheSettings::new().with_caching(true));
        assert!(matches!(
            pipe.fit(&create_test_data()),
            Err(PipelineError::Configuration(_))
        ));
    }

    #[test]
    fn test_element_error_propagates_unchanged() {
        let mut pipe = create_pipeline();
        pipe.set_params(&config(10, 0.1)).unwrap();
        match pipe.fit(&create_test_data()) {
            Err(PipelineError::Element(ElementError::InvalidParameter(msg))) => {
                assert!(msg.contains("n_components"))
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_clear_cache_is_fold_scoped() {
        let dir = tempfile::tempdir().unwrap();
        let data = create_test_data();
        let mut a = create_pipeline().with_cache_settings(cache_settings(&dir));
        a.set_params(&config(3, 0.1)).unwrap();
        let mut b = a.copy_me();
        b.set_fold_id("fold_2");

        a.fit(&data).unwrap();
        b.fit(&data).unwrap();
        assert_eq!(count_files(&dir), 4);

        assert_eq!(a.clear_cache().unwrap(), 2);
        assert_eq!(count_files(&dir), 2);
        assert_eq!(a.clear_cache().unwrap(), 0);
    }

    #[test]
    fn test_preprocessing_is_first_and_unique() {
        let data = create_test_data();
        let mut pipe = create_pipeline();
        let preprocessing = Preprocessing::new()
            .with(PipelineElement::new("MinMax", MinMaxScaler::new()))
            .unwrap();
        pipe.add_preprocessing(preprocessing.clone()).unwrap();
        assert_eq!(pipe.steps()[0].name(), PREPROCESSING);
        assert!(pipe.add_preprocessing(preprocessing).is_err());

        pipe.set_params(&config(3, 0.1)).unwrap();
        pipe.fit(&data).unwrap();
        assert_eq!(pipe.predict(data).unwrap().len(), 40);
        assert!(!pipe.hyperparameters().keys().any(|k| k.starts_with(PREPROCESSING)));
    }

    #[test]
    fn test_hyperparameters_of_composites() {
        let data = create_test_data();
        let mut pipe = PhotonPipeline::new(vec![
            Node::from(PipelineElement::new("SS", StandardScaler::new()).test_disabled(true)),
            Switch::new("dim")
                .with(
                    PipelineElement::new("PCA", Pca::new())
                        .with_hyperparameters([("n_components", vec![2.into(), 3.into()])])
                        .unwrap(),
                )
                .unwrap()
                .with(PipelineElement::new("pool", RowPooling::new()))
                .unwrap()
                .into(),
            Branch::new("post")
                .with(
                    PipelineElement::new("MinMax", MinMaxScaler::new())
                        .with_hyperparameters([("feature_max", vec![1.0.into(), 2.0.into()])])
                        .unwrap(),
                )
                .unwrap()
                .into(),
        ])
        .unwrap();

        let grid = pipe.hyperparameters();
        let keys: Vec<&str> = grid.keys().map(String::as_str).collect();
        assert_eq!(
            keys,
            vec![
                "SS__disabled",
                "dim__PCA__n_components",
                "dim__current_element",
                "post__MinMax__feature_max",
            ]
        );

        pipe.set_params(
            &Configuration::new()
                .with("SS__disabled", true)
                .with("dim__current_element", "pool")
                .with("post__MinMax__feature_max", 2.0),
        )
        .unwrap();
        pipe.fit(&data).unwrap();
        let out = pipe.transform(data).unwrap();
        assert_eq!(out.n_features(), 3);
        assert!(out.x.iter().all(|&v| (0.0..=2.0).contains(&v)));
    }

    #[test]
    fn test_random_state_reaches_elements() {
        let mut pipe = create_pipeline().with_random_state(7);
        pipe.set_params(&config(3, 0.1)).unwrap();
        pipe.fit(&create_test_data()).unwrap();
        match pipe.step("PCA") {
            Some(Node::Element(e)) => assert_eq!(
                e.base_element().get_params().get("random_state"),
                Some(&ParamValue::Int(7))
            ),
            other => panic!("unexpected step {other:?}"),
        }
        assert_eq!(
            pipe.current_config().get("PCA__random_state"),
            Some(&ParamValue::Int(7))
        );
    }

    #[test]
    fn test_stack_and_callback_steps() {
        let data = create_test_data();
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        let mut pipe = PhotonPipeline::new(vec![
            Node::from(
                Stack::new("features")
                    .with(PipelineElement::new("SS", StandardScaler::new()))
                    .unwrap()
                    .with(PipelineElement::new("MinMax", MinMaxScaler::new()))
                    .unwrap(),
            ),
            CallbackElement::new("inspect", move |batch: &SampleBatch| {
                assert_eq!(batch.n_features(), 12);
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .into(),
            PipelineElement::new("LR", LogisticRegression::new()).into(),
        ])
        .unwrap();

        pipe.fit(&data).unwrap();
        assert_eq!(seen.load(Ordering::SeqCst), 1);
        assert_eq!(pipe.predict(data).unwrap().len(), 40);
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_invalid_step_names() {
        let mut pipe = PhotonPipeline::default();
        assert!(pipe.add(PipelineElement::new("a__b", StandardScaler::new())).is_err());
        pipe.add(PipelineElement::new("SS", StandardScaler::new())).unwrap();
        assert!(pipe.add(PipelineElement::new("SS", MinMaxScaler::new())).is_err());
        assert!(matches!(
            PhotonPipeline::default().fit(&create_test_data()),
            Err(PipelineError::Configuration(_))
        ));
    }
}
