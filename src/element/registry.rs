//! Name to element-factory mapping.
//!
//! A registry is an ordinary value passed to whoever builds pipelines; tests build their
//! own isolated instances.

use super::{BaseEstimator, ElementKind};
use crate::estimators::{LinearRegression, LogisticRegression, MinMaxScaler, Pca, RowPooling, StandardScaler};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

type Factory = Arc<dyn Fn() -> Box<dyn BaseEstimator> + Send + Sync>;

/// A registered element: how to build it and which role it plays as a terminal step.
#[derive(Clone)]
pub struct RegistryEntry {
    pub kind: ElementKind,
    factory: Factory,
}

impl RegistryEntry {
    /// A fresh, unfitted instance.
    pub fn create(&self) -> Box<dyn BaseEstimator> {
        (self.factory)()
    }
}

impl fmt::Debug for RegistryEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryEntry").field("kind", &self.kind).finish()
    }
}

#[derive(Clone, Debug, Default)]
pub struct ElementRegistry {
    entries: BTreeMap<String, RegistryEntry>,
}

impl ElementRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in elements of [`crate::estimators`].
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("StandardScaler", ElementKind::Transformer, || {
            Box::new(StandardScaler::new())
        });
        registry.register("MinMaxScaler", ElementKind::Transformer, || Box::new(MinMaxScaler::new()));
        registry.register("PCA", ElementKind::Transformer, || Box::new(Pca::new()));
        registry.register("RowPooling", ElementKind::Transformer, || Box::new(RowPooling::new()));
        registry.register("LinearRegression", ElementKind::Estimator, || {
            Box::new(LinearRegression::new())
        });
        registry.register("LogisticRegression", ElementKind::Estimator, || {
            Box::new(LogisticRegression::new())
        });
        registry
    }

    /// Register (or replace) `name`.
    pub fn register<F>(&mut self, name: impl Into<String>, kind: ElementKind, factory: F)
    where
        F: Fn() -> Box<dyn BaseEstimator> + Send + Sync + 'static,
    {
        self.entries.insert(
            name.into(),
            RegistryEntry {
                kind,
                factory: Arc::new(factory),
            },
        );
    }

    pub fn get(&self, name: &str) -> Option<&RegistryEntry> {
        self.entries.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}
