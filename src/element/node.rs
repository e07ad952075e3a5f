//! The tree node type every pipeline step is made of.
//!
//! Each composite exclusively owns its children, so `Clone` is a deep copy of the whole
//! subtree. Callback functions are immutable and shared between copies.

use super::{Branch, CallbackElement, ElementKind, PipelineElement, Preprocessing, Stack, Switch};
use crate::data::SampleBatch;
use crate::error::{PipelineError, Result};
use crate::params::{join_key, Configuration, Hyperparameters};
use ndarray::{Array1, Array2};
use std::path::Path;

#[derive(Clone, Debug)]
pub enum Node {
    Element(PipelineElement),
    Branch(Branch),
    Stack(Stack),
    Switch(Switch),
    Callback(CallbackElement),
    Preprocessing(Preprocessing),
}

impl Node {
    pub fn name(&self) -> &str {
        match self {
            Node::Element(e) => e.name(),
            Node::Branch(b) => b.name(),
            Node::Stack(s) => s.name(),
            Node::Switch(s) => s.name(),
            Node::Callback(c) => c.name(),
            Node::Preprocessing(p) => p.name(),
        }
    }

    /// Role of this node when it ends a pipeline.
    pub fn kind(&self) -> ElementKind {
        match self {
            Node::Element(e) => e.kind(),
            Node::Branch(b) => b.kind(),
            Node::Switch(s) => s.kind(),
            Node::Stack(_) | Node::Callback(_) | Node::Preprocessing(_) => ElementKind::Transformer,
        }
    }

    /// Search space of the subtree, keys qualified starting with this node's name.
    pub fn hyperparameters(&self) -> Hyperparameters {
        match self {
            Node::Element(e) => e.hyperparameters().clone(),
            Node::Branch(b) => b.hyperparameters(),
            Node::Stack(s) => s.hyperparameters(),
            Node::Switch(s) => s.hyperparameters(),
            Node::Callback(_) | Node::Preprocessing(_) => Hyperparameters::new(),
        }
    }

    /// Apply parameters whose keys are relative to this node (the node name stripped).
    pub fn set_params(&mut self, config: &Configuration) -> Result<()> {
        match self {
            Node::Element(e) => e.set_params(config),
            Node::Branch(b) => b.set_params(config),
            Node::Stack(s) => s.set_params(config),
            Node::Switch(s) => s.set_params(config),
            Node::Callback(c) => c.set_params(config),
            Node::Preprocessing(p) => p.set_params(config),
        }
    }

    /// Restore construction-time parameters throughout the subtree.
    pub fn reset_params(&mut self) -> Result<()> {
        match self {
            Node::Element(e) => e.reset_params(),
            Node::Branch(b) => b.reset_params(),
            Node::Stack(s) => s.children_mut().iter_mut().try_for_each(Node::reset_params),
            Node::Switch(s) => s.reset_params(),
            Node::Callback(_) | Node::Preprocessing(_) => Ok(()),
        }
    }

    /// Relative keys of every `random_state` parameter in the subtree.
    pub fn random_state_paths(&self) -> Vec<String> {
        match self {
            Node::Element(e) if e.declares_random_state() => {
                vec![super::leaf::RANDOM_STATE.to_string()]
            }
            Node::Branch(b) => nested_paths(b.pipeline().steps()),
            Node::Stack(s) => nested_paths(s.children()),
            Node::Switch(s) => nested_paths(s.candidates()),
            _ => Vec::new(),
        }
    }

    /// Point nested cached pipelines at the fold and folder of the enclosing run.
    pub(crate) fn inherit_cache_scope(&mut self, fold_id: &str, folder: Option<&Path>) {
        match self {
            Node::Branch(b) => b.inherit_cache_scope(fold_id, folder),
            Node::Stack(s) => s
                .children_mut()
                .iter_mut()
                .for_each(|c| c.inherit_cache_scope(fold_id, folder)),
            Node::Switch(s) => s
                .candidates_mut()
                .iter_mut()
                .for_each(|c| c.inherit_cache_scope(fold_id, folder)),
            _ => {}
        }
    }

    /// Remove the cache entries of nested cached pipelines.
    pub(crate) fn clear_nested_caches(&mut self) -> Result<usize> {
        match self {
            Node::Branch(b) => b.pipeline_mut().clear_cache(),
            Node::Stack(s) => sum_cleared(s.children_mut()),
            Node::Switch(s) => sum_cleared(s.candidates_mut()),
            _ => Ok(0),
        }
    }

    pub fn fit(&mut self, batch: &SampleBatch) -> Result<()> {
        match self {
            Node::Element(e) => Ok(e.fit(batch)?),
            Node::Branch(b) => b.fit(batch),
            Node::Stack(s) => s.fit(batch),
            Node::Switch(s) => s.fit(batch),
            Node::Callback(_) => Ok(()),
            Node::Preprocessing(p) => p.fit(batch),
        }
    }

    pub fn can_transform(&self) -> bool {
        match self {
            Node::Element(e) => e.can_transform(),
            Node::Switch(s) => s.active().is_some_and(Node::can_transform),
            _ => true,
        }
    }

    pub fn transform(&mut self, batch: SampleBatch) -> Result<SampleBatch> {
        match self {
            Node::Element(e) => Ok(e.transform(batch)?),
            Node::Branch(b) => b.transform(batch),
            Node::Stack(s) => s.transform(batch),
            Node::Switch(s) => s.transform(batch),
            Node::Callback(c) => Ok(c.transform(batch)),
            Node::Preprocessing(p) => p.transform(batch),
        }
    }

    pub fn can_predict(&self) -> bool {
        match self {
            Node::Element(e) => e.base_element().as_predictor().is_some(),
            Node::Branch(b) => b.pipeline().has_estimator(),
            Node::Switch(s) => s.active().is_some_and(Node::can_predict),
            _ => false,
        }
    }

    pub fn can_predict_proba(&self) -> bool {
        match self {
            Node::Element(e) => e.base_element().as_proba_predictor().is_some(),
            Node::Branch(b) => b
                .pipeline()
                .steps()
                .last()
                .is_some_and(|n| n.kind() == ElementKind::Estimator && n.can_predict_proba()),
            Node::Switch(s) => s.active().is_some_and(Node::can_predict_proba),
            _ => false,
        }
    }

    pub fn predict(&mut self, batch: SampleBatch) -> Result<Array1<f64>> {
        match self {
            Node::Element(e) => Ok(e.predict(&batch)?),
            Node::Branch(b) => b.pipeline_mut().predict(batch),
            Node::Switch(s) => s.active_mut()?.predict(batch),
            other => Err(PipelineError::config(format!("'{}' cannot predict", other.name()))),
        }
    }

    pub fn predict_proba(&mut self, batch: SampleBatch) -> Result<Array2<f64>> {
        match self {
            Node::Element(e) => Ok(e.predict_proba(&batch)?),
            Node::Branch(b) => b.pipeline_mut().predict_proba(batch),
            Node::Switch(s) => s.active_mut()?.predict_proba(batch),
            other => Err(PipelineError::config(format!(
                "'{}' cannot predict probabilities",
                other.name()
            ))),
        }
    }

    /// Whether [`inverse_transform`](Self::inverse_transform) maps back instead of failing.
    pub fn has_inverse(&self) -> bool {
        match self {
            Node::Element(e) => e.has_inverse(),
            Node::Branch(_) | Node::Preprocessing(_) | Node::Callback(_) => true,
            Node::Switch(s) => s.active().is_some_and(Node::has_inverse),
            Node::Stack(_) => false,
        }
    }

    pub fn inverse_transform(&mut self, batch: SampleBatch) -> Result<SampleBatch> {
        match self {
            Node::Element(e) => Ok(e.inverse_transform(batch)?),
            Node::Branch(b) => b.pipeline_mut().inverse_transform(batch),
            Node::Preprocessing(p) => p.inverse_transform(batch),
            Node::Callback(_) => Ok(batch),
            Node::Switch(s) => s.active_mut()?.inverse_transform(batch),
            Node::Stack(s) => Err(PipelineError::config(format!(
                "stack '{}' has no inverse transform",
                s.name()
            ))),
        }
    }
}

fn nested_paths(children: &[Node]) -> Vec<String> {
    children
        .iter()
        .flat_map(|child| {
            child
                .random_state_paths()
                .into_iter()
                .map(move |p| join_key(child.name(), &p))
        })
        .collect()
}

fn sum_cleared(children: &mut [Node]) -> Result<usize> {
    children
        .iter_mut()
        .map(Node::clear_nested_caches)
        .sum::<Result<usize>>()
}

impl From<PipelineElement> for Node {
    fn from(e: PipelineElement) -> Self {
        Node::Element(e)
    }
}

impl From<Branch> for Node {
    fn from(b: Branch) -> Self {
        Node::Branch(b)
    }
}

impl From<Stack> for Node {
    fn from(s: Stack) -> Self {
        Node::Stack(s)
    }
}

impl From<Switch> for Node {
    fn from(s: Switch) -> Self {
        Node::Switch(s)
    }
}

impl From<CallbackElement> for Node {
    fn from(c: CallbackElement) -> Self {
        Node::Callback(c)
    }
}

impl From<Preprocessing> for Node {
    fn from(p: Preprocessing) -> Self {
        Node::Preprocessing(p)
    }
}
