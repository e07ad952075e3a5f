//! Parallel composition: every child sees the same input.

use super::{ElementKind, Node};
use crate::data::SampleBatch;
use crate::error::{PipelineError, Result};
use crate::params::{prefix_hyperparameters, split_key, Configuration, Hyperparameters};
use ndarray::Axis;

/// Runs its children on the same input and joins their outputs column-wise, in
/// construction order. Estimator children contribute their predictions as one column.
#[derive(Clone, Debug)]
pub struct Stack {
    name: String,
    children: Vec<Node>,
}

impl Stack {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
        }
    }

    pub fn add(&mut self, node: impl Into<Node>) -> Result<()> {
        let node = node.into();
        if self.children.iter().any(|c| c.name() == node.name()) {
            return Err(PipelineError::config(format!(
                "stack '{}' already has a child named '{}'",
                self.name,
                node.name()
            )));
        }
        self.children.push(node);
        Ok(())
    }

    pub fn with(mut self, node: impl Into<Node>) -> Result<Self> {
        self.add(node)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn children(&self) -> &[Node] {
        &self.children
    }

    pub(crate) fn children_mut(&mut self) -> &mut [Node] {
        &mut self.children
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        let inner: Hyperparameters = self.children.iter().flat_map(Node::hyperparameters).collect();
        prefix_hyperparameters(&self.name, &inner)
    }

    /// Keys are `child__param`.
    pub fn set_params(&mut self, config: &Configuration) -> Result<()> {
        for (key, _) in config {
            let known = split_key(key).is_some_and(|(head, _)| self.children.iter().any(|c| c.name() == head));
            if !known {
                return Err(PipelineError::config(format!(
                    "'{key}' does not address a child of stack '{}'",
                    self.name
                )));
            }
        }
        for child in &mut self.children {
            let scoped = config.scoped(child.name());
            if !scoped.is_empty() {
                child.set_params(&scoped)?;
            }
        }
        Ok(())
    }

    pub fn fit(&mut self, batch: &SampleBatch) -> Result<()> {
        if self.children.is_empty() {
            return Err(PipelineError::config(format!("stack '{}' has no children", self.name)));
        }
        self.children.iter_mut().try_for_each(|c| c.fit(batch))
    }

    /// One output per child, in construction order.
    pub fn transform_each(&mut self, batch: &SampleBatch) -> Result<Vec<SampleBatch>> {
        self.children
            .iter_mut()
            .map(|child| {
                if child.kind() == ElementKind::Estimator && child.can_predict() {
                    let predictions = child.predict(batch.clone())?;
                    Ok(SampleBatch {
                        x: predictions.insert_axis(Axis(1)),
                        y: batch.y.clone(),
                        kwargs: batch.kwargs.clone(),
                    })
                } else {
                    child.transform(batch.clone())
                }
            })
            .collect()
    }

    pub fn transform(&mut self, batch: SampleBatch) -> Result<SampleBatch> {
        if self.children.is_empty() {
            return Err(PipelineError::config(format!("stack '{}' has no children", self.name)));
        }
        let outputs = self.transform_each(&batch)?;
        let xs: Vec<_> = outputs.into_iter().map(|o| o.x).collect();
        let x = SampleBatch::hstack(&xs)?;
        Ok(SampleBatch::new(x, batch.y, batch.kwargs)?)
    }
}
