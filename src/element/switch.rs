//! "Which element" as a hyperparameter.

use super::{ElementKind, Node};
use crate::data::SampleBatch;
use crate::error::{PipelineError, Result};
use crate::params::{join_key, prefix_hyperparameters, split_key, Configuration, Hyperparameters, ParamValue};
use log::debug;

/// Parameter selecting the active candidate, by name or by index.
pub const CURRENT_ELEMENT: &str = "current_element";

/// Holds several candidates of which exactly one is active.
///
/// Keys: `switch__current_element` selects the candidate, `switch__candidate__param`
/// configures one.
#[derive(Clone, Debug)]
pub struct Switch {
    name: String,
    candidates: Vec<Node>,
    active: usize,
}

impl Switch {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            candidates: Vec::new(),
            active: 0,
        }
    }

    pub fn add(&mut self, node: impl Into<Node>) -> Result<()> {
        let node = node.into();
        if node.name() == CURRENT_ELEMENT || self.candidates.iter().any(|c| c.name() == node.name()) {
            return Err(PipelineError::config(format!(
                "switch '{}' cannot take another candidate named '{}'",
                self.name,
                node.name()
            )));
        }
        self.candidates.push(node);
        Ok(())
    }

    pub fn with(mut self, node: impl Into<Node>) -> Result<Self> {
        self.add(node)?;
        Ok(self)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn candidates(&self) -> &[Node] {
        &self.candidates
    }

    pub(crate) fn candidates_mut(&mut self) -> &mut [Node] {
        &mut self.candidates
    }

    pub fn active(&self) -> Option<&Node> {
        self.candidates.get(self.active)
    }

    pub(crate) fn active_mut(&mut self) -> Result<&mut Node> {
        let name = &self.name;
        self.candidates
            .get_mut(self.active)
            .ok_or_else(|| PipelineError::config(format!("switch '{name}' has no candidates")))
    }

    pub fn kind(&self) -> ElementKind {
        self.active().map_or(ElementKind::Transformer, Node::kind)
    }

    pub fn hyperparameters(&self) -> Hyperparameters {
        let mut grid: Hyperparameters = self.candidates.iter().flat_map(Node::hyperparameters).collect();
        grid.insert(
            CURRENT_ELEMENT.to_string(),
            self.candidates
                .iter()
                .map(|c| ParamValue::Str(c.name().to_string()))
                .collect(),
        );
        prefix_hyperparameters(&self.name, &grid)
    }

    fn select(&mut self, value: &ParamValue) -> Result<()> {
        let index = match value {
            ParamValue::Str(name) => self.candidates.iter().position(|c| c.name() == name),
            ParamValue::Int(i) => usize::try_from(*i).ok().filter(|&i| i < self.candidates.len()),
            _ => None,
        };
        self.active = index.ok_or_else(|| {
            PipelineError::config(format!(
                "{} is not a candidate of switch '{}'",
                value, self.name
            ))
        })?;
        debug!("switch '{}' activated candidate {}", self.name, value);
        Ok(())
    }

    pub fn set_params(&mut self, config: &Configuration) -> Result<()> {
        if let Some(value) = config.get(CURRENT_ELEMENT) {
            self.select(value)?;
        }
        for (key, _) in config {
            if key == CURRENT_ELEMENT {
                continue;
            }
            let known = split_key(key).is_some_and(|(head, _)| self.candidates.iter().any(|c| c.name() == head));
            if !known {
                return Err(PipelineError::config(format!(
                    "'{}' does not address a candidate of switch '{}'",
                    join_key(&self.name, key),
                    self.name
                )));
            }
        }
        for candidate in &mut self.candidates {
            let scoped = config.scoped(candidate.name());
            if !scoped.is_empty() {
                candidate.set_params(&scoped)?;
            }
        }
        Ok(())
    }

    pub fn reset_params(&mut self) -> Result<()> {
        self.active = 0;
        self.candidates.iter_mut().try_for_each(Node::reset_params)
    }

    pub fn fit(&mut self, batch: &SampleBatch) -> Result<()> {
        self.active_mut()?.fit(batch)
    }

    pub fn transform(&mut self, batch: SampleBatch) -> Result<SampleBatch> {
        self.active_mut()?.transform(batch)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::element::PipelineElement;
    use crate::estimators::{MinMaxScaler, Pca, StandardScaler};
    use ndarray::array;

    fn create_switch() -> Switch {
        Switch::new("scaling")
            .with(PipelineElement::new("SS", StandardScaler::new()))
            .unwrap()
            .with(
                PipelineElement::new("MinMax", MinMaxScaler::new())
                    .with_hyperparameters([("feature_max", vec![1.0.into(), 2.0.into()])])
                    .unwrap(),
            )
            .unwrap()
    }

    #[test]
    fn test_grid_lists_candidates() {
        let grid = create_switch().hyperparameters();
        assert_eq!(
            grid.get("scaling__current_element"),
            Some(&vec![ParamValue::Str("SS".into()), ParamValue::Str("MinMax".into())])
        );
        assert!(grid.contains_key("scaling__MinMax__feature_max"));
    }

    #[test]
    fn test_only_active_candidate_runs() {
        let data = SampleBatch::from_x(array![[1.0], [2.0], [3.0]]);
        let mut switch = create_switch();
        switch
            .set_params(
                &Configuration::new()
                    .with(CURRENT_ELEMENT, "MinMax")
                    .with("MinMax__feature_max", 2.0),
            )
            .unwrap();
        assert_eq!(switch.active().unwrap().name(), "MinMax");

        switch.fit(&data).unwrap();
        let out = switch.transform(data).unwrap();
        assert_eq!(out.x, array![[0.0], [1.0], [2.0]]);
    }

    #[test]
    fn test_select_by_index_and_reject_unknown() {
        let mut switch = create_switch();
        switch
            .set_params(&Configuration::new().with(CURRENT_ELEMENT, 1))
            .unwrap();
        assert_eq!(switch.active().unwrap().name(), "MinMax");
        assert!(switch
            .set_params(&Configuration::new().with(CURRENT_ELEMENT, "PCA"))
            .is_err());
        assert!(switch
            .set_params(&Configuration::new().with(CURRENT_ELEMENT, 5))
            .is_err());

        switch.reset_params().unwrap();
        assert_eq!(switch.active().unwrap().name(), "SS");
    }

    #[test]
    fn test_kind_follows_active() {
        let switch = Switch::new("dim").with(PipelineElement::new("PCA", Pca::new())).unwrap();
        assert_eq!(switch.kind(), ElementKind::Transformer);
        assert_eq!(Switch::new("empty").kind(), ElementKind::Transformer);
    }
}
