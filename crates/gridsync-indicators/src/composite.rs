//! Weighted mean of other indicators.

use std::collections::BTreeMap;

use gridsync_core::error::ComputationError;
use gridsync_core::indicator::{CompositeIndicator, DependencyOutputs};
use gridsync_core::package::VALUE_KEY;
use gridsync_types::{GridSnapshot, IndicatorOutput, VizType};

use crate::count_as_f64;

/// Combines numeric indicators into one score, `sum(w * v) / sum(w)`.
///
/// The value taken from a dependency is its `value` entry when it has one,
/// otherwise the mean of all its entries. Heatmap dependencies cannot be
/// combined.
#[derive(Debug, Clone)]
pub struct WeightedMean {
    name: String,
    weights: BTreeMap<String, f64>,
}

impl WeightedMean {
    /// A composite over `weights`, keyed by dependency name.
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        weights: impl IntoIterator<Item = (S, f64)>,
    ) -> Self {
        Self {
            name: name.into(),
            weights: weights.into_iter().map(|(k, w)| (k.into(), w)).collect(),
        }
    }
}

/// The single number a dependency contributes.
pub fn headline(name: &str, output: &IndicatorOutput) -> Result<f64, ComputationError> {
    let IndicatorOutput::Numeric(values) = output else {
        return Err(ComputationError::new(format!(
            "{name} is a heatmap and has no headline value"
        )));
    };
    if let Some(value) = values.get(VALUE_KEY) {
        return Ok(*value);
    }
    match count_as_f64(values.len()) {
        Some(n) if n > 0.0 => Ok(values.values().sum::<f64>() / n),
        _ => Err(ComputationError::new(format!("{name} produced no values"))),
    }
}

impl CompositeIndicator for WeightedMean {
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.weights.keys().cloned().collect()
    }

    fn viz_type(&self) -> VizType {
        VizType::Bar
    }

    fn compose(
        &self,
        _snapshot: &GridSnapshot,
        inputs: &DependencyOutputs,
    ) -> Result<IndicatorOutput, ComputationError> {
        let mut weighted = 0.0;
        let mut total = 0.0;
        for (dependency, weight) in &self.weights {
            let output = inputs
                .get(dependency)
                .ok_or_else(|| ComputationError::new(format!("missing input {dependency}")))?;
            weighted += weight * headline(dependency, output)?;
            total += weight;
        }
        if total.abs() < f64::EPSILON {
            return Err(ComputationError::new("weights sum to zero"));
        }
        Ok(IndicatorOutput::single(VALUE_KEY, weighted / total))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridsync_types::{GridHeader, GridMetadata, HeatmapLayer};

    use super::*;

    fn empty() -> GridSnapshot {
        GridSnapshot::new(GridMetadata::new("t", GridHeader::new(1, 1)))
    }

    fn inputs(entries: [(&str, IndicatorOutput); 2]) -> DependencyOutputs {
        entries.into_iter().map(|(k, v)| (k.to_owned(), v)).collect()
    }

    #[test]
    fn weights_scale_contributions() {
        let composite = WeightedMean::new("score", [("diversity", 3.0), ("density", 1.0)]);
        let output = composite
            .compose(
                &empty(),
                &inputs([
                    ("diversity", IndicatorOutput::single("value", 1.0)),
                    ("density", IndicatorOutput::single("value", 0.0)),
                ]),
            )
            .unwrap();
        assert!((output.value("value").unwrap() - 0.75).abs() < 1e-12);
    }

    #[test]
    fn multi_valued_dependency_contributes_its_mean() {
        let mix = IndicatorOutput::numeric([("Park", 0.25), ("Office", 0.75)]);
        assert!((headline("mix", &mix).unwrap() - 0.5).abs() < 1e-12);
    }

    #[test]
    fn heatmap_dependency_is_rejected() {
        let composite = WeightedMean::new("score", [("noise", 1.0), ("density", 1.0)]);
        let err = composite
            .compose(
                &empty(),
                &inputs([
                    ("noise", IndicatorOutput::Heatmap(HeatmapLayer::default())),
                    ("density", IndicatorOutput::single("value", 1.0)),
                ]),
            )
            .unwrap_err();
        assert!(err.message.contains("heatmap"));
    }

    #[test]
    fn zero_weights_are_rejected() {
        let composite = WeightedMean::new("score", [("a", 0.0), ("b", 0.0)]);
        let err = composite
            .compose(
                &empty(),
                &inputs([
                    ("a", IndicatorOutput::single("value", 1.0)),
                    ("b", IndicatorOutput::single("value", 1.0)),
                ]),
            )
            .unwrap_err();
        assert_eq!(err.message, "weights sum to zero");
    }

    #[test]
    fn dependencies_follow_the_weights() {
        let composite = WeightedMean::new("score", [("b", 1.0), ("a", 2.0)]);
        assert_eq!(composite.dependencies(), vec!["a".to_owned(), "b".to_owned()]);
    }
}
