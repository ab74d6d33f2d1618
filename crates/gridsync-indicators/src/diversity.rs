//! Land-use diversity as normalized Shannon entropy.

use std::collections::BTreeMap;

use gridsync_core::error::ComputationError;
use gridsync_core::indicator::{Requirements, SimpleIndicator};
use gridsync_types::{GridSnapshot, IndicatorOutput, VizType};

use crate::{DIVERSITY, count_as_f64, share_of};

/// Entropy of the land-use distribution, divided by `ln(n)` where `n` is
/// the number of types on the table.
///
/// Empty cells are left out of the distribution. A table with fewer than
/// two types scores 0.
#[derive(Debug, Clone)]
pub struct Diversity {
    name: String,
    empty_type: String,
}

impl Diversity {
    /// Diversity indicator ignoring cells of `empty_type`.
    pub fn new(empty_type: impl Into<String>) -> Self {
        Self {
            name: DIVERSITY.to_owned(),
            empty_type: empty_type.into(),
        }
    }

    /// Builder-style name override.
    #[must_use]
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }
}

impl SimpleIndicator for Diversity {
    fn name(&self) -> &str {
        &self.name
    }

    fn requirements(&self) -> Requirements {
        Requirements::TYPE_DEFINITIONS
    }

    fn viz_type(&self) -> VizType {
        VizType::Bar
    }

    fn compute(&self, snapshot: &GridSnapshot) -> Result<IndicatorOutput, ComputationError> {
        let counts: BTreeMap<&str, usize> = snapshot
            .type_counts()
            .into_iter()
            .filter(|(name, _)| *name != self.empty_type)
            .collect();
        let total: usize = counts.values().sum();

        let entropy: f64 = counts
            .values()
            .filter_map(|count| share_of(*count, total))
            .filter(|p| *p > 0.0)
            .map(|p| -p * p.ln())
            .sum();

        let types = count_as_f64(snapshot.number_of_types()).unwrap_or(0.0);
        let value = if types > 1.0 { entropy / types.ln() } else { 0.0 };
        Ok(IndicatorOutput::single("value", value))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridsync_types::{Cell, CellId, GridHeader, GridMetadata, TypeDefinition};

    use super::*;

    fn snapshot(types: &[&str]) -> GridSnapshot {
        let ncols = u32::try_from(types.len()).unwrap();
        GridSnapshot::from_cells(
            GridMetadata::new("t", GridHeader::new(1, ncols)),
            types
                .iter()
                .zip(0..)
                .map(|(name, col)| (CellId::new(0, col), Cell::of_type(*name))),
        )
        .unwrap()
    }

    fn value(snapshot: &GridSnapshot) -> f64 {
        Diversity::new("None")
            .compute(snapshot)
            .unwrap()
            .value("value")
            .unwrap()
    }

    #[test]
    fn even_mix_scores_one() {
        let v = value(&snapshot(&["Park", "Office", "Park", "Office"]));
        assert!((v - 1.0).abs() < 1e-12);
    }

    #[test]
    fn single_use_scores_zero() {
        let v = value(&snapshot(&["Park", "Park", "Park"]));
        assert!(v.abs() < f64::EPSILON);
    }

    #[test]
    fn empty_cells_are_ignored_but_count_as_a_type() {
        // Two uses in equal shares out of three types: ln 2 / ln 3.
        let v = value(&snapshot(&["Park", "Office", "None", "None"]));
        assert!((v - 2f64.ln() / 3f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn catalogue_sets_the_normalization() {
        let types = ["Park", "Office", "Residential", "Retail"]
            .into_iter()
            .map(|t| (t.to_owned(), TypeDefinition::default()))
            .collect();
        let grid = snapshot(&["Park", "Office"]).with_type_definitions(types);
        let v = value(&grid);
        assert!((v - 2f64.ln() / 4f64.ln()).abs() < 1e-12);
    }

    #[test]
    fn all_empty_grid_scores_zero() {
        let v = value(&snapshot(&["None", "None"]));
        assert!(v.abs() < f64::EPSILON);
    }
}
