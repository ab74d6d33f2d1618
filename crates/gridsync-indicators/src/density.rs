//! Built density from cell heights.

use gridsync_core::error::ComputationError;
use gridsync_core::indicator::SimpleIndicator;
use gridsync_types::{GridSnapshot, IndicatorOutput};

use crate::{DENSITY, count_as_f64};

/// Output key for the tallest cell.
pub const MAX_HEIGHT_KEY: &str = "max_height";

/// Mean height of the built (non-empty) cells, published under the
/// indicator's name, plus the tallest cell under [`MAX_HEIGHT_KEY`].
#[derive(Debug, Clone)]
pub struct Density {
    name: String,
    empty_type: String,
}

impl Density {
    /// Density over cells that are not `empty_type`.
    pub fn new(empty_type: impl Into<String>) -> Self {
        Self {
            name: DENSITY.to_owned(),
            empty_type: empty_type.into(),
        }
    }
}

impl SimpleIndicator for Density {
    fn name(&self) -> &str {
        &self.name
    }

    fn compute(&self, snapshot: &GridSnapshot) -> Result<IndicatorOutput, ComputationError> {
        let heights: Vec<f64> = snapshot
            .cells()
            .filter(|(_, cell)| cell.type_name != self.empty_type)
            .map(|(_, cell)| cell.height)
            .collect();

        if let Some(bad) = heights.iter().find(|h| !h.is_finite()) {
            return Err(ComputationError::new(format!("non-finite cell height {bad}")));
        }

        let (mean, max) = match count_as_f64(heights.len()) {
            Some(n) if n > 0.0 => (
                heights.iter().sum::<f64>() / n,
                heights.iter().copied().fold(f64::MIN, f64::max),
            ),
            _ => (0.0, 0.0),
        };
        Ok(IndicatorOutput::numeric([("value", mean), (MAX_HEIGHT_KEY, max)]))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridsync_types::{Cell, CellId, GridHeader, GridMetadata};

    use super::*;

    fn grid(cells: [(&str, f64); 3]) -> GridSnapshot {
        GridSnapshot::from_cells(
            GridMetadata::new("t", GridHeader::new(1, 3)),
            cells
                .into_iter()
                .zip(0..)
                .map(|((t, h), col)| (CellId::new(0, col), Cell::of_type(t).with_height(h))),
        )
        .unwrap()
    }

    #[test]
    fn mean_and_max_skip_empty_cells() {
        let output = Density::new("None")
            .compute(&grid([("Office", 6.0), ("Residential", 2.0), ("None", 0.0)]))
            .unwrap();
        assert!((output.value("value").unwrap() - 4.0).abs() < f64::EPSILON);
        assert!((output.value(MAX_HEIGHT_KEY).unwrap() - 6.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unbuilt_grid_is_zero() {
        let output = Density::new("None")
            .compute(&grid([("None", 0.0), ("None", 0.0), ("None", 0.0)]))
            .unwrap();
        assert!(output.value("value").unwrap().abs() < f64::EPSILON);
    }

    #[test]
    fn non_finite_height_is_a_computation_error() {
        let err = Density::new("None")
            .compute(&grid([("Office", f64::NAN), ("Park", 0.0), ("None", 0.0)]))
            .unwrap_err();
        assert!(err.message.contains("non-finite"));
    }
}
