//! Share of the table taken by each land use.

use gridsync_core::error::ComputationError;
use gridsync_core::indicator::SimpleIndicator;
use gridsync_types::{GridSnapshot, IndicatorOutput, VizType};

use crate::{LAND_USE_MIX, share_of};

/// One value per land use: the fraction of non-empty cells of that type.
///
/// Published as one record per type, so the front end can chart the mix.
#[derive(Debug, Clone)]
pub struct LandUseMix {
    name: String,
    empty_type: String,
}

impl LandUseMix {
    /// Land-use mix ignoring cells of `empty_type`.
    pub fn new(empty_type: impl Into<String>) -> Self {
        Self {
            name: LAND_USE_MIX.to_owned(),
            empty_type: empty_type.into(),
        }
    }
}

impl SimpleIndicator for LandUseMix {
    fn name(&self) -> &str {
        &self.name
    }

    fn viz_type(&self) -> VizType {
        VizType::Bar
    }

    fn compute(&self, snapshot: &GridSnapshot) -> Result<IndicatorOutput, ComputationError> {
        let counts = snapshot.type_counts();
        let total: usize = counts
            .iter()
            .filter(|(name, _)| **name != self.empty_type)
            .map(|(_, count)| *count)
            .sum();

        Ok(IndicatorOutput::numeric(
            counts
                .iter()
                .filter(|(name, _)| **name != self.empty_type)
                .filter_map(|(name, count)| Some((*name, share_of(*count, total)?))),
        ))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridsync_types::{Cell, CellId, GridHeader, GridMetadata};

    use super::*;

    #[test]
    fn shares_cover_non_empty_cells() {
        let grid = GridSnapshot::from_cells(
            GridMetadata::new("t", GridHeader::new(2, 2)),
            [
                (CellId::new(0, 0), Cell::of_type("Park")),
                (CellId::new(0, 1), Cell::of_type("Office")),
                (CellId::new(1, 0), Cell::of_type("Park")),
                (CellId::new(1, 1), Cell::of_type("None")),
            ],
        )
        .unwrap();

        let output = LandUseMix::new("None").compute(&grid).unwrap();
        let shares = output.as_numeric().unwrap();
        assert_eq!(shares.len(), 2);
        assert!((shares["Park"] - 2.0 / 3.0).abs() < 1e-12);
        assert!((shares["Office"] - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn empty_grid_has_no_shares() {
        let grid = GridSnapshot::new(GridMetadata::new("t", GridHeader::new(1, 1)));
        let output = LandUseMix::new("None").compute(&grid).unwrap();
        assert!(output.as_numeric().unwrap().is_empty());
    }
}
