//! Street-level noise heatmap.
//!
//! Every cell emits a level set by its type; the noise felt at a cell is the
//! mean emission of the cell and its four lattice neighbours. The layer has
//! one point per cell footprint, placed at the footprint's centroid.

use std::collections::BTreeMap;

use gridsync_core::error::ComputationError;
use gridsync_core::indicator::{Requirements, SimpleIndicator};
use gridsync_types::{CellId, GridSnapshot, HeatmapLayer, IndicatorOutput};

use crate::{NOISE, count_as_f64};

/// Emission of a built cell whose type has no explicit level.
pub const DEFAULT_EMISSION: f64 = 1.0;

/// Heatmap of neighbourhood-averaged noise emissions.
#[derive(Debug, Clone)]
pub struct Noise {
    name: String,
    empty_type: String,
    emissions: BTreeMap<String, f64>,
}

impl Noise {
    /// Noise layer where `empty_type` cells are silent and every other type
    /// emits [`DEFAULT_EMISSION`].
    pub fn new(empty_type: impl Into<String>) -> Self {
        Self {
            name: NOISE.to_owned(),
            empty_type: empty_type.into(),
            emissions: BTreeMap::new(),
        }
    }

    /// Builder-style emission level for one type.
    #[must_use]
    pub fn with_emission(mut self, type_name: impl Into<String>, level: f64) -> Self {
        self.emissions.insert(type_name.into(), level);
        self
    }

    fn emission(&self, snapshot: &GridSnapshot, id: CellId) -> Option<f64> {
        let cell = snapshot.cell(id)?;
        if cell.type_name == self.empty_type {
            return Some(0.0);
        }
        Some(
            self.emissions
                .get(&cell.type_name)
                .copied()
                .unwrap_or(DEFAULT_EMISSION),
        )
    }

    fn level_at(&self, snapshot: &GridSnapshot, id: CellId) -> f64 {
        let neighbours = [
            id.row.checked_sub(1).map(|row| CellId::new(row, id.col)),
            id.row.checked_add(1).map(|row| CellId::new(row, id.col)),
            id.col.checked_sub(1).map(|col| CellId::new(id.row, col)),
            id.col.checked_add(1).map(|col| CellId::new(id.row, col)),
        ];
        let levels: Vec<f64> = std::iter::once(Some(id))
            .chain(neighbours)
            .flatten()
            .filter_map(|cell| self.emission(snapshot, cell))
            .collect();
        match count_as_f64(levels.len()) {
            Some(n) if n > 0.0 => levels.iter().sum::<f64>() / n,
            _ => 0.0,
        }
    }
}

impl SimpleIndicator for Noise {
    fn name(&self) -> &str {
        &self.name
    }

    fn requirements(&self) -> Requirements {
        Requirements::GEOMETRY
    }

    fn compute(&self, snapshot: &GridSnapshot) -> Result<IndicatorOutput, ComputationError> {
        let geometry = snapshot
            .geometry
            .as_ref()
            .ok_or_else(|| ComputationError::new("cell geometry was not attached"))?;

        let mut layer = HeatmapLayer::default();
        for (id, footprint) in geometry {
            if snapshot.cell(*id).is_none() {
                continue;
            }
            let Some([lon, lat]) = footprint.centroid() else {
                continue;
            };
            layer.push(lon, lat, self.name.as_str(), self.level_at(snapshot, *id));
        }
        Ok(IndicatorOutput::Heatmap(layer))
    }
}
