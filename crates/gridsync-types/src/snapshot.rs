//! Grid snapshots: one fetched version of a table's cell state.
//!
//! A [`GridSnapshot`] is built once per successful fetch and then treated
//! as a value. Operations that "change" a snapshot (filling gaps, raising
//! heights) consume it and return a new one, so a snapshot that has been
//! handed to indicators is never edited behind their back.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::grid::{Cell, CellGeometry, CellId, GridHeader, TypeDefinition};

/// Errors raised while assembling a snapshot.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SnapshotError {
    /// Two cells were supplied for the same position.
    #[error("duplicate cell id {0}")]
    DuplicateCell(CellId),

    /// A cell lies outside the header's lattice.
    #[error("cell {id} lies outside the {nrows}x{ncols} grid")]
    OutOfBounds {
        /// The offending cell.
        id: CellId,
        /// Lattice rows.
        nrows: u32,
        /// Lattice columns.
        ncols: u32,
    },
}

/// Grid-level metadata that accompanies a snapshot.
///
/// Nothing in here participates in change detection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridMetadata {
    /// Name of the table the snapshot was read from.
    pub table: String,
    /// Lattice shape and placement.
    pub header: GridHeader,
    /// Hash the remote service reports for this version, if any.
    #[serde(default)]
    pub server_hash: Option<String>,
    /// When the snapshot was fetched.
    pub fetched_at: DateTime<Utc>,
}

impl GridMetadata {
    /// Metadata for `table` with the given header, stamped now.
    pub fn new(table: impl Into<String>, header: GridHeader) -> Self {
        Self {
            table: table.into(),
            header,
            server_hash: None,
            fetched_at: Utc::now(),
        }
    }
}

/// The cell/property table of one grid at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridSnapshot {
    /// Grid-level metadata.
    pub metadata: GridMetadata,
    cells: BTreeMap<CellId, Cell>,
    /// Per-cell footprints, present when an indicator requires geometry.
    #[serde(default)]
    pub geometry: Option<BTreeMap<CellId, CellGeometry>>,
    /// Cell type catalogue, present when an indicator requires it.
    #[serde(default)]
    pub type_definitions: Option<BTreeMap<String, TypeDefinition>>,
}

impl GridSnapshot {
    /// An empty snapshot.
    pub const fn new(metadata: GridMetadata) -> Self {
        Self {
            metadata,
            cells: BTreeMap::new(),
            geometry: None,
            type_definitions: None,
        }
    }

    /// Build a snapshot from `(id, cell)` pairs.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::DuplicateCell`] if an id repeats and
    /// [`SnapshotError::OutOfBounds`] if an id falls outside the header.
    pub fn from_cells(
        metadata: GridMetadata,
        cells: impl IntoIterator<Item = (CellId, Cell)>,
    ) -> Result<Self, SnapshotError> {
        let mut snapshot = Self::new(metadata);
        for (id, cell) in cells {
            snapshot.insert_cell(id, cell)?;
        }
        Ok(snapshot)
    }

    /// Insert a cell, rejecting duplicates and out-of-lattice ids.
    ///
    /// # Errors
    ///
    /// See [`GridSnapshot::from_cells`].
    pub fn insert_cell(&mut self, id: CellId, cell: Cell) -> Result<(), SnapshotError> {
        let header = &self.metadata.header;
        if !header.contains(id) {
            return Err(SnapshotError::OutOfBounds {
                id,
                nrows: header.nrows,
                ncols: header.ncols,
            });
        }
        if self.cells.contains_key(&id) {
            return Err(SnapshotError::DuplicateCell(id));
        }
        self.cells.insert(id, cell);
        Ok(())
    }

    /// Replace the cell at `id`, returning the previous one.
    ///
    /// # Errors
    ///
    /// Returns [`SnapshotError::OutOfBounds`] if `id` falls outside the
    /// header.
    pub fn set_cell(&mut self, id: CellId, cell: Cell) -> Result<Option<Cell>, SnapshotError> {
        let header = &self.metadata.header;
        if !header.contains(id) {
            return Err(SnapshotError::OutOfBounds {
                id,
                nrows: header.nrows,
                ncols: header.ncols,
            });
        }
        Ok(self.cells.insert(id, cell))
    }

    /// Mutable access to every cell in row-major order.
    pub fn cells_mut(&mut self) -> impl Iterator<Item = (&CellId, &mut Cell)> {
        self.cells.iter_mut()
    }

    /// Attach per-cell geometry.
    #[must_use]
    pub fn with_geometry(mut self, geometry: BTreeMap<CellId, CellGeometry>) -> Self {
        self.geometry = Some(geometry);
        self
    }

    /// Attach the type catalogue.
    #[must_use]
    pub fn with_type_definitions(mut self, types: BTreeMap<String, TypeDefinition>) -> Self {
        self.type_definitions = Some(types);
        self
    }

    /// Fill every lattice position without a cell with an `empty_type`
    /// cell. Returns the new snapshot and how many cells were added.
    #[must_use]
    pub fn fill_missing(mut self, empty_type: &str) -> (Self, usize) {
        let missing: Vec<CellId> = self
            .metadata
            .header
            .positions()
            .filter(|id| !self.cells.contains_key(id))
            .collect();
        let filled = missing.len();
        for id in missing {
            self.cells.insert(id, Cell::of_type(empty_type).with_height(0.0));
        }
        (self, filled)
    }

    /// Raise every cell by `levels`.
    #[must_use]
    pub fn with_added_height(mut self, levels: f64) -> Self {
        for cell in self.cells.values_mut() {
            cell.height += levels;
        }
        self
    }

    /// The cell at `id`, if present.
    pub fn cell(&self, id: CellId) -> Option<&Cell> {
        self.cells.get(&id)
    }

    /// All cells in row-major order.
    pub fn cells(&self) -> impl ExactSizeIterator<Item = (&CellId, &Cell)> {
        self.cells.iter()
    }

    /// Number of cells present.
    pub fn len(&self) -> usize {
        self.cells.len()
    }

    /// Whether the snapshot has no cells.
    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    /// Name of the table this snapshot belongs to.
    pub fn table(&self) -> &str {
        &self.metadata.table
    }

    /// Count of cells per type name.
    pub fn type_counts(&self) -> BTreeMap<&str, usize> {
        let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
        for cell in self.cells.values() {
            let entry = counts.entry(cell.type_name.as_str()).or_insert(0);
            *entry = entry.saturating_add(1);
        }
        counts
    }

    /// Number of distinct cell types on the table.
    ///
    /// Uses the type catalogue when attached, otherwise the types that
    /// actually occur in the cells.
    pub fn number_of_types(&self) -> usize {
        self.type_definitions.as_ref().map_or_else(
            || {
                self.cells
                    .values()
                    .map(|c| c.type_name.as_str())
                    .collect::<BTreeSet<_>>()
                    .len()
            },
            BTreeMap::len,
        )
    }
}
