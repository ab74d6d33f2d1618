//! Shared type definitions for gridsync.
//!
//! This crate holds the data that flows between the remote table service,
//! the synchronization core and the indicators: grid snapshots and the
//! outputs indicators produce from them.
//!
//! # Modules
//!
//! - [`grid`] -- Cell ids, cell property bags, grid header, geometry and
//!   type definitions
//! - [`snapshot`] -- [`GridSnapshot`], one fetched version of a grid
//! - [`output`] -- Indicator outputs, heatmap layers and wire records

pub mod grid;
pub mod output;
pub mod snapshot;

pub use grid::{
    AttributeValue, Cell, CellGeometry, CellId, CellIdParseError, Connectivity, GridHeader, Rgba,
    TypeDefinition,
};
pub use output::{HeatmapLayer, HeatmapPoint, IndicatorOutput, IndicatorRecord, VizType};
pub use snapshot::{GridMetadata, GridSnapshot, SnapshotError};
