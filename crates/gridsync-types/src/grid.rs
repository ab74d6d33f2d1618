//! Cell-level building blocks of a spatial grid.
//!
//! A grid is a rectangular lattice of `nrows x ncols` cells described by a
//! [`GridHeader`]. Each occupied position carries a [`Cell`] property bag
//! keyed by its [`CellId`]. Geometry and type definitions are static side
//! tables that only some indicators need, so they live in their own types.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when a cell identifier string cannot be parsed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid cell id {input:?}: expected \"row:col\"")]
pub struct CellIdParseError {
    /// The rejected input.
    pub input: String,
}

/// Position of a cell in the grid lattice.
///
/// Ordering is row-major, which is also the order the remote service
/// lists cells in. Serialized as the string `"row:col"` so that maps keyed
/// by cell id remain valid JSON objects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct CellId {
    /// Zero-based row index.
    pub row: u32,
    /// Zero-based column index.
    pub col: u32,
}

impl CellId {
    /// Create a cell id from a row and column.
    pub const fn new(row: u32, col: u32) -> Self {
        Self { row, col }
    }

    /// Map a row-major list index to a cell id.
    ///
    /// Returns `None` when `ncols` is zero or the row does not fit in `u32`.
    pub fn from_index(index: usize, ncols: u32) -> Option<Self> {
        let ncols = usize::try_from(ncols).ok().filter(|n| *n > 0)?;
        let row = u32::try_from(index.checked_div(ncols)?).ok()?;
        let col = u32::try_from(index.checked_rem(ncols)?).ok()?;
        Some(Self { row, col })
    }

    /// Row-major list index of this cell in a grid with `ncols` columns.
    pub fn index(self, ncols: u32) -> Option<usize> {
        let row = usize::try_from(self.row).ok()?;
        let col = usize::try_from(self.col).ok()?;
        let ncols = usize::try_from(ncols).ok()?;
        row.checked_mul(ncols)?.checked_add(col)
    }
}

impl fmt::Display for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.row, self.col)
    }
}

impl FromStr for CellId {
    type Err = CellIdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || CellIdParseError {
            input: s.to_owned(),
        };
        let (row, col) = s.split_once(':').ok_or_else(err)?;
        Ok(Self {
            row: row.trim().parse().map_err(|_e| err())?,
            col: col.trim().parse().map_err(|_e| err())?,
        })
    }
}

impl From<CellId> for String {
    fn from(id: CellId) -> Self {
        id.to_string()
    }
}

impl TryFrom<String> for CellId {
    type Error = CellIdParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

/// An arbitrary cell attribute beyond the well-known fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    /// A numeric attribute (population, floor area, ...).
    Number(f64),
    /// A boolean attribute.
    Flag(bool),
    /// A categorical attribute (land-use code, zoning label, ...).
    Category(String),
}

/// RGBA color of a cell as rendered by the table front end.
pub type Rgba = [u8; 4];

/// The mutable property bag of one grid cell.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    /// Cell type name (the "brick" placed on the table).
    pub type_name: String,
    /// Height in levels.
    #[serde(default)]
    pub height: f64,
    /// Display color, if the service reports one.
    #[serde(default)]
    pub color: Option<Rgba>,
    /// Whether users may edit this cell.
    #[serde(default = "default_interactive")]
    pub interactive: bool,
    /// Additional numeric, categorical or boolean attributes.
    #[serde(default)]
    pub attributes: BTreeMap<String, AttributeValue>,
}

const fn default_interactive() -> bool {
    true
}

impl Cell {
    /// Create a cell of the given type with zero height and no extras.
    pub fn of_type(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            height: 0.0,
            color: None,
            interactive: true,
            attributes: BTreeMap::new(),
        }
    }

    /// Builder-style height setter.
    #[must_use]
    pub const fn with_height(mut self, height: f64) -> Self {
        self.height = height;
        self
    }

    /// Builder-style attribute setter.
    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: AttributeValue) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    /// Look up a numeric attribute.
    pub fn number(&self, key: &str) -> Option<f64> {
        match self.attributes.get(key) {
            Some(AttributeValue::Number(value)) => Some(*value),
            _ => None,
        }
    }
}

/// Neighbourhood used when indicators reason about adjacent cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    /// Edge-sharing neighbours only.
    #[default]
    Four,
    /// Edge- and corner-sharing neighbours.
    Eight,
}

/// Grid-level header: lattice shape, placement and cell size.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GridHeader {
    /// Number of rows in the lattice.
    pub nrows: u32,
    /// Number of columns in the lattice.
    pub ncols: u32,
    /// Edge length of a cell in meters.
    #[serde(default)]
    pub cell_size: f64,
    /// Clockwise rotation of the grid in degrees.
    #[serde(default)]
    pub rotation: f64,
    /// Latitude of the top-left corner.
    #[serde(default)]
    pub latitude: f64,
    /// Longitude of the top-left corner.
    #[serde(default)]
    pub longitude: f64,
    /// Neighbourhood rule between cells.
    #[serde(default)]
    pub connectivity: Connectivity,
}

impl GridHeader {
    /// Header for an unplaced `nrows x ncols` grid.
    pub fn new(nrows: u32, ncols: u32) -> Self {
        Self {
            nrows,
            ncols,
            cell_size: 0.0,
            rotation: 0.0,
            latitude: 0.0,
            longitude: 0.0,
            connectivity: Connectivity::Four,
        }
    }

    /// Total number of lattice positions.
    pub fn cell_count(&self) -> u64 {
        u64::from(self.nrows).saturating_mul(u64::from(self.ncols))
    }

    /// Whether `id` lies inside the lattice.
    pub const fn contains(&self, id: CellId) -> bool {
        id.row < self.nrows && id.col < self.ncols
    }

    /// Iterate every lattice position in row-major order.
    pub fn positions(&self) -> impl Iterator<Item = CellId> + '_ {
        (0..self.nrows).flat_map(move |row| (0..self.ncols).map(move |col| CellId::new(row, col)))
    }
}

/// Footprint polygon of one cell as `[lon, lat]` pairs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CellGeometry {
    /// Exterior ring. The closing vertex may or may not repeat the first.
    pub ring: Vec<[f64; 2]>,
}

impl CellGeometry {
    /// Mean of the ring vertices, ignoring a repeated closing vertex.
    ///
    /// Returns `None` for an empty ring.
    pub fn centroid(&self) -> Option<[f64; 2]> {
        let mut vertices = self.ring.as_slice();
        if vertices.len() > 1 && vertices.first() == vertices.last() {
            vertices = vertices.split_last().map_or(vertices, |(_, rest)| rest);
        }
        if vertices.is_empty() {
            return None;
        }
        #[allow(clippy::cast_precision_loss)]
        let n = vertices.len() as f64;
        let (lon, lat) = vertices
            .iter()
            .fold((0.0, 0.0), |(lon, lat), [x, y]| (lon + x, lat + y));
        Some([lon / n, lat / n])
    }
}

/// Static definition of a cell type, as configured on the table.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeDefinition {
    /// Default color of the type.
    #[serde(default)]
    pub color: Option<Rgba>,
    /// Default height of the type.
    #[serde(default)]
    pub height: Option<f64>,
    /// Whether cells of this type are user-editable.
    #[serde(default)]
    pub interactive: Option<bool>,
    /// Remaining fields (land-use codes, industry mix, ...), kept verbatim.
    #[serde(default, flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}
