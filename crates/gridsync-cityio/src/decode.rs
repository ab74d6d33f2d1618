//! Decoding of the table service's grid documents.
//!
//! A table exposes two documents: the static grid description (`GEOGRID`:
//! header, cell types and per-cell footprints) and the live cell list
//! (`GEOGRIDDATA`), a row-major array with one object per lattice position.

use std::collections::BTreeMap;

use gridsync_core::error::TransportError;
use gridsync_core::indicator::Requirements;
use gridsync_types::{
    AttributeValue, Cell, CellGeometry, CellId, GridHeader, GridMetadata, GridSnapshot, Rgba,
    SnapshotError, TypeDefinition,
};
use serde_json::{Map, Value};

/// Cell keys with a dedicated field; everything else becomes an attribute.
const RESERVED_CELL_KEYS: [&str; 6] = ["id", "name", "height", "color", "interactive", "tui_id"];

/// Errors raised while decoding a grid document.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    /// A required field is missing or has the wrong JSON type.
    #[error("{document}: field {field:?} is missing or invalid")]
    Field {
        /// Which document was being decoded.
        document: &'static str,
        /// Offending field.
        field: String,
    },

    /// The cell list holds more entries than the lattice has positions.
    #[error("cell list has {len} entries but the grid is {nrows}x{ncols}")]
    TooManyCells {
        /// Length of the received list.
        len: usize,
        /// Header rows.
        nrows: u32,
        /// Header columns.
        ncols: u32,
    },

    /// A decoded cell does not fit the snapshot.
    #[error(transparent)]
    Snapshot {
        /// The underlying snapshot error.
        #[from]
        source: SnapshotError,
    },
}

impl From<DecodeError> for TransportError {
    fn from(err: DecodeError) -> Self {
        Self::Malformed(err.to_string())
    }
}

/// The static part of a table: lattice, cell types and footprints.
#[derive(Debug, Clone, PartialEq)]
pub struct GeoGrid {
    /// Lattice dimensions and placement.
    pub header: GridHeader,
    /// Cell type definitions by name.
    pub types: BTreeMap<String, TypeDefinition>,
    /// Footprint of each cell that has one.
    pub geometry: BTreeMap<CellId, CellGeometry>,
}

impl GeoGrid {
    /// Build a snapshot of `table` from a `GEOGRIDDATA` document, attaching
    /// the side tables `requirements` asks for.
    ///
    /// `null` entries in the cell list are left out; the handler fills them
    /// with the empty type.
    pub fn snapshot(
        &self,
        table: &str,
        cells: &Value,
        requirements: Requirements,
    ) -> Result<GridSnapshot, DecodeError> {
        let metadata = GridMetadata::new(table, self.header.clone());
        let mut snapshot = GridSnapshot::from_cells(metadata, decode_cells(cells, &self.header)?)?;
        if requirements.geometry {
            snapshot = snapshot.with_geometry(self.geometry.clone());
        }
        if requirements.type_definitions {
            snapshot = snapshot.with_type_definitions(self.types.clone());
        }
        Ok(snapshot)
    }
}

/// Decode a `GEOGRID` document.
pub fn decode_geogrid(value: &Value) -> Result<GeoGrid, DecodeError> {
    const DOC: &str = "GEOGRID";
    let properties = value
        .get("properties")
        .and_then(Value::as_object)
        .ok_or_else(|| field_error(DOC, "properties"))?;
    let header = decode_header(
        properties
            .get("header")
            .and_then(Value::as_object)
            .ok_or_else(|| field_error(DOC, "properties.header"))?,
    )?;

    let types = match properties.get("types") {
        None | Some(Value::Null) => BTreeMap::new(),
        Some(Value::Object(types)) => types
            .iter()
            .map(|(name, def)| Ok((name.clone(), decode_type(name, def)?)))
            .collect::<Result<_, DecodeError>>()?,
        Some(_) => return Err(field_error(DOC, "properties.types")),
    };

    let mut geometry = BTreeMap::new();
    if let Some(features) = value.get("features").and_then(Value::as_array) {
        for (index, feature) in features.iter().enumerate() {
            let Some(ring) = feature_ring(feature) else {
                continue;
            };
            let id = CellId::from_index(index, header.ncols)
                .filter(|id| header.contains(*id))
                .ok_or_else(|| field_error(DOC, format!("features[{index}]")))?;
            geometry.insert(id, CellGeometry { ring });
        }
    }

    Ok(GeoGrid { header, types, geometry })
}

/// Decode a `GEOGRIDDATA` list into `(id, cell)` pairs in row-major order.
pub fn decode_cells(value: &Value, header: &GridHeader) -> Result<Vec<(CellId, Cell)>, DecodeError> {
    const DOC: &str = "GEOGRIDDATA";
    let list = value.as_array().ok_or_else(|| field_error(DOC, "<root>"))?;
    let fits = u64::try_from(list.len()).is_ok_and(|len| len <= header.cell_count());
    if !fits {
        return Err(DecodeError::TooManyCells {
            len: list.len(),
            nrows: header.nrows,
            ncols: header.ncols,
        });
    }

    let mut cells = Vec::with_capacity(list.len());
    for (index, entry) in list.iter().enumerate() {
        let object = match entry {
            Value::Null => continue,
            Value::Object(object) => object,
            _ => return Err(field_error(DOC, format!("[{index}]"))),
        };
        let id = CellId::from_index(index, header.ncols)
            .ok_or_else(|| field_error(DOC, format!("[{index}]")))?;
        cells.push((id, decode_cell(index, object)?));
    }
    Ok(cells)
}

/// Extract the hash of `var` from a `meta/hashes` document.
pub fn decode_hash(value: &Value, var: &str) -> Option<String> {
    match value.get(var)? {
        Value::String(hash) => Some(hash.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn field_error(document: &'static str, field: impl Into<String>) -> DecodeError {
    DecodeError::Field {
        document,
        field: field.into(),
    }
}

fn decode_header(header: &Map<String, Value>) -> Result<GridHeader, DecodeError> {
    const DOC: &str = "GEOGRID";
    let dimension = |key: &str| {
        header
            .get(key)
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok())
            .ok_or_else(|| field_error(DOC, format!("header.{key}")))
    };
    let float = |key: &str| header.get(key).and_then(Value::as_f64).unwrap_or(0.0);

    let mut decoded = GridHeader::new(dimension("nrows")?, dimension("ncols")?);
    decoded.cell_size = float("cellSize");
    decoded.rotation = float("rotation");
    decoded.latitude = float("latitude");
    decoded.longitude = float("longitude");
    Ok(decoded)
}

fn decode_type(name: &str, value: &Value) -> Result<TypeDefinition, DecodeError> {
    let object = value
        .as_object()
        .ok_or_else(|| field_error("GEOGRID", format!("types.{name}")))?;
    let mut definition = TypeDefinition {
        color: object.get("color").and_then(decode_color),
        height: object.get("height").and_then(decode_height),
        interactive: object.get("interactive").and_then(decode_interactive),
        extra: BTreeMap::new(),
    };
    for (key, extra) in object {
        if !matches!(key.as_str(), "color" | "height" | "interactive") {
            definition.extra.insert(key.clone(), extra.clone());
        }
    }
    Ok(definition)
}

fn decode_cell(index: usize, object: &Map<String, Value>) -> Result<Cell, DecodeError> {
    let type_name = object
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| field_error("GEOGRIDDATA", format!("[{index}].name")))?;

    let mut cell = Cell::of_type(type_name)
        .with_height(object.get("height").and_then(decode_height).unwrap_or(0.0));
    cell.color = object.get("color").and_then(decode_color);
    if let Some(interactive) = object.get("interactive").and_then(decode_interactive) {
        cell.interactive = interactive;
    }
    for (key, value) in object {
        if RESERVED_CELL_KEYS.contains(&key.as_str()) {
            continue;
        }
        let attribute = match value {
            Value::Number(n) => n.as_f64().map(AttributeValue::Number),
            Value::Bool(flag) => Some(AttributeValue::Flag(*flag)),
            Value::String(s) => Some(AttributeValue::Category(s.clone())),
            _ => None,
        };
        if let Some(attribute) = attribute {
            cell.attributes.insert(key.clone(), attribute);
        }
    }
    Ok(cell)
}

/// Heights come either as a number or as a `[min, max, current]` slider
/// triple; the current value is the last entry.
fn decode_height(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::Array(items) => items.last().and_then(Value::as_f64),
        _ => None,
    }
}

/// `[r, g, b]` or `[r, g, b, a]` with integer channels. A missing alpha
/// is opaque.
fn decode_color(value: &Value) -> Option<Rgba> {
    let channels = value
        .as_array()?
        .iter()
        .map(|c| c.as_u64().and_then(|c| u8::try_from(c).ok()))
        .collect::<Option<Vec<u8>>>()?;
    match channels.as_slice() {
        [r, g, b] => Some([*r, *g, *b, u8::MAX]),
        [r, g, b, a] => Some([*r, *g, *b, *a]),
        _ => None,
    }
}

/// Interactivity is a flag on newer tables and a mode label ("Web",
/// "Table", "None") on older ones.
fn decode_interactive(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(flag) => Some(*flag),
        Value::String(mode) => Some(!(mode.is_empty() || mode.eq_ignore_ascii_case("none"))),
        _ => None,
    }
}

/// First ring of a polygon feature as `[lon, lat]` pairs.
fn feature_ring(feature: &Value) -> Option<Vec<[f64; 2]>> {
    let ring = feature
        .get("geometry")?
        .get("coordinates")?
        .as_array()?
        .first()?
        .as_array()?;
    ring.iter()
        .map(|vertex| match vertex.as_array()?.as_slice() {
            [lon, lat, ..] => Some([lon.as_f64()?, lat.as_f64()?]),
            _ => None,
        })
        .collect()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn geogrid_doc() -> Value {
        json!({
            "type": "FeatureCollection",
            "properties": {
                "header": {
                    "nrows": 2, "ncols": 2, "cellSize": 20,
                    "rotation": 12.5, "latitude": 42.33, "longitude": -83.07,
                    "projection": "+proj=lcc", "tz": -5
                },
                "types": {
                    "Residential": { "color": [255, 200, 0], "height": [0, 50, 10], "interactive": "Web" },
                    "Park": { "color": [0, 160, 0, 128], "LBCS": [{ "proportion": 1.0 }] }
                }
            },
            "features": [
                { "type": "Feature", "geometry": { "type": "Polygon", "coordinates": [[[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 1.0], [0.0, 0.0]]] } },
                { "type": "Feature", "geometry": { "type": "Polygon", "coordinates": [[[1.0, 0.0], [2.0, 0.0], [2.0, 1.0], [1.0, 1.0]]] } },
                { "type": "Feature", "geometry": null },
                { "type": "Feature", "geometry": { "type": "Polygon", "coordinates": [[[1.0, 1.0], [2.0, 1.0], [2.0, 2.0], [1.0, 2.0]]] } }
            ]
        })
    }

    #[test]
    fn geogrid_header_types_and_features() {
        let grid = decode_geogrid(&geogrid_doc()).unwrap();
        assert_eq!((grid.header.nrows, grid.header.ncols), (2, 2));
        assert!((grid.header.rotation - 12.5).abs() < f64::EPSILON);
        assert!((grid.header.cell_size - 20.0).abs() < f64::EPSILON);

        let residential = grid.types.get("Residential").unwrap();
        assert_eq!(residential.color, Some([255, 200, 0, 255]));
        assert_eq!(residential.height, Some(10.0));
        assert_eq!(residential.interactive, Some(true));
        let park = grid.types.get("Park").unwrap();
        assert_eq!(park.color, Some([0, 160, 0, 128]));
        assert!(park.extra.contains_key("LBCS"));

        assert_eq!(grid.geometry.len(), 3);
        assert!(!grid.geometry.contains_key(&CellId::new(1, 0)));
        assert_eq!(
            grid.geometry.get(&CellId::new(1, 1)).unwrap().centroid(),
            Some([1.5, 1.5])
        );
    }

    #[test]
    fn geogrid_without_header_is_rejected() {
        let err = decode_geogrid(&json!({ "properties": {} })).unwrap_err();
        assert!(matches!(err, DecodeError::Field { ref field, .. } if field == "properties.header"));
    }

    #[test]
    fn cells_decode_fields_and_attributes() {
        let header = GridHeader::new(2, 2);
        let cells = decode_cells(
            &json!([
                { "id": 0, "name": "Residential", "height": [0, 50, 12], "color": [1, 2, 3, 4], "interactive": "Web", "population": 40, "zone": "R2" },
                { "id": 1, "name": "Park", "height": 0, "interactive": false },
                null,
                { "id": 3, "name": "None", "tui_id": null }
            ]),
            &header,
        )
        .unwrap();

        assert_eq!(cells.len(), 3);
        let (id, residential) = cells.first().unwrap();
        assert_eq!(*id, CellId::new(0, 0));
        assert!((residential.height - 12.0).abs() < f64::EPSILON);
        assert_eq!(residential.color, Some([1, 2, 3, 4]));
        assert!(residential.interactive);
        assert_eq!(residential.number("population"), Some(40.0));
        assert_eq!(
            residential.attributes.get("zone"),
            Some(&AttributeValue::Category("R2".to_owned()))
        );
        assert!(!residential.attributes.contains_key("id"));

        let (_, park) = cells.get(1).unwrap();
        assert!(!park.interactive);
        let (last, _) = cells.get(2).unwrap();
        assert_eq!(*last, CellId::new(1, 1));
    }

    #[test]
    fn oversized_cell_list_is_rejected() {
        let header = GridHeader::new(1, 1);
        let err = decode_cells(&json!([{ "name": "A" }, { "name": "B" }]), &header).unwrap_err();
        assert!(matches!(err, DecodeError::TooManyCells { len: 2, .. }));
    }

    #[test]
    fn cell_without_name_is_rejected() {
        let header = GridHeader::new(1, 2);
        let err = decode_cells(&json!([{ "name": "A" }, { "height": 3 }]), &header).unwrap_err();
        assert_eq!(err.to_string(), "GEOGRIDDATA: field \"[1].name\" is missing or invalid");
    }

    #[test]
    fn snapshot_attaches_requested_side_tables_only() {
        let grid = decode_geogrid(&geogrid_doc()).unwrap();
        let cells = json!([{ "name": "Park" }]);

        let bare = grid.snapshot("corktown", &cells, Requirements::NONE).unwrap();
        assert_eq!(bare.table(), "corktown");
        assert_eq!(bare.len(), 1);
        assert!(bare.geometry.is_none());
        assert!(bare.type_definitions.is_none());

        let full = grid
            .snapshot(
                "corktown",
                &cells,
                Requirements::GEOMETRY.union(Requirements::TYPE_DEFINITIONS),
            )
            .unwrap();
        assert_eq!(full.geometry.as_ref().map(BTreeMap::len), Some(3));
        assert_eq!(full.type_definitions.as_ref().map(BTreeMap::len), Some(2));
    }

    #[test]
    fn hash_lookup_accepts_strings_and_numbers() {
        let hashes = json!({ "GEOGRIDDATA": "abc123", "GEOGRID": 7, "access": null });
        assert_eq!(decode_hash(&hashes, "GEOGRIDDATA").as_deref(), Some("abc123"));
        assert_eq!(decode_hash(&hashes, "GEOGRID").as_deref(), Some("7"));
        assert_eq!(decode_hash(&hashes, "access"), None);
        assert_eq!(decode_hash(&hashes, "missing"), None);
    }

    #[test]
    fn decode_errors_become_malformed_transport_errors() {
        let err: TransportError = DecodeError::TooManyCells { len: 5, nrows: 2, ncols: 2 }.into();
        assert!(matches!(err, TransportError::Malformed(ref msg) if msg.contains("2x2")));
    }
}
