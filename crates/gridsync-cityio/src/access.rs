//! The access/heatmap document.
//!
//! The table stores every heatmap indicator in one GeoJSON feature
//! collection. `properties` names the layers; each point feature carries a
//! value list aligned with those names.

use std::collections::BTreeMap;

use gridsync_types::{HeatmapLayer, HeatmapPoint};
use serde_json::{Value, json};

use crate::decode::DecodeError;

/// Slot value for a property a point does not carry.
pub const MISSING_VALUE: f64 = 0.0;

/// Encode a merged heatmap layer as the access feature collection.
///
/// A point without a value for some property gets [`MISSING_VALUE`] in
/// that slot.
pub fn encode_access(layer: &HeatmapLayer) -> Value {
    let properties = layer.properties();
    let features: Vec<Value> = layer
        .points
        .iter()
        .map(|point| {
            let values: Vec<Value> = properties
                .iter()
                .map(|name| json!(point.values.get(name).copied().unwrap_or(MISSING_VALUE)))
                .collect();
            json!({
                "type": "Feature",
                "geometry": { "type": "Point", "coordinates": [point.lon, point.lat] },
                "properties": values,
            })
        })
        .collect();

    json!({
        "type": "FeatureCollection",
        "properties": properties,
        "features": features,
    })
}

/// Decode the access feature collection back into a layer.
///
/// An empty document (`{}` or `null`) is an empty layer.
pub fn decode_access(value: &Value) -> Result<HeatmapLayer, DecodeError> {
    const DOC: &str = "access";
    let field = |name: String| DecodeError::Field {
        document: DOC,
        field: name,
    };

    if value.is_null() || value.as_object().is_some_and(serde_json::Map::is_empty) {
        return Ok(HeatmapLayer::default());
    }

    let names = value
        .get("properties")
        .and_then(Value::as_array)
        .ok_or_else(|| field("properties".to_owned()))?
        .iter()
        .map(|name| name.as_str().map(str::to_owned))
        .collect::<Option<Vec<_>>>()
        .ok_or_else(|| field("properties".to_owned()))?;

    let features = value
        .get("features")
        .and_then(Value::as_array)
        .ok_or_else(|| field("features".to_owned()))?;

    let mut layer = HeatmapLayer::default();
    for (index, feature) in features.iter().enumerate() {
        let coordinates = feature
            .get("geometry")
            .and_then(|g| g.get("coordinates"))
            .and_then(Value::as_array)
            .map(Vec::as_slice);
        let Some([lon, lat, ..]) = coordinates else {
            return Err(field(format!("features[{index}].geometry")));
        };
        let (Some(lon), Some(lat)) = (lon.as_f64(), lat.as_f64()) else {
            return Err(field(format!("features[{index}].geometry")));
        };

        let values: BTreeMap<String, f64> = feature
            .get("properties")
            .and_then(Value::as_array)
            .map(|values| {
                names
                    .iter()
                    .zip(values)
                    .filter_map(|(name, v)| Some((name.clone(), v.as_f64()?)))
                    .collect()
            })
            .unwrap_or_default();
        layer.points.push(HeatmapPoint { lon, lat, values });
    }
    Ok(layer)
}
