//! Indicator outputs and their wire records.
//!
//! An indicator produces either a set of named numbers or a heatmap layer.
//! Numeric outputs become [`IndicatorRecord`]s when pushed to the table;
//! heatmap layers from several indicators are merged point by point into
//! one layer before they are pushed.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

/// How the front end should chart a numeric indicator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VizType {
    /// Radar (spider) chart.
    #[default]
    Radar,
    /// Bar chart.
    Bar,
}

/// The result of one indicator computation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum IndicatorOutput {
    /// Sub-indicator name to value.
    Numeric(BTreeMap<String, f64>),
    /// Point layer for map visualization.
    Heatmap(HeatmapLayer),
}

impl IndicatorOutput {
    /// A numeric output with a single entry.
    pub fn single(name: impl Into<String>, value: f64) -> Self {
        let mut values = BTreeMap::new();
        values.insert(name.into(), value);
        Self::Numeric(values)
    }

    /// A numeric output from `(name, value)` pairs.
    pub fn numeric<K: Into<String>>(values: impl IntoIterator<Item = (K, f64)>) -> Self {
        Self::Numeric(values.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// The numeric entries, if this is a numeric output.
    pub const fn as_numeric(&self) -> Option<&BTreeMap<String, f64>> {
        match self {
            Self::Numeric(values) => Some(values),
            Self::Heatmap(_) => None,
        }
    }

    /// The heatmap layer, if this is a heatmap output.
    pub const fn as_heatmap(&self) -> Option<&HeatmapLayer> {
        match self {
            Self::Heatmap(layer) => Some(layer),
            Self::Numeric(_) => None,
        }
    }

    /// A numeric entry by name.
    pub fn value(&self, key: &str) -> Option<f64> {
        self.as_numeric().and_then(|values| values.get(key).copied())
    }

    /// An output of the same kind with no content, used to clear a table.
    pub fn cleared(&self) -> Self {
        match self {
            Self::Numeric(_) => Self::Numeric(BTreeMap::new()),
            Self::Heatmap(_) => Self::Heatmap(HeatmapLayer::default()),
        }
    }
}

/// One point of a heatmap layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeatmapPoint {
    /// Longitude.
    pub lon: f64,
    /// Latitude.
    pub lat: f64,
    /// Property name to value at this point.
    pub values: BTreeMap<String, f64>,
}

/// A set of points carrying named values.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HeatmapLayer {
    /// The points in insertion order.
    pub points: Vec<HeatmapPoint>,
}

impl HeatmapLayer {
    /// Append a point carrying a single named value.
    pub fn push(&mut self, lon: f64, lat: f64, name: impl Into<String>, value: f64) {
        let mut values = BTreeMap::new();
        values.insert(name.into(), value);
        self.points.push(HeatmapPoint { lon, lat, values });
    }

    /// Sorted union of every property name in the layer.
    pub fn properties(&self) -> Vec<String> {
        self.points
            .iter()
            .flat_map(|p| p.values.keys().cloned())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Merge several layers into one, combining points that share the
    /// exact same coordinate. Later layers win on conflicting properties.
    pub fn merge<'a>(layers: impl IntoIterator<Item = &'a Self>) -> Self {
        let mut index: BTreeMap<(u64, u64), usize> = BTreeMap::new();
        let mut merged = Self::default();
        for layer in layers {
            for point in &layer.points {
                let key = (point.lon.to_bits(), point.lat.to_bits());
                if let Some(existing) = index.get(&key).and_then(|i| merged.points.get_mut(*i)) {
                    existing
                        .values
                        .extend(point.values.iter().map(|(k, v)| (k.clone(), *v)));
                } else {
                    index.insert(key, merged.points.len());
                    merged.points.push(point.clone());
                }
            }
        }
        merged
    }

    /// Whether the layer has no points.
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }
}

/// A numeric value as posted to the table's indicator list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndicatorRecord {
    /// Display name of the value.
    pub name: String,
    /// The value.
    pub value: f64,
    /// Always `"numeric"` for records in the indicator list.
    pub indicator_type: String,
    /// Chart type.
    pub viz_type: VizType,
    /// Reference (target/baseline) value, if configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_value: Option<f64>,
}
