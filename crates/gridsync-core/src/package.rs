//! Turning indicator outputs into what the table service stores.
//!
//! Numeric outputs become one [`IndicatorRecord`] per entry, named after the
//! entry key. The key [`VALUE_KEY`] is reserved for single-valued indicators
//! and is renamed to the indicator's own name. Heatmap outputs pass through
//! as layers; the service merges them with other indicators' layers.

use std::collections::BTreeMap;

use gridsync_types::{HeatmapLayer, IndicatorOutput, IndicatorRecord, VizType};
use serde::{Deserialize, Serialize};

/// Output key that stands for "the indicator's value" and is published
/// under the indicator's name.
pub const VALUE_KEY: &str = "value";

/// Record type tag for numeric indicator records.
pub const NUMERIC_TYPE: &str = "numeric";

/// One indicator's output in the shape the table service accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum PushPayload {
    /// Records for the numeric indicator list.
    Numeric(Vec<IndicatorRecord>),
    /// A layer for the access/heatmap view.
    Heatmap(HeatmapLayer),
}

impl PushPayload {
    /// Whether the payload carries nothing.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Numeric(records) => records.is_empty(),
            Self::Heatmap(layer) => layer.is_empty(),
        }
    }

    /// An empty payload of the same kind. Pushing it withdraws whatever the
    /// indicator published before.
    pub fn cleared(&self) -> Self {
        match self {
            Self::Numeric(_) => Self::Numeric(Vec::new()),
            Self::Heatmap(_) => Self::Heatmap(HeatmapLayer::default()),
        }
    }

    /// The empty payload that withdraws a published `output`.
    pub fn withdrawal(output: &IndicatorOutput) -> Self {
        match output {
            IndicatorOutput::Numeric(_) => Self::Numeric(Vec::new()),
            IndicatorOutput::Heatmap(_) => Self::Heatmap(HeatmapLayer::default()),
        }
    }
}

/// Package one indicator's output.
///
/// `reference` maps record names to reference values; a record whose name
/// has no reference is published without one.
pub fn package(
    indicator: &str,
    viz_type: VizType,
    output: &IndicatorOutput,
    reference: &BTreeMap<String, f64>,
) -> PushPayload {
    match output {
        IndicatorOutput::Numeric(values) => PushPayload::Numeric(
            values
                .iter()
                .map(|(key, value)| {
                    let name = if key == VALUE_KEY { indicator } else { key.as_str() };
                    IndicatorRecord {
                        name: name.to_owned(),
                        value: *value,
                        indicator_type: NUMERIC_TYPE.to_owned(),
                        viz_type,
                        ref_value: reference.get(name).copied(),
                    }
                })
                .collect(),
        ),
        IndicatorOutput::Heatmap(layer) => PushPayload::Heatmap(layer.clone()),
    }
}
