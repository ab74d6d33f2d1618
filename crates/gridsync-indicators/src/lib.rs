//! Reference indicators for gridsync.
//!
//! Small, dependency-free computations over a [`GridSnapshot`] that the
//! daemon can register out of the box, and that double as examples of the
//! simple and composite indicator contracts.
//!
//! # Modules
//!
//! - [`composite`] -- [`WeightedMean`] over other indicators.
//! - [`density`] -- Mean and maximum built height ([`Density`]).
//! - [`diversity`] -- Normalized land-use entropy ([`Diversity`]).
//! - [`land_use`] -- Share of each land use ([`LandUseMix`]).
//! - [`noise`] -- Neighbourhood noise heatmap ([`Noise`]).
//!
//! [`GridSnapshot`]: gridsync_types::GridSnapshot

pub mod composite;
pub mod density;
pub mod diversity;
pub mod land_use;
pub mod noise;

pub use composite::WeightedMean;
pub use density::Density;
pub use diversity::Diversity;
pub use land_use::LandUseMix;
pub use noise::Noise;

use gridsync_core::config::IndicatorToggles;
use gridsync_core::indicator::Indicator;
use tracing::warn;

/// Name of the [`Diversity`] indicator.
pub const DIVERSITY: &str = "diversity";
/// Name of the [`LandUseMix`] indicator.
pub const LAND_USE_MIX: &str = "land_use_mix";
/// Name of the [`Density`] indicator.
pub const DENSITY: &str = "density";
/// Name of the [`Noise`] indicator.
pub const NOISE: &str = "noise";
/// Name of the bundled [`WeightedMean`] composite.
pub const URBAN_INDEX: &str = "urban_index";

/// The bundled indicators enabled in `toggles`, in registration order.
///
/// The composite averages whichever numeric indicators are enabled with
/// equal weights, and is left out when none are.
pub fn reference_set(toggles: &IndicatorToggles, empty_type: &str) -> Vec<Indicator> {
    let mut set = Vec::new();
    let mut numeric = Vec::new();

    if toggles.diversity {
        set.push(Indicator::simple(Diversity::new(empty_type)));
        numeric.push(DIVERSITY);
    }
    if toggles.land_use_mix {
        set.push(Indicator::simple(LandUseMix::new(empty_type)));
        numeric.push(LAND_USE_MIX);
    }
    if toggles.density {
        set.push(Indicator::simple(Density::new(empty_type)));
        numeric.push(DENSITY);
    }
    if toggles.noise {
        set.push(Indicator::simple(Noise::new(empty_type)));
    }
    if toggles.composite {
        if numeric.is_empty() {
            warn!(indicator = URBAN_INDEX, "Composite enabled without any numeric inputs; skipped");
        } else {
            set.push(Indicator::composite(WeightedMean::new(
                URBAN_INDEX,
                numeric.into_iter().map(|name| (name, 1.0)),
            )));
        }
    }
    set
}

/// `n` as a float, or `None` past `u32::MAX`.
pub(crate) fn count_as_f64(n: usize) -> Option<f64> {
    u32::try_from(n).ok().map(f64::from)
}

/// `part / whole`, or `None` when `whole` is zero.
pub(crate) fn share_of(part: usize, whole: usize) -> Option<f64> {
    let whole = count_as_f64(whole).filter(|w| *w > 0.0)?;
    Some(count_as_f64(part)? / whole)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridsync_core::registry::IndicatorRegistry;
    use gridsync_types::{Cell, CellGeometry, CellId, GridHeader, GridMetadata, GridSnapshot};

    use super::*;

    fn all_on() -> IndicatorToggles {
        IndicatorToggles {
            diversity: true,
            land_use_mix: true,
            density: true,
            noise: true,
            composite: true,
        }
    }

    #[test]
    fn full_set_registers_in_order() {
        let mut registry = IndicatorRegistry::new("t");
        for indicator in reference_set(&all_on(), "None") {
            registry.register(indicator).unwrap();
        }
        assert_eq!(
            registry.names(),
            vec![DIVERSITY, LAND_USE_MIX, DENSITY, NOISE, URBAN_INDEX]
        );
        assert_eq!(
            registry.descriptor(URBAN_INDEX).unwrap().dependencies,
            vec![DENSITY.to_owned(), DIVERSITY.to_owned(), LAND_USE_MIX.to_owned()]
        );
        let requirements = registry.requirements();
        assert!(requirements.geometry);
        assert!(requirements.type_definitions);
    }

    #[test]
    fn composite_is_dropped_without_numeric_inputs() {
        let toggles = IndicatorToggles {
            diversity: false,
            land_use_mix: false,
            density: false,
            noise: true,
            composite: true,
        };
        let set = reference_set(&toggles, "None");
        assert_eq!(set.len(), 1);
        assert_eq!(set.first().unwrap().name(), NOISE);
    }

    #[test]
    fn full_set_evaluates_on_a_small_grid() {
        let mut registry = IndicatorRegistry::new("t");
        for indicator in reference_set(&all_on(), "None") {
            registry.register(indicator).unwrap();
        }
        let ids = [CellId::new(0, 0), CellId::new(0, 1)];
        let grid = GridSnapshot::from_cells(
            GridMetadata::new("t", GridHeader::new(1, 2)),
            ids.into_iter()
                .zip([Cell::of_type("Office").with_height(4.0), Cell::of_type("Park")]),
        )
        .unwrap()
        .with_geometry(
            ids.into_iter()
                .map(|id| {
                    let x = f64::from(id.col);
                    (id, CellGeometry { ring: vec![[x, 0.0], [x + 1.0, 0.0], [x, 1.0]] })
                })
                .collect(),
        );

        let report = registry.evaluate_all(&grid);
        assert!(report.is_success(), "{}", report.failure_summary());
        assert_eq!(report.outputs.len(), 5);
        assert!(report.outputs.get(URBAN_INDEX).unwrap().value("value").is_some());
    }

    #[test]
    fn share_of_zero_whole_is_none() {
        assert_eq!(share_of(3, 0), None);
        assert_eq!(share_of(1, 4), Some(0.25));
    }
}
