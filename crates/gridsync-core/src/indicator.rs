//! Indicator contracts.
//!
//! An indicator is a named computation over a [`GridSnapshot`]. Simple
//! indicators read the snapshot directly. Composite indicators combine the
//! outputs of other registered indicators and are only evaluated once all of
//! their dependencies have produced a value in the same pass.
//!
//! Both kinds are trait objects wrapped in the [`Indicator`] enum so the
//! registry can store them side by side while still telling them apart.

use std::collections::BTreeMap;
use std::fmt;

use gridsync_types::{GridSnapshot, IndicatorOutput, VizType};
use serde::{Deserialize, Serialize};

use crate::error::ComputationError;

/// Outputs of a composite's declared dependencies, keyed by indicator name.
pub type DependencyOutputs = BTreeMap<String, IndicatorOutput>;

/// Optional snapshot content an indicator needs in addition to the cells.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Requirements {
    /// Per-cell footprint polygons.
    pub geometry: bool,
    /// The table's cell type catalogue.
    pub type_definitions: bool,
}

impl Requirements {
    /// Cells only.
    pub const NONE: Self = Self {
        geometry: false,
        type_definitions: false,
    };

    /// Cells plus geometry.
    pub const GEOMETRY: Self = Self {
        geometry: true,
        type_definitions: false,
    };

    /// Cells plus the type catalogue.
    pub const TYPE_DEFINITIONS: Self = Self {
        geometry: false,
        type_definitions: true,
    };

    /// Everything either set requires.
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            geometry: self.geometry || other.geometry,
            type_definitions: self.type_definitions || other.type_definitions,
        }
    }
}

/// Context handed to an indicator when it is registered.
#[derive(Debug, Clone, Copy)]
pub struct SetupContext<'a> {
    /// Table the indicator will be evaluated against.
    pub table: &'a str,
}

/// An indicator computed from the snapshot alone.
pub trait SimpleIndicator: Send + Sync {
    /// Unique indicator name.
    fn name(&self) -> &str;

    /// Snapshot content this indicator reads beyond the cells.
    fn requirements(&self) -> Requirements {
        Requirements::NONE
    }

    /// Chart type for numeric outputs.
    fn viz_type(&self) -> VizType {
        VizType::Radar
    }

    /// One-time initialization, run during registration.
    ///
    /// # Errors
    ///
    /// A failure here rejects the registration.
    fn setup(&mut self, _ctx: &SetupContext<'_>) -> Result<(), ComputationError> {
        Ok(())
    }

    /// Compute the indicator for one snapshot.
    ///
    /// # Errors
    ///
    /// A failure aborts the evaluation pass it belongs to.
    fn compute(&self, snapshot: &GridSnapshot) -> Result<IndicatorOutput, ComputationError>;
}

/// An indicator computed from other indicators' outputs.
pub trait CompositeIndicator: Send + Sync {
    /// Unique indicator name.
    fn name(&self) -> &str;

    /// Names of the indicators whose outputs this one combines.
    fn dependencies(&self) -> Vec<String>;

    /// Chart type for numeric outputs.
    fn viz_type(&self) -> VizType {
        VizType::Radar
    }

    /// One-time initialization, run during registration.
    ///
    /// # Errors
    ///
    /// A failure here rejects the registration.
    fn setup(&mut self, _ctx: &SetupContext<'_>) -> Result<(), ComputationError> {
        Ok(())
    }

    /// Combine the dependency outputs of the current pass.
    ///
    /// `inputs` holds exactly the declared dependencies.
    ///
    /// # Errors
    ///
    /// A failure aborts the evaluation pass it belongs to.
    fn compose(
        &self,
        snapshot: &GridSnapshot,
        inputs: &DependencyOutputs,
    ) -> Result<IndicatorOutput, ComputationError>;
}

/// Which of the two indicator contracts an entry implements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndicatorKind {
    /// Computed from the snapshot.
    Simple,
    /// Computed from other indicators.
    Composite,
}

/// A registrable indicator of either kind.
pub enum Indicator {
    /// A [`SimpleIndicator`].
    Simple(Box<dyn SimpleIndicator>),
    /// A [`CompositeIndicator`].
    Composite(Box<dyn CompositeIndicator>),
}

impl Indicator {
    /// Wrap a simple indicator.
    pub fn simple(indicator: impl SimpleIndicator + 'static) -> Self {
        Self::Simple(Box::new(indicator))
    }

    /// Wrap a composite indicator.
    pub fn composite(indicator: impl CompositeIndicator + 'static) -> Self {
        Self::Composite(Box::new(indicator))
    }

    /// The indicator's name.
    pub fn name(&self) -> &str {
        match self {
            Self::Simple(i) => i.name(),
            Self::Composite(i) => i.name(),
        }
    }

    /// The indicator's kind.
    pub const fn kind(&self) -> IndicatorKind {
        match self {
            Self::Simple(_) => IndicatorKind::Simple,
            Self::Composite(_) => IndicatorKind::Composite,
        }
    }

    /// Declared dependencies; empty for simple indicators.
    pub fn dependencies(&self) -> Vec<String> {
        match self {
            Self::Simple(_) => Vec::new(),
            Self::Composite(i) => i.dependencies(),
        }
    }

    /// Snapshot requirements; composites need nothing of their own.
    pub fn requirements(&self) -> Requirements {
        match self {
            Self::Simple(i) => i.requirements(),
            Self::Composite(_) => Requirements::NONE,
        }
    }

    /// Chart type.
    pub fn viz_type(&self) -> VizType {
        match self {
            Self::Simple(i) => i.viz_type(),
            Self::Composite(i) => i.viz_type(),
        }
    }

    pub(crate) fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<(), ComputationError> {
        match self {
            Self::Simple(i) => i.setup(ctx),
            Self::Composite(i) => i.setup(ctx),
        }
    }
}

impl fmt::Debug for Indicator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Indicator")
            .field("name", &self.name())
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

/// Registration-time facts about an indicator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndicatorDescriptor {
    /// Unique name.
    pub name: String,
    /// Simple or composite.
    pub kind: IndicatorKind,
    /// Snapshot requirements.
    pub requirements: Requirements,
    /// Chart type.
    pub viz_type: VizType,
    /// Declared dependencies, deduplicated, in declaration order.
    pub dependencies: Vec<String>,
}

/// A simple indicator backed by a closure.
pub struct FnIndicator<F> {
    name: String,
    requirements: Requirements,
    viz_type: VizType,
    compute: F,
}

impl<F> FnIndicator<F>
where
    F: Fn(&GridSnapshot) -> Result<IndicatorOutput, ComputationError> + Send + Sync,
{
    /// A radar-charted indicator with no extra requirements.
    pub fn new(name: impl Into<String>, compute: F) -> Self {
        Self {
            name: name.into(),
            requirements: Requirements::NONE,
            viz_type: VizType::Radar,
            compute,
        }
    }

    /// Builder-style requirements setter.
    #[must_use]
    pub const fn with_requirements(mut self, requirements: Requirements) -> Self {
        self.requirements = requirements;
        self
    }

    /// Builder-style chart type setter.
    #[must_use]
    pub const fn with_viz_type(mut self, viz_type: VizType) -> Self {
        self.viz_type = viz_type;
        self
    }
}

impl<F> SimpleIndicator for FnIndicator<F>
where
    F: Fn(&GridSnapshot) -> Result<IndicatorOutput, ComputationError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn requirements(&self) -> Requirements {
        self.requirements
    }

    fn viz_type(&self) -> VizType {
        self.viz_type
    }

    fn compute(&self, snapshot: &GridSnapshot) -> Result<IndicatorOutput, ComputationError> {
        (self.compute)(snapshot)
    }
}

/// A composite indicator backed by a closure over its dependency outputs.
pub struct FnComposite<F> {
    name: String,
    dependencies: Vec<String>,
    viz_type: VizType,
    compose: F,
}

impl<F> FnComposite<F>
where
    F: Fn(&DependencyOutputs) -> Result<IndicatorOutput, ComputationError> + Send + Sync,
{
    /// A composite over `dependencies`.
    pub fn new<S: Into<String>>(
        name: impl Into<String>,
        dependencies: impl IntoIterator<Item = S>,
        compose: F,
    ) -> Self {
        Self {
            name: name.into(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
            viz_type: VizType::Radar,
            compose,
        }
    }

    /// Builder-style chart type setter.
    #[must_use]
    pub const fn with_viz_type(mut self, viz_type: VizType) -> Self {
        self.viz_type = viz_type;
        self
    }
}

impl<F> CompositeIndicator for FnComposite<F>
where
    F: Fn(&DependencyOutputs) -> Result<IndicatorOutput, ComputationError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn dependencies(&self) -> Vec<String> {
        self.dependencies.clone()
    }

    fn viz_type(&self) -> VizType {
        self.viz_type
    }

    fn compose(
        &self,
        _snapshot: &GridSnapshot,
        inputs: &DependencyOutputs,
    ) -> Result<IndicatorOutput, ComputationError> {
        (self.compose)(inputs)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridsync_types::{GridHeader, GridMetadata};

    use super::*;

    #[test]
    fn requirements_union() {
        let both = Requirements::GEOMETRY.union(Requirements::TYPE_DEFINITIONS);
        assert!(both.geometry && both.type_definitions);
        assert_eq!(Requirements::NONE.union(Requirements::NONE), Requirements::NONE);
    }

    #[test]
    fn indicator_enum_dispatches() {
        let simple = Indicator::simple(
            FnIndicator::new("count", |s: &GridSnapshot| {
                Ok(IndicatorOutput::single("cells", u32::try_from(s.len()).map_or(0.0, f64::from)))
            })
            .with_requirements(Requirements::GEOMETRY)
            .with_viz_type(VizType::Bar),
        );
        assert_eq!(simple.name(), "count");
        assert_eq!(simple.kind(), IndicatorKind::Simple);
        assert!(simple.requirements().geometry);
        assert_eq!(simple.viz_type(), VizType::Bar);
        assert!(simple.dependencies().is_empty());

        let composite = Indicator::composite(FnComposite::new(
            "combo",
            ["count"],
            |inputs: &DependencyOutputs| {
                Ok(IndicatorOutput::single("n", u32::try_from(inputs.len()).map_or(0.0, f64::from)))
            },
        ));
        assert_eq!(composite.kind(), IndicatorKind::Composite);
        assert_eq!(composite.dependencies(), vec!["count".to_owned()]);
        assert_eq!(composite.requirements(), Requirements::NONE);
    }

    #[test]
    fn closure_indicator_computes() {
        let indicator = FnIndicator::new("const", |_: &GridSnapshot| {
            Ok(IndicatorOutput::single("v", 2.0))
        });
        let snapshot = GridSnapshot::new(GridMetadata::new("t", GridHeader::new(1, 1)));
        assert_eq!(indicator.compute(&snapshot).unwrap().value("v"), Some(2.0));
    }
}
