//! The indicator registry.
//!
//! Holds every registered indicator in registration order along with the
//! outputs of the last pass that was accepted by the remote table.
//!
//! Composites may only depend on indicators that are already registered.
//! Registration order is therefore always a valid evaluation order and a
//! dependency cycle can never be formed: the only cycle a new composite
//! could close is one through itself, which is rejected explicitly.
//!
//! Evaluation is a pure function of the registry and a snapshot. It never
//! touches the stored outputs; the handler calls [`IndicatorRegistry::commit`]
//! once a pass has been pushed in full.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use gridsync_types::{GridSnapshot, IndicatorOutput};
use indexmap::IndexMap;
use tracing::{debug, info, warn};

use crate::error::{ComputationError, RegistryError};
use crate::indicator::{
    DependencyOutputs, Indicator, IndicatorDescriptor, IndicatorKind, Requirements, SetupContext,
};

/// Why an indicator produced no output in a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The indicator's own code failed.
    Computation(ComputationError),
    /// A declared dependency produced no output in the same pass.
    FailedDependency {
        /// The first missing dependency.
        dependency: String,
    },
}

/// One indicator that failed during a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndicatorFailure {
    /// Indicator name.
    pub name: String,
    /// What went wrong.
    pub reason: FailureReason,
}

impl fmt::Display for IndicatorFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.reason {
            FailureReason::Computation(err) => write!(f, "{}: {err}", self.name),
            FailureReason::FailedDependency { dependency } => {
                write!(f, "{}: dependency {dependency:?} failed", self.name)
            }
        }
    }
}

/// Everything one evaluation pass produced.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EvaluationReport {
    /// Outputs of the indicators that succeeded, in evaluation order.
    pub outputs: IndexMap<String, IndicatorOutput>,
    /// Indicators that failed.
    pub failures: Vec<IndicatorFailure>,
}

impl EvaluationReport {
    /// Whether every indicator produced an output.
    pub fn is_success(&self) -> bool {
        self.failures.is_empty()
    }

    /// One-line summary of the failures, for logs and status reports.
    pub fn failure_summary(&self) -> String {
        self.failures
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("; ")
    }
}

struct Entry {
    indicator: Indicator,
    descriptor: IndicatorDescriptor,
}

/// Registered indicators and their last accepted outputs.
pub struct IndicatorRegistry {
    table: String,
    entries: IndexMap<String, Entry>,
    last_outputs: BTreeMap<String, IndicatorOutput>,
}

impl fmt::Debug for IndicatorRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IndicatorRegistry")
            .field("table", &self.table)
            .field("indicators", &self.entries.keys().collect::<Vec<_>>())
            .field("accepted", &self.last_outputs.len())
            .finish()
    }
}

impl IndicatorRegistry {
    /// An empty registry for `table`.
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            entries: IndexMap::new(),
            last_outputs: BTreeMap::new(),
        }
    }

    /// The table indicators are set up against.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Validate, set up and add an indicator.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::Validation`] when the name is empty or
    /// taken, when a composite declares no dependencies, depends on itself
    /// or names an indicator that is not registered yet, or when the
    /// indicator's setup fails. A rejected indicator leaves the registry
    /// untouched.
    pub fn register(
        &mut self,
        mut indicator: Indicator,
    ) -> Result<IndicatorDescriptor, RegistryError> {
        let name = indicator.name().to_owned();
        if name.trim().is_empty() {
            return Err(RegistryError::validation(&name, "name must not be empty"));
        }
        if self.entries.contains_key(&name) {
            return Err(RegistryError::validation(
                &name,
                "an indicator with this name is already registered",
            ));
        }

        let mut dependencies: Vec<String> = Vec::new();
        for dep in indicator.dependencies() {
            if !dependencies.contains(&dep) {
                dependencies.push(dep);
            }
        }
        if indicator.kind() == IndicatorKind::Composite {
            self.check_dependencies(&name, &dependencies)?;
        }

        indicator
            .setup(&SetupContext { table: &self.table })
            .map_err(|e| RegistryError::validation(&name, format!("setup failed: {e}")))?;

        let descriptor = IndicatorDescriptor {
            name: name.clone(),
            kind: indicator.kind(),
            requirements: indicator.requirements(),
            viz_type: indicator.viz_type(),
            dependencies,
        };
        info!(
            indicator = %name,
            kind = ?descriptor.kind,
            dependencies = ?descriptor.dependencies,
            "Indicator registered"
        );
        self.entries.insert(
            name,
            Entry {
                indicator,
                descriptor: descriptor.clone(),
            },
        );
        Ok(descriptor)
    }

    fn check_dependencies(&self, name: &str, dependencies: &[String]) -> Result<(), RegistryError> {
        if dependencies.is_empty() {
            return Err(RegistryError::validation(
                name,
                "a composite must declare at least one dependency",
            ));
        }
        for dep in dependencies {
            if dep == name {
                return Err(RegistryError::validation(
                    name,
                    "a composite cannot depend on itself",
                ));
            }
            if !self.entries.contains_key(dep) {
                return Err(RegistryError::validation(
                    name,
                    format!("dependency {dep:?} is not registered; register dependencies first"),
                ));
            }
        }
        Ok(())
    }

    /// Remove an indicator that nothing depends on.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown name and
    /// [`RegistryError::Dependency`] when registered composites still
    /// depend on it. Nothing is removed in either case.
    pub fn unregister(&mut self, name: &str) -> Result<(), RegistryError> {
        if !self.entries.contains_key(name) {
            return Err(RegistryError::not_found(name));
        }
        let dependents = self.dependents_of(name);
        if !dependents.is_empty() {
            return Err(RegistryError::Dependency {
                name: name.to_owned(),
                dependents,
            });
        }
        self.remove(name);
        Ok(())
    }

    /// Remove an indicator together with everything that depends on it,
    /// directly or transitively.
    ///
    /// Returns the removed names, dependents first.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] for an unknown name.
    pub fn unregister_cascade(&mut self, name: &str) -> Result<Vec<String>, RegistryError> {
        if !self.entries.contains_key(name) {
            return Err(RegistryError::not_found(name));
        }
        // Dependents are always registered after their dependencies, so one
        // forward sweep collects the transitive closure.
        let mut doomed: BTreeSet<&str> = BTreeSet::new();
        let mut order: Vec<String> = Vec::new();
        for (entry_name, entry) in &self.entries {
            let hit = entry_name == name
                || entry
                    .descriptor
                    .dependencies
                    .iter()
                    .any(|d| doomed.contains(d.as_str()));
            if hit {
                doomed.insert(entry_name.as_str());
                order.push(entry_name.clone());
            }
        }
        order.reverse();
        for removed in &order {
            self.remove(removed);
        }
        Ok(order)
    }

    fn remove(&mut self, name: &str) {
        self.entries.shift_remove(name);
        self.last_outputs.remove(name);
        info!(indicator = %name, "Indicator unregistered");
    }

    /// Registered composites that declare `name` as a direct dependency,
    /// in registration order.
    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.entries
            .values()
            .filter(|e| e.descriptor.dependencies.iter().any(|d| d == name))
            .map(|e| e.descriptor.name.clone())
            .collect()
    }

    /// Evaluate every registered indicator against `snapshot`.
    ///
    /// Simple indicators run first, then composites in registration order.
    /// A composite whose dependency failed is reported as failed without
    /// being called. A panicking indicator is reported as a computation
    /// failure. The stored outputs are not modified.
    pub fn evaluate_all(&self, snapshot: &GridSnapshot) -> EvaluationReport {
        let mut report = EvaluationReport::default();

        for (name, entry) in &self.entries {
            if let Indicator::Simple(indicator) = &entry.indicator {
                let result = guarded(|| indicator.compute(snapshot));
                record(&mut report, name, result);
            }
        }

        for (name, entry) in &self.entries {
            let Indicator::Composite(indicator) = &entry.indicator else {
                continue;
            };
            let mut inputs = DependencyOutputs::new();
            let mut missing = None;
            for dep in &entry.descriptor.dependencies {
                if let Some(output) = report.outputs.get(dep) {
                    inputs.insert(dep.clone(), output.clone());
                } else {
                    missing = Some(dep.clone());
                    break;
                }
            }
            if let Some(dependency) = missing {
                debug!(
                    indicator = %name,
                    dependency = %dependency,
                    "Skipping composite with failed dependency"
                );
                report.failures.push(IndicatorFailure {
                    name: name.clone(),
                    reason: FailureReason::FailedDependency { dependency },
                });
                continue;
            }
            let result = guarded(|| indicator.compose(snapshot, &inputs));
            record(&mut report, name, result);
        }

        debug!(
            table = %self.table,
            succeeded = report.outputs.len(),
            failed = report.failures.len(),
            "Evaluation pass complete"
        );
        report
    }

    /// Replace the stored outputs with those of an accepted pass.
    ///
    /// Outputs for names that are no longer registered are dropped.
    pub fn commit(&mut self, outputs: impl IntoIterator<Item = (String, IndicatorOutput)>) {
        self.last_outputs = outputs
            .into_iter()
            .filter(|(name, _)| self.entries.contains_key(name))
            .collect();
    }

    /// Stored outputs of the last accepted pass.
    pub const fn last_outputs(&self) -> &BTreeMap<String, IndicatorOutput> {
        &self.last_outputs
    }

    /// Stored outputs, optionally restricted to `selected` names.
    ///
    /// Registered indicators that have no accepted output yet are omitted.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::NotFound`] if a selected name is not
    /// registered.
    pub fn get_indicator_values(
        &self,
        selected: Option<&[&str]>,
    ) -> Result<BTreeMap<String, IndicatorOutput>, RegistryError> {
        let Some(selected) = selected else {
            return Ok(self.last_outputs.clone());
        };
        let mut values = BTreeMap::new();
        for name in selected {
            if !self.entries.contains_key(*name) {
                return Err(RegistryError::not_found(name));
            }
            if let Some(output) = self.last_outputs.get(*name) {
                values.insert((*name).to_owned(), output.clone());
            }
        }
        Ok(values)
    }

    /// Union of every registered indicator's snapshot requirements.
    pub fn requirements(&self) -> Requirements {
        self.entries
            .values()
            .fold(Requirements::NONE, |acc, e| acc.union(e.descriptor.requirements))
    }

    /// Descriptor of a registered indicator.
    pub fn descriptor(&self, name: &str) -> Option<&IndicatorDescriptor> {
        self.entries.get(name).map(|e| &e.descriptor)
    }

    /// Descriptors in registration order.
    pub fn descriptors(&self) -> impl Iterator<Item = &IndicatorDescriptor> {
        self.entries.values().map(|e| &e.descriptor)
    }

    /// Registered names in registration order.
    pub fn names(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Whether `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Number of registered indicators.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether no indicator is registered.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn record(
    report: &mut EvaluationReport,
    name: &str,
    result: Result<IndicatorOutput, ComputationError>,
) {
    match result {
        Ok(output) => {
            report.outputs.insert(name.to_owned(), output);
        }
        Err(err) => {
            warn!(indicator = %name, error = %err, "Indicator failed");
            report.failures.push(IndicatorFailure {
                name: name.to_owned(),
                reason: FailureReason::Computation(err),
            });
        }
    }
}

/// Run indicator code, turning a panic into a [`ComputationError`].
fn guarded(
    f: impl FnOnce() -> Result<IndicatorOutput, ComputationError>,
) -> Result<IndicatorOutput, ComputationError> {
    panic::catch_unwind(AssertUnwindSafe(f)).unwrap_or_else(|payload| {
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| (*s).to_owned())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic payload".to_owned());
        Err(ComputationError::new(format!("indicator panicked: {message}")))
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use gridsync_types::{Cell, CellId, GridHeader, GridMetadata};

    use super::*;
    use crate::indicator::{FnComposite, FnIndicator};

    fn constant(name: &str, key: &'static str, value: f64) -> Indicator {
        Indicator::simple(FnIndicator::new(name, move |_: &GridSnapshot| {
            Ok(IndicatorOutput::single(key, value))
        }))
    }

    fn failing(name: &str) -> Indicator {
        Indicator::simple(FnIndicator::new(name, |_: &GridSnapshot| {
            Err(ComputationError::new("boom"))
        }))
    }

    fn sum_of(name: &str, deps: &[&str]) -> Indicator {
        Indicator::composite(FnComposite::new(
            name,
            deps.iter().copied(),
            |inputs: &DependencyOutputs| {
                let total = inputs
                    .values()
                    .filter_map(IndicatorOutput::as_numeric)
                    .flat_map(|m| m.values())
                    .sum::<f64>();
                Ok(IndicatorOutput::single("total", total))
            },
        ))
    }

    fn snapshot() -> GridSnapshot {
        GridSnapshot::from_cells(
            GridMetadata::new("t", GridHeader::new(1, 2)),
            [
                (CellId::new(0, 0), Cell::of_type("Park")),
                (CellId::new(0, 1), Cell::of_type("Office")),
            ],
        )
        .unwrap()
    }

    #[test]
    fn duplicate_and_empty_names_rejected() {
        let mut registry = IndicatorRegistry::new("t");
        registry.register(constant("A", "score", 1.0)).unwrap();
        let err = registry.register(constant("A", "score", 2.0)).unwrap_err();
        assert!(matches!(err, RegistryError::Validation { .. }));
        let err = registry.register(constant("  ", "score", 2.0)).unwrap_err();
        assert!(matches!(err, RegistryError::Validation { .. }));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn composite_needs_registered_dependencies() {
        let mut registry = IndicatorRegistry::new("t");
        let err = registry.register(sum_of("B", &["A"])).unwrap_err();
        assert!(matches!(err, RegistryError::Validation { .. }));
        assert!(registry.is_empty());

        registry.register(constant("A", "score", 1.0)).unwrap();
        let descriptor = registry.register(sum_of("B", &["A", "A"])).unwrap();
        assert_eq!(descriptor.dependencies, vec!["A".to_owned()]);
        assert_eq!(descriptor.kind, IndicatorKind::Composite);
    }

    #[test]
    fn self_dependency_rejected_without_partial_state() {
        let mut registry = IndicatorRegistry::new("t");
        registry.register(constant("A", "score", 1.0)).unwrap();
        let err = registry.register(sum_of("C", &["A", "C"])).unwrap_err();
        assert!(matches!(err, RegistryError::Validation { ref name, .. } if name == "C"));
        assert_eq!(registry.names(), vec!["A".to_owned()]);
        assert!(registry.dependents_of("A").is_empty());
    }

    #[test]
    fn composite_without_dependencies_rejected() {
        let mut registry = IndicatorRegistry::new("t");
        let err = registry.register(sum_of("B", &[])).unwrap_err();
        assert!(matches!(err, RegistryError::Validation { .. }));
    }

    #[test]
    fn failing_setup_rejects_registration() {
        struct Picky;
        impl crate::indicator::SimpleIndicator for Picky {
            fn name(&self) -> &str {
                "picky"
            }
            fn setup(&mut self, ctx: &SetupContext<'_>) -> Result<(), ComputationError> {
                Err(ComputationError::new(format!("table {} unsupported", ctx.table)))
            }
            fn compute(&self, _: &GridSnapshot) -> Result<IndicatorOutput, ComputationError> {
                Ok(IndicatorOutput::single("v", 0.0))
            }
        }
        let mut registry = IndicatorRegistry::new("t");
        let err = registry.register(Indicator::simple(Picky)).unwrap_err();
        assert!(err.to_string().contains("table t unsupported"));
        assert!(registry.is_empty());
    }

    #[test]
    fn composite_receives_only_declared_dependencies() {
        let mut registry = IndicatorRegistry::new("t");
        registry.register(constant("A", "score", 5.0)).unwrap();
        registry.register(constant("Other", "x", 9.0)).unwrap();
        registry
            .register(Indicator::composite(FnComposite::new(
                "B",
                ["A"],
                |inputs: &DependencyOutputs| {
                    assert_eq!(inputs.len(), 1);
                    let score = inputs.get("A").and_then(|o| o.value("score")).unwrap_or(-1.0);
                    Ok(IndicatorOutput::single("doubled", score * 2.0))
                },
            )))
            .unwrap();

        let report = registry.evaluate_all(&snapshot());
        assert!(report.is_success());
        assert_eq!(report.outputs.get("B").unwrap().value("doubled"), Some(10.0));
    }

    #[test]
    fn failed_dependency_propagates() {
        let mut registry = IndicatorRegistry::new("t");
        registry.register(failing("A")).unwrap();
        registry.register(sum_of("B", &["A"])).unwrap();
        registry.register(sum_of("C", &["B"])).unwrap();
        registry.register(constant("D", "v", 1.0)).unwrap();

        let report = registry.evaluate_all(&snapshot());
        assert!(!report.is_success());
        let failed: Vec<&str> = report.failures.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(failed, vec!["A", "B", "C"]);
        assert!(matches!(
            report.failures.get(1).unwrap().reason,
            FailureReason::FailedDependency { ref dependency } if dependency == "A"
        ));
        assert!(report.outputs.contains_key("D"));
        assert!(report.failure_summary().contains("A: boom"));
    }

    #[test]
    fn panicking_indicator_reported_as_failure() {
        let mut registry = IndicatorRegistry::new("t");
        registry
            .register(Indicator::simple(FnIndicator::new(
                "P",
                |_: &GridSnapshot| -> Result<IndicatorOutput, ComputationError> {
                    panic!("kaboom")
                },
            )))
            .unwrap();
        let report = registry.evaluate_all(&snapshot());
        let failure = report.failures.first().unwrap();
        assert!(failure.to_string().contains("kaboom"));
    }

    #[test]
    fn evaluation_does_not_touch_stored_outputs() {
        let mut registry = IndicatorRegistry::new("t");
        registry.register(constant("A", "score", 1.0)).unwrap();
        let report = registry.evaluate_all(&snapshot());
        assert!(registry.last_outputs().is_empty());

        registry.commit(report.outputs);
        assert_eq!(registry.last_outputs().get("A").unwrap().value("score"), Some(1.0));
    }

    #[test]
    fn unregister_refuses_while_dependents_exist() {
        let mut registry = IndicatorRegistry::new("t");
        registry.register(constant("A", "score", 1.0)).unwrap();
        registry.register(sum_of("B", &["A"])).unwrap();

        let err = registry.unregister("A").unwrap_err();
        assert_eq!(
            err,
            RegistryError::Dependency {
                name: "A".to_owned(),
                dependents: vec!["B".to_owned()],
            }
        );
        assert_eq!(registry.len(), 2);

        registry.unregister("B").unwrap();
        registry.unregister("A").unwrap();
        assert!(registry.is_empty());
        assert!(matches!(registry.unregister("A"), Err(RegistryError::NotFound { .. })));
    }

    #[test]
    fn cascade_removes_transitive_dependents() {
        let mut registry = IndicatorRegistry::new("t");
        registry.register(constant("A", "score", 1.0)).unwrap();
        registry.register(constant("X", "score", 1.0)).unwrap();
        registry.register(sum_of("B", &["A"])).unwrap();
        registry.register(sum_of("C", &["B", "X"])).unwrap();
        registry.register(sum_of("D", &["X"])).unwrap();

        let removed = registry.unregister_cascade("A").unwrap();
        assert_eq!(removed, vec!["C".to_owned(), "B".to_owned(), "A".to_owned()]);
        assert_eq!(registry.names(), vec!["X".to_owned(), "D".to_owned()]);
    }

    #[test]
    fn values_selection_and_lookup() {
        let mut registry = IndicatorRegistry::new("t");
        registry.register(constant("A", "score", 1.0)).unwrap();
        registry.register(constant("B", "score", 2.0)).unwrap();
        registry.commit(registry.evaluate_all(&snapshot()).outputs);
        registry.register(constant("C", "score", 3.0)).unwrap();

        let all = registry.get_indicator_values(None).unwrap();
        assert_eq!(all.len(), 2);
        let some = registry.get_indicator_values(Some(&["B", "C"])).unwrap();
        assert_eq!(some.keys().collect::<Vec<_>>(), vec!["B"]);
        assert!(matches!(
            registry.get_indicator_values(Some(&["missing"])),
            Err(RegistryError::NotFound { .. })
        ));
    }

    #[test]
    fn commit_drops_unregistered_names() {
        let mut registry = IndicatorRegistry::new("t");
        registry.register(constant("A", "score", 1.0)).unwrap();
        let outputs = registry.evaluate_all(&snapshot()).outputs;
        registry.unregister("A").unwrap();
        registry.commit(outputs);
        assert!(registry.last_outputs().is_empty());
    }

    #[test]
    fn requirements_are_unioned() {
        let mut registry = IndicatorRegistry::new("t");
        registry
            .register(Indicator::simple(
                FnIndicator::new("geo", |_: &GridSnapshot| Ok(IndicatorOutput::single("v", 0.0)))
                    .with_requirements(Requirements::GEOMETRY),
            ))
            .unwrap();
        registry.register(constant("A", "score", 1.0)).unwrap();
        let req = registry.requirements();
        assert!(req.geometry);
        assert!(!req.type_definitions);
    }
}
