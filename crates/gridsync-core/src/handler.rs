//! The polling sync handler.
//!
//! A [`SyncHandler`] owns an [`IndicatorRegistry`] for one table and keeps
//! the table's published indicators in step with its grid. Each pass of the
//! background loop:
//!
//! 1. fetches a snapshot with the union of the registered requirements,
//! 2. compares its fingerprint with the last accepted one and stops there
//!    when nothing changed,
//! 3. evaluates every indicator against the snapshot,
//! 4. pushes each indicator's results and withdraws those of removed
//!    indicators,
//! 5. commits the snapshot, fingerprint and outputs as the new accepted
//!    state in one step.
//!
//! A failure in steps 1, 3 or 4 rolls the pass back: the accepted state is
//! left exactly as it was, indicators already pushed in the failed pass are
//! re-pushed with their previously accepted results, and the next poll sees
//! the same snapshot as changed again.
//!
//! # Concurrency
//!
//! Passes are serialized by an async mutex, so the background loop and a
//! foreground [`SyncHandler::poll_once`] never interleave. Accepted state,
//! registry and status live behind one lock that is never held across an
//! await. Readers therefore always observe a fully old or a fully new
//! accepted state. Stopping is cooperative: the loop checks its stop signal
//! before each fetch and while it sleeps, never in the middle of a pass.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use gridsync_types::{GridSnapshot, IndicatorOutput};
use indexmap::IndexMap;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{RegistryError, SyncError};
use crate::fingerprint::{ChangeDetector, Fingerprint};
use crate::indicator::{Indicator, IndicatorDescriptor};
use crate::package::{PushPayload, package};
use crate::registry::{EvaluationReport, IndicatorRegistry};
use crate::service::GridService;

/// Default delay between two polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Runtime settings of a [`SyncHandler`].
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerConfig {
    /// Delay between the end of one pass and the next fetch.
    pub poll_interval: Duration,
    /// Type given to lattice positions the service reports no cell for.
    /// `None` leaves such positions empty.
    pub empty_type: Option<String>,
    /// Reference values attached to published numeric records, by record
    /// name.
    pub reference: BTreeMap<String, f64>,
}

impl Default for HandlerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            empty_type: Some("None".to_owned()),
            reference: BTreeMap::new(),
        }
    }
}

/// Where the handler is in its polling cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerState {
    /// Created, loop never started.
    Idle,
    /// Fetching a snapshot.
    Polling,
    /// The last fetched snapshot matched the accepted one.
    Unchanged,
    /// Running indicators.
    Evaluating,
    /// Publishing results.
    Pushing,
    /// The last pass failed and was rolled back.
    RolledBack,
    /// The loop has exited.
    Stopped,
}

impl fmt::Display for HandlerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Idle => "idle",
            Self::Polling => "polling",
            Self::Unchanged => "unchanged",
            Self::Evaluating => "evaluating",
            Self::Pushing => "pushing",
            Self::RolledBack => "rolled_back",
            Self::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// The step of a pass that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Fetching the snapshot.
    Fetch,
    /// Evaluating indicators.
    Evaluate,
    /// Pushing results.
    Push,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Fetch => "fetch",
            Self::Evaluate => "evaluate",
            Self::Push => "push",
        })
    }
}

/// Why a pass was rolled back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncFailure {
    /// Failed step.
    pub stage: FailureStage,
    /// Indicator at fault, when one can be named.
    pub indicator: Option<String>,
    /// Description of the failure.
    pub message: String,
    /// When the pass failed.
    pub at: DateTime<Utc>,
}

impl SyncFailure {
    fn new(stage: FailureStage, indicator: Option<String>, message: String) -> Self {
        Self {
            stage,
            indicator,
            message,
            at: Utc::now(),
        }
    }
}

impl fmt::Display for SyncFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.indicator {
            Some(indicator) => write!(f, "{} failed ({indicator}): {}", self.stage, self.message),
            None => write!(f, "{} failed: {}", self.stage, self.message),
        }
    }
}

/// Result of one pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    /// The snapshot matched the accepted state; nothing was evaluated.
    Unchanged,
    /// A new state was evaluated, pushed and accepted.
    Committed {
        /// Version number of the new accepted state.
        version: u64,
        /// Its fingerprint.
        fingerprint: Fingerprint,
    },
    /// The pass failed and the accepted state was kept.
    RolledBack(SyncFailure),
}

/// Counters and last-known facts about the handler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerStatus {
    /// Current cycle state.
    pub state: HandlerState,
    /// Whether the background loop is running.
    pub running: bool,
    /// Passes started.
    pub polls: u64,
    /// Passes that were committed.
    pub passes_committed: u64,
    /// Passes that were rolled back.
    pub passes_rolled_back: u64,
    /// Rolled-back passes since the last commit.
    pub consecutive_failures: u32,
    /// The most recent failure, kept after later successes.
    pub last_error: Option<SyncFailure>,
    /// When the last pass started.
    pub last_poll_at: Option<DateTime<Utc>>,
    /// Version of the accepted state; 0 before the first commit.
    pub accepted_version: u64,
    /// Fingerprint of the accepted state.
    pub accepted_fingerprint: Option<Fingerprint>,
}

impl HandlerStatus {
    const fn new() -> Self {
        Self {
            state: HandlerState::Idle,
            running: false,
            polls: 0,
            passes_committed: 0,
            passes_rolled_back: 0,
            consecutive_failures: 0,
            last_error: None,
            last_poll_at: None,
            accepted_version: 0,
            accepted_fingerprint: None,
        }
    }
}

/// A consistent view of the accepted state.
#[derive(Debug, Clone)]
pub struct AcceptedState {
    /// The accepted snapshot.
    pub snapshot: Arc<GridSnapshot>,
    /// Its fingerprint.
    pub fingerprint: Fingerprint,
    /// Increments with every commit, starting at 1.
    pub version: u64,
    /// When it was accepted.
    pub accepted_at: DateTime<Utc>,
    /// Indicator outputs accepted with it.
    pub outputs: BTreeMap<String, IndicatorOutput>,
}

struct Accepted {
    snapshot: Arc<GridSnapshot>,
    fingerprint: Fingerprint,
    version: u64,
    accepted_at: DateTime<Utc>,
}

struct Shared {
    registry: IndicatorRegistry,
    detector: ChangeDetector,
    accepted: Option<Accepted>,
    /// Bumped by every registration change.
    generation: u64,
    /// Registry generation the accepted outputs were computed with.
    accepted_generation: u64,
    /// Removed indicators whose published results still have to be
    /// withdrawn. Drained only by a committed pass.
    withdrawals: BTreeMap<String, PushPayload>,
    status: HandlerStatus,
}

impl Shared {
    /// Empty payloads for every indicator that has accepted results.
    fn published_withdrawals(&self) -> BTreeMap<String, PushPayload> {
        self.registry
            .last_outputs()
            .iter()
            .map(|(name, output)| (name.clone(), PushPayload::withdrawal(output)))
            .collect()
    }

    /// Queue withdrawals for the `removed` names that had accepted results.
    fn queue_withdrawals(
        &mut self,
        mut published: BTreeMap<String, PushPayload>,
        removed: &[String],
    ) {
        for name in removed {
            if let Some(payload) = published.remove(name) {
                self.withdrawals.insert(name.clone(), payload);
            }
        }
    }
}

struct PlannedPush {
    indicator: String,
    payload: PushPayload,
    previous: PushPayload,
}

struct PassPlan {
    fingerprint: Fingerprint,
    generation: u64,
    outputs: IndexMap<String, IndicatorOutput>,
    withdrawals: Vec<(String, PushPayload)>,
    pushes: Vec<PlannedPush>,
}

struct Inner<S> {
    table: String,
    service: S,
    config: HandlerConfig,
    shared: RwLock<Shared>,
    pass_lock: tokio::sync::Mutex<()>,
}

struct LoopTask {
    stop_tx: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Keeps one table's indicators in sync with its grid.
pub struct SyncHandler<S: GridService> {
    inner: Arc<Inner<S>>,
    task: Mutex<Option<LoopTask>>,
}

impl<S: GridService> SyncHandler<S> {
    /// A stopped handler for `table` with no indicators.
    pub fn new(table: impl Into<String>, service: S, config: HandlerConfig) -> Self {
        let table = table.into();
        Self {
            inner: Arc::new(Inner {
                shared: RwLock::new(Shared {
                    registry: IndicatorRegistry::new(table.clone()),
                    detector: ChangeDetector::new(),
                    accepted: None,
                    generation: 0,
                    accepted_generation: 0,
                    withdrawals: BTreeMap::new(),
                    status: HandlerStatus::new(),
                }),
                table,
                service,
                config,
                pass_lock: tokio::sync::Mutex::new(()),
            }),
            task: Mutex::new(None),
        }
    }

    /// The table this handler serves.
    pub fn table(&self) -> &str {
        &self.inner.table
    }

    /// The backing service.
    pub fn service(&self) -> &S {
        &self.inner.service
    }

    /// The handler's settings.
    pub fn config(&self) -> &HandlerConfig {
        &self.inner.config
    }

    // -----------------------------------------------------------------------
    // Registry
    // -----------------------------------------------------------------------

    /// Register an indicator. The next poll evaluates it even if the grid
    /// has not changed.
    ///
    /// # Errors
    ///
    /// See [`IndicatorRegistry::register`].
    pub fn register(&self, indicator: Indicator) -> Result<IndicatorDescriptor, RegistryError> {
        let mut shared = self.inner.write();
        let descriptor = shared.registry.register(indicator)?;
        shared.withdrawals.remove(&descriptor.name);
        shared.generation = shared.generation.saturating_add(1);
        Ok(descriptor)
    }

    /// Remove an indicator nothing depends on. The next pass withdraws its
    /// published results.
    ///
    /// # Errors
    ///
    /// See [`IndicatorRegistry::unregister`].
    pub fn unregister(&self, name: &str) -> Result<(), RegistryError> {
        let mut shared = self.inner.write();
        let published = shared.published_withdrawals();
        shared.registry.unregister(name)?;
        shared.queue_withdrawals(published, &[name.to_owned()]);
        shared.generation = shared.generation.saturating_add(1);
        Ok(())
    }

    /// Remove an indicator and everything depending on it. The next pass
    /// withdraws the published results of every removed indicator.
    ///
    /// # Errors
    ///
    /// See [`IndicatorRegistry::unregister_cascade`].
    pub fn unregister_cascade(&self, name: &str) -> Result<Vec<String>, RegistryError> {
        let mut shared = self.inner.write();
        let published = shared.published_withdrawals();
        let removed = shared.registry.unregister_cascade(name)?;
        shared.queue_withdrawals(published, &removed);
        shared.generation = shared.generation.saturating_add(1);
        Ok(removed)
    }

    /// Registered indicator names in registration order.
    pub fn list_indicators(&self) -> Vec<String> {
        self.inner.read().registry.names()
    }

    /// Descriptors of the registered indicators.
    pub fn descriptors(&self) -> Vec<IndicatorDescriptor> {
        self.inner.read().registry.descriptors().cloned().collect()
    }

    /// Accepted indicator outputs, optionally restricted to `selected`.
    ///
    /// # Errors
    ///
    /// See [`IndicatorRegistry::get_indicator_values`].
    pub fn indicator_values(
        &self,
        selected: Option<&[&str]>,
    ) -> Result<BTreeMap<String, IndicatorOutput>, RegistryError> {
        self.inner.read().registry.get_indicator_values(selected)
    }

    // -----------------------------------------------------------------------
    // State
    // -----------------------------------------------------------------------

    /// The accepted snapshot together with the outputs accepted with it.
    pub fn accepted(&self) -> Option<AcceptedState> {
        let shared = self.inner.read();
        shared.accepted.as_ref().map(|a| AcceptedState {
            snapshot: Arc::clone(&a.snapshot),
            fingerprint: a.fingerprint,
            version: a.version,
            accepted_at: a.accepted_at,
            outputs: shared.registry.last_outputs().clone(),
        })
    }

    /// Current counters and state.
    pub fn status(&self) -> HandlerStatus {
        let mut status = self.inner.read().status.clone();
        status.running = self.is_running();
        status
    }

    /// Whether the background loop is running.
    pub fn is_running(&self) -> bool {
        self.lock_task()
            .as_ref()
            .is_some_and(|task| !task.handle.is_finished())
    }

    // -----------------------------------------------------------------------
    // Passes
    // -----------------------------------------------------------------------

    /// Run one pass now, waiting for any pass already in flight.
    pub async fn poll_once(&self) -> PollOutcome {
        self.inner.poll_once().await
    }

    /// Fetch and evaluate without pushing or accepting anything.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] if the fetch fails. Indicator
    /// failures are reported inside the returned report.
    pub async fn dry_run(&self) -> Result<EvaluationReport, SyncError> {
        let requirements = self.inner.read().registry.requirements();
        let snapshot = self
            .inner
            .service
            .fetch_snapshot(&self.inner.table, requirements)
            .await?;
        let snapshot = self.inner.prepare(snapshot);
        let report = self.inner.read().registry.evaluate_all(&snapshot);
        info!(
            table = %self.inner.table,
            succeeded = report.outputs.len(),
            failed = report.failures.len(),
            "Dry run complete"
        );
        Ok(report)
    }

    /// Withdraw everything published on the table and forget the accepted
    /// outputs. The next poll re-evaluates and republishes even if the grid
    /// has not changed.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Transport`] if the service refuses.
    pub async fn clear_remote(&self) -> Result<(), SyncError> {
        let _pass = self.inner.pass_lock.lock().await;
        self.inner.service.clear_results(&self.inner.table).await?;
        let mut shared = self.inner.write();
        shared.registry.commit(BTreeMap::new());
        shared.withdrawals.clear();
        shared.generation = shared.generation.saturating_add(1);
        info!(table = %self.inner.table, "Cleared published results");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Loop control
    // -----------------------------------------------------------------------

    /// Spawn the background polling loop. Does nothing if it is already
    /// running. If a stopped loop is still finishing its pass, the new loop
    /// waits for it to exit before its first fetch.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::NoRuntime`] when called outside a tokio runtime.
    pub fn start(&self) -> Result<(), SyncError> {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return Err(SyncError::NoRuntime);
        };
        let mut task = self.lock_task();
        let draining = match task.take() {
            Some(old) if !old.handle.is_finished() => {
                if !*old.stop_tx.borrow() {
                    *task = Some(old);
                    debug!(table = %self.inner.table, "Sync loop already running");
                    return Ok(());
                }
                Some(old.handle)
            }
            _ => None,
        };

        let (stop_tx, stop_rx) = watch::channel(false);
        let inner = Arc::clone(&self.inner);
        let handle = runtime.spawn(async move {
            if let Some(previous) = draining {
                if let Err(err) = previous.await {
                    warn!(
                        table = %inner.table,
                        error = %err,
                        "Previous sync loop ended abnormally"
                    );
                }
            }
            run_loop(inner, stop_rx).await;
        });
        *task = Some(LoopTask { stop_tx, handle });
        self.inner.set_state(HandlerState::Polling);
        Ok(())
    }

    /// Ask the loop to exit. A pass in flight runs to completion first.
    pub fn stop(&self) {
        if let Some(task) = self.lock_task().as_ref() {
            task.stop_tx.send_replace(true);
            debug!(table = %self.inner.table, "Stop requested");
        }
    }

    /// Wait for the loop to exit. Returns at once if it is not running.
    /// Call [`stop`](Self::stop) first or this waits indefinitely.
    pub async fn join(&self) {
        let task = self.lock_task().take();
        if let Some(task) = task {
            if let Err(err) = task.handle.await {
                warn!(table = %self.inner.table, error = %err, "Sync loop ended abnormally");
            }
        }
    }

    /// Stop the loop and wait for it to exit.
    pub async fn shutdown(&self) {
        self.stop();
        self.join().await;
    }

    fn lock_task(&self) -> MutexGuard<'_, Option<LoopTask>> {
        self.task.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<S: GridService> Drop for SyncHandler<S> {
    fn drop(&mut self) {
        let task = self.task.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = task.as_ref() {
            task.stop_tx.send_replace(true);
        }
    }
}

impl<S: GridService> fmt::Debug for SyncHandler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SyncHandler")
            .field("table", &self.inner.table)
            .field("config", &self.inner.config)
            .finish_non_exhaustive()
    }
}

async fn run_loop<S: GridService>(inner: Arc<Inner<S>>, mut stop_rx: watch::Receiver<bool>) {
    inner.set_state(HandlerState::Polling);
    info!(
        table = %inner.table,
        interval_ms = u64::try_from(inner.config.poll_interval.as_millis()).unwrap_or(u64::MAX),
        "Sync loop started"
    );
    loop {
        if *stop_rx.borrow_and_update() {
            break;
        }
        inner.poll_once().await;
        tokio::select! {
            () = tokio::time::sleep(inner.config.poll_interval) => {}
            changed = stop_rx.changed() => {
                if changed.is_err() {
                    break;
                }
            }
        }
    }
    inner.write().status.state = HandlerState::Stopped;
    info!(table = %inner.table, "Sync loop stopped");
}

impl<S: GridService> Inner<S> {
    fn read(&self) -> RwLockReadGuard<'_, Shared> {
        self.shared.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Shared> {
        self.shared.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: HandlerState) {
        self.write().status.state = state;
    }

    fn prepare(&self, snapshot: GridSnapshot) -> GridSnapshot {
        let Some(empty_type) = &self.config.empty_type else {
            return snapshot;
        };
        let (snapshot, filled) = snapshot.fill_missing(empty_type);
        if filled > 0 {
            debug!(table = %self.table, filled, "Filled empty lattice positions");
        }
        snapshot
    }

    async fn poll_once(&self) -> PollOutcome {
        let _pass = self.pass_lock.lock().await;

        let requirements = {
            let mut shared = self.write();
            shared.status.state = HandlerState::Polling;
            shared.status.polls = shared.status.polls.saturating_add(1);
            shared.status.last_poll_at = Some(Utc::now());
            shared.registry.requirements()
        };

        let snapshot = match self.service.fetch_snapshot(&self.table, requirements).await {
            Ok(snapshot) => self.prepare(snapshot),
            Err(err) => {
                return self.roll_back(SyncFailure::new(FailureStage::Fetch, None, err.to_string()));
            }
        };

        let plan = match self.plan(&snapshot) {
            Ok(Some(plan)) => plan,
            Ok(None) => return PollOutcome::Unchanged,
            Err(failure) => return self.roll_back(failure),
        };

        self.set_state(HandlerState::Pushing);
        if let Err(failure) = self.push_all(&plan).await {
            return self.roll_back(failure);
        }

        self.commit(snapshot, plan)
    }

    /// Decide whether `snapshot` needs a pass and, if so, evaluate it.
    fn plan(&self, snapshot: &GridSnapshot) -> Result<Option<PassPlan>, SyncFailure> {
        let observation = self.read().detector.observe(snapshot);
        let fingerprint = observation.fingerprint;
        {
            let mut shared = self.write();
            if !observation.changed && shared.generation == shared.accepted_generation {
                shared.status.state = HandlerState::Unchanged;
                debug!(
                    table = %self.table,
                    fingerprint = %fingerprint.short(),
                    "Snapshot unchanged"
                );
                return Ok(None);
            }
            shared.status.state = HandlerState::Evaluating;
        }

        let shared = self.read();
        let report = shared.registry.evaluate_all(snapshot);
        if !report.is_success() {
            let indicator = report.failures.first().map(|f| f.name.clone());
            return Err(SyncFailure::new(
                FailureStage::Evaluate,
                indicator,
                report.failure_summary(),
            ));
        }

        let previous = shared.registry.last_outputs();
        let pushes = report
            .outputs
            .iter()
            .filter_map(|(name, output)| {
                let descriptor = shared.registry.descriptor(name)?;
                let payload = package(name, descriptor.viz_type, output, &self.config.reference);
                let previous = previous.get(name).map_or_else(
                    || payload.cleared(),
                    |old| package(name, descriptor.viz_type, old, &self.config.reference),
                );
                Some(PlannedPush {
                    indicator: name.clone(),
                    payload,
                    previous,
                })
            })
            .collect();

        let withdrawals = shared
            .withdrawals
            .iter()
            .map(|(name, payload)| (name.clone(), payload.clone()))
            .collect();

        Ok(Some(PassPlan {
            fingerprint,
            generation: shared.generation,
            outputs: report.outputs,
            withdrawals,
            pushes,
        }))
    }

    async fn push_all(&self, plan: &PassPlan) -> Result<(), SyncFailure> {
        for (indicator, payload) in &plan.withdrawals {
            if let Err(err) = self.service.push_results(&self.table, indicator, payload).await {
                return Err(SyncFailure::new(
                    FailureStage::Push,
                    Some(indicator.clone()),
                    err.to_string(),
                ));
            }
            debug!(table = %self.table, indicator = %indicator, "Withdrew removed indicator");
        }

        let mut pushed: Vec<&PlannedPush> = Vec::with_capacity(plan.pushes.len());
        for push in &plan.pushes {
            match self
                .service
                .push_results(&self.table, &push.indicator, &push.payload)
                .await
            {
                Ok(()) => pushed.push(push),
                Err(err) => {
                    self.compensate(&pushed).await;
                    return Err(SyncFailure::new(
                        FailureStage::Push,
                        Some(push.indicator.clone()),
                        err.to_string(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Best-effort restore of results already pushed in a failed pass.
    async fn compensate(&self, pushed: &[&PlannedPush]) {
        for push in pushed.iter().rev() {
            match self
                .service
                .push_results(&self.table, &push.indicator, &push.previous)
                .await
            {
                Ok(()) => debug!(
                    table = %self.table,
                    indicator = %push.indicator,
                    "Restored previous results"
                ),
                Err(err) => warn!(
                    table = %self.table,
                    indicator = %push.indicator,
                    error = %err,
                    "Could not restore previous results"
                ),
            }
        }
    }

    fn commit(&self, snapshot: GridSnapshot, plan: PassPlan) -> PollOutcome {
        let mut guard = self.write();
        let shared = &mut *guard;
        let version = shared
            .accepted
            .as_ref()
            .map_or(1, |a| a.version.saturating_add(1));
        let count = plan.outputs.len();
        shared.registry.commit(plan.outputs);
        shared.detector.accept(plan.fingerprint);
        shared.accepted_generation = plan.generation;
        for (name, _) in &plan.withdrawals {
            shared.withdrawals.remove(name);
        }
        shared.accepted = Some(Accepted {
            snapshot: Arc::new(snapshot),
            fingerprint: plan.fingerprint,
            version,
            accepted_at: Utc::now(),
        });
        let status = &mut shared.status;
        status.state = HandlerState::Polling;
        status.passes_committed = status.passes_committed.saturating_add(1);
        status.consecutive_failures = 0;
        status.accepted_version = version;
        status.accepted_fingerprint = Some(plan.fingerprint);
        info!(
            table = %self.table,
            version,
            fingerprint = %plan.fingerprint.short(),
            indicators = count,
            "Pass committed"
        );
        PollOutcome::Committed {
            version,
            fingerprint: plan.fingerprint,
        }
    }

    fn roll_back(&self, failure: SyncFailure) -> PollOutcome {
        let mut guard = self.write();
        let shared = &mut *guard;
        let previous = shared.accepted.as_ref().map(|a| a.fingerprint);
        shared.detector.restore(previous);
        let status = &mut shared.status;
        status.state = HandlerState::RolledBack;
        status.passes_rolled_back = status.passes_rolled_back.saturating_add(1);
        status.consecutive_failures = status.consecutive_failures.saturating_add(1);
        status.last_error = Some(failure.clone());
        warn!(
            table = %self.table,
            stage = %failure.stage,
            indicator = ?failure.indicator,
            error = %failure.message,
            consecutive = status.consecutive_failures,
            "Pass rolled back"
        );
        PollOutcome::RolledBack(failure)
    }
}
