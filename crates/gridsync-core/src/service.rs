//! The remote table service seam.
//!
//! [`GridService`] abstracts the table backend the handler polls and pushes
//! to. The HTTP client lives in its own crate; [`MemoryGridService`] keeps a
//! table in memory and lets tests (and local demos) play the part of a user
//! editing the grid, or of a flaky network.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use gridsync_types::{Cell, CellId, GridSnapshot, SnapshotError};
use rand::Rng;
use rand::seq::{IndexedRandom, SliceRandom};
use tracing::debug;

use crate::error::TransportError;
use crate::indicator::Requirements;
use crate::package::PushPayload;

/// A backend that serves grid snapshots and accepts indicator results.
pub trait GridService: Send + Sync + 'static {
    /// Fetch the current state of `table`, including the side tables
    /// `requirements` asks for.
    fn fetch_snapshot(
        &self,
        table: &str,
        requirements: Requirements,
    ) -> impl Future<Output = Result<GridSnapshot, TransportError>> + Send;

    /// Publish one indicator's results, replacing what it published before.
    fn push_results(
        &self,
        table: &str,
        indicator: &str,
        payload: &PushPayload,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Withdraw every published result on `table`.
    fn clear_results(
        &self,
        table: &str,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;
}

/// Errors from editing a table held by [`MemoryGridService`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MemoryServiceError {
    /// No grid has been loaded for the table.
    #[error("unknown table {0:?}")]
    UnknownTable(String),

    /// The edit does not fit the grid.
    #[error(transparent)]
    Snapshot {
        /// The underlying snapshot error.
        #[from]
        source: SnapshotError,
    },
}

/// A successful push as seen by [`MemoryGridService`].
#[derive(Debug, Clone, PartialEq)]
pub struct PushRecord {
    /// Target table.
    pub table: String,
    /// Indicator that pushed.
    pub indicator: String,
    /// What was pushed.
    pub payload: PushPayload,
}

#[derive(Debug, Default)]
struct MemoryState {
    grids: BTreeMap<String, GridSnapshot>,
    revisions: BTreeMap<String, u64>,
    published: BTreeMap<String, BTreeMap<String, PushPayload>>,
    pushes: Vec<PushRecord>,
    fetches: u64,
    fetch_failures: u32,
    push_failures: BTreeMap<String, u32>,
    fetch_delay: Option<Duration>,
}

/// An in-memory [`GridService`].
#[derive(Debug, Default)]
pub struct MemoryGridService {
    state: Mutex<MemoryState>,
}

impl MemoryGridService {
    /// A service with no tables.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style [`insert_grid`](Self::insert_grid).
    #[must_use]
    pub fn with_grid(self, grid: GridSnapshot) -> Self {
        self.insert_grid(grid);
        self
    }

    /// Load or replace the grid served for `grid.table()`.
    pub fn insert_grid(&self, grid: GridSnapshot) {
        let mut state = self.lock();
        let table = grid.table().to_owned();
        bump(&mut state.revisions, &table);
        state.grids.insert(table, grid);
    }

    /// Replace one cell, as a user placing a brick would.
    pub fn set_cell(&self, table: &str, id: CellId, cell: Cell) -> Result<(), MemoryServiceError> {
        let mut state = self.lock();
        let grid = state
            .grids
            .get_mut(table)
            .ok_or_else(|| MemoryServiceError::UnknownTable(table.to_owned()))?;
        grid.set_cell(id, cell)?;
        bump(&mut state.revisions, table);
        Ok(())
    }

    /// Change the type of one cell, keeping its other properties.
    pub fn flip_cell(
        &self,
        table: &str,
        id: CellId,
        type_name: &str,
    ) -> Result<(), MemoryServiceError> {
        let mut state = self.lock();
        let grid = state
            .grids
            .get_mut(table)
            .ok_or_else(|| MemoryServiceError::UnknownTable(table.to_owned()))?;
        let mut cell = grid
            .cell(id)
            .cloned()
            .unwrap_or_else(|| Cell::of_type(type_name));
        type_name.clone_into(&mut cell.type_name);
        grid.set_cell(id, cell)?;
        bump(&mut state.revisions, table);
        Ok(())
    }

    /// Give a random cell a random type out of `types`.
    ///
    /// Returns the cell that was changed, or `None` when the grid is empty
    /// or `types` is.
    pub fn flip_random(
        &self,
        table: &str,
        types: &[&str],
        rng: &mut impl Rng,
    ) -> Result<Option<CellId>, MemoryServiceError> {
        let mut state = self.lock();
        let grid = state
            .grids
            .get_mut(table)
            .ok_or_else(|| MemoryServiceError::UnknownTable(table.to_owned()))?;
        let ids: Vec<CellId> = grid.cells().map(|(id, _)| *id).collect();
        let (Some(id), Some(new_type)) = (ids.choose(rng), types.choose(rng)) else {
            return Ok(None);
        };
        let id = *id;
        if let Some((_, cell)) = grid.cells_mut().find(|(cell_id, _)| **cell_id == id) {
            (*new_type).clone_into(&mut cell.type_name);
        }
        bump(&mut state.revisions, table);
        debug!(table, cell = %id, new_type, "Flipped random cell");
        Ok(Some(id))
    }

    /// Randomly permute cell types across the grid, keeping every other
    /// cell property in place.
    pub fn shuffle_types(&self, table: &str, rng: &mut impl Rng) -> Result<(), MemoryServiceError> {
        let mut state = self.lock();
        let grid = state
            .grids
            .get_mut(table)
            .ok_or_else(|| MemoryServiceError::UnknownTable(table.to_owned()))?;
        let mut types: Vec<String> = grid.cells().map(|(_, c)| c.type_name.clone()).collect();
        types.shuffle(rng);
        for ((_, cell), type_name) in grid.cells_mut().zip(types) {
            cell.type_name = type_name;
        }
        bump(&mut state.revisions, table);
        Ok(())
    }

    /// Make the next `count` fetches fail.
    pub fn fail_next_fetches(&self, count: u32) {
        self.lock().fetch_failures = count;
    }

    /// Make the next `count` pushes of `indicator` fail.
    pub fn fail_next_pushes(&self, indicator: &str, count: u32) {
        self.lock().push_failures.insert(indicator.to_owned(), count);
    }

    /// Delay every fetch by `delay`, or remove the delay.
    pub fn set_fetch_delay(&self, delay: Option<Duration>) {
        self.lock().fetch_delay = delay;
    }

    /// Number of fetches started so far.
    pub fn fetch_count(&self) -> u64 {
        self.lock().fetches
    }

    /// Every successful push so far, in order.
    pub fn pushes(&self) -> Vec<PushRecord> {
        self.lock().pushes.clone()
    }

    /// What each indicator currently has published on `table`. An
    /// indicator whose last push was empty is absent.
    pub fn published(&self, table: &str) -> BTreeMap<String, PushPayload> {
        self.lock().published.get(table).cloned().unwrap_or_default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn bump(revisions: &mut BTreeMap<String, u64>, table: &str) {
    let revision = revisions.entry(table.to_owned()).or_insert(0);
    *revision = revision.saturating_add(1);
}

fn take_one(counter: &mut u32) -> bool {
    if *counter == 0 {
        return false;
    }
    *counter = counter.saturating_sub(1);
    true
}

impl GridService for MemoryGridService {
    async fn fetch_snapshot(
        &self,
        table: &str,
        requirements: Requirements,
    ) -> Result<GridSnapshot, TransportError> {
        let delay = {
            let mut state = self.lock();
            state.fetches = state.fetches.saturating_add(1);
            state.fetch_delay
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.lock();
        if take_one(&mut state.fetch_failures) {
            return Err(TransportError::Unavailable(format!("injected fetch failure for {table}")));
        }
        let grid = state.grids.get(table).ok_or_else(|| TransportError::Status {
            url: format!("memory://{table}"),
            status: 404,
        })?;
        let mut snapshot = grid.clone();
        snapshot.metadata.fetched_at = Utc::now();
        snapshot.metadata.server_hash = state.revisions.get(table).map(|r| format!("rev-{r}"));
        if !requirements.geometry {
            snapshot.geometry = None;
        }
        if !requirements.type_definitions {
            snapshot.type_definitions = None;
        }
        Ok(snapshot)
    }

    async fn push_results(
        &self,
        table: &str,
        indicator: &str,
        payload: &PushPayload,
    ) -> Result<(), TransportError> {
        let mut state = self.lock();
        if !state.grids.contains_key(table) {
            return Err(TransportError::Status {
                url: format!("memory://{table}/{indicator}"),
                status: 404,
            });
        }
        if state.push_failures.get_mut(indicator).is_some_and(take_one) {
            return Err(TransportError::Unavailable(format!(
                "injected push failure for {indicator}"
            )));
        }
        let published = state.published.entry(table.to_owned()).or_default();
        if payload.is_empty() {
            published.remove(indicator);
        } else {
            published.insert(indicator.to_owned(), payload.clone());
        }
        state.pushes.push(PushRecord {
            table: table.to_owned(),
            indicator: indicator.to_owned(),
            payload: payload.clone(),
        });
        Ok(())
    }

    async fn clear_results(&self, table: &str) -> Result<(), TransportError> {
        self.lock().published.remove(table);
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use gridsync_types::{CellGeometry, GridHeader, GridMetadata, IndicatorOutput, VizType};
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    use super::*;
    use crate::package::package;

    fn grid() -> GridSnapshot {
        let mut geometry = BTreeMap::new();
        geometry.insert(CellId::new(0, 0), CellGeometry { ring: vec![[0.0, 0.0]] });
        GridSnapshot::from_cells(
            GridMetadata::new("demo", GridHeader::new(2, 2)),
            [
                (CellId::new(0, 0), Cell::of_type("Park")),
                (CellId::new(0, 1), Cell::of_type("Office")),
                (CellId::new(1, 0), Cell::of_type("Residential")),
                (CellId::new(1, 1), Cell::of_type("Park")),
            ],
        )
        .unwrap()
        .with_geometry(geometry)
    }

    fn payload(value: f64) -> PushPayload {
        package("A", VizType::Radar, &IndicatorOutput::single("score", value), &BTreeMap::new())
    }

    #[tokio::test]
    async fn fetch_strips_unrequested_side_tables() {
        let service = MemoryGridService::new().with_grid(grid());
        let plain = service.fetch_snapshot("demo", Requirements::NONE).await.unwrap();
        assert!(plain.geometry.is_none());
        let with_geo = service.fetch_snapshot("demo", Requirements::GEOMETRY).await.unwrap();
        assert!(with_geo.geometry.is_some());
        assert_eq!(service.fetch_count(), 2);
    }

    #[tokio::test]
    async fn unknown_table_is_not_found() {
        let service = MemoryGridService::new();
        let err = service.fetch_snapshot("nope", Requirements::NONE).await.unwrap_err();
        assert!(matches!(err, TransportError::Status { status: 404, .. }));
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let service = MemoryGridService::new().with_grid(grid());
        service.fail_next_fetches(1);
        assert!(service.fetch_snapshot("demo", Requirements::NONE).await.is_err());
        assert!(service.fetch_snapshot("demo", Requirements::NONE).await.is_ok());

        service.fail_next_pushes("A", 1);
        assert!(service.push_results("demo", "A", &payload(1.0)).await.is_err());
        assert!(service.pushes().is_empty());
        service.push_results("demo", "A", &payload(2.0)).await.unwrap();
        assert_eq!(service.published("demo").get("A"), Some(&payload(2.0)));
    }

    #[tokio::test]
    async fn edits_show_up_in_next_fetch() {
        let service = MemoryGridService::new().with_grid(grid());
        let before = service.fetch_snapshot("demo", Requirements::NONE).await.unwrap();
        service.flip_cell("demo", CellId::new(0, 1), "Park").unwrap();
        let after = service.fetch_snapshot("demo", Requirements::NONE).await.unwrap();
        assert_eq!(after.cell(CellId::new(0, 1)).unwrap().type_name, "Park");
        assert_ne!(before.metadata.server_hash, after.metadata.server_hash);
        assert!(matches!(
            service.set_cell("demo", CellId::new(5, 5), Cell::of_type("X")),
            Err(MemoryServiceError::Snapshot { .. })
        ));
        assert!(matches!(
            service.flip_cell("other", CellId::new(0, 0), "X"),
            Err(MemoryServiceError::UnknownTable(_))
        ));
    }

    #[tokio::test]
    async fn shuffle_preserves_type_counts() {
        let service = MemoryGridService::new().with_grid(grid());
        let mut rng = StdRng::seed_from_u64(7);
        service.shuffle_types("demo", &mut rng).unwrap();
        let flipped = service.flip_random("demo", &["Industrial"], &mut rng).unwrap();
        assert!(flipped.is_some());

        let snapshot = service.fetch_snapshot("demo", Requirements::NONE).await.unwrap();
        assert_eq!(snapshot.len(), 4);
        assert_eq!(snapshot.type_counts().get("Industrial"), Some(&1));
    }

    #[tokio::test]
    async fn empty_push_withdraws_the_indicator() {
        let service = MemoryGridService::new().with_grid(grid());
        service.push_results("demo", "A", &payload(1.0)).await.unwrap();
        service.push_results("demo", "B", &payload(2.0)).await.unwrap();
        service
            .push_results("demo", "A", &payload(1.0).cleared())
            .await
            .unwrap();
        let published = service.published("demo");
        assert!(!published.contains_key("A"));
        assert!(published.contains_key("B"));
        assert_eq!(service.pushes().len(), 3);
    }

    #[tokio::test]
    async fn clear_withdraws_everything() {
        let service = MemoryGridService::new().with_grid(grid());
        service.push_results("demo", "A", &payload(1.0)).await.unwrap();
        service.clear_results("demo").await.unwrap();
        assert!(service.published("demo").is_empty());
    }
}
