//! HTTP client for the cityIO table service.
//!
//! Reads go to `{base}api/table/{table}/{var}` and writes to
//! `{base}api/table/update/{table}/{var}`. The service stores the numeric
//! indicator list and the access layer as whole documents, so the client
//! remembers what each indicator last published on each table and posts
//! the merged document on every push.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use gridsync_core::config::{RemoteConfig, SnapshotConfig};
use gridsync_core::error::TransportError;
use gridsync_core::indicator::Requirements;
use gridsync_core::package::PushPayload;
use gridsync_core::service::GridService;
use gridsync_types::{GridSnapshot, HeatmapLayer, IndicatorRecord};
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::access::{decode_access, encode_access};
use crate::decode::{GeoGrid, decode_geogrid, decode_hash};

/// Variable holding the numeric indicator list.
pub const INDICATORS_VAR: &str = "indicators";

/// Variable holding the access/heatmap feature collection.
pub const ACCESS_VAR: &str = "access";

/// What the client has published on one table.
#[derive(Debug, Clone, Default)]
struct Published {
    numeric: BTreeMap<String, Vec<IndicatorRecord>>,
    heatmaps: BTreeMap<String, HeatmapLayer>,
}

/// A [`GridService`] backed by a cityIO server.
#[derive(Debug)]
pub struct CityIoClient {
    http: reqwest::Client,
    base_url: String,
    attempts: u32,
    retry_delay: Duration,
    front_end_template: String,
    grid_data_var: String,
    geometry_var: String,
    geogrids: Mutex<BTreeMap<String, Arc<GeoGrid>>>,
    published: Mutex<BTreeMap<String, Published>>,
}

impl CityIoClient {
    /// Build a client from the connection and snapshot settings.
    ///
    /// # Errors
    ///
    /// Returns [`TransportError::Request`] if the HTTP client cannot be
    /// constructed.
    pub fn new(remote: &RemoteConfig, snapshot: &SnapshotConfig) -> Result<Self, TransportError> {
        let base_url = remote.base_url();
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(remote.request_timeout_ms))
            .build()
            .map_err(|e| TransportError::Request {
                url: base_url.clone(),
                message: format!("HTTP client setup failed: {e}"),
            })?;

        Ok(Self {
            http,
            base_url,
            attempts: remote.attempts.max(1),
            retry_delay: Duration::from_millis(remote.retry_delay_ms),
            front_end_template: remote.front_end_url.clone(),
            grid_data_var: snapshot.grid_data_var.clone(),
            geometry_var: snapshot.geometry_var.clone(),
            geogrids: Mutex::new(BTreeMap::new()),
            published: Mutex::new(BTreeMap::new()),
        })
    }

    /// Base URL of the service, ending in `/`.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Where a person can look at `table` in a browser.
    pub fn front_end_url(&self, table: &str) -> String {
        self.front_end_template.replace("{table}", table)
    }

    /// URL for reading `var` of `table`.
    pub fn get_url(&self, table: &str, var: &str) -> String {
        format!("{}api/table/{table}/{var}", self.base_url)
    }

    /// URL for writing `var` of `table`.
    pub fn post_url(&self, table: &str, var: &str) -> String {
        format!("{}api/table/update/{table}/{var}", self.base_url)
    }

    // -----------------------------------------------------------------------
    // Reads
    // -----------------------------------------------------------------------

    /// The static grid description of `table`, fetched once and cached.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the document cannot be fetched or
    /// decoded.
    pub async fn geogrid(&self, table: &str) -> Result<Arc<GeoGrid>, TransportError> {
        if let Some(cached) = self.geogrids().get(table) {
            return Ok(Arc::clone(cached));
        }
        let document = self
            .get_json(&self.get_url(table, &self.geometry_var))
            .await?;
        let geogrid = Arc::new(decode_geogrid(&document)?);
        info!(
            table = %table,
            nrows = geogrid.header.nrows,
            ncols = geogrid.header.ncols,
            types = geogrid.types.len(),
            "Grid description loaded"
        );
        self.geogrids()
            .insert(table.to_owned(), Arc::clone(&geogrid));
        Ok(geogrid)
    }

    /// Drop the cached grid description so the next fetch reloads it.
    pub fn invalidate_geogrid(&self, table: &str) {
        self.geogrids().remove(table);
    }

    /// The server's hash of the cell list, if it publishes one.
    ///
    /// A single try; failures are logged and yield `None`.
    pub async fn grid_hash(&self, table: &str) -> Option<String> {
        let url = self.get_url(table, "meta/hashes");
        match self.get_once(&url).await {
            Ok(document) => decode_hash(&document, &self.grid_data_var),
            Err(e) => {
                debug!(table = %table, error = %e, "Hash lookup failed");
                None
            }
        }
    }

    /// The numeric indicator list currently stored on `table`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the list cannot be fetched or has
    /// the wrong shape.
    pub async fn current_indicators(
        &self,
        table: &str,
    ) -> Result<Vec<IndicatorRecord>, TransportError> {
        let document = self.get_json(&self.get_url(table, INDICATORS_VAR)).await?;
        if document.is_null() {
            return Ok(Vec::new());
        }
        serde_json::from_value(document)
            .map_err(|e| TransportError::Malformed(format!("indicator list: {e}")))
    }

    /// The access layer currently stored on `table`.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] if the document cannot be fetched or
    /// decoded.
    pub async fn current_access(&self, table: &str) -> Result<HeatmapLayer, TransportError> {
        let document = self.get_json(&self.get_url(table, ACCESS_VAR)).await?;
        Ok(decode_access(&document)?)
    }

    // -----------------------------------------------------------------------
    // HTTP plumbing
    // -----------------------------------------------------------------------

    /// GET with retries. Client errors (4xx) are returned without retrying.
    async fn get_json(&self, url: &str) -> Result<Value, TransportError> {
        let mut attempt = 1;
        loop {
            match self.get_once(url).await {
                Ok(document) => return Ok(document),
                Err(e) if attempt >= self.attempts || is_client_error(&e) => return Err(e),
                Err(e) => {
                    warn!(
                        url = %url,
                        attempt,
                        attempts = self.attempts,
                        error = %e,
                        "GET failed, retrying"
                    );
                    attempt = attempt.saturating_add(1);
                    tokio::time::sleep(self.retry_delay).await;
                }
            }
        }
    }

    async fn get_once(&self, url: &str) -> Result<Value, TransportError> {
        debug!(url = %url, "GET");
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }

        response
            .json()
            .await
            .map_err(|e| TransportError::Malformed(format!("{url}: {e}")))
    }

    async fn post_json(&self, url: &str, body: &impl Serialize) -> Result<(), TransportError> {
        debug!(url = %url, "POST");
        let response = self
            .http
            .post(url)
            .json(body)
            .send()
            .await
            .map_err(|e| request_error(url, &e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_owned(),
                status: status.as_u16(),
            });
        }
        Ok(())
    }

    fn geogrids(&self) -> MutexGuard<'_, BTreeMap<String, Arc<GeoGrid>>> {
        self.geogrids.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn published_for(&self, table: &str) -> Published {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(table)
            .cloned()
            .unwrap_or_default()
    }

    fn store_published(&self, table: &str, published: Published) {
        self.published
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_owned(), published);
    }
}

impl GridService for CityIoClient {
    async fn fetch_snapshot(
        &self,
        table: &str,
        requirements: Requirements,
    ) -> Result<GridSnapshot, TransportError> {
        let geogrid = self.geogrid(table).await?;
        let cells = self
            .get_json(&self.get_url(table, &self.grid_data_var))
            .await?;

        let mut snapshot = match geogrid.snapshot(table, &cells, requirements) {
            Ok(snapshot) => snapshot,
            Err(e) => {
                // The table may have been reshaped since the description
                // was cached.
                self.invalidate_geogrid(table);
                return Err(e.into());
            }
        };
        snapshot.metadata.server_hash = self.grid_hash(table).await;
        Ok(snapshot)
    }

    async fn push_results(
        &self,
        table: &str,
        indicator: &str,
        payload: &PushPayload,
    ) -> Result<(), TransportError> {
        let mut published = self.published_for(table);
        match payload {
            PushPayload::Numeric(records) => {
                if records.is_empty() {
                    published.numeric.remove(indicator);
                } else {
                    published
                        .numeric
                        .insert(indicator.to_owned(), records.clone());
                }
                let merged: Vec<&IndicatorRecord> =
                    published.numeric.values().flatten().collect();
                self.post_json(&self.post_url(table, INDICATORS_VAR), &merged)
                    .await?;
            }
            PushPayload::Heatmap(layer) => {
                if layer.is_empty() {
                    published.heatmaps.remove(indicator);
                } else {
                    published
                        .heatmaps
                        .insert(indicator.to_owned(), layer.clone());
                }
                let merged = HeatmapLayer::merge(published.heatmaps.values());
                self.post_json(&self.post_url(table, ACCESS_VAR), &encode_access(&merged))
                    .await?;
            }
        }
        self.store_published(table, published);
        debug!(table = %table, indicator = %indicator, "Results pushed");
        Ok(())
    }

    async fn clear_results(&self, table: &str) -> Result<(), TransportError> {
        let no_records: Vec<IndicatorRecord> = Vec::new();
        self.post_json(&self.post_url(table, INDICATORS_VAR), &no_records)
            .await?;
        self.post_json(
            &self.post_url(table, ACCESS_VAR),
            &encode_access(&HeatmapLayer::default()),
        )
        .await?;
        self.store_published(table, Published::default());
        info!(table = %table, "Published results cleared");
        Ok(())
    }
}

fn request_error(url: &str, err: &reqwest::Error) -> TransportError {
    TransportError::Request {
        url: url.to_owned(),
        message: err.to_string(),
    }
}

const fn is_client_error(err: &TransportError) -> bool {
    matches!(err, TransportError::Status { status: 400..=499, .. })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn client(host: &str) -> CityIoClient {
        let remote = RemoteConfig {
            host: Some(host.to_owned()),
            ..RemoteConfig::default()
        };
        CityIoClient::new(&remote, &SnapshotConfig::default()).unwrap()
    }

    #[test]
    fn urls_follow_the_table_layout() {
        let client = client("http://127.0.0.1:5000");
        assert_eq!(client.base_url(), "http://127.0.0.1:5000/");
        assert_eq!(
            client.get_url("corktown", "GEOGRIDDATA"),
            "http://127.0.0.1:5000/api/table/corktown/GEOGRIDDATA"
        );
        assert_eq!(
            client.post_url("corktown", INDICATORS_VAR),
            "http://127.0.0.1:5000/api/table/update/corktown/indicators"
        );
    }

    #[test]
    fn front_end_url_substitutes_the_table() {
        let client = client("http://localhost");
        assert!(client.front_end_url("corktown").ends_with("?cityscope=corktown"));
    }

    #[test]
    fn only_4xx_statuses_are_final() {
        let status = |status| TransportError::Status {
            url: String::new(),
            status,
        };
        assert!(is_client_error(&status(404)));
        assert!(!is_client_error(&status(503)));
        assert!(!is_client_error(&TransportError::Malformed(String::new())));
    }
}
