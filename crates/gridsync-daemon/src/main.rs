//! Daemon binary for gridsync.
//!
//! Keeps one cityIO table's published indicators in step with its grid
//! until interrupted.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from the path given as the first argument,
//!    `GRIDSYNC_CONFIG`, or `gridsync.yaml`
//! 2. Initialize structured logging (tracing)
//! 3. Build the cityIO client and the sync handler
//! 4. Register the bundled indicators enabled in the config
//! 5. Optionally evaluate once without publishing
//! 6. Run the polling loop until Ctrl-C
//! 7. Stop the loop, optionally withdraw published results, log the totals

mod error;

use std::path::PathBuf;

use gridsync_cityio::CityIoClient;
use gridsync_core::SyncHandler;
use gridsync_core::config::{GridsyncConfig, LoggingConfig};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use crate::error::DaemonError;

/// Default configuration file, relative to the working directory.
const DEFAULT_CONFIG_PATH: &str = "gridsync.yaml";

/// Application entry point.
///
/// # Errors
///
/// Returns an error if configuration, client setup or indicator
/// registration fails, or if the shutdown signal cannot be awaited.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Load configuration.
    let (config, config_path, from_file) = load_config()?;

    // 2. Initialize structured logging.
    init_tracing(&config.logging);
    info!("gridsync-daemon starting");
    info!(
        path = %config_path.display(),
        from_file,
        table = %config.handler.table,
        poll_interval_ms = config.handler.poll_interval_ms,
        "Configuration loaded"
    );

    if config.handler.table.trim().is_empty() {
        return Err(DaemonError::MissingTable.into());
    }

    // 3. Build the client and the handler.
    let client = CityIoClient::new(&config.remote, &config.snapshot).map_err(DaemonError::from)?;
    info!(
        base_url = client.base_url(),
        front_end = %client.front_end_url(&config.handler.table),
        "cityIO client ready"
    );
    let handler = SyncHandler::new(
        config.handler.table.clone(),
        client,
        config.handler_config(),
    );

    // 4. Register the bundled indicators.
    for indicator in
        gridsync_indicators::reference_set(&config.indicators, &config.snapshot.empty_type)
    {
        handler.register(indicator).map_err(DaemonError::from)?;
    }
    info!(indicators = ?handler.list_indicators(), "Indicators registered");

    // 5. Try the indicators once against the live grid.
    if config.handler.dry_run_on_start {
        match handler.dry_run().await {
            Ok(report) if report.is_success() => {
                info!(outputs = report.outputs.len(), "Dry run succeeded");
            }
            Ok(report) => warn!(failures = %report.failure_summary(), "Dry run had failures"),
            Err(e) => warn!(error = %e, "Dry run could not reach the table"),
        }
    }

    // 6. Run until interrupted.
    handler.start().map_err(DaemonError::from)?;
    tokio::signal::ctrl_c()
        .await
        .map_err(|e| DaemonError::Signal {
            message: format!("{e}"),
        })?;
    info!("Shutdown requested");

    // 7. Stop and report.
    handler.shutdown().await;
    if config.handler.clear_on_exit {
        handler.clear_remote().await.map_err(DaemonError::from)?;
    }

    let status = handler.status();
    if let Some(failure) = &status.last_error {
        warn!(error = %failure, "Last recorded failure");
    }
    info!(
        polls = status.polls,
        committed = status.passes_committed,
        rolled_back = status.passes_rolled_back,
        accepted_version = status.accepted_version,
        "gridsync-daemon stopped"
    );
    Ok(())
}

/// Initialize the global subscriber. `RUST_LOG` wins over the configured
/// level.
fn init_tracing(logging: &LoggingConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true);
    if logging.json {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Load configuration, falling back to defaults (plus environment
/// overrides) when the file does not exist.
///
/// Returns the config, the path that was looked at, and whether the file
/// was read.
fn load_config() -> Result<(GridsyncConfig, PathBuf, bool), DaemonError> {
    let path = std::env::args()
        .nth(1)
        .or_else(|| std::env::var("GRIDSYNC_CONFIG").ok())
        .map_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH), PathBuf::from);

    if path.exists() {
        let config = GridsyncConfig::from_file(&path)?;
        Ok((config, path, true))
    } else {
        let mut config = GridsyncConfig::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok((config, path, false))
    }
}
