//! Indicator registry, change detection and the polling sync handler.
//!
//! This crate keeps a table's published indicators in step with its grid:
//! it polls the table service, detects content changes by fingerprint,
//! evaluates the registered indicators and pushes their results, committing
//! each pass atomically or rolling it back.
//!
//! # Modules
//!
//! - [`config`] -- Configuration loading from `gridsync.yaml` into
//!   strongly-typed structs.
//! - [`error`] -- Registry, transport and computation error types.
//! - [`fingerprint`] -- Content fingerprints and the [`ChangeDetector`].
//! - [`handler`] -- The [`SyncHandler`] polling loop.
//! - [`indicator`] -- [`SimpleIndicator`] and [`CompositeIndicator`]
//!   contracts.
//! - [`package`] -- Conversion of outputs into pushable payloads.
//! - [`registry`] -- The [`IndicatorRegistry`].
//! - [`service`] -- The [`GridService`] seam and [`MemoryGridService`].
//!
//! [`ChangeDetector`]: fingerprint::ChangeDetector
//! [`SyncHandler`]: handler::SyncHandler
//! [`SimpleIndicator`]: indicator::SimpleIndicator
//! [`CompositeIndicator`]: indicator::CompositeIndicator
//! [`IndicatorRegistry`]: registry::IndicatorRegistry
//! [`GridService`]: service::GridService
//! [`MemoryGridService`]: service::MemoryGridService

pub mod config;
pub mod error;
pub mod fingerprint;
pub mod handler;
pub mod indicator;
pub mod package;
pub mod registry;
pub mod service;

pub use error::{ComputationError, RegistryError, SyncError, TransportError};
pub use handler::{HandlerConfig, PollOutcome, SyncHandler};
pub use indicator::{CompositeIndicator, Indicator, Requirements, SimpleIndicator};
