//! cityIO transport for gridsync.
//!
//! [`CityIoClient`] implements the [`GridService`] seam over the cityIO
//! HTTP API: it assembles snapshots from a table's grid description and
//! cell list, and publishes indicator results to the table's indicator
//! list and access layer.
//!
//! # Modules
//!
//! - [`access`] -- The heatmap feature collection.
//! - [`client`] -- The [`CityIoClient`].
//! - [`decode`] -- Grid description and cell list decoding.
//!
//! [`GridService`]: gridsync_core::service::GridService

pub mod access;
pub mod client;
pub mod decode;

pub use client::CityIoClient;
pub use decode::{DecodeError, GeoGrid};
