//! Telemetry ingestion and query service for a fixed population of
//! environmental sensors reporting temperature, pressure and humidity.
//!
//! Readings enter through [`service::TelemetryService::ingest`] (over HTTP or
//! MQTT), are validated, and are appended to a [`store::ReadingStore`].

pub mod aggregate;
pub mod config;
pub mod db;
pub mod errors;
pub mod metrics;
pub mod model;
pub mod mqtt;
pub mod rest;
pub mod service;
pub mod store;
pub mod validate;

pub use errors::{Error, Result, StorageError};
pub use model::{DeviceId, LatestEntry, Measurement, Reading, ReadingPayload};
pub use service::TelemetryService;
pub use store::{MemoryReadingStore, ReadingStore};
