use std::time::Duration;

use thiserror::Error;

/// Failures of the reading store backends.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Storage query timed out after {0:?}")]
    Timeout(Duration),

    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("MQTT error: {0}")]
    Mqtt(#[from] rumqttc::ClientError),
}

pub type Result<T> = std::result::Result<T, Error>;

pub type StorageResult<T> = std::result::Result<T, StorageError>;
