use crate::errors::{StorageError, StorageResult};
use crate::metrics::STORAGE_FAILURES_TOTAL;
use crate::model::{DeviceId, Reading};
use crate::store::ReadingStore;
use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::{debug, error, info, warn};

const MAX_APPEND_ATTEMPTS: u32 = 5;

pub async fn make_pool(database_url: &str) -> StorageResult<PgPool> {
    info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .acquire_timeout(Duration::from_secs(10))
        .connect(database_url)
        .await?;

    info!("Database connection established");
    info!("Running database migrations...");
    sqlx::migrate!("./migrations").run(&pool).await?;
    info!("Migrations completed");

    Ok(pool)
}

/// Row shape of the `readings` table without its bookkeeping columns.
#[derive(Debug, sqlx::FromRow)]
struct ReadingRow {
    device_id: i64,
    temperature: f64,
    pressure: f64,
    humidity: f64,
}

impl TryFrom<ReadingRow> for Reading {
    type Error = sqlx::Error;

    fn try_from(row: ReadingRow) -> Result<Self, Self::Error> {
        let device_id =
            DeviceId::try_from(row.device_id).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Reading {
            device_id,
            temperature: row.temperature,
            pressure: row.pressure,
            humidity: row.humidity,
        })
    }
}

/// Counts a failed store operation before handing the error on.
fn counted<T>(result: Result<T, sqlx::Error>) -> StorageResult<T> {
    result.map_err(|e| {
        STORAGE_FAILURES_TOTAL.inc();
        StorageError::Database(e)
    })
}

fn into_readings(rows: Vec<ReadingRow>) -> StorageResult<Vec<Reading>> {
    rows.into_iter()
        .map(|row| Reading::try_from(row).map_err(StorageError::from))
        .collect()
}

/// Reading store backed by PostgreSQL. Insertion order is the `seq` column.
#[derive(Debug, Clone)]
pub struct PgReadingStore {
    pool: PgPool,
}

impl PgReadingStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn insert(&self, reading: &Reading) -> StorageResult<()> {
        let result = sqlx::query(
            "INSERT INTO readings (device_id, temperature, pressure, humidity) VALUES ($1, $2, $3, $4)",
        )
        .bind(i64::from(reading.device_id))
        .bind(reading.temperature)
        .bind(reading.pressure)
        .bind(reading.humidity)
        .execute(&self.pool)
        .await;

        counted(result).map(|_| ())
    }
}

#[async_trait]
impl ReadingStore for PgReadingStore {
    async fn append(&self, reading: &Reading) -> StorageResult<()> {
        let mut attempts = 0;

        loop {
            attempts += 1;
            match self.insert(reading).await {
                Ok(()) => return Ok(()),
                Err(StorageError::Database(db_err)) => {
                    if attempts >= MAX_APPEND_ATTEMPTS || !is_transient_error(&db_err) {
                        error!(
                            "Reading insert for device {} failed permanently after {} attempts: {}",
                            reading.device_id, attempts, db_err
                        );
                        return Err(StorageError::Database(db_err));
                    }

                    let wait_ms = 100 * 2_u64.pow(attempts - 1).min(32);
                    warn!(
                        "Reading insert failed (attempt {}/{}), retrying in {}ms: {}",
                        attempts, MAX_APPEND_ATTEMPTS, wait_ms, db_err
                    );
                    tokio::time::sleep(Duration::from_millis(wait_ms)).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    async fn query_all(&self, device_id: DeviceId) -> StorageResult<Vec<Reading>> {
        let rows = sqlx::query_as::<_, ReadingRow>(
            "SELECT device_id, temperature, pressure, humidity
             FROM readings
             WHERE device_id = $1
             ORDER BY seq ASC",
        )
        .bind(i64::from(device_id))
        .fetch_all(&self.pool)
        .await;

        into_readings(counted(rows)?)
    }

    async fn query_latest(&self, device_id: DeviceId) -> StorageResult<Option<Reading>> {
        let row = sqlx::query_as::<_, ReadingRow>(
            "SELECT device_id, temperature, pressure, humidity
             FROM readings
             WHERE device_id = $1
             ORDER BY seq DESC
             LIMIT 1",
        )
        .bind(i64::from(device_id))
        .fetch_optional(&self.pool)
        .await;

        Ok(counted(row)?.map(Reading::try_from).transpose()?)
    }

    async fn query_range(
        &self,
        device_id: DeviceId,
        offset: usize,
        count: usize,
    ) -> StorageResult<Vec<Reading>> {
        let rows = sqlx::query_as::<_, ReadingRow>(
            "SELECT device_id, temperature, pressure, humidity
             FROM readings
             WHERE device_id = $1
             ORDER BY seq ASC
             LIMIT $2 OFFSET $3",
        )
        .bind(i64::from(device_id))
        .bind(i64::try_from(count).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await;

        into_readings(counted(rows)?)
    }

    async fn delete_device(&self, device_id: DeviceId) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM readings WHERE device_id = $1")
            .bind(i64::from(device_id))
            .execute(&self.pool)
            .await;
        let result = counted(result)?;

        debug!(
            "Deleted {} readings for device {}",
            result.rows_affected(),
            device_id
        );
        Ok(result.rows_affected())
    }

    async fn delete_all(&self) -> StorageResult<u64> {
        let result = sqlx::query("DELETE FROM readings")
            .execute(&self.pool)
            .await;

        Ok(counted(result)?.rows_affected())
    }
}

fn is_transient_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) | sqlx::Error::PoolClosed => true,
        sqlx::Error::Database(db_err) => {
            // Connection-class SQLSTATE codes
            db_err.code().is_some_and(|code| {
                code == "08000" || // connection_exception
                code == "08003" || // connection_does_not_exist
                code == "08006" || // connection_failure
                code == "57P03" || // cannot_connect_now
                code == "53300" // too_many_connections
            })
        }
        _ => false,
    }
}
