//! Reading storage abstraction.
//!
//! [`ReadingStore`] is the only shared mutable resource of the service. Each
//! method is atomic on its own; no operation spans several devices or several
//! appends. Readings are kept per device in insertion order, which is the only
//! ordering guarantee: "latest" means most recently appended.

use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::errors::StorageResult;
use crate::model::{DeviceId, Reading};

#[async_trait]
pub trait ReadingStore: Send + Sync {
    /// Persist one reading under its device id.
    async fn append(&self, reading: &Reading) -> StorageResult<()>;

    /// All readings of a device, oldest first. Empty when the device has none.
    async fn query_all(&self, device_id: DeviceId) -> StorageResult<Vec<Reading>>;

    /// The most recently appended reading of a device.
    async fn query_latest(&self, device_id: DeviceId) -> StorageResult<Option<Reading>>;

    /// Up to `count` readings starting at `offset` in insertion order.
    ///
    /// An offset past the end yields an empty slice.
    async fn query_range(
        &self,
        device_id: DeviceId,
        offset: usize,
        count: usize,
    ) -> StorageResult<Vec<Reading>> {
        let history = self.query_all(device_id).await?;
        Ok(history.into_iter().skip(offset).take(count).collect())
    }

    /// Remove every reading of a device, returning how many were removed.
    async fn delete_device(&self, device_id: DeviceId) -> StorageResult<u64>;

    /// Remove every reading of every device, returning how many were removed.
    async fn delete_all(&self) -> StorageResult<u64>;
}

/// In-process store: an arena of per-device histories keyed by device id.
#[derive(Debug, Default)]
pub struct MemoryReadingStore {
    devices: RwLock<HashMap<DeviceId, Vec<Reading>>>,
}

impl MemoryReadingStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReadingStore for MemoryReadingStore {
    async fn append(&self, reading: &Reading) -> StorageResult<()> {
        let mut devices = self.devices.write().await;
        devices.entry(reading.device_id).or_default().push(*reading);
        Ok(())
    }

    async fn query_all(&self, device_id: DeviceId) -> StorageResult<Vec<Reading>> {
        let devices = self.devices.read().await;
        Ok(devices.get(&device_id).cloned().unwrap_or_default())
    }

    async fn query_latest(&self, device_id: DeviceId) -> StorageResult<Option<Reading>> {
        let devices = self.devices.read().await;
        Ok(devices
            .get(&device_id)
            .and_then(|history| history.last().copied()))
    }

    async fn query_range(
        &self,
        device_id: DeviceId,
        offset: usize,
        count: usize,
    ) -> StorageResult<Vec<Reading>> {
        let devices = self.devices.read().await;
        let Some(history) = devices.get(&device_id) else {
            return Ok(Vec::new());
        };

        let start = offset.min(history.len());
        let end = start.saturating_add(count).min(history.len());
        Ok(history[start..end].to_vec())
    }

    async fn delete_device(&self, device_id: DeviceId) -> StorageResult<u64> {
        let mut devices = self.devices.write().await;
        Ok(devices
            .remove(&device_id)
            .map_or(0, |history| history.len() as u64))
    }

    async fn delete_all(&self) -> StorageResult<u64> {
        let mut devices = self.devices.write().await;
        let removed = devices.values().map(|history| history.len() as u64).sum();
        devices.clear();
        Ok(removed)
    }
}
