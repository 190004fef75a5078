use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::aggregate::latest_for_all;
use crate::errors::Result;
use crate::metrics::{READINGS_INGESTED_TOTAL, READINGS_REJECTED_TOTAL};
use crate::model::{DeviceId, LatestEntry, Reading, ReadingPayload};
use crate::store::ReadingStore;
use crate::validate::{validate, MeasurementLimits};

/// Ingestion, query and maintenance operations over a [`ReadingStore`].
///
/// Cheap to clone; clones share the same store.
#[derive(Clone)]
pub struct TelemetryService {
    store: Arc<dyn ReadingStore>,
    device_count: DeviceId,
    limits: MeasurementLimits,
    latest_deadline: Option<Duration>,
}

impl TelemetryService {
    pub fn new(store: Arc<dyn ReadingStore>, device_count: DeviceId) -> Self {
        Self {
            store,
            device_count,
            limits: MeasurementLimits::default(),
            latest_deadline: None,
        }
    }

    pub fn with_limits(mut self, limits: MeasurementLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Bound the all-devices latest view; devices still pending at the deadline
    /// get the failure placeholder.
    pub fn with_latest_deadline(mut self, deadline: Option<Duration>) -> Self {
        self.latest_deadline = deadline;
        self
    }

    /// Validate a payload addressed to `device_id` and store the resulting reading.
    pub async fn ingest(&self, device_id: DeviceId, payload: &ReadingPayload) -> Result<Reading> {
        let reading = validate(device_id, payload, &self.limits).map_err(|e| {
            READINGS_REJECTED_TOTAL.inc();
            debug!("Rejected reading for device {}: {}", device_id, e);
            e
        })?;

        self.store.append(&reading).await?;

        READINGS_INGESTED_TOTAL.inc();
        debug!("Stored reading for device {}", device_id);
        Ok(reading)
    }

    pub async fn history(&self, device_id: DeviceId) -> Result<Vec<Reading>> {
        Ok(self.store.query_all(device_id).await?)
    }

    pub async fn range(
        &self,
        device_id: DeviceId,
        offset: usize,
        count: usize,
    ) -> Result<Vec<Reading>> {
        Ok(self.store.query_range(device_id, offset, count).await?)
    }

    /// Most recent reading of a device; `None` when it has not reported yet.
    pub async fn latest(&self, device_id: DeviceId) -> Result<Option<Reading>> {
        Ok(self.store.query_latest(device_id).await?)
    }

    pub async fn latest_for_all(&self) -> Vec<LatestEntry> {
        let entries =
            latest_for_all(self.store.as_ref(), self.device_count, self.latest_deadline).await;

        let unavailable = entries
            .iter()
            .filter(|entry| matches!(entry, LatestEntry::Unavailable))
            .count();
        if unavailable > 0 {
            warn!(
                "Latest view served with {} of {} devices unavailable",
                unavailable, self.device_count
            );
        }

        entries
    }

    /// Delete every stored reading. Returns the (empty) remaining set.
    pub async fn clean_all(&self) -> Result<Vec<Reading>> {
        let removed = self.store.delete_all().await?;
        info!("Deleted all readings ({} removed)", removed);
        Ok(Vec::new())
    }

    /// Delete every reading of one device. Returns its post-deletion history.
    pub async fn clean_device(&self, device_id: DeviceId) -> Result<Vec<Reading>> {
        let removed = self.store.delete_device(device_id).await?;
        info!("Deleted {} readings for device {}", removed, device_id);
        self.history(device_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::Error;
    use crate::model::Measurement;
    use crate::store::MemoryReadingStore;
    use rand::seq::SliceRandom;
    use std::collections::VecDeque;

    fn service(device_count: DeviceId) -> TelemetryService {
        TelemetryService::new(Arc::new(MemoryReadingStore::new()), device_count)
    }

    fn payload(
        device_id: DeviceId,
        temperature: f64,
        pressure: f64,
        humidity: f64,
    ) -> ReadingPayload {
        ReadingPayload {
            device_id,
            air: vec![
                Measurement {
                    id: 1,
                    value: temperature,
                },
                Measurement {
                    id: 2,
                    value: pressure,
                },
                Measurement {
                    id: 3,
                    value: humidity,
                },
            ],
        }
    }

    #[tokio::test]
    async fn test_ingest_then_latest() {
        let svc = service(17);

        let stored = svc.ingest(2, &payload(2, 21.5, 1012.3, 44.0)).await.unwrap();

        let expected = Reading {
            device_id: 2,
            temperature: 21.5,
            pressure: 1012.3,
            humidity: 44.0,
        };
        assert_eq!(stored, expected);
        assert_eq!(svc.latest(2).await.unwrap(), Some(expected));
    }

    #[tokio::test]
    async fn test_rejected_reading_is_not_stored() {
        let svc = service(4);

        let result = svc.ingest(1, &payload(1, -3.0, 1012.3, 44.0)).await;

        assert!(matches!(result, Err(Error::Validation(_))));
        assert!(svc.history(1).await.unwrap().is_empty());
        assert_eq!(svc.latest(1).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_latest_is_last_of_history() {
        let svc = service(4);
        for t in [18.0, 19.5, 17.25] {
            svc.ingest(3, &payload(3, t, 1000.0, 50.0)).await.unwrap();
        }

        let history = svc.history(3).await.unwrap();
        assert_eq!(history.len(), 3);
        assert_eq!(svc.latest(3).await.unwrap().as_ref(), history.last());
    }

    #[tokio::test]
    async fn test_range_beyond_history_is_empty() {
        let svc = service(4);
        svc.ingest(0, &payload(0, 20.0, 1000.0, 50.0)).await.unwrap();

        assert!(svc.range(0, 10, 5).await.unwrap().is_empty());
        assert_eq!(svc.range(0, 0, 5).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clean_device_twice() {
        let svc = service(4);
        svc.ingest(1, &payload(1, 20.0, 1000.0, 50.0)).await.unwrap();
        svc.ingest(2, &payload(2, 21.0, 1000.0, 50.0)).await.unwrap();

        assert!(svc.clean_device(1).await.unwrap().is_empty());
        assert!(svc.clean_device(1).await.unwrap().is_empty());
        assert_eq!(svc.history(2).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clean_all() {
        let svc = service(3);
        svc.ingest(0, &payload(0, 20.0, 1000.0, 50.0)).await.unwrap();
        svc.ingest(2, &payload(2, 21.0, 1000.0, 50.0)).await.unwrap();

        assert!(svc.clean_all().await.unwrap().is_empty());

        let entries = svc.latest_for_all().await;
        assert!(entries
            .iter()
            .all(|entry| matches!(entry, LatestEntry::NoData { .. })));
    }

    #[tokio::test]
    async fn test_latest_view_ignores_ingestion_interleaving() {
        let device_count: DeviceId = 6;
        let series = |id: DeviceId| -> VecDeque<f64> {
            (1..=4).map(|n| n as f64 * 10.0 + id as f64).collect()
        };

        let in_order = service(device_count);
        for id in 0..device_count {
            for t in series(id) {
                in_order.ingest(id, &payload(id, t, 1000.0, 50.0)).await.unwrap();
            }
        }

        // Random interleaving across devices; each device keeps its own order.
        let interleaved = service(device_count);
        let mut queues: Vec<VecDeque<f64>> = (0..device_count).map(series).collect();
        let mut rng = rand::thread_rng();
        loop {
            let open: Vec<usize> = (0..queues.len()).filter(|&i| !queues[i].is_empty()).collect();
            let Some(&i) = open.choose(&mut rng) else {
                break;
            };
            if let Some(t) = queues[i].pop_front() {
                let id = i as DeviceId;
                interleaved.ingest(id, &payload(id, t, 1000.0, 50.0)).await.unwrap();
            }
        }

        let expected = in_order.latest_for_all().await;
        assert_eq!(expected.len(), device_count as usize);
        assert_eq!(expected, interleaved.latest_for_all().await);
    }
}
