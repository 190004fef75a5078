//! Latest reading of every device in the configured population.
//!
//! One `query_latest` per device id is issued at once and the futures are
//! joined on the calling task. A failing or late device only spoils its own
//! slot: the result always holds exactly `device_count` entries and slot `i`
//! always belongs to device `i`.

use std::time::Duration;

use futures::future::join_all;
use tokio::time::{timeout, Instant};
use tracing::{debug, warn};

use crate::errors::{StorageError, StorageResult};
use crate::metrics::{LATEST_FANOUT_SECONDS, UNAVAILABLE_SLOTS_TOTAL};
use crate::model::{DeviceId, LatestEntry, Reading};
use crate::store::ReadingStore;

pub async fn latest_for_all(
    store: &dyn ReadingStore,
    device_count: DeviceId,
    deadline: Option<Duration>,
) -> Vec<LatestEntry> {
    let start = Instant::now();

    let queries = (0..device_count).map(|device_id| async move {
        let outcome = match deadline {
            Some(limit) => timeout(limit, store.query_latest(device_id))
                .await
                .unwrap_or_else(|_| Err(StorageError::Timeout(limit))),
            None => store.query_latest(device_id).await,
        };
        settle(device_id, outcome)
    });

    // join_all yields outputs in input order, so slot i is device i whatever
    // the completion order was.
    let entries = join_all(queries).await;

    let elapsed = start.elapsed().as_secs_f64();
    LATEST_FANOUT_SECONDS.observe(elapsed);
    debug!(
        "Assembled latest readings for {} devices in {:.3}s",
        device_count, elapsed
    );

    entries
}

fn settle(device_id: DeviceId, outcome: StorageResult<Option<Reading>>) -> LatestEntry {
    match outcome {
        Ok(Some(reading)) => LatestEntry::Reported(reading),
        Ok(None) => LatestEntry::NoData { device_id },
        Err(e) => {
            warn!("Latest reading query for device {} failed: {}", device_id, e);
            UNAVAILABLE_SLOTS_TOTAL.inc();
            LatestEntry::Unavailable
        }
    }
}
