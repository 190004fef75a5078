use serde::{Deserialize, Serialize};

/// Identifier of a sensor device. The aggregation population is `0..device_count`.
pub type DeviceId = u32;

/// One stored sensor sample.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Reading {
    pub device_id: DeviceId,
    pub temperature: f64,
    pub pressure: f64,
    pub humidity: f64,
}

/// A single component measurement as submitted by a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Measurement {
    pub id: i64,
    pub value: f64,
}

/// Ingestion body: three measurements in temperature, pressure, humidity order.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingPayload {
    pub device_id: DeviceId,
    #[serde(alias = "measurements")]
    pub air: Vec<Measurement>,
}

/// One slot of the all-devices latest view.
///
/// Every variant serializes to the flat reading shape. Placeholders carry zeroed
/// measurements; `Unavailable` reports `deviceId: null` so a failed query can
/// be told apart from a device that simply has no data yet.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(into = "SlotView")]
pub enum LatestEntry {
    Reported(Reading),
    NoData { device_id: DeviceId },
    Unavailable,
}

impl LatestEntry {
    pub fn device_id(&self) -> Option<DeviceId> {
        match self {
            LatestEntry::Reported(reading) => Some(reading.device_id),
            LatestEntry::NoData { device_id } => Some(*device_id),
            LatestEntry::Unavailable => None,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SlotView {
    device_id: Option<DeviceId>,
    temperature: f64,
    pressure: f64,
    humidity: f64,
}

impl From<LatestEntry> for SlotView {
    fn from(entry: LatestEntry) -> Self {
        match entry {
            LatestEntry::Reported(r) => SlotView {
                device_id: Some(r.device_id),
                temperature: r.temperature,
                pressure: r.pressure,
                humidity: r.humidity,
            },
            LatestEntry::NoData { device_id } => SlotView {
                device_id: Some(device_id),
                temperature: 0.0,
                pressure: 0.0,
                humidity: 0.0,
            },
            LatestEntry::Unavailable => SlotView {
                device_id: None,
                temperature: 0.0,
                pressure: 0.0,
                humidity: 0.0,
            },
        }
    }
}
