use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Histogram, HistogramOpts, Opts, Registry, TextEncoder};
use tracing::error;

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();
    pub static ref READINGS_INGESTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "telemetry_readings_ingested_total",
        "Total readings validated and stored"
    ))
    .unwrap();
    pub static ref READINGS_REJECTED_TOTAL: Counter = Counter::with_opts(Opts::new(
        "telemetry_readings_rejected_total",
        "Total readings rejected by validation"
    ))
    .unwrap();
    pub static ref STORAGE_FAILURES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "telemetry_storage_failures_total",
        "Total failed reading store operations"
    ))
    .unwrap();
    pub static ref MQTT_MESSAGES_TOTAL: Counter = Counter::with_opts(Opts::new(
        "telemetry_mqtt_messages_total",
        "Total messages received from MQTT"
    ))
    .unwrap();
    pub static ref UNAVAILABLE_SLOTS_TOTAL: Counter = Counter::with_opts(Opts::new(
        "telemetry_latest_unavailable_slots_total",
        "Device slots of the latest view replaced by the failure placeholder"
    ))
    .unwrap();
    pub static ref LATEST_FANOUT_SECONDS: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "telemetry_latest_fanout_seconds",
            "Time taken to assemble the latest reading of every device"
        )
        .buckets(vec![
            0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0
        ])
    )
    .unwrap();
}

pub fn init_metrics() -> prometheus::Result<()> {
    REGISTRY.register(Box::new(READINGS_INGESTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(READINGS_REJECTED_TOTAL.clone()))?;
    REGISTRY.register(Box::new(STORAGE_FAILURES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(MQTT_MESSAGES_TOTAL.clone()))?;
    REGISTRY.register(Box::new(UNAVAILABLE_SLOTS_TOTAL.clone()))?;
    REGISTRY.register(Box::new(LATEST_FANOUT_SECONDS.clone()))?;
    Ok(())
}

pub fn gather_metrics() -> String {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!("Failed to encode metrics: {}", e);
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
