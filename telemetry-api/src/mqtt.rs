use crate::config::MqttConfig;
use crate::errors::{Error, Result};
use crate::metrics::MQTT_MESSAGES_TOTAL;
use crate::model::{DeviceId, Reading, ReadingPayload};
use crate::service::TelemetryService;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use tracing::{debug, error, info, warn};

const MAX_RETRIES: u32 = 3;
const INITIAL_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_MS: u64 = 2000;

/// Consume readings published on `<prefix>/<device id>` and ingest them.
pub async fn run_mqtt(config: MqttConfig, service: TelemetryService) -> Result<()> {
    info!("Connecting to MQTT broker at {}:{}", config.broker, config.port);

    let mqtt_options = mqtt_options(&config);
    info!(
        "MQTT client id {} (clean session: {})",
        mqtt_options.client_id(),
        mqtt_options.clean_session()
    );

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 10000);

    let topic = format!("{}/+", config.topic_prefix);
    client.subscribe(&topic, QoS::AtLeastOnce).await?;

    info!("Subscribed to {} with QoS 1", topic);

    loop {
        match eventloop.poll().await {
            Ok(notification) => {
                if let Event::Incoming(Packet::Publish(publish)) = notification {
                    MQTT_MESSAGES_TOTAL.inc();

                    debug!(
                        "Received message on topic {}, size: {} bytes",
                        publish.topic,
                        publish.payload.len()
                    );

                    if let Err(e) = process_message_with_retry(
                        &config.topic_prefix,
                        &publish.topic,
                        &publish.payload,
                        &service,
                    )
                    .await
                    {
                        error!("Dropping message on {}: {}", publish.topic, e);
                    }
                }
            }
            Err(e) => {
                error!("MQTT error: {}", e);
                // rumqttc reconnects on the next poll
                tokio::time::sleep(std::time::Duration::from_secs(1)).await;
            }
        }
    }
}

/// A configured client id resumes its broker session; a generated one is
/// unique per process, so its session would never be picked up again.
fn mqtt_options(config: &MqttConfig) -> MqttOptions {
    let (client_id, clean_session) = match &config.client_id {
        Some(id) => (id.clone(), false),
        None => (format!("telemetry-api-{}", uuid::Uuid::new_v4()), true),
    };

    let mut mqtt_options = MqttOptions::new(client_id, config.broker.clone(), config.port);
    mqtt_options.set_keep_alive(std::time::Duration::from_secs(30));
    mqtt_options.set_clean_session(clean_session);
    mqtt_options
}

/// Process a message, retrying storage failures with exponential backoff
async fn process_message_with_retry(
    prefix: &str,
    topic: &str,
    payload: &[u8],
    service: &TelemetryService,
) -> Result<Reading> {
    let mut attempt = 0;
    let mut backoff_ms = INITIAL_BACKOFF_MS;

    loop {
        attempt += 1;

        match process_message(prefix, topic, payload, service).await {
            Ok(reading) => {
                if attempt > 1 {
                    info!("Message processed successfully on attempt {}", attempt);
                }
                return Ok(reading);
            }
            Err(e) => {
                if attempt >= MAX_RETRIES {
                    return Err(e);
                }

                if !is_retryable_error(&e) {
                    warn!("Non-retryable error: {}", e);
                    return Err(e);
                }

                warn!(
                    "Message processing failed (attempt {}/{}): {}. Retrying in {}ms...",
                    attempt, MAX_RETRIES, e, backoff_ms
                );

                tokio::time::sleep(std::time::Duration::from_millis(backoff_ms)).await;
                backoff_ms = (backoff_ms * 2).min(MAX_BACKOFF_MS);
            }
        }
    }
}

async fn process_message(
    prefix: &str,
    topic: &str,
    payload: &[u8],
    service: &TelemetryService,
) -> Result<Reading> {
    let device_id = device_id_from_topic(prefix, topic)?;

    let payload = serde_json::from_slice::<ReadingPayload>(payload)
        .map_err(|e| Error::Validation(format!("JSON parse error: {}", e)))?;

    service.ingest(device_id, &payload).await
}

/// The topic suffix plays the role of the HTTP path parameter.
fn device_id_from_topic(prefix: &str, topic: &str) -> Result<DeviceId> {
    topic
        .strip_prefix(prefix)
        .and_then(|rest| rest.strip_prefix('/'))
        .and_then(|id| id.parse::<DeviceId>().ok())
        .ok_or_else(|| Error::Validation(format!("Topic {} does not name a device", topic)))
}

fn is_retryable_error(error: &Error) -> bool {
    match error {
        Error::Storage(_) => true, // Store might be temporarily unavailable

        Error::Validation(_) => false, // Bad data won't become valid with retry
        Error::Config(_) => false,
        Error::Mqtt(_) => false, // Handled at connection level
    }
}
