mod payload;

use clap::Parser;
use payload::ReadingPayload;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Publishes synthetic sensor readings to the telemetry API over MQTT.
#[derive(Debug, Parser)]
#[command(name = "sensor-simulator", version)]
struct Args {
    #[arg(long, env = "MQTT_BROKER", default_value = "localhost")]
    broker: String,

    #[arg(long, env = "MQTT_PORT", default_value_t = 1883)]
    port: u16,

    #[arg(long, env = "MQTT_TOPIC_PREFIX", default_value = "readings")]
    topic_prefix: String,

    /// Readings per second across all devices.
    #[arg(long, env = "RATE", default_value_t = 50)]
    rate: u64,

    /// Devices simulated, ids 0..devices.
    #[arg(long, env = "DEVICES", default_value_t = 17)]
    devices: u32,

    /// Share of readings sent outside the accepted value domain.
    #[arg(long, env = "OUTLIER_RATIO", default_value_t = 0.02, value_parser = parse_ratio)]
    outlier_ratio: f64,
}

fn parse_ratio(value: &str) -> Result<f64, String> {
    let ratio: f64 = value
        .parse()
        .map_err(|e| format!("`{}` is not a number: {}", value, e))?;
    if !(0.0..=1.0).contains(&ratio) {
        return Err(format!("`{}` is not a ratio between 0 and 1", value));
    }
    Ok(ratio)
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let rate = args.rate.clamp(1, 1_000_000);
    let devices = args.devices.max(1);

    info!("Starting sensor simulator");
    info!(
        "Broker: {}:{}, Rate: {} msg/s, Devices: {}",
        args.broker, args.port, rate, devices
    );

    let client_id = format!("sim-{}", uuid::Uuid::new_v4());

    let mut mqtt_options = MqttOptions::new(&client_id, &args.broker, args.port);
    mqtt_options.set_keep_alive(Duration::from_secs(30));
    mqtt_options.set_clean_session(true);

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                error!("MQTT eventloop error: {}", e);
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    });

    tokio::time::sleep(Duration::from_secs(2)).await;

    info!("Connected to MQTT broker, starting to publish readings");

    let mut rng = rand::thread_rng();
    let mut counter = 0u64;
    let mut ticker = tokio::time::interval(Duration::from_micros(1_000_000 / rate));

    loop {
        ticker.tick().await;

        let device_id = (counter % u64::from(devices)) as u32;
        let reading = ReadingPayload::random(&mut rng, device_id, args.outlier_ratio);

        let topic = format!("{}/{}", args.topic_prefix, device_id);
        let payload = match serde_json::to_string(&reading) {
            Ok(p) => p,
            Err(e) => {
                error!("Failed to serialize reading: {}", e);
                continue;
            }
        };

        match client.publish(&topic, QoS::AtLeastOnce, false, payload).await {
            Ok(_) => {
                counter += 1;
                if counter % 1000 == 0 {
                    info!("Published {} readings", counter);
                }
            }
            Err(e) => {
                warn!("Failed to publish: {}", e);
            }
        }
    }
}
