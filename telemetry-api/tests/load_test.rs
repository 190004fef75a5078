use rand::Rng;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use serde_json::json;
use std::sync::Arc;
use std::time::{Duration, Instant};
use telemetry_api::{
    DeviceId, LatestEntry, MemoryReadingStore, Measurement, ReadingPayload, TelemetryService,
};
use tokio::time::sleep;

const DEVICES: DeviceId = 17;

fn random_payload(device_id: DeviceId) -> serde_json::Value {
    let mut rng = rand::thread_rng();
    json!({
        "deviceId": device_id,
        "air": [
            {"id": 1, "value": rng.gen_range(15.0..35.0)},
            {"id": 2, "value": rng.gen_range(980.0..1040.0)},
            {"id": 3, "value": rng.gen_range(30.0..80.0)}
        ]
    })
}

fn sequenced_payload(device_id: DeviceId, seq: u32) -> ReadingPayload {
    ReadingPayload {
        device_id,
        air: vec![
            Measurement {
                id: 1,
                value: f64::from(seq + 1),
            },
            Measurement {
                id: 2,
                value: 1000.0,
            },
            Measurement {
                id: 3,
                value: 50.0,
            },
        ],
    }
}

/// Concurrent writers per device; each device's history must stay in the
/// order its writer appended.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_ingest_keeps_per_device_order() {
    let per_device = 200;
    let service = TelemetryService::new(Arc::new(MemoryReadingStore::new()), DEVICES);

    let writers: Vec<_> = (0..DEVICES)
        .map(|device_id| {
            let service = service.clone();
            tokio::spawn(async move {
                for seq in 0..per_device {
                    service
                        .ingest(device_id, &sequenced_payload(device_id, seq))
                        .await
                        .unwrap();
                }
            })
        })
        .collect();

    let reader = {
        let service = service.clone();
        tokio::spawn(async move {
            for _ in 0..50 {
                let entries = service.latest_for_all().await;
                assert_eq!(entries.len(), DEVICES as usize);
                tokio::task::yield_now().await;
            }
        })
    };

    for writer in writers {
        writer.await.unwrap();
    }
    reader.await.unwrap();

    for device_id in 0..DEVICES {
        let temps: Vec<f64> = service
            .history(device_id)
            .await
            .unwrap()
            .iter()
            .map(|r| r.temperature)
            .collect();
        let expected: Vec<f64> = (1..=per_device).map(f64::from).collect();
        assert_eq!(temps, expected, "device {} history out of order", device_id);
    }

    let entries = service.latest_for_all().await;
    for (i, entry) in entries.iter().enumerate() {
        match entry {
            LatestEntry::Reported(reading) => {
                assert_eq!(reading.device_id, i as DeviceId);
                assert_eq!(reading.temperature, f64::from(per_device));
            }
            other => panic!("device {} unexpectedly reported {:?}", i, other),
        }
    }
}

/// Requires a broker on localhost:1883 and a running service with MQTT_ENABLED=true.
#[tokio::test]
#[ignore]
async fn test_1000_readings_per_second_over_mqtt() {
    let test_duration_secs = 10;
    let target_rate = 1000;
    let total_messages = test_duration_secs * target_rate;

    let mut mqtt_options = MqttOptions::new("load-test", "localhost", 1883);
    mqtt_options.set_keep_alive(Duration::from_secs(30));

    let (client, mut eventloop) = AsyncClient::new(mqtt_options, 20000);

    tokio::spawn(async move {
        loop {
            if let Err(e) = eventloop.poll().await {
                eprintln!("MQTT error: {}", e);
                break;
            }
        }
    });

    println!(
        "Publishing {} readings at {} msg/s across {} devices",
        total_messages, target_rate, DEVICES
    );

    sleep(Duration::from_millis(500)).await;

    let start = Instant::now();
    let mut sent_count = 0;
    let mut error_count = 0;

    let burst_size = 100;
    let delay_per_burst = Duration::from_micros((burst_size * 1_000_000) / target_rate as u64);

    for batch_start in (0..total_messages).step_by(burst_size as usize) {
        for i in batch_start..std::cmp::min(batch_start + burst_size, total_messages) {
            let device_id = (i % DEVICES as u64) as DeviceId;
            let payload = random_payload(device_id).to_string();

            match client
                .publish(
                    format!("readings/{}", device_id),
                    QoS::AtLeastOnce,
                    false,
                    payload,
                )
                .await
            {
                Ok(_) => sent_count += 1,
                Err(e) => {
                    error_count += 1;
                    if error_count < 10 {
                        eprintln!("Send error: {}", e);
                    }
                }
            }
        }

        sleep(delay_per_burst).await;
    }

    let duration = start.elapsed();
    let actual_rate = sent_count as f64 / duration.as_secs_f64();
    println!(
        "Sent {} readings in {:.2}s ({:.2} msg/s), {} errors",
        sent_count,
        duration.as_secs_f64(),
        actual_rate,
        error_count
    );

    assert!(
        actual_rate >= 900.0,
        "Throughput too low: {:.2} msg/s (expected >= 900)",
        actual_rate
    );
    assert_eq!(error_count, 0, "Publish errors: {}", error_count);
}
