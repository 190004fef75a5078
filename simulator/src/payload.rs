use rand::Rng;
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub id: i64,
    pub value: f64,
}

/// Body accepted by the telemetry API: temperature, pressure, humidity in order.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadingPayload {
    pub device_id: u32,
    pub air: Vec<Measurement>,
}

impl ReadingPayload {
    /// A plausible indoor reading, with `outlier_ratio` of readings pushed out of
    /// the accepted domain so the service's rejection path gets traffic too.
    pub fn random(rng: &mut impl Rng, device_id: u32, outlier_ratio: f64) -> Self {
        let temperature = if rng.gen_bool(outlier_ratio) {
            rng.gen_range(-30.0..0.0)
        } else {
            rng.gen_range(15.0..35.0)
        };
        let pressure = rng.gen_range(980.0..1040.0);
        let humidity = rng.gen_range(30.0..80.0);

        Self {
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
}
