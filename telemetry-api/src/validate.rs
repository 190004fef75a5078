use std::collections::HashSet;
use std::fmt;

use crate::errors::{Error, Result};
use crate::model::{DeviceId, Reading, ReadingPayload};

/// Semantic role of a measurement, bound by its position in the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MeasurementRole {
    Temperature,
    Pressure,
    Humidity,
}

impl MeasurementRole {
    /// Payload order: position 0, 1, 2.
    pub const ORDER: [MeasurementRole; 3] = [
        MeasurementRole::Temperature,
        MeasurementRole::Pressure,
        MeasurementRole::Humidity,
    ];
}

impl fmt::Display for MeasurementRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            MeasurementRole::Temperature => "Temperature",
            MeasurementRole::Pressure => "Pressure",
            MeasurementRole::Humidity => "Humidity",
        };
        f.write_str(name)
    }
}

/// Accepted value domain `(min, max]`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Bound {
    pub min: f64,
    pub max: f64,
}

impl Bound {
    pub fn contains(&self, value: f64) -> bool {
        value.is_finite() && value > self.min && value <= self.max
    }
}

impl Default for Bound {
    fn default() -> Self {
        Self {
            min: 0.0,
            max: f64::INFINITY,
        }
    }
}

/// Per-role value domains. Defaults accept any positive value.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct MeasurementLimits {
    pub temperature: Bound,
    pub pressure: Bound,
    pub humidity: Bound,
}

impl MeasurementLimits {
    pub fn bound(&self, role: MeasurementRole) -> Bound {
        match role {
            MeasurementRole::Temperature => self.temperature,
            MeasurementRole::Pressure => self.pressure,
            MeasurementRole::Humidity => self.humidity,
        }
    }
}

/// Validates an ingestion payload addressed to `target` and builds the reading.
pub fn validate(
    target: DeviceId,
    payload: &ReadingPayload,
    limits: &MeasurementLimits,
) -> Result<Reading> {
    if payload.device_id != target {
        return Err(Error::Validation(format!(
            "Device ID {} in payload does not match target device {}",
            payload.device_id, target
        )));
    }

    if payload.air.len() != MeasurementRole::ORDER.len() {
        return Err(Error::Validation(format!(
            "Expected {} measurements (temperature, pressure, humidity), got {}",
            MeasurementRole::ORDER.len(),
            payload.air.len()
        )));
    }

    let mut seen_ids = HashSet::with_capacity(payload.air.len());
    let mut values = [0.0_f64; 3];

    for (slot, (role, measurement)) in MeasurementRole::ORDER
        .iter()
        .zip(&payload.air)
        .enumerate()
    {
        if measurement.id <= 0 {
            return Err(Error::Validation(format!(
                "{} measurement id {} must be a positive integer",
                role, measurement.id
            )));
        }

        if !seen_ids.insert(measurement.id) {
            return Err(Error::Validation(format!(
                "Duplicate measurement id {}",
                measurement.id
            )));
        }

        let bound = limits.bound(*role);
        if !bound.contains(measurement.value) {
            return Err(Error::Validation(format!(
                "{} {} out of range ({}, {}]",
                role, measurement.value, bound.min, bound.max
            )));
        }

        values[slot] = measurement.value;
    }

    let [temperature, pressure, humidity] = values;

    Ok(Reading {
        device_id: target,
        temperature,
        pressure,
        humidity,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Measurement;

    fn payload(device_id: DeviceId, values: &[(i64, f64)]) -> ReadingPayload {
        ReadingPayload {
            device_id,
            air: values
                .iter()
                .map(|&(id, value)| Measurement { id, value })
                .collect(),
        }
    }

    #[test]
    fn test_valid_reading() {
        let p = payload(2, &[(1, 21.5), (2, 1012.3), (3, 44.0)]);

        let reading = validate(2, &p, &MeasurementLimits::default()).unwrap();

        assert_eq!(
            reading,
            Reading {
                device_id: 2,
                temperature: 21.5,
                pressure: 1012.3,
                humidity: 44.0,
            }
        );
    }

    #[test]
    fn test_device_mismatch() {
        let p = payload(3, &[(1, 21.5), (2, 1012.3), (3, 44.0)]);

        assert!(matches!(
            validate(2, &p, &MeasurementLimits::default()),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_wrong_measurement_count() {
        let limits = MeasurementLimits::default();

        assert!(validate(1, &payload(1, &[(1, 21.5), (2, 1012.3)]), &limits).is_err());
        assert!(validate(
            1,
            &payload(1, &[(1, 21.5), (2, 1012.3), (3, 44.0), (4, 1.0)]),
            &limits
        )
        .is_err());
    }

    #[test]
    fn test_non_positive_value() {
        let p = payload(1, &[(1, -4.0), (2, 1012.3), (3, 44.0)]);

        let err = validate(1, &p, &MeasurementLimits::default()).unwrap_err();
        assert!(err.to_string().contains("Temperature"));
    }

    #[test]
    fn test_zero_humidity() {
        let p = payload(1, &[(1, 21.5), (2, 1012.3), (3, 0.0)]);

        assert!(validate(1, &p, &MeasurementLimits::default()).is_err());
    }

    #[test]
    fn test_invalid_measurement_ids() {
        let limits = MeasurementLimits::default();

        assert!(validate(1, &payload(1, &[(0, 21.5), (2, 1012.3), (3, 44.0)]), &limits).is_err());
        assert!(validate(1, &payload(1, &[(1, 21.5), (1, 1012.3), (3, 44.0)]), &limits).is_err());
    }

    #[test]
    fn test_configured_temperature_domain() {
        let limits = MeasurementLimits {
            temperature: Bound {
                min: -50.0,
                max: 100.0,
            },
            ..Default::default()
        };

        let sub_zero = payload(1, &[(1, -12.0), (2, 1012.3), (3, 44.0)]);
        assert!(validate(1, &sub_zero, &limits).is_ok());

        let too_hot = payload(1, &[(1, 150.0), (2, 1012.3), (3, 44.0)]);
        assert!(validate(1, &too_hot, &limits).is_err());
    }
}
