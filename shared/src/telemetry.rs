// Telemetry Record Module
// One reading per wake cycle, serialized with a fixed field order and a fixed
// number of decimals per field so the dashboard always receives the same shape.

use anyhow::{Context, Result};
use serde::ser::Error as _;
use serde::{Serialize, Serializer};
use serde_json::value::RawValue;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TelemetryRecord {
    #[serde(rename = "bootCnt")]
    pub boot_count: u32,
    #[serde(rename = "soilTemperature", serialize_with = "two_decimals")]
    pub soil_temperature: f32, // °C
    #[serde(rename = "soilMoisture", serialize_with = "two_decimals")]
    pub soil_moisture: f32, // %
    #[serde(rename = "batVoltage", serialize_with = "three_decimals")]
    pub battery_voltage: f32, // V
}

impl TelemetryRecord {
    pub fn new(boot_count: u32, soil_temperature: f32, soil_moisture: f32, battery_voltage: f32) -> Self {
        Self {
            boot_count,
            soil_temperature,
            soil_moisture,
            battery_voltage,
        }
    }

    /// Serialize to the JSON document published on the telemetry topic
    pub fn to_payload(&self) -> Result<String> {
        serde_json::to_string(self).context("Failed to serialize telemetry record")
    }
}

fn two_decimals<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    fixed_decimals(*value, 2, serializer)
}

fn three_decimals<S: Serializer>(value: &f32, serializer: S) -> Result<S::Ok, S::Error> {
    fixed_decimals(*value, 3, serializer)
}

// JSON has no NaN/inf, and a plain f32 would print as 25.0 or 4.099999904632568
fn fixed_decimals<S: Serializer>(value: f32, decimals: usize, serializer: S) -> Result<S::Ok, S::Error> {
    if !value.is_finite() {
        return Err(S::Error::custom(format!("non-finite reading: {}", value)));
    }
    let raw = RawValue::from_string(format!("{:.*}", decimals, value)).map_err(S::Error::custom)?;
    raw.serialize(serializer)
}
