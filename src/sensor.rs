//! Simulated environment sensor
//!
//! Produces readings shaped like an M5Stack ENV III unit and serializes them
//! to the JSON payload the weather-station app consumes.

use chrono::{SecondsFormat, TimeZone, Utc};
use rand::Rng;
use serde::Serialize;

const BASE_TEMP: f64 = 22.0;
const BASE_HUMIDITY: i64 = 60;
const BASE_PRESSURE: i64 = 1013;

/// How the `timestamp` field is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimestampFormat {
    /// Unix seconds as an integer
    #[default]
    Unix,
    /// RFC 3339 string in UTC
    Rfc3339,
}

/// Layout of the JSON payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PayloadStyle {
    #[default]
    Compact,
    /// Two-space indentation
    Pretty,
}

/// Timestamp value, serialized untagged
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Timestamp {
    Unix(i64),
    Text(String),
}

/// One sensor sample
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SensorReading {
    #[serde(rename = "sensor_temp")]
    pub temperature: f64,
    #[serde(rename = "sensor_humidity")]
    pub humidity: u8,
    #[serde(rename = "sensor_pressure")]
    pub pressure: i64,
    pub timestamp: Timestamp,
}

impl SensorReading {
    /// Sample a reading at the current time
    pub fn generate<R: Rng>(rng: &mut R, format: TimestampFormat) -> Self {
        Self::generate_at(rng, format, Utc::now().timestamp())
    }

    /// Sample a reading stamped with `unix_secs`
    ///
    /// Temperature varies by -3.0..8.0 around 22 °C, humidity by -15..=20
    /// around 60 % (clamped to 0..=100), pressure by -20..=20 around 1013 hPa.
    pub fn generate_at<R: Rng>(rng: &mut R, format: TimestampFormat, unix_secs: i64) -> Self {
        let temperature = round_tenth(BASE_TEMP + rng.gen_range(-3.0..8.0));
        let humidity = (BASE_HUMIDITY + rng.gen_range(-15..=20)).clamp(0, 100) as u8;
        let pressure = BASE_PRESSURE + rng.gen_range(-20..=20);

        Self {
            temperature,
            humidity,
            pressure,
            timestamp: format_timestamp(unix_secs, format),
        }
    }

    /// Serialize to the JSON payload
    pub fn to_payload(&self, style: PayloadStyle) -> Result<Vec<u8>, serde_json::Error> {
        match style {
            PayloadStyle::Compact => serde_json::to_vec(self),
            PayloadStyle::Pretty => serde_json::to_vec_pretty(self),
        }
    }
}

fn round_tenth(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

fn format_timestamp(unix_secs: i64, format: TimestampFormat) -> Timestamp {
    match format {
        TimestampFormat::Unix => Timestamp::Unix(unix_secs),
        TimestampFormat::Rfc3339 => match Utc.timestamp_opt(unix_secs, 0).single() {
            Some(t) => Timestamp::Text(t.to_rfc3339_opts(SecondsFormat::Secs, false)),
            None => Timestamp::Unix(unix_secs),
        },
    }
}
