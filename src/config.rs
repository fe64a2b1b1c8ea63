//! Configuration module for sensor-mqttd
//!
//! Parses environment variables into a strongly-typed configuration struct.

use std::env;
use std::time::Duration;

use crate::mqtt::{LengthMode, SessionOptions};
use crate::sensor::{PayloadStyle, TimestampFormat};

/// Main configuration struct containing all settings
#[derive(Debug, Clone)]
pub struct Config {
    /// MQTT broker configuration
    pub mqtt: MqttConfig,
    /// Time between readings
    pub interval: Duration,
    /// Rendering of the payload timestamp
    pub timestamp_format: TimestampFormat,
    /// Rendering of the JSON payload
    pub payload_style: PayloadStyle,
    /// Enable verbose logging
    pub debug: bool,
}

/// MQTT-specific configuration
#[derive(Debug, Clone)]
pub struct MqttConfig {
    /// Broker hostname/IP
    pub host: String,
    /// Broker TCP port
    pub port: u16,
    /// Topic readings are published on
    pub topic: String,
    /// Client identifier
    pub client_id: String,
    /// Append hostname and PID to the client identifier
    pub unique_client_id: bool,
    /// Keep-alive sent in CONNECT
    pub keep_alive_secs: u16,
    /// Connect/read/write timeout
    pub timeout: Duration,
    /// Remaining-length framing
    pub length_mode: LengthMode,
}

/// Configuration error type
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mqtt: MqttConfig {
                host: "192.168.137.1".to_string(),
                port: 1883,
                topic: "weather/sensor_data".to_string(),
                client_id: "test_sensor_simple".to_string(),
                unique_client_id: false,
                keep_alive_secs: 60,
                timeout: Duration::from_secs(10),
                length_mode: LengthMode::Variable,
            },
            interval: Duration::from_secs(10),
            timestamp_format: TimestampFormat::Unix,
            payload_style: PayloadStyle::Compact,
            debug: false,
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Load configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Config::default();
        let vars = Vars(lookup);

        let length_mode = if vars.parse_bool("MQTT_SINGLE_BYTE_LENGTH", false) {
            LengthMode::SingleByte
        } else {
            LengthMode::Variable
        };

        let timestamp_format = match vars.get("TIMESTAMP_FORMAT") {
            None => defaults.timestamp_format,
            Some(v) => match v.to_lowercase().as_str() {
                "unix" => TimestampFormat::Unix,
                "rfc3339" | "iso8601" => TimestampFormat::Rfc3339,
                _ => return Err(ConfigError::InvalidValue("TIMESTAMP_FORMAT", v)),
            },
        };

        let payload_style = if vars.parse_bool("PAYLOAD_PRETTY", false) {
            PayloadStyle::Pretty
        } else {
            PayloadStyle::Compact
        };

        Ok(Config {
            mqtt: MqttConfig {
                host: vars.get("MQTT_HOST").unwrap_or(defaults.mqtt.host),
                port: vars.parse("MQTT_PORT", defaults.mqtt.port)?,
                topic: vars.get("MQTT_TOPIC").unwrap_or(defaults.mqtt.topic),
                client_id: vars.get("MQTT_CLIENT_ID").unwrap_or(defaults.mqtt.client_id),
                unique_client_id: vars.parse_bool("MQTT_CLIENT_ID_UNIQUE", false),
                keep_alive_secs: vars.parse("MQTT_KEEP_ALIVE", defaults.mqtt.keep_alive_secs)?,
                timeout: vars.parse_secs("MQTT_TIMEOUT", defaults.mqtt.timeout)?,
                length_mode,
            },
            interval: vars.parse_secs("INTERVAL", defaults.interval)?,
            timestamp_format,
            payload_style,
            debug: vars.parse_bool("DEBUG", false),
        })
    }

    /// Client identifier to connect with
    pub fn client_id(&self) -> String {
        if !self.mqtt.unique_client_id {
            return self.mqtt.client_id.clone();
        }
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        format!("{}-{}-{}", self.mqtt.client_id, hostname, std::process::id())
    }

    /// Session parameters for the transport
    pub fn session_options(&self) -> SessionOptions {
        SessionOptions {
            keep_alive_secs: self.mqtt.keep_alive_secs,
            timeout: self.mqtt.timeout,
            length_mode: self.mqtt.length_mode,
            ..SessionOptions::new(self.client_id())
        }
    }
}

/// Typed access to a variable source; empty values count as unset
struct Vars<F>(F);

impl<F> Vars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn get(&self, name: &str) -> Option<String> {
        (self.0)(name).filter(|v| !v.is_empty())
    }

    fn parse_bool(&self, name: &str, default: bool) -> bool {
        self.get(name)
            .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
            .unwrap_or(default)
    }

    fn parse<T: std::str::FromStr>(&self, name: &'static str, default: T) -> Result<T, ConfigError> {
        match self.get(name) {
            Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue(name, v)),
            None => Ok(default),
        }
    }

    /// Whole seconds, zero rejected
    fn parse_secs(&self, name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
        let secs: u64 = self.parse(name, default.as_secs())?;
        if secs == 0 {
            return Err(ConfigError::InvalidValue(name, "0".to_string()));
        }
        Ok(Duration::from_secs(secs))
    }
}
