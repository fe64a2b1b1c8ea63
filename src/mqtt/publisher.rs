//! MQTT publisher for sensor readings
//!
//! Publishes simulated sensor readings on the configured topic.

use std::net::TcpStream;

use tracing::{debug, info};

use crate::error::Result;
use crate::sensor::{PayloadStyle, SensorReading};

use super::session::{Connection, Transport};

/// Publisher for sensor readings
pub struct Publisher<S: Transport = TcpStream> {
    connection: Connection<S>,
    topic: String,
    style: PayloadStyle,
    published: u64,
}

impl<S: Transport> Publisher<S> {
    /// Create a new publisher on an established session
    pub fn new(connection: Connection<S>, topic: impl Into<String>, style: PayloadStyle) -> Self {
        Self {
            connection,
            topic: topic.into(),
            style,
            published: 0,
        }
    }

    /// Publish a single reading
    ///
    /// Topic: the configured topic
    /// Payload: JSON with sensor_temp, sensor_humidity, sensor_pressure, timestamp
    /// QoS: 0, not retained
    pub fn publish_reading(&mut self, reading: &SensorReading) -> Result<()> {
        let payload = reading.to_payload(self.style)?;
        debug!(
            "Publishing to {}: {}",
            self.topic,
            String::from_utf8_lossy(&payload)
        );

        self.connection.publish(&self.topic, &payload)?;
        self.published += 1;

        info!(
            "Published #{}: Temp={}°C, Humidity={}%, Pressure={}hPa",
            self.published, reading.temperature, reading.humidity, reading.pressure
        );
        Ok(())
    }

    /// Number of readings published so far
    pub fn published(&self) -> u64 {
        self.published
    }

    /// Disconnect the underlying session
    pub fn disconnect(&mut self) {
        if self.connection.is_connected() {
            debug!(
                "Closing session for {} after {} readings",
                self.connection.client_id(),
                self.published
            );
        } else {
            debug!(
                "Session for {} already {}",
                self.connection.client_id(),
                self.connection.state()
            );
        }
        self.connection.disconnect();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{Error, PublishError};
    use crate::mqtt::session::tests::MockTransport;
    use crate::mqtt::{SessionOptions, SessionState};
    use crate::sensor::Timestamp;

    fn reading() -> SensorReading {
        SensorReading {
            temperature: 23.4,
            humidity: 55,
            pressure: 1002,
            timestamp: Timestamp::Unix(1_700_000_000),
        }
    }

    fn publisher(mock: &MockTransport, style: PayloadStyle) -> Publisher<MockTransport> {
        mock.state()
            .incoming
            .extend([0x20u8, 0x02, 0x00, 0x00]);
        let mut connection = Connection::new(mock.clone(), SessionOptions::new("sensor"));
        connection.handshake().unwrap();
        mock.state().written.clear();
        Publisher::new(connection, "weather/sensor_data", style)
    }

    #[test]
    fn test_publish_reading_counts_and_frames() {
        let mock = MockTransport::default();
        let mut publisher = publisher(&mock, PayloadStyle::Compact);

        publisher.publish_reading(&reading()).unwrap();
        publisher.publish_reading(&reading()).unwrap();

        assert_eq!(publisher.published(), 2);
        let payload = reading().to_payload(PayloadStyle::Compact).unwrap();
        let written = mock.state().written.clone();
        let single = 1 + 1 + 2 + "weather/sensor_data".len() + payload.len();
        assert_eq!(written.len(), 2 * single);
        assert!(written.ends_with(&payload));
    }

    #[test]
    fn test_pretty_payload_needs_multibyte_length() {
        let mock = MockTransport::default();
        let mut publisher = publisher(&mock, PayloadStyle::Pretty);

        let reading = SensorReading {
            timestamp: Timestamp::Text("2023-11-14T22:13:20+00:00".to_string()),
            ..reading()
        };
        publisher.publish_reading(&reading).unwrap();

        let written = mock.state().written.clone();
        assert_eq!(written[0], 0x30);
        assert_ne!(written[1] & 0x80, 0, "remaining length should span two bytes");
    }

    #[test]
    fn test_failed_publish_is_not_counted() {
        let mock = MockTransport::default();
        let mut publisher = publisher(&mock, PayloadStyle::Compact);
        mock.state().stall = true;

        let err = publisher.publish_reading(&reading()).unwrap_err();

        assert!(matches!(err, Error::Publish(PublishError::Io(_))));
        assert_eq!(publisher.published(), 0);
    }

    #[test]
    fn test_disconnect_after_failed_write_sends_nothing() {
        let mock = MockTransport::default();
        let mut publisher = publisher(&mock, PayloadStyle::Compact);
        mock.state().stall = true;
        publisher.publish_reading(&reading()).unwrap_err();
        assert_eq!(publisher.connection.state(), SessionState::Closed);

        let calls = mock.state().write_calls;
        publisher.disconnect();

        assert_eq!(mock.state().write_calls, calls);
        assert!(!publisher.connection.is_connected());
    }
}
