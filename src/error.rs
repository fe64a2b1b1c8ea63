//! Error types for sensor-mqttd

use thiserror::Error;

/// Main error type for the application
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("MQTT connect error: {0}")]
    Connect(#[from] ConnectError),

    #[error("MQTT publish error: {0}")]
    Publish(#[from] PublishError),

    #[error("payload error: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// Errors produced while encoding or decoding MQTT packets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    #[error("{field} is {len} bytes, maximum is {max}")]
    EncodingTooLarge {
        field: &'static str,
        len: usize,
        max: usize,
    },

    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    #[error("connection rejected by broker: {reason} ({0})", reason = rejection_reason(.0))]
    ConnectionRejected(u8),
}

/// Errors while establishing a session with the broker
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("could not resolve {0}")]
    Resolve(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("could not encode CONNECT: {0}")]
    Encoding(CodecError),

    #[error("handshake failed: {0}")]
    Handshake(CodecError),

    #[error("connection closed before CONNACK was received")]
    ConnectionLost,

    #[error("session is {0}, expected unconnected")]
    InvalidState(crate::mqtt::SessionState),
}

/// Errors while publishing on an established session
#[derive(Error, Debug)]
pub enum PublishError {
    #[error("not connected")]
    NotConnected,

    #[error("could not encode PUBLISH: {0}")]
    Encoding(#[from] CodecError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reason text for an MQTT 3.1.1 CONNACK return code
fn rejection_reason(code: &u8) -> &'static str {
    match code {
        0 => "accepted",
        1 => "unacceptable protocol version",
        2 => "identifier rejected",
        3 => "server unavailable",
        4 => "bad user name or password",
        5 => "not authorized",
        _ => "unknown return code",
    }
}

pub type Result<T> = std::result::Result<T, Error>;
