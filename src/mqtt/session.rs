//! MQTT transport session
//!
//! Owns a single stream to the broker, performs the CONNECT/CONNACK handshake
//! and writes QoS 0 PUBLISH packets. Blocking, single owner, no internal
//! locking or retry.

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{ConnectError, PublishError};

use super::codec::{self, LengthMode, CONNACK_LEN};

/// A byte stream the session can drive
pub trait Transport: Read + Write {
    /// Release the underlying resource
    fn close(&mut self) -> io::Result<()>;
}

impl Transport for TcpStream {
    fn close(&mut self) -> io::Result<()> {
        self.shutdown(Shutdown::Both)
    }
}

/// Parameters for a session
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Client identifier sent in CONNECT
    pub client_id: String,
    /// Keep-alive advertised in CONNECT, in seconds
    pub keep_alive_secs: u16,
    /// Connect, read and write timeout
    pub timeout: Duration,
    /// Remaining-length framing
    pub length_mode: LengthMode,
}

impl SessionOptions {
    pub fn new(client_id: impl Into<String>) -> Self {
        Self {
            client_id: client_id.into(),
            keep_alive_secs: 60,
            timeout: Duration::from_secs(10),
            length_mode: LengthMode::Variable,
        }
    }
}

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Stream open, handshake not done yet
    Unconnected,
    /// CONNACK accepted, publishing allowed
    Connected,
    /// Stream shut down, terminal
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Unconnected => "unconnected",
            SessionState::Connected => "connected",
            SessionState::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// An MQTT session over one stream
pub struct Connection<S: Transport = TcpStream> {
    stream: S,
    options: SessionOptions,
    state: SessionState,
}

impl Connection<TcpStream> {
    /// Open a TCP stream to the broker and complete the handshake
    ///
    /// Every address `host` resolves to is tried in turn with the configured
    /// timeout. The timeout also bounds every later read and write.
    pub fn connect(host: &str, port: u16, options: SessionOptions) -> Result<Self, ConnectError> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|e| ConnectError::Resolve(format!("{}:{}: {}", host, port, e)))?
            .collect();

        if addrs.is_empty() {
            return Err(ConnectError::Resolve(format!("{}:{}", host, port)));
        }

        info!("Connecting to MQTT broker at {}:{}", host, port);

        let mut last_err = None;
        let mut stream = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, options.timeout) {
                Ok(s) => {
                    stream = Some(s);
                    break;
                }
                Err(e) => {
                    debug!("Connect to {} failed: {}", addr, e);
                    last_err = Some(e);
                }
            }
        }

        let stream = match (stream, last_err) {
            (Some(stream), _) => stream,
            (None, Some(e)) => return Err(ConnectError::Io(e)),
            (None, None) => return Err(ConnectError::Resolve(format!("{}:{}", host, port))),
        };

        stream.set_read_timeout(Some(options.timeout))?;
        stream.set_write_timeout(Some(options.timeout))?;
        stream.set_nodelay(true)?;

        let mut connection = Connection::new(stream, options);
        connection.handshake()?;
        Ok(connection)
    }
}

impl<S: Transport> Connection<S> {
    /// Wrap an open stream; no bytes are exchanged yet
    pub fn new(stream: S, options: SessionOptions) -> Self {
        Self {
            stream,
            options,
            state: SessionState::Unconnected,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    pub fn client_id(&self) -> &str {
        &self.options.client_id
    }

    /// Send CONNECT and wait for an accepting CONNACK
    ///
    /// On any failure the stream is closed and the session ends up `Closed`.
    pub fn handshake(&mut self) -> Result<(), ConnectError> {
        if self.state != SessionState::Unconnected {
            return Err(ConnectError::InvalidState(self.state));
        }

        let result = self.exchange_connect();
        match &result {
            Ok(()) => {
                self.state = SessionState::Connected;
                info!("Connected to MQTT broker as {}", self.options.client_id);
            }
            Err(e) => {
                warn!("MQTT handshake failed: {}", e);
                self.close();
            }
        }
        result
    }

    fn exchange_connect(&mut self) -> Result<(), ConnectError> {
        let packet = codec::encode_connect(
            &self.options.client_id,
            self.options.keep_alive_secs,
            self.options.length_mode,
        )
        .map_err(ConnectError::Encoding)?;

        debug!("Sending CONNECT ({} bytes): {:02X?}", packet.len(), packet);
        write_fully(&mut self.stream, &packet)?;

        let mut connack = [0u8; CONNACK_LEN];
        let received = read_up_to(&mut self.stream, &mut connack)?;
        if received == 0 {
            return Err(ConnectError::ConnectionLost);
        }
        debug!("Received CONNACK: {:02X?}", &connack[..received]);

        codec::decode_connack(&connack[..received]).map_err(ConnectError::Handshake)
    }

    /// Publish `payload` on `topic` with QoS 0
    ///
    /// Returns once every byte has been handed to the stream. Nothing is
    /// read back. A write failure closes the session.
    pub fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<(), PublishError> {
        if self.state != SessionState::Connected {
            return Err(PublishError::NotConnected);
        }

        let packet = codec::encode_publish(topic, payload, self.options.length_mode)?;
        debug!("Sending PUBLISH to {} ({} bytes)", topic, packet.len());

        if let Err(e) = write_fully(&mut self.stream, &packet) {
            warn!("Write to broker failed, closing session: {}", e);
            self.close();
            return Err(PublishError::Io(e));
        }
        Ok(())
    }

    /// Close the session
    ///
    /// A connected session sends DISCONNECT first, best effort. Calling this
    /// on a closed session does nothing.
    pub fn disconnect(&mut self) {
        match self.state {
            SessionState::Closed => return,
            SessionState::Connected => {
                if let Err(e) = write_fully(&mut self.stream, &codec::encode_disconnect()) {
                    debug!("Failed to send DISCONNECT: {}", e);
                }
                info!("Disconnected from MQTT broker");
            }
            SessionState::Unconnected => {}
        }
        self.close();
    }

    fn close(&mut self) {
        if let Err(e) = self.stream.close() {
            debug!("Error closing stream: {}", e);
        }
        self.state = SessionState::Closed;
    }
}

impl<S: Transport> Drop for Connection<S> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Write all of `buf`, looping over short writes
fn write_fully<W: Write + ?Sized>(writer: &mut W, buf: &[u8]) -> io::Result<()> {
    let mut written = 0;
    while written < buf.len() {
        match writer.write(&buf[written..]) {
            Ok(0) => {
                return Err(io::Error::new(
                    io::ErrorKind::WriteZero,
                    "stream accepted no bytes",
                ))
            }
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    writer.flush()
}

/// Fill `buf` until it is full or the peer closes, returning the byte count
fn read_up_to<R: Read + ?Sized>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(n) => total += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(total)
}
