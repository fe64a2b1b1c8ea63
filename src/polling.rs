//! Publish loop for simulated sensor readings
//!
//! Connects once, publishes a reading every interval and stops on shutdown
//! or on the first failed publish.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio::task;
use tokio::time::{interval, Interval, MissedTickBehavior};
use tracing::{debug, error, info};

use crate::config::Config;
use crate::error::Result;
use crate::mqtt::{Connection, Publisher};
use crate::sensor::SensorReading;

/// Run the publish loop
///
/// 1. Connect to the broker (no retry)
/// 2. Publish a reading
/// 3. Wait INTERVAL seconds, or stop early when `shutdown` completes
/// 4. Repeat until shutdown or a publish fails
/// 5. Disconnect
///
/// Socket I/O runs on the blocking pool. Returns the number of readings
/// published.
pub async fn run_publish_loop<R, F>(config: &Config, rng: &mut R, shutdown: F) -> Result<u64>
where
    R: Rng,
    F: Future<Output = ()>,
{
    let host = config.mqtt.host.clone();
    let port = config.mqtt.port;
    let options = config.session_options();
    let connection = task::spawn_blocking(move || Connection::connect(&host, port, options)).await??;

    let mut publisher = Publisher::new(connection, config.mqtt.topic.clone(), config.payload_style);

    info!(
        "Publishing to {} every {} seconds",
        config.mqtt.topic,
        config.interval.as_secs()
    );

    let mut ticks = publish_interval(config.interval);
    tokio::pin!(shutdown);

    let result = loop {
        tokio::select! {
            biased;
            _ = &mut shutdown => {
                debug!("Shutdown requested");
                break Ok(());
            }
            _ = ticks.tick() => {}
        }

        let reading = SensorReading::generate(rng, config.timestamp_format);
        let (returned, outcome) = publish_blocking(publisher, reading).await?;
        publisher = returned;

        if let Err(e) = outcome {
            error!("Failed to publish: {}", e);
            break Err(e);
        }
    };

    let published = publisher.published();
    task::spawn_blocking(move || publisher.disconnect()).await?;
    result.map(|()| published)
}

/// Ticker for the publish loop; the first tick completes immediately
///
/// A publish that overruns the period (slow broker, write timeout) skips the
/// missed ticks instead of bursting them.
fn publish_interval(period: Duration) -> Interval {
    let mut ticks = interval(period);
    ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
    ticks
}

/// Publish on the blocking pool and hand the publisher back
async fn publish_blocking(
    mut publisher: Publisher,
    reading: SensorReading,
) -> Result<(Publisher, Result<()>)> {
    let (publisher, outcome) = task::spawn_blocking(move || {
        let outcome = publisher.publish_reading(&reading);
        (publisher, outcome)
    })
    .await?;
    Ok((publisher, outcome))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ConnectError, Error, PublishError};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::io::{Read, Write};
    use std::net::{TcpListener, TcpStream};
    use std::thread;
    use tokio::sync::oneshot;

    fn config_for(port: u16, interval: Duration) -> Config {
        let mut config = Config::default();
        config.mqtt.host = "127.0.0.1".to_string();
        config.mqtt.port = port;
        config.mqtt.timeout = Duration::from_secs(2);
        config.interval = interval;
        config
    }

    /// Read one packet with a single-byte remaining length
    fn read_packet(socket: &mut TcpStream) -> Option<Vec<u8>> {
        let mut header = [0u8; 2];
        socket.read_exact(&mut header).ok()?;
        let mut packet = header.to_vec();
        packet.resize(2 + header[1] as usize, 0);
        socket.read_exact(&mut packet[2..]).ok()?;
        Some(packet)
    }

    /// Accept one client, acknowledge it, then collect packets until
    /// DISCONNECT. Fires `shutdown` once `stop_after` PUBLISH packets arrived.
    fn fake_broker(
        listener: TcpListener,
        stop_after: usize,
        shutdown: oneshot::Sender<()>,
    ) -> thread::JoinHandle<Vec<Vec<u8>>> {
        thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            let connect = read_packet(&mut socket).unwrap();
            assert_eq!(connect[0], 0x10);
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).unwrap();

            let mut shutdown = Some(shutdown);
            let mut publishes = Vec::new();
            while let Some(packet) = read_packet(&mut socket) {
                if packet[0] == 0xE0 {
                    assert_eq!(packet, vec![0xE0, 0x00]);
                    break;
                }
                publishes.push(packet);
                if publishes.len() == stop_after {
                    if let Some(tx) = shutdown.take() {
                        let _ = tx.send(());
                    }
                }
            }
            publishes
        })
    }

    #[tokio::test]
    async fn test_loop_publishes_every_interval_until_shutdown() {
        tokio::time::pause();

        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();
        let broker = fake_broker(listener, 3, tx);

        let mut rng = StdRng::seed_from_u64(3);
        let config = config_for(port, Duration::from_secs(10));
        let published = run_publish_loop(&config, &mut rng, async {
            let _ = rx.await;
        })
        .await
        .unwrap();

        let publishes = broker.join().unwrap();
        assert!(published >= 3);
        assert_eq!(published as usize, publishes.len());
        for publish in &publishes {
            assert_eq!(publish[0], 0x30);
            assert_eq!(&publish[4..23], b"weather/sensor_data");
            let body: serde_json::Value = serde_json::from_slice(&publish[23..]).unwrap();
            assert!(body.get("sensor_temp").is_some());
            assert!(body["timestamp"].is_i64());
        }
    }

    #[tokio::test]
    async fn test_shutdown_interrupts_the_wait() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let (tx, rx) = oneshot::channel();
        let broker = fake_broker(listener, 1, tx);

        let mut rng = StdRng::seed_from_u64(3);
        let config = config_for(port, Duration::from_secs(3600));
        let run = run_publish_loop(&config, &mut rng, async {
            let _ = rx.await;
        });
        let published = tokio::time::timeout(Duration::from_secs(10), run)
            .await
            .expect("loop should not wait out the interval")
            .unwrap();

        assert_eq!(published, 1);
        assert_eq!(broker.join().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_loop_stops_when_broker_rejects() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            read_packet(&mut socket).unwrap();
            socket.write_all(&[0x20, 0x02, 0x00, 0x02]).unwrap();
        });

        let mut rng = StdRng::seed_from_u64(3);
        let config = config_for(port, Duration::from_secs(5));
        let err = run_publish_loop(&config, &mut rng, std::future::pending())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Connect(ConnectError::Handshake(_))));
        broker.join().unwrap();
    }

    #[tokio::test]
    async fn test_loop_reports_oversized_payload() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        let broker = thread::spawn(move || {
            let (mut socket, _) = listener.accept().unwrap();
            read_packet(&mut socket).unwrap();
            socket.write_all(&[0x20, 0x02, 0x00, 0x00]).unwrap();
            read_packet(&mut socket)
        });

        let mut config = config_for(port, Duration::from_secs(5));
        config.mqtt.topic = "t".repeat(120);
        config.mqtt.length_mode = crate::mqtt::LengthMode::SingleByte;

        let mut rng = StdRng::seed_from_u64(3);
        let err = run_publish_loop(&config, &mut rng, std::future::pending())
            .await
            .unwrap_err();

        assert!(matches!(err, Error::Publish(PublishError::Encoding(_))));
        // only the DISCONNECT reached the broker
        assert_eq!(broker.join().unwrap(), Some(vec![0xE0, 0x00]));
    }

    /// After a stall longer than several periods only one tick is ready,
    /// not one per missed period.
    #[tokio::test]
    async fn test_interval_skips_missed_ticks() {
        tokio::time::pause();

        let period = Duration::from_secs(10);
        let mut ticks = publish_interval(period);

        // first tick is immediate
        ticks.tick().await;

        tokio::time::advance(period * 5).await;
        ticks.tick().await;

        let next = tokio::time::timeout(period / 2, ticks.tick()).await;
        assert!(next.is_err(), "missed ticks must not burst");
    }
}
