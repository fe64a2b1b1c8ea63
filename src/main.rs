//! sensor-mqttd - simulated weather sensor publishing over MQTT
//!
//! Stands in for an M5Stack-style sensor when exercising the weather-station
//! desktop app:
//! - Minimal MQTT 3.1.1 client over a raw TCP stream (CONNECT + QoS 0 PUBLISH)
//! - Periodic temperature, humidity and pressure readings as JSON
//! - Environment-variable configuration

mod config;
mod error;
mod mqtt;
mod polling;
mod sensor;

use rand::rngs::StdRng;
use rand::SeedableRng;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::config::Config;
use crate::error::Result;
use crate::polling::run_publish_loop;

#[tokio::main]
async fn main() {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if std::env::var("DEBUG")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(false)
        {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    if let Err(e) = run().await {
        error!("Fatal error: {}", e);
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    // Load configuration
    let config = Config::from_env()?;

    if config.debug {
        info!("Debug mode enabled");
    }

    info!(
        "Broker: {}:{}, topic: {}",
        config.mqtt.host, config.mqtt.port, config.mqtt.topic
    );

    let mut rng = StdRng::from_entropy();
    let shutdown = async {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Received shutdown signal"),
            Err(e) => warn!("Could not listen for Ctrl+C, stopping: {}", e),
        }
    };

    let published = run_publish_loop(&config, &mut rng, shutdown).await?;
    info!("Stopped after publishing {} readings", published);

    Ok(())
}
