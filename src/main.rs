//! # emon-bridge
//!
//! Bridge RFM69 power-metering serial telemetry to MQTT.
//!
//! Reads "OK ..." packet lines from the receiver's serial port, decodes node
//! id, power, Vrms and RSSI, and republishes them under configurable topic
//! prefixes. The routing configuration persists across restarts and can be
//! edited while running; address changes reconnect the bus and name changes
//! re-register the mDNS service.

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tracing::info;

mod config;
mod error;
mod protocol;
mod bus;
mod serial;
mod registry;
mod bridge;

use bridge::Bridge;
use bus::mqtt::MqttBus;
use config::{ConfigStore, TomlFileStore};
use registry::MdnsRegistry;
use serial::ReceiverSerial;

/// Default configuration file path
const DEFAULT_CONFIG_PATH: &str = "emon-bridge.toml";

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    info!("emon-bridge v{} starting...", env!("CARGO_PKG_VERSION"));

    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| DEFAULT_CONFIG_PATH.to_string());
    let config_store = ConfigStore::open(Box::new(TomlFileStore::new(&config_path)));
    info!(
        "Routing: broker {} measurements {} status {}",
        config_store.current().server_address,
        config_store.current().measurement_topic_prefix,
        config_store.current().status_topic_prefix
    );

    let serial = ReceiverSerial::open().context("no receiver serial port")?;
    info!("Receiver serial port opened at: {}", serial.device_path());

    let registry = MdnsRegistry::new().context("failed to start mDNS responder")?;

    // Channel the external configuration interface submits edits through.
    // The sender is handed to that collaborator; the bridge drains the
    // receiver every tick.
    let (_config_tx, config_rx) = mpsc::unbounded_channel();

    let mut bridge = Bridge::new(
        Box::new(serial),
        Box::new(MqttBus::new()),
        Box::new(registry),
        config_store,
        config_rx,
        std::env::var("EMON_BRIDGE_DEBUG_RAW").is_ok(),
    );

    // Registration failure here is the one fatal error; everything after
    // this point is retried or dropped, never fatal
    bridge.startup().await.context("service registration failed")?;

    bridge.run().await?;

    info!("emon-bridge stopped");
    Ok(())
}
