//! # MQTT Bus Implementation
//!
//! [`MessageBus`] backed by `rumqttc`.
//!
//! A connect attempt builds a fresh client and polls its event loop until the
//! broker's ConnAck arrives, bounded by the caller's timeout. Once connected,
//! the event loop moves to a background task whose only job is to keep the
//! connection serviced and drop an atomic flag when the broker goes away; the
//! bridge loop observes that flag through `is_connected` and schedules a
//! reconnect on its next tick.

use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::MessageBus;
use crate::error::{EmonBridgeError, Result};

/// Default MQTT port when the address carries none
const DEFAULT_MQTT_PORT: u16 = 1883;

/// Broker keep-alive interval
const KEEP_ALIVE: Duration = Duration::from_secs(30);

/// Event-loop request channel capacity
const REQUEST_CAPACITY: usize = 16;

/// MQTT-backed messaging bus
pub struct MqttBus {
    client: Option<AsyncClient>,
    connected: Arc<AtomicBool>,
    driver: Option<JoinHandle<()>>,
}

impl Default for MqttBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MqttBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MqttBus")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl MqttBus {
    pub fn new() -> Self {
        Self {
            client: None,
            connected: Arc::new(AtomicBool::new(false)),
            driver: None,
        }
    }

    /// Drop the current client and stop its event-loop task
    fn teardown(&mut self) {
        self.connected.store(false, Ordering::SeqCst);
        self.client = None;
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl Drop for MqttBus {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Split `host` / `host:port` into its parts
///
/// # Errors
///
/// Returns error if the port part is present but not a number.
fn parse_address(server_address: &str) -> Result<(String, u16)> {
    match server_address.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse().map_err(|_| {
                EmonBridgeError::Config(format!("invalid broker port in {:?}", server_address))
            })?;
            Ok((host.to_string(), port))
        }
        None => Ok((server_address.to_string(), DEFAULT_MQTT_PORT)),
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn connect(&mut self, client_id: &str, server_address: &str, timeout: Duration) -> Result<()> {
        self.teardown();

        let (host, port) = parse_address(server_address)?;
        let mut options = MqttOptions::new(client_id, host, port);
        options.set_keep_alive(KEEP_ALIVE);

        let (client, mut event_loop) = AsyncClient::new(options, REQUEST_CAPACITY);

        // Wait for the broker's ConnAck, bounded by the caller's timeout
        let handshake = tokio::time::timeout(timeout, async {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
                    Ok(event) => debug!("Pre-connack event: {:?}", event),
                    Err(e) => return Err(e.to_string()),
                }
            }
        })
        .await;

        match handshake {
            Ok(Ok(())) => {}
            Ok(Err(reason)) => {
                return Err(EmonBridgeError::ConnectFailed {
                    address: server_address.to_string(),
                    reason,
                })
            }
            Err(_) => {
                return Err(EmonBridgeError::ConnectFailed {
                    address: server_address.to_string(),
                    reason: format!("no ConnAck within {:?}", timeout),
                })
            }
        }

        // A fresh flag per connection, so a stale driver task can never
        // clobber the state of its replacement
        let connected = Arc::new(AtomicBool::new(true));
        self.connected = Arc::clone(&connected);

        // Keep the connection serviced until the broker drops it
        self.driver = Some(tokio::spawn(async move {
            loop {
                match event_loop.poll().await {
                    Ok(Event::Incoming(Packet::Disconnect)) => {
                        warn!("Broker sent disconnect");
                        break;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("MQTT connection lost: {}", e);
                        break;
                    }
                }
            }
            connected.store(false, Ordering::SeqCst);
        }));

        self.client = Some(client);
        Ok(())
    }

    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
        if !self.is_connected() {
            return Err(EmonBridgeError::NotConnected);
        }
        let client = self.client.as_ref().ok_or(EmonBridgeError::NotConnected)?;
        client
            .publish(topic, QoS::AtMostOnce, false, payload.to_vec())
            .await
            .map_err(|e| EmonBridgeError::Bus(format!("publish to {} failed: {}", topic, e)))
    }

    async fn disconnect(&mut self) {
        if let Some(client) = self.client.as_ref() {
            // Best effort; the broker side may already be gone
            let _ = client.disconnect().await;
        }
        self.teardown();
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }
}
