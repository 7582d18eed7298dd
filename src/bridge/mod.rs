//! # Bridge Loop Module
//!
//! The top-level driver tying everything together.
//!
//! This module handles:
//! - Polling the serial source and feeding the frame reader
//! - Dispatching each line through classifier, decoder and publisher
//! - Keeping the bus connection alive via the connection manager
//! - Applying configuration edits and their side effects (reconnect,
//!   service re-registration)

pub mod connection;
pub mod publisher;

pub use connection::{ConnectionManager, ConnectionState};
pub use publisher::Publisher;

use tokio::sync::mpsc;
use tokio::time::{interval, Duration};
use tracing::{debug, info, warn};

use crate::bus::MessageBus;
use crate::config::{ConfigStore, ConfigUpdate};
use crate::error::Result;
use crate::protocol::{classify, decode, FrameReader, PacketKind, Telemetry};
use crate::registry::ServiceRegistry;
use crate::serial::{SerialSource, RADIO_GROUP_COMMAND};

/// Bridge loop tick period
const TICK_PERIOD: Duration = Duration::from_millis(20);

/// The bridge: single owner of all mutable state, driven by one task
///
/// Everything the loop mutates lives here, so there is no locking anywhere
/// in the steady-state path.
pub struct Bridge {
    serial: Box<dyn SerialSource>,
    bus: Box<dyn MessageBus>,
    registry: Box<dyn ServiceRegistry>,
    config_store: ConfigStore,
    frame_reader: FrameReader,
    publisher: Publisher,
    connection: ConnectionManager,
    /// Edits submitted by the external configuration interface
    updates: mpsc::UnboundedReceiver<ConfigUpdate>,
    /// Last successfully published reading, for the display collaborator
    last_telemetry: Option<Telemetry>,
}

impl Bridge {
    pub fn new(
        serial: Box<dyn SerialSource>,
        bus: Box<dyn MessageBus>,
        registry: Box<dyn ServiceRegistry>,
        config_store: ConfigStore,
        updates: mpsc::UnboundedReceiver<ConfigUpdate>,
        debug_raw: bool,
    ) -> Self {
        let connection = ConnectionManager::new(&config_store.current().server_address);
        Self {
            serial,
            bus,
            registry,
            config_store,
            frame_reader: FrameReader::default(),
            publisher: Publisher::new(debug_raw),
            connection,
            updates,
            last_telemetry: None,
        }
    }

    /// One-time startup work
    ///
    /// Registers the mDNS service and puts the radio on the right group.
    ///
    /// # Errors
    ///
    /// Registration failure is returned (and fatal to the process); it is
    /// the only fatal path in the bridge.
    pub async fn startup(&mut self) -> Result<()> {
        let service_name = self.config_store.current().service_name.clone();
        self.registry.register(&service_name)?;

        if let Err(e) = self.serial.write_command(RADIO_GROUP_COMMAND).await {
            warn!("Failed to send radio group command: {}", e);
        }
        Ok(())
    }

    /// One control iteration; never fails, every error is logged and dropped
    pub async fn tick(&mut self) {
        self.pump_serial().await;

        if self.connection.state() != ConnectionState::Connected || !self.bus.is_connected() {
            if let Err(e) = self
                .connection
                .ensure_connected(self.bus.as_mut(), self.config_store.current())
                .await
            {
                warn!("Connection attempt failed: {}", e);
            }
        }

        self.drain_config_updates().await;
    }

    /// Pull pending serial bytes and run the line pipeline
    async fn pump_serial(&mut self) {
        let bytes = match self.serial.read_available().await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Serial read failed: {}", e);
                return;
            }
        };
        if bytes.is_empty() {
            return;
        }

        let lines = match self.frame_reader.feed(&bytes) {
            Ok(lines) => lines,
            Err(e) => {
                warn!("{}", e);
                return;
            }
        };

        for line in lines {
            match classify(&line) {
                PacketKind::Acknowledgement => {
                    debug!("Receiver ack: {}", String::from_utf8_lossy(&line));
                }
                PacketKind::Invalid => {
                    debug!("Dropping garbage line: {:?}", line);
                }
                PacketKind::Data => match decode(&line) {
                    Ok(telemetry) => {
                        match self
                            .publisher
                            .publish(
                                self.bus.as_mut(),
                                &telemetry,
                                self.config_store.current(),
                                &line,
                            )
                            .await
                        {
                            Ok(()) => {
                                self.last_telemetry = Some(telemetry);
                            }
                            Err(e) => debug!("Dropped telemetry: {}", e),
                        }
                    }
                    Err(e) => warn!("Undecodable packet {:?}: {}", line, e),
                },
            }
        }
    }

    /// Apply any pending configuration edits and run their side effects
    async fn drain_config_updates(&mut self) {
        while let Ok(update) = self.updates.try_recv() {
            let outcome = match self.config_store.apply(update) {
                Ok(outcome) => outcome,
                Err(e) => {
                    warn!("Rejected configuration update: {}", e);
                    continue;
                }
            };

            if outcome.server_changed {
                let address = self.config_store.current().server_address.clone();
                self.connection
                    .apply_new_server(self.bus.as_mut(), &address)
                    .await;
            }

            if outcome.service_name_changed {
                let service_name = self.config_store.current().service_name.clone();
                if let Err(e) = self.registry.unregister() {
                    warn!("Failed to unregister service: {}", e);
                }
                if let Err(e) = self.registry.register(&service_name) {
                    warn!("Failed to re-register service as {}: {}", service_name, e);
                }
            }
        }
    }

    /// The last reading that made it to the bus
    pub fn last_telemetry(&self) -> Option<&Telemetry> {
        self.last_telemetry.as_ref()
    }

    /// Run the loop until ctrl_c, then shut collaborators down
    pub async fn run(&mut self) -> Result<()> {
        let mut tick_interval = interval(TICK_PERIOD);
        info!("Bridge loop running ({}ms tick)", TICK_PERIOD.as_millis());

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    self.tick().await;
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("Received Ctrl+C, shutting down...");
                    break;
                }
            }
        }

        if let Err(e) = self.registry.unregister() {
            warn!("Failed to unregister service on shutdown: {}", e);
        }
        self.bus.disconnect().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bus::mocks::MockBus;
    use crate::config::mocks::MemoryStore;
    use crate::registry::mocks::MockRegistry;
    use crate::serial::mocks::MockSerialSource;

    struct Harness {
        bridge: Bridge,
        bus: MockBus,
        serial: MockSerialSource,
        registry: MockRegistry,
        updates: mpsc::UnboundedSender<ConfigUpdate>,
    }

    fn harness() -> Harness {
        let bus = MockBus::new();
        let serial = MockSerialSource::new();
        let registry = MockRegistry::default();
        let (tx, rx) = mpsc::unbounded_channel();

        let bridge = Bridge::new(
            Box::new(serial.clone()),
            Box::new(bus.clone()),
            Box::new(registry.clone()),
            ConfigStore::open(Box::new(MemoryStore::default())),
            rx,
            false,
        );

        Harness {
            bridge,
            bus,
            serial,
            registry,
            updates: tx,
        }
    }

    #[tokio::test]
    async fn test_startup_registers_service_and_sets_group() {
        let mut h = harness();
        h.bridge.startup().await.unwrap();

        assert_eq!(
            *h.registry.registered_names.lock().unwrap(),
            vec!["emond1".to_string()]
        );
        assert_eq!(
            *h.serial.commands.lock().unwrap(),
            vec![RADIO_GROUP_COMMAND.to_vec()]
        );
    }

    #[tokio::test]
    async fn test_startup_registration_failure_is_fatal() {
        let mut h = harness();
        *h.registry.fail_register.lock().unwrap() = true;
        assert!(h.bridge.startup().await.is_err());
    }

    #[tokio::test]
    async fn test_tick_connects_then_publishes_telemetry() {
        let mut h = harness();

        // First tick establishes the connection and announces it
        h.bridge.tick().await;
        assert!(h.bus.is_connected());
        assert_eq!(h.bus.published_topics(), vec!["emond1/status".to_string()]);

        // A packet split across two reads comes out as one fan-out
        h.serial.push_chunk(b"OK 6 167 2 ");
        h.serial.push_chunk(b"82 92 (-38)\r\n");
        h.bridge.tick().await;
        h.bridge.tick().await;

        let topics = h.bus.published_topics();
        assert!(topics.contains(&"emon/emontx/power1".to_string()));
        assert!(topics.contains(&"emond1/rx/6/values".to_string()));
        assert_eq!(
            h.bus.payload_for("emond1/rx/6/values").unwrap(),
            b"679,236.34,-38"
        );
        assert_eq!(h.bridge.last_telemetry().unwrap().power_watts, 679);
    }

    #[tokio::test]
    async fn test_acks_and_garbage_are_dropped() {
        let mut h = harness();
        h.bridge.tick().await; // connect
        let baseline = h.bus.published.lock().unwrap().len();

        h.serial.push_chunk(b"> 210 g\r\ngarbage line\r\n-> ack\r\n");
        h.bridge.tick().await;

        assert_eq!(h.bus.published.lock().unwrap().len(), baseline);
    }

    #[tokio::test]
    async fn test_malformed_packet_does_not_stop_later_ones() {
        let mut h = harness();
        h.bridge.tick().await; // connect

        h.serial
            .push_chunk(b"OK 6 nope 2 82 92 (-38)\r\nOK 7 0 1 0 0 (-40)\r\n");
        h.bridge.tick().await;

        assert_eq!(h.bridge.last_telemetry().unwrap().node_id, 7);
        assert_eq!(h.bus.payload_for("emon/emontx/power1").unwrap(), b"256");
    }

    #[tokio::test]
    async fn test_telemetry_dropped_while_disconnected() {
        let mut h = harness();
        h.bus.set_connect_failure("broker down");

        h.serial.push_chunk(b"OK 6 167 2 82 92 (-38)\r\n");
        h.bridge.tick().await;

        assert!(h.bus.published.lock().unwrap().is_empty());
        assert!(h.bridge.last_telemetry().is_none());
    }

    #[tokio::test]
    async fn test_server_change_reconnects_to_new_address() {
        let mut h = harness();
        h.bridge.tick().await; // connect to the default broker

        h.updates
            .send(ConfigUpdate {
                server_address: Some("replacement.lan:1883".to_string()),
                ..Default::default()
            })
            .unwrap();
        h.bridge.tick().await; // applies the edit, forces disconnect
        h.bridge.tick().await; // reconnects

        let connects = h.bus.connects.lock().unwrap().clone();
        assert_eq!(connects.len(), 2);
        assert_eq!(connects[1].1, "replacement.lan:1883");
        assert_eq!(*h.bus.disconnects.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_service_name_change_reregisters() {
        let mut h = harness();
        h.bridge.startup().await.unwrap();

        h.updates
            .send(ConfigUpdate {
                service_name: Some("emond1-attic".to_string()),
                ..Default::default()
            })
            .unwrap();
        h.bridge.tick().await;

        assert_eq!(
            *h.registry.registered_names.lock().unwrap(),
            vec!["emond1".to_string(), "emond1-attic".to_string()]
        );
        assert_eq!(*h.registry.unregisters.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_invalid_update_is_rejected_without_side_effects() {
        let mut h = harness();
        h.bridge.tick().await; // connect

        h.updates
            .send(ConfigUpdate {
                server_address: Some(String::new()),
                ..Default::default()
            })
            .unwrap();
        h.bridge.tick().await;

        assert_eq!(h.bus.connects.lock().unwrap().len(), 1);
        assert_eq!(*h.bus.disconnects.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_prefix_change_applies_to_next_packet() {
        let mut h = harness();
        h.bridge.tick().await; // connect

        h.updates
            .send(ConfigUpdate {
                measurement_topic_prefix: Some("emon/shed/".to_string()),
                ..Default::default()
            })
            .unwrap();
        h.bridge.tick().await;

        h.serial.push_chunk(b"OK 6 167 2 82 92 (-38)\r\n");
        h.bridge.tick().await;

        assert!(h.bus.payload_for("emon/shed/power1").is_some());
        assert!(h.bus.payload_for("emon/emontx/power1").is_none());
    }
}
