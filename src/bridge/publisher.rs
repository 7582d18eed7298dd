//! # Telemetry Publisher
//!
//! Fans one decoded packet out to the bus under the configured prefixes.
//!
//! Per packet, exactly four messages when the bus is up: the three
//! per-field measurement topics and a combined CSV status topic. A debug
//! mode adds a fifth message carrying the raw line. When the bus is down the
//! packet is dropped outright; telemetry arrives every few seconds, so
//! queueing stale readings would be worse than losing them.

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::bus::MessageBus;
use crate::config::Config;
use crate::error::{EmonBridgeError, Result};
use crate::protocol::{RawLine, Telemetry};

/// Publishes decoded telemetry under the configured topic prefixes
#[derive(Debug)]
pub struct Publisher {
    /// Also republish the raw line under `{status}rx/{node}/raw`
    debug_raw: bool,
    /// When the last successful fan-out completed
    last_publish: Option<DateTime<Utc>>,
}

impl Publisher {
    pub fn new(debug_raw: bool) -> Self {
        Self {
            debug_raw,
            last_publish: None,
        }
    }

    /// When telemetry last went out, for the display collaborator
    pub fn last_publish(&self) -> Option<DateTime<Utc>> {
        self.last_publish
    }

    /// Fan one telemetry reading out to the bus
    ///
    /// # Errors
    ///
    /// * `NotConnected` - bus is down; nothing was emitted and the reading
    ///   is dropped, not queued
    /// * `PartialPublishFailure` - some topics failed; lists which
    pub async fn publish(
        &mut self,
        bus: &mut dyn MessageBus,
        telemetry: &Telemetry,
        config: &Config,
        raw: &RawLine,
    ) -> Result<()> {
        if !bus.is_connected() {
            return Err(EmonBridgeError::NotConnected);
        }

        let m = &config.measurement_topic_prefix;
        let s = &config.status_topic_prefix;

        let power = telemetry.power_watts.to_string();
        let vrms = format!("{:.2}", telemetry.vrms_volts);
        let rssi = telemetry.rssi_db.to_string();
        let values = format!("{},{},{}", power, vrms, rssi);

        let mut messages: Vec<(String, Vec<u8>)> = vec![
            (format!("{}power1", m), power.into_bytes()),
            (format!("{}vrms", m), vrms.into_bytes()),
            (format!("{}rssi", m), rssi.into_bytes()),
            (
                format!("{}rx/{}/values", s, telemetry.node_id),
                values.into_bytes(),
            ),
        ];
        if self.debug_raw {
            messages.push((
                format!("{}rx/{}/raw", s, telemetry.node_id),
                raw.to_vec(),
            ));
        }

        let mut failed_topics = Vec::new();
        for (topic, payload) in messages {
            match bus.publish(&topic, &payload).await {
                Ok(()) => debug!("Published {} ({} bytes)", topic, payload.len()),
                Err(e) => {
                    debug!("Publish to {} failed: {}", topic, e);
                    failed_topics.push(topic);
                }
            }
        }

        if failed_topics.is_empty() {
            self.last_publish = Some(Utc::now());
            Ok(())
        } else {
            Err(EmonBridgeError::PartialPublishFailure { failed_topics })
        }
    }
}
