//! # Messaging Bus Module
//!
//! Trait abstraction over the publish/subscribe transport, plus the MQTT
//! implementation.
//!
//! The bridge core only ever talks to [`MessageBus`]; tests substitute the
//! recording mock, and the binary wires in [`mqtt::MqttBus`].

pub mod mqtt;

use async_trait::async_trait;
use std::time::Duration;

use crate::error::Result;

/// Messaging bus collaborator
///
/// One connection at a time. `connect` must be bounded by `timeout` and
/// return control to the caller on failure; the caller owns retry cadence.
#[async_trait]
pub trait MessageBus: Send {
    /// Open a connection to the broker
    ///
    /// # Arguments
    ///
    /// * `client_id` - Broker-visible client identifier, unique per attempt
    /// * `server_address` - Broker as `host` or `host:port`
    /// * `timeout` - Bound on the whole attempt
    async fn connect(&mut self, client_id: &str, server_address: &str, timeout: Duration) -> Result<()>;

    /// Publish one message
    async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()>;

    /// Tear the connection down; a no-op when not connected
    async fn disconnect(&mut self);

    /// Whether the bus currently reports a live connection
    fn is_connected(&self) -> bool;
}

#[cfg(test)]
pub mod mocks {
    use super::*;
    use crate::error::EmonBridgeError;
    use std::sync::{Arc, Mutex};

    /// Recording mock bus for tests
    #[derive(Clone, Default)]
    pub struct MockBus {
        pub connected: Arc<Mutex<bool>>,
        /// `(client_id, server_address)` of every connect attempt
        pub connects: Arc<Mutex<Vec<(String, String)>>>,
        /// `(topic, payload)` of every successful publish
        pub published: Arc<Mutex<Vec<(String, Vec<u8>)>>>,
        /// When set, connect attempts fail with this reason
        pub connect_failure: Arc<Mutex<Option<String>>>,
        /// Topics whose publish reports failure
        pub failing_topics: Arc<Mutex<Vec<String>>>,
        pub disconnects: Arc<Mutex<usize>>,
    }

    impl MockBus {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn published_topics(&self) -> Vec<String> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .map(|(topic, _)| topic.clone())
                .collect()
        }

        pub fn payload_for(&self, topic: &str) -> Option<Vec<u8>> {
            self.published
                .lock()
                .unwrap()
                .iter()
                .find(|(t, _)| t == topic)
                .map(|(_, payload)| payload.clone())
        }

        pub fn set_connect_failure(&self, reason: &str) {
            *self.connect_failure.lock().unwrap() = Some(reason.to_string());
        }

        pub fn clear_connect_failure(&self) {
            *self.connect_failure.lock().unwrap() = None;
        }

        pub fn fail_topic(&self, topic: &str) {
            self.failing_topics.lock().unwrap().push(topic.to_string());
        }
    }

    #[async_trait]
    impl MessageBus for MockBus {
        async fn connect(
            &mut self,
            client_id: &str,
            server_address: &str,
            _timeout: Duration,
        ) -> Result<()> {
            self.connects
                .lock()
                .unwrap()
                .push((client_id.to_string(), server_address.to_string()));

            if let Some(reason) = self.connect_failure.lock().unwrap().clone() {
                return Err(EmonBridgeError::ConnectFailed {
                    address: server_address.to_string(),
                    reason,
                });
            }

            *self.connected.lock().unwrap() = true;
            Ok(())
        }

        async fn publish(&mut self, topic: &str, payload: &[u8]) -> Result<()> {
            if !*self.connected.lock().unwrap() {
                return Err(EmonBridgeError::NotConnected);
            }
            if self
                .failing_topics
                .lock()
                .unwrap()
                .iter()
                .any(|t| t == topic)
            {
                return Err(EmonBridgeError::Bus(format!(
                    "mock publish failure on {}",
                    topic
                )));
            }
            self.published
                .lock()
                .unwrap()
                .push((topic.to_string(), payload.to_vec()));
            Ok(())
        }

        async fn disconnect(&mut self) {
            *self.connected.lock().unwrap() = false;
            *self.disconnects.lock().unwrap() += 1;
        }

        fn is_connected(&self) -> bool {
            *self.connected.lock().unwrap()
        }
    }
}
