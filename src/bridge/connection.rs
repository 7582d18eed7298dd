//! # Connection Manager
//!
//! Owns the bus connection lifecycle: one bounded connect attempt per call,
//! a fresh client identifier every time, and an announcement on the status
//! topic once the broker accepts us.
//!
//! The manager never loops or sleeps internally. The bridge loop calls
//! `ensure_connected` every tick; a minimum interval between attempts keeps
//! a dead broker from being hammered.

use std::time::{Duration, Instant};
use tracing::{info, warn};

use crate::bus::MessageBus;
use crate::config::Config;
use crate::error::Result;

/// Bound on a single connection attempt
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Minimum spacing between connection attempts
pub const MIN_RETRY_INTERVAL: Duration = Duration::from_secs(5);

/// Bus connection lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// No connection; the next `ensure_connected` may attempt one
    Disconnected,
    /// An attempt is in flight
    Connecting,
    /// The broker accepted us and the bus reports the link alive
    Connected,
}

/// Drives (re)connect attempts against the configured broker
#[derive(Debug)]
pub struct ConnectionManager {
    state: ConnectionState,
    /// Current target broker address
    server_address: String,
    /// Monotonic attempt counter, part of the client id
    attempt: u64,
    /// Per-process entropy so restarts never reuse a client id
    seed: u32,
    last_attempt: Option<Instant>,
    min_retry_interval: Duration,
}

impl ConnectionManager {
    pub fn new(server_address: &str) -> Self {
        // Startup nanos are entropy enough to dodge broker-side session
        // collisions with a previous incarnation of this process
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);

        Self {
            state: ConnectionState::Disconnected,
            server_address: server_address.to_string(),
            attempt: 0,
            seed,
            last_attempt: None,
            min_retry_interval: MIN_RETRY_INTERVAL,
        }
    }

    /// Override the retry spacing (tests)
    #[cfg(test)]
    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.min_retry_interval = interval;
        self
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn server_address(&self) -> &str {
        &self.server_address
    }

    /// Client identifier for the next attempt, unique per attempt
    fn next_client_id(&mut self, service_name: &str) -> String {
        self.attempt += 1;
        format!("{}-{:08x}-{}", service_name, self.seed, self.attempt)
    }

    /// Connect if not already connected
    ///
    /// No-op while Connected. Otherwise makes at most one bounded attempt;
    /// on acceptance announces `"connected"` on `{status}status` and
    /// transitions to Connected. On failure stays Disconnected and returns
    /// the reason; the caller retries on a later tick.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - a new connection was established by this call
    /// * `Ok(false)` - already connected, or the retry interval deferred
    ///   the attempt
    pub async fn ensure_connected(
        &mut self,
        bus: &mut dyn MessageBus,
        config: &Config,
    ) -> Result<bool> {
        // Pick up bus-reported closes since the last tick
        if self.state == ConnectionState::Connected && !bus.is_connected() {
            warn!("Bus reports connection closed");
            self.state = ConnectionState::Disconnected;
        }

        if self.state == ConnectionState::Connected {
            return Ok(false);
        }

        if let Some(last) = self.last_attempt {
            if last.elapsed() < self.min_retry_interval {
                return Ok(false);
            }
        }

        let client_id = self.next_client_id(&config.service_name);
        info!(
            "Connecting to {} as {}",
            self.server_address, client_id
        );

        self.state = ConnectionState::Connecting;
        self.last_attempt = Some(Instant::now());

        match bus
            .connect(&client_id, &self.server_address, CONNECT_TIMEOUT)
            .await
        {
            Ok(()) => {
                self.state = ConnectionState::Connected;
                info!("Connected to {}", self.server_address);

                let status_topic = format!("{}status", config.status_topic_prefix);
                if let Err(e) = bus.publish(&status_topic, b"connected").await {
                    warn!("Failed to announce on {}: {}", status_topic, e);
                }
                Ok(true)
            }
            Err(e) => {
                self.state = ConnectionState::Disconnected;
                Err(e)
            }
        }
    }

    /// Retarget the manager at a new broker address
    ///
    /// Disconnects first when Connected and leaves the state Disconnected so
    /// the next `ensure_connected` dials the new address immediately.
    pub async fn apply_new_server(&mut self, bus: &mut dyn MessageBus, server_address: &str) {
        if self.state == ConnectionState::Connected {
            info!(
                "Server address changed {} -> {}; disconnecting",
                self.server_address, server_address
            );
            bus.disconnect().await;
        }
        self.server_address = server_address.to_string();
        self.state = ConnectionState::Disconnected;
        // An explicit retarget should not wait out the retry interval
        self.last_attempt = None;
    }
}
