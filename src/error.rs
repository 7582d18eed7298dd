//! # Error Types
//!
//! Custom error types for emon-bridge using `thiserror`.
//!
//! None of these are fatal to the bridge loop: frames, packets and publishes
//! that fail are logged and dropped, and the loop carries on. The single
//! fatal path is service registration at startup, which `main` handles.

use thiserror::Error;

use crate::protocol::DecodeError;

/// Main error type for emon-bridge
#[derive(Debug, Error)]
pub enum EmonBridgeError {
    /// Serial line buffer exceeded its bound without a delimiter
    #[error("frame exceeded {max} bytes without a line delimiter")]
    FrameTooLong {
        /// Configured maximum frame length
        max: usize,
    },

    /// Malformed data packet
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Publish attempted while the bus is down; messages are dropped, not queued
    #[error("not connected to the messaging bus")]
    NotConnected,

    /// A bus connection attempt failed
    #[error("connection to {address} failed: {reason}")]
    ConnectFailed {
        /// Broker address the attempt targeted
        address: String,
        /// Transport-level failure description
        reason: String,
    },

    /// Some of the per-telemetry publishes failed
    #[error("publish partially failed on topics: {}", .failed_topics.join(", "))]
    PartialPublishFailure {
        /// Topics whose individual publish reported failure
        failed_topics: Vec<String>,
    },

    /// Configuration save/load failure
    #[error("persistence error: {0}")]
    Persistence(String),

    /// Service registration (mDNS) failure
    #[error("service registration error: {0}")]
    ServiceRegistration(String),

    /// Transport-level messaging bus errors
    #[error("bus error: {0}")]
    Bus(String),

    /// Serial port errors
    #[error("serial error: {0}")]
    Serial(String),

    /// Configuration errors
    #[error("configuration error: {0}")]
    Config(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for emon-bridge
pub type Result<T> = std::result::Result<T, EmonBridgeError>;
