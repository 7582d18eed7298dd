//! # emon-bridge Library
//!
//! Bridge RFM69 power-metering serial telemetry to MQTT.
//!
//! This library provides the core functionality for reading the line-oriented
//! protocol of an RFM69 energy-monitor receiver, decoding its packets into
//! typed telemetry, and republishing the fields on an MQTT bus under
//! live-editable, persisted topic routing.

pub mod config;
pub mod error;
pub mod protocol;
pub mod bus;
pub mod serial;
pub mod registry;
pub mod bridge;
