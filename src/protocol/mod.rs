//! # Receiver Protocol Module
//!
//! Implementation of the line-oriented serial protocol spoken by the RFM69
//! receiver board.
//!
//! This module handles:
//! - Extracting CRLF-terminated lines from the raw byte stream
//! - Classifying lines into command acknowledgements, data packets and garbage
//! - Decoding data packets into typed telemetry (node id, power, Vrms, RSSI)

pub mod classifier;
pub mod decoder;
pub mod framer;

pub use classifier::{classify, PacketKind};
pub use decoder::{decode, DecodeError, Telemetry};
pub use framer::{FrameReader, RawLine};
