//! # Packet Classifier
//!
//! Decides what one extracted line is, by structural prefix matching.
//!
//! The receiver echoes issued radio commands back as acknowledgement lines
//! (`"> ..."` or `"-> ..."`), reports received packets as `"OK ..."` lines,
//! and occasionally emits noise (boot banners, corrupted frames). Only data
//! packets proceed to decoding; the rest are logged and dropped by the
//! bridge loop.

/// Classification of one serial line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketKind {
    /// Echo of a command sent to the receiver
    Acknowledgement,
    /// A received radio packet carrying telemetry
    Data,
    /// Anything else; dropped
    Invalid,
}

/// Classify a line by its leading bytes
///
/// Rules, checked in order:
/// 1. starts with `>` or `->` - [`PacketKind::Acknowledgement`]
/// 2. starts with `OK` - [`PacketKind::Data`]
/// 3. otherwise - [`PacketKind::Invalid`]
pub fn classify(line: &[u8]) -> PacketKind {
    if line.starts_with(b">") || line.starts_with(b"->") {
        PacketKind::Acknowledgement
    } else if line.starts_with(b"OK") {
        PacketKind::Data
    } else {
        PacketKind::Invalid
    }
}
