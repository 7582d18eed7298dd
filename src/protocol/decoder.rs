//! # Packet Decoder
//!
//! Parses a classified data packet into typed telemetry.
//!
//! Wire format (space-separated ASCII tokens, fixed positions):
//!
//! ```text
//! OK <nodeId> <powerLSB> <powerMSB> <vrmsLSB> <vrmsMSB> (<rssi>)
//! ```
//!
//! Power and Vrms each arrive as two byte-valued tokens, least significant
//! first. Power is `msb * 256 + lsb` watts; Vrms is the same pair scaled by
//! 1/100 to volts. RSSI is the decimal integer between the first `(` and the
//! following `)`.
//!
//! Short packets and non-numeric node/power/vrms tokens are rejected with a
//! [`DecodeError`] instead of silently defaulting to zero. The one lenient
//! spot is RSSI: older receiver firmware omits the `(rssi)` group entirely,
//! so a missing or malformed group decodes as 0.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Token count up to and including the Vrms MSB; the RSSI group is optional
const MIN_TOKEN_COUNT: usize = 6;

/// Decoded telemetry from one data packet
#[derive(Debug, Clone, PartialEq)]
pub struct Telemetry {
    /// Radio node id of the transmitter
    pub node_id: u32,
    /// Real power in watts
    pub power_watts: u32,
    /// RMS mains voltage in volts
    pub vrms_volts: f64,
    /// Received signal strength in dB
    pub rssi_db: i32,
    /// Moment the packet was decoded
    pub observed_at: DateTime<Utc>,
}

/// Why a data packet failed to decode
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Line did not carry the `OK` leader in token position 0
    #[error("not a data packet")]
    NotDataPacket,

    /// Fewer space-separated tokens than the wire format requires
    #[error("short packet: expected at least {MIN_TOKEN_COUNT} tokens, got {got}")]
    ShortPacket {
        /// Tokens actually present
        got: usize,
    },

    /// A required numeric token failed to parse
    #[error("invalid {field} token: {value:?}")]
    InvalidToken {
        /// Which wire field was malformed
        field: &'static str,
        /// The offending token text
        value: String,
    },

    /// Line contained bytes outside ASCII/UTF-8
    #[error("packet is not valid UTF-8")]
    InvalidUtf8,
}

/// Decode one classified data packet into [`Telemetry`]
///
/// # Arguments
///
/// * `line` - A line the classifier reported as a data packet, without the
///   trailing delimiter
///
/// # Errors
///
/// Returns [`DecodeError`] for short packets, non-numeric node/power/vrms
/// tokens, or non-UTF-8 content. Never panics on malformed input.
///
/// # Examples
///
/// ```
/// use emon_bridge::protocol::decode;
///
/// let telemetry = decode(b"OK 6 167 2 82 92 (-38)").unwrap();
/// assert_eq!(telemetry.node_id, 6);
/// assert_eq!(telemetry.power_watts, 679);
/// assert_eq!(telemetry.vrms_volts, 236.34);
/// assert_eq!(telemetry.rssi_db, -38);
/// ```
pub fn decode(line: &[u8]) -> Result<Telemetry, DecodeError> {
    let text = std::str::from_utf8(line).map_err(|_| DecodeError::InvalidUtf8)?;

    let tokens: Vec<&str> = text.split(' ').collect();
    if tokens.len() < MIN_TOKEN_COUNT {
        return Err(DecodeError::ShortPacket { got: tokens.len() });
    }
    if tokens[0] != "OK" {
        return Err(DecodeError::NotDataPacket);
    }

    let node_id = parse_field::<u32>("nodeId", tokens[1])?;
    let power_lsb = parse_field::<u8>("powerLSB", tokens[2])?;
    let power_msb = parse_field::<u8>("powerMSB", tokens[3])?;
    let vrms_lsb = parse_field::<u8>("vrmsLSB", tokens[4])?;
    let vrms_msb = parse_field::<u8>("vrmsMSB", tokens[5])?;

    Ok(Telemetry {
        node_id,
        power_watts: u32::from(power_msb) * 256 + u32::from(power_lsb),
        vrms_volts: f64::from(u16::from(vrms_msb) * 256 + u16::from(vrms_lsb)) / 100.0,
        rssi_db: parse_rssi(text),
        observed_at: Utc::now(),
    })
}

/// Parse one required decimal token
fn parse_field<T: std::str::FromStr>(field: &'static str, token: &str) -> Result<T, DecodeError> {
    token.parse().map_err(|_| DecodeError::InvalidToken {
        field,
        value: token.to_string(),
    })
}

/// Extract the RSSI value between the first `(` and the following `)`
///
/// The group has no positional guarantee beyond the open paren, and older
/// firmware omits it; absence or a malformed value decodes as 0.
fn parse_rssi(text: &str) -> i32 {
    let Some(open) = text.find('(') else { return 0 };
    let rest = &text[open + 1..];
    let Some(close) = rest.find(')') else { return 0 };
    rest[..close].parse().unwrap_or(0)
}
