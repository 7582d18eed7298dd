//! # Frame Reader
//!
//! Accumulates raw serial bytes and extracts complete CRLF-terminated lines.
//!
//! The receiver board writes one line per radio event. Reads from the port
//! arrive in arbitrary chunks, so a line (or even the two-byte delimiter
//! itself) may be split across calls. The reader buffers until a full
//! delimiter is seen, then yields the bytes before it as one [`RawLine`].

use bytes::Bytes;
use tracing::warn;

use crate::error::{EmonBridgeError, Result};

/// Line delimiter emitted by the receiver firmware
pub const LINE_DELIMITER: &[u8] = b"\r\n";

/// Default bound on the line buffer
///
/// Real packets are under 40 bytes; anything approaching this bound means the
/// serial source is misbehaving (wrong baud rate, noise) and the buffer is
/// discarded rather than grown without limit.
pub const MAX_FRAME_LEN: usize = 512;

/// One delimiter-terminated line extracted from the serial stream
///
/// Immutable; created by [`FrameReader::feed`], consumed once by the
/// classifier, then discarded.
pub type RawLine = Bytes;

/// Serial line framer
///
/// Feed it byte chunks in any split; the sequence of lines produced is
/// identical to feeding the same bytes in one contiguous call.
#[derive(Debug)]
pub struct FrameReader {
    /// Bytes received but not yet terminated by a delimiter
    buffer: Vec<u8>,
    /// Buffer bound; exceeding it discards the buffer with `FrameTooLong`
    max_frame_len: usize,
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new(MAX_FRAME_LEN)
    }
}

impl FrameReader {
    /// Create a frame reader with the given buffer bound
    pub fn new(max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            max_frame_len,
        }
    }

    /// Append incoming bytes and extract every complete line
    ///
    /// # Arguments
    ///
    /// * `bytes` - Next chunk read from the serial source (may be empty)
    ///
    /// # Returns
    ///
    /// * `Result<Vec<RawLine>>` - All lines completed by this chunk, oldest
    ///   first. Partial trailing data is retained for the next call.
    ///
    /// # Errors
    ///
    /// Returns `FrameTooLong` if the unterminated residue exceeds the bound.
    /// The residue is discarded first, so the reader stays usable; the caller
    /// logs and continues. Lines completed by this chunk are always yielded:
    /// when a call both completes lines and overflows, the lines are
    /// returned and the discarded residue is only logged, so no terminated
    /// line is ever lost to an overflow arriving in the same read.
    ///
    /// # Examples
    ///
    /// ```
    /// use emon_bridge::protocol::FrameReader;
    ///
    /// let mut reader = FrameReader::default();
    /// assert!(reader.feed(b"OK 6 167 2 82 92 ").unwrap().is_empty());
    /// let lines = reader.feed(b"(-38)\r\n").unwrap();
    /// assert_eq!(&lines[0][..], b"OK 6 167 2 82 92 (-38)");
    /// ```
    pub fn feed(&mut self, bytes: &[u8]) -> Result<Vec<RawLine>> {
        self.buffer.extend_from_slice(bytes);

        let mut lines = Vec::new();
        while let Some(pos) = find_delimiter(&self.buffer) {
            let mut line: Vec<u8> = self.buffer.drain(..pos + LINE_DELIMITER.len()).collect();
            line.truncate(pos);
            lines.push(Bytes::from(line));
        }

        if self.buffer.len() > self.max_frame_len {
            warn!(
                "Discarding {} buffered bytes with no line delimiter",
                self.buffer.len()
            );
            self.buffer.clear();
            if lines.is_empty() {
                return Err(EmonBridgeError::FrameTooLong {
                    max: self.max_frame_len,
                });
            }
        }

        Ok(lines)
    }

    /// Number of bytes currently buffered awaiting a delimiter
    pub fn pending_len(&self) -> usize {
        self.buffer.len()
    }
}

/// Find the start of the first full delimiter in `buf`, if any
fn find_delimiter(buf: &[u8]) -> Option<usize> {
    buf.windows(LINE_DELIMITER.len())
        .position(|w| w == LINE_DELIMITER)
}
