//! Newline-delimited JSON framing
//!
//! A frame is the JSON text of `[kind, payload]` followed by a single
//! `\n`. serde_json escapes control characters inside strings, so the
//! delimiter can never occur inside a serialized frame.

use bytes::{Buf, BytesMut};
use serde_json::Value;

use super::message::Command;
use crate::error::CollectiveError;

/// Reserved frame delimiter, guaranteed absent from the serialization.
pub const DELIMITER: u8 = b'\n';

/// Encode one command into a self-delimiting frame.
pub fn encode_frame(command: &Command) -> Vec<u8> {
    let mut frame = command.to_wire().to_string().into_bytes();
    frame.push(DELIMITER);
    frame
}

/// Incremental decoder over a raw byte stream.
///
/// Feed it arbitrary chunks (partial frames, several frames at once);
/// drain complete commands with [`FrameDecoder::next_frame`]. Unconsumed
/// bytes are retained for the next read. A malformed frame is fatal for
/// the connection that produced it, not for the process.
#[derive(Debug, Default)]
pub struct FrameDecoder {
    buf: BytesMut,
}

impl FrameDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append freshly-read bytes to the buffer.
    pub fn extend(&mut self, chunk: &[u8]) {
        self.buf.extend_from_slice(chunk);
    }

    /// Pop the next complete command, or `None` if no full frame is
    /// buffered yet.
    pub fn next_frame(&mut self) -> Result<Option<Command>, CollectiveError> {
        let Some(pos) = self.buf.iter().position(|&b| b == DELIMITER) else {
            return Ok(None);
        };

        let frame = self.buf.split_to(pos);
        self.buf.advance(1);

        let value: Value = serde_json::from_slice(&frame)
            .map_err(|e| CollectiveError::Protocol(format!("malformed frame: {e}")))?;
        Command::from_wire(value).map(Some)
    }
}
