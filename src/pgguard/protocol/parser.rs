use bytes::{Buf, BytesMut};

use crate::pgguard::error::{Error, Result};

use super::Message;

/// Minimum length of a tagged frame header: 1 tag byte + 4-byte length.
pub const MIN_FRAME_LEN: usize = 5;

/// Splits a growing recv buffer into complete framed `Message`s, mirroring
/// `riverdb::pg::protocol::message_parser::MessageParser`.
pub struct MessageParser {
    data: BytesMut,
}

impl MessageParser {
    pub fn new() -> Self {
        MessageParser { data: BytesMut::with_capacity(8 * 1024) }
    }

    pub fn bytes_mut(&mut self) -> &mut BytesMut {
        &mut self.data
    }

    /// Returns the next complete message buffered so far, or `None` if more bytes from
    /// the socket are needed. The length field in the wire protocol includes itself but
    /// not the tag byte, so the total frame length is `length + 1`.
    pub fn next(&mut self) -> Result<Option<Message>> {
        if self.data.len() < MIN_FRAME_LEN {
            return Ok(None);
        }
        let tag = self.data[0];
        let len = i32::from_be_bytes([self.data[1], self.data[2], self.data[3], self.data[4]]);
        if len < 4 {
            return Err(Error::validation(format!(
                "malformed message length {len} for tag '{}'",
                tag as char
            )));
        }
        let frame_len = len as usize + 1;
        if self.data.len() < frame_len {
            self.data.reserve(frame_len - self.data.len());
            return Ok(None);
        }
        let frame = self.data.split_to(frame_len).freeze();
        Ok(Some(Message::new(frame)))
    }

    /// Parses the 8-byte startup header (no tag byte, protocol code instead of a type).
    /// Returns `(declared_length, code)`.
    pub fn peek_startup_header(buf: &[u8]) -> Result<Option<(i32, i32)>> {
        if buf.len() < 8 {
            return Ok(None);
        }
        let len = i32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let code = i32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        if len < 8 {
            return Err(Error::validation("malformed startup message length"));
        }
        Ok(Some((len, code)))
    }

    pub fn advance(&mut self, n: usize) {
        self.data.advance(n);
    }
}

impl Default for MessageParser {
    fn default() -> Self {
        Self::new()
    }
}
