use crate::pgguard::error::{Error, Result};

use super::Message;

/// Sequential reader over a `Message`'s body, mirroring `riverdb::pg::protocol::MessageReader`.
/// Every `read_*` that can run past the end of the buffer returns a `Result` instead of the
/// teacher's "return 0 and check has_error() later" convention — we don't need the extra
/// speed that style buys and it's easy to get wrong when adapting new call sites.
pub struct MessageReader<'a> {
    body: &'a [u8],
    pos: usize,
}

impl<'a> MessageReader<'a> {
    pub fn new(msg: &'a Message) -> Self {
        MessageReader { body: msg.body(), pos: 0 }
    }

    pub fn from_slice(body: &'a [u8]) -> Self {
        MessageReader { body, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.body.len() - self.pos
    }

    pub fn read_byte(&mut self) -> Result<u8> {
        let b = *self
            .body
            .get(self.pos)
            .ok_or_else(|| Error::parse_error("truncated message"))?;
        self.pos += 1;
        Ok(b)
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        let bytes = self.read_bytes(2)?;
        Ok(i16::from_be_bytes([bytes[0], bytes[1]]))
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        let bytes = self.read_bytes(4)?;
        Ok(i32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if self.remaining() < len {
            return Err(Error::parse_error("truncated message"));
        }
        let slice = &self.body[self.pos..self.pos + len];
        self.pos += len;
        Ok(slice)
    }

    pub fn read_to_end(&mut self) -> &'a [u8] {
        let slice = &self.body[self.pos..];
        self.pos = self.body.len();
        slice
    }

    /// Reads a single NUL-terminated string.
    pub fn read_cstr(&mut self) -> Result<&'a str> {
        let rest = &self.body[self.pos..];
        let idx = memchr::memchr(0, rest).ok_or_else(|| Error::parse_error("unterminated string"))?;
        let s = std::str::from_utf8(&rest[..idx]).map_err(|e| Error::parse_error(e.to_string()))?;
        self.pos += idx + 1;
        Ok(s)
    }

    /// Reads a NUL-separated list of key/value string pairs, up to and including the
    /// final empty-string terminator of the startup packet payload.
    pub fn read_cstr_pairs(&mut self) -> Result<Vec<(String, String)>> {
        let mut pairs = Vec::new();
        loop {
            let key = self.read_cstr()?;
            if key.is_empty() {
                break;
            }
            let value = self.read_cstr()?;
            pairs.push((key.to_string(), value.to_string()));
        }
        Ok(pairs)
    }
}
