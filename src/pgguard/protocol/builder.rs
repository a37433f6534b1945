use bytes::{BufMut, BytesMut};

use super::{Message, Tag};

/// Builds a single outbound framed message, patching the length field in on `finish()`.
/// Mirrors `riverdb::pg::protocol::MessageBuilder`, minus the unsafe in-place length
/// patching the teacher uses for its multi-message buffers — we build one message per
/// `MessageBuilder` since the wire server never needs to batch frames before a flush.
///
/// There's no untagged variant: the only untagged thing this server ever writes is the
/// single raw `'N'` SSLRequest rejection byte, which isn't a framed message at all and is
/// written directly by the connection loop.
pub struct MessageBuilder {
    data: BytesMut,
    len_offset: usize,
}

impl MessageBuilder {
    pub fn new(tag: Tag) -> Self {
        let mut data = BytesMut::with_capacity(64);
        data.put_u8(tag.as_u8());
        data.put_i32(0); // length placeholder, patched in finish()
        MessageBuilder { data, len_offset: 1 }
    }

    pub fn write_byte(&mut self, b: u8) -> &mut Self {
        self.data.put_u8(b);
        self
    }

    pub fn write_str(&mut self, s: &str) -> &mut Self {
        self.data.extend_from_slice(s.as_bytes());
        self.data.put_u8(0);
        self
    }

    pub fn write_bytes(&mut self, bytes: &[u8]) -> &mut Self {
        self.data.extend_from_slice(bytes);
        self
    }

    pub fn write_i16(&mut self, i: i16) -> &mut Self {
        self.data.put_i16(i);
        self
    }

    pub fn write_i32(&mut self, i: i32) -> &mut Self {
        self.data.put_i32(i);
        self
    }

    /// Writes a DataRow-style length-prefixed value: -1 for NULL, else `len || bytes`.
    pub fn write_value(&mut self, value: Option<&str>) -> &mut Self {
        match value {
            None => {
                self.data.put_i32(-1);
            }
            Some(s) => {
                self.data.put_i32(s.len() as i32);
                self.data.extend_from_slice(s.as_bytes());
            }
        }
        self
    }

    pub fn finish(mut self) -> Message {
        let payload_len = (self.data.len() - self.len_offset) as i32;
        let off = self.len_offset;
        self.data[off..off + 4].copy_from_slice(&payload_len.to_be_bytes());
        Message::new(self.data.freeze())
    }
}
