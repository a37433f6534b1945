use bytes::Bytes;

use super::Tag;

/// A single framed wire-protocol message: `tag (u8) || length (i32 BE, includes itself) || body`.
/// `Message` owns the whole frame including the tag byte so it can be freed without copying
/// out of the read buffer (the parser `split_to`s it off a `BytesMut`).
#[derive(Clone)]
pub struct Message {
    data: Bytes,
}

impl Message {
    pub fn new(data: Bytes) -> Self {
        Message { data }
    }

    pub fn tag(&self) -> Tag {
        Tag(self.data[0])
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// The message body, i.e. everything after the tag byte and the 4-byte length.
    pub fn body(&self) -> &[u8] {
        &self.data[5..]
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Bytes {
        self.data
    }
}

impl std::fmt::Debug for Message {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Message{{tag: {}, len: {}}}", self.tag(), self.len())
    }
}
