//! Postgres wire protocol v3 framing: tags, message framing, a streaming parser, an
//! outbound builder, a sequential body reader, startup-packet parsing, and bind-parameter
//! decoding. Mirrors the layout of `riverdb::pg::protocol`.

mod builder;
mod message;
mod parser;
mod params;
mod reader;
mod startup;
mod tag;

pub use builder::MessageBuilder;
pub use message::Message;
pub use parser::{MessageParser, MIN_FRAME_LEN};
pub use params::{decode_param, quote_literal, FormatCode};
pub use reader::MessageReader;
pub use startup::StartupParams;
pub use tag::{
    Tag, CANCEL_REQUEST_CODE, PROTOCOL_VERSION_3, SSL_ALLOWED, SSL_NOT_ALLOWED, SSL_REQUEST_CODE,
};
