//! Shared fixtures for wire-level loopback tests: spinning up a real gateway listener
//! backed by an in-memory metastore, plus a minimal client-side encoder/decoder for the
//! messages these tests need to send and read. Mirrors the role of `tests/common.rs` in
//! the teacher (picking a free port, handing back a ready-to-use connection), built on
//! this gateway's own wire types instead of shelling out to `psql`.

use std::sync::Arc;

use pgguard::dispatcher::{new_cancel_map, Dispatcher};
use pgguard::error::Result;
use pgguard::executor::{ExecContext, ExecutedQuery, QueryExecutor};
use pgguard::memstore::MemStore;
use pgguard::protocol::{Message, MessageBuilder, MessageParser, Tag};
use pgguard::server::Listener;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::task::JoinHandle;

/// Records every SQL string handed to it and always answers with the same canned rows,
/// so tests can assert on exactly what the rewriter produced.
pub struct RecordingExecutor {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Option<String>>>,
    pub seen: std::sync::Mutex<Vec<String>>,
}

impl RecordingExecutor {
    pub fn new(columns: Vec<&str>, rows: Vec<Vec<Option<&str>>>) -> Self {
        RecordingExecutor {
            columns: columns.into_iter().map(String::from).collect(),
            rows: rows
                .into_iter()
                .map(|row| row.into_iter().map(|v| v.map(String::from)).collect())
                .collect(),
            seen: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn last_sql(&self) -> String {
        self.seen.lock().unwrap().last().cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl QueryExecutor for RecordingExecutor {
    async fn execute(&self, _ctx: &ExecContext, _principal: &str, sql: &str) -> Result<ExecutedQuery> {
        self.seen.lock().unwrap().push(sql.to_string());
        Ok(ExecutedQuery { columns: self.columns.clone(), rows: self.rows.clone() })
    }
}

/// An executor that never resolves until cancelled, so tests can exercise `CancelRequest`
/// against a query that's still in flight.
pub struct HangingExecutor;

#[async_trait::async_trait]
impl QueryExecutor for HangingExecutor {
    async fn execute(&self, ctx: &ExecContext, _principal: &str, _sql: &str) -> Result<ExecutedQuery> {
        ctx.cancelled().await;
        Err(pgguard::error::Error::cancelled("query canceled"))
    }
}

/// Binds the gateway on an ephemeral loopback port and starts serving in the background.
/// Returns the listen address, a shutdown sender, and the serve task's handle.
pub async fn spawn_gateway(
    store: Arc<MemStore>,
    executor: Arc<dyn QueryExecutor>,
) -> (String, watch::Sender<()>, JoinHandle<Vec<JoinHandle<()>>>) {
    let dispatcher = Arc::new(Dispatcher {
        principals: store.clone(),
        groups: store.clone(),
        grants: store.clone(),
        row_filters: store.clone(),
        column_masks: store.clone(),
        introspection: store.clone(),
        audit: store.clone(),
        executor,
        cancel_map: new_cancel_map(),
    });

    let listener = Listener::bind("127.0.0.1:0").await.expect("bind ephemeral port");
    let address = listener.local_address().to_string();
    let (shutdown_tx, shutdown_rx) = watch::channel(());
    let serve_handle = tokio::spawn(listener.serve(dispatcher, shutdown_rx));
    (address, shutdown_tx, serve_handle)
}

/// Connects, sends a v3 startup packet for `user`, and drains the negotiation response
/// through `ReadyForQuery`.
pub async fn connect(address: &str, user: &str) -> (TcpStream, MessageParser) {
    let mut stream = TcpStream::connect(address).await.expect("connect");
    let mut body = Vec::new();
    body.extend_from_slice(&196608i32.to_be_bytes());
    body.extend_from_slice(b"user\0");
    body.extend_from_slice(user.as_bytes());
    body.push(0);
    body.push(0);
    let mut packet = Vec::new();
    packet.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    packet.extend_from_slice(&body);
    stream.write_all(&packet).await.expect("write startup");

    let mut parser = MessageParser::new();
    read_until_ready(&mut stream, &mut parser).await;
    (stream, parser)
}

/// Like `connect`, but also returns the `(process_id, secret_key)` pair the server handed
/// back in `BackendKeyData`, for tests that need to send a matching `CancelRequest`.
pub async fn connect_capturing_key(address: &str, user: &str) -> (TcpStream, MessageParser, (i32, i32)) {
    let mut stream = TcpStream::connect(address).await.expect("connect");
    let mut body = Vec::new();
    body.extend_from_slice(&196608i32.to_be_bytes());
    body.extend_from_slice(b"user\0");
    body.extend_from_slice(user.as_bytes());
    body.push(0);
    body.push(0);
    let mut packet = Vec::new();
    packet.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    packet.extend_from_slice(&body);
    stream.write_all(&packet).await.expect("write startup");

    let mut parser = MessageParser::new();
    let messages = read_until_ready(&mut stream, &mut parser).await;
    let key_msg = messages
        .into_iter()
        .find(|m| m.tag() == Tag::BACKEND_KEY_DATA)
        .expect("server must send BackendKeyData during startup");
    let body = key_msg.body();
    let process_id = i32::from_be_bytes([body[0], body[1], body[2], body[3]]);
    let secret_key = i32::from_be_bytes([body[4], body[5], body[6], body[7]]);
    (stream, parser, (process_id, secret_key))
}

/// Sends a raw `CancelRequest` on a fresh connection targeting `backend_key`, as real
/// client libraries do (the cancel side-channel is never the query's own socket).
pub async fn send_cancel_request(address: &str, backend_key: (i32, i32)) {
    let mut sock = TcpStream::connect(address).await.expect("connect for cancel");
    let mut body = Vec::new();
    body.extend_from_slice(&80877102i32.to_be_bytes());
    body.extend_from_slice(&backend_key.0.to_be_bytes());
    body.extend_from_slice(&backend_key.1.to_be_bytes());
    let mut packet = Vec::new();
    packet.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
    packet.extend_from_slice(&body);
    sock.write_all(&packet).await.expect("write cancel request");
}

pub async fn send_simple_query(stream: &mut TcpStream, sql: &str) {
    let mut builder = MessageBuilder::new(Tag::QUERY);
    builder.write_str(sql);
    stream.write_all(builder.finish().as_bytes()).await.expect("write query");
}

/// Reads raw messages off the wire until (and including) a `ReadyForQuery`, or the
/// connection closes.
pub async fn read_until_ready(stream: &mut TcpStream, parser: &mut MessageParser) -> Vec<Message> {
    let mut out = Vec::new();
    loop {
        while let Some(msg) = parser.next().expect("parse frame") {
            let is_ready = msg.tag() == Tag::READY_FOR_QUERY;
            out.push(msg);
            if is_ready {
                return out;
            }
        }
        let mut buf = [0u8; 8192];
        let n = stream.read(&mut buf).await.expect("read socket");
        if n == 0 {
            return out;
        }
        parser.bytes_mut().extend_from_slice(&buf[..n]);
    }
}
