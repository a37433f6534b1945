//! Per-connection startup negotiation and message loop (§4.1). One task per accepted
//! connection; work on a connection is strictly sequential (§5).

use std::sync::Arc;

use rand::RngCore;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::info_span;

use crate::pgguard::dispatcher::{BackendKey, Dispatcher};
use crate::pgguard::error::{Error, Result};
use crate::pgguard::protocol::{
    decode_param, quote_literal, FormatCode, Message, MessageBuilder, MessageParser, MessageReader,
    StartupParams, Tag, CANCEL_REQUEST_CODE, PROTOCOL_VERSION_3, SSL_NOT_ALLOWED, SSL_REQUEST_CODE,
};

/// Extended-query state for the unnamed statement/unnamed portal (the only slots this
/// gateway supports).
#[derive(Default)]
struct ExtendedState {
    statement_sql: Option<String>,
    param_oids: Vec<i32>,
    bound_sql: Option<String>,
}

pub async fn handle_connection(mut socket: TcpStream, dispatcher: Arc<Dispatcher>) -> Result<()> {
    let mut parser = MessageParser::new();

    let backend_key = match negotiate_startup(&mut socket, &mut parser, &dispatcher).await? {
        Some((principal, key)) => {
            run_message_loop(&mut socket, &mut parser, &dispatcher, &principal, key).await?;
            key
        }
        None => return Ok(()), // cancel request handled; connection closes without a reply
    };

    dispatcher.cancel_map.lock().await.remove(&backend_key);
    Ok(())
}

/// Handles SSLRequest negotiation and the startup packet, returning `(principal, backend_key)`
/// for a real connection, or `None` if this socket turned out to be a cancel side-channel
/// (which never proceeds to the message loop).
async fn negotiate_startup(
    socket: &mut TcpStream,
    parser: &mut MessageParser,
    dispatcher: &Dispatcher,
) -> Result<Option<(String, BackendKey)>> {
    loop {
        fill_at_least(socket, parser, 8).await?;
        let (len, code) = MessageParser::peek_startup_header(parser.bytes_mut())?
            .expect("fill_at_least guarantees 8 bytes are buffered");

        if code == SSL_REQUEST_CODE {
            parser.advance(8);
            socket.write_all(&[SSL_NOT_ALLOWED]).await?;
            continue;
        }

        if code == CANCEL_REQUEST_CODE {
            fill_at_least(socket, parser, 16).await?;
            parser.advance(8);
            let payload = take_exact(parser, 8);
            let mut reader = MessageReader::from_slice(&payload);
            let process_id = reader.read_i32()?;
            let secret_key = reader.read_i32()?;
            if let Some(handle) = dispatcher.cancel_map.lock().await.get(&(process_id, secret_key)) {
                handle.fire();
            }
            return Ok(None);
        }

        if code == PROTOCOL_VERSION_3 {
            let payload_len = len as usize - 8;
            fill_at_least(socket, parser, 8 + payload_len).await?;
            parser.advance(8);
            let payload = take_exact(parser, payload_len);
            let mut reader = MessageReader::from_slice(&payload);
            let pairs = reader.read_cstr_pairs()?;
            let params = match StartupParams::parse(pairs) {
                Ok(params) => params,
                Err(e) => {
                    socket.write_all(error_response(&e).as_bytes()).await?;
                    return Err(e);
                }
            };

            let backend_key = random_backend_key();
            send_startup_response(socket, &params, backend_key).await?;
            return Ok(Some((params.user().to_string(), backend_key)));
        }

        return Err(Error::not_implemented(format!("unsupported startup code {code}")));
    }
}

async fn send_startup_response(
    socket: &mut TcpStream,
    _params: &StartupParams,
    backend_key: BackendKey,
) -> Result<()> {
    let auth_ok = MessageBuilder::new(Tag::AUTHENTICATION).write_i32(0).finish();
    let server_version = parameter_status("server_version", "16.0");
    let client_encoding = parameter_status("client_encoding", "UTF8");
    let mut key_data = MessageBuilder::new(Tag::BACKEND_KEY_DATA);
    key_data.write_i32(backend_key.0).write_i32(backend_key.1);
    let ready = ready_for_query();

    socket.write_all(auth_ok.as_bytes()).await?;
    socket.write_all(server_version.as_bytes()).await?;
    socket.write_all(client_encoding.as_bytes()).await?;
    socket.write_all(key_data.finish().as_bytes()).await?;
    socket.write_all(ready.as_bytes()).await?;
    Ok(())
}

fn parameter_status(name: &str, value: &str) -> Message {
    let mut b = MessageBuilder::new(Tag::PARAMETER_STATUS);
    b.write_str(name).write_str(value);
    b.finish()
}

fn ready_for_query() -> Message {
    MessageBuilder::new(Tag::READY_FOR_QUERY).write_byte(b'I').finish()
}

/// 62 bits of randomness, never zero (§9 design note).
fn random_backend_key() -> BackendKey {
    let mut rng = rand::thread_rng();
    loop {
        let process_id = (rng.next_u32() & 0x7FFF_FFFF) as i32;
        let secret_key = (rng.next_u32() & 0x7FFF_FFFF) as i32;
        if process_id != 0 || secret_key != 0 {
            return (process_id, secret_key);
        }
    }
}

async fn run_message_loop(
    socket: &mut TcpStream,
    parser: &mut MessageParser,
    dispatcher: &Dispatcher,
    principal: &str,
    backend_key: BackendKey,
) -> Result<()> {
    let mut extended = ExtendedState::default();
    let mut error_state = false;

    loop {
        let msg = match read_message(socket, parser).await? {
            Some(m) => m,
            None => return Ok(()), // client closed the connection
        };

        let span = info_span!("message", tag = %msg.tag());
        let _enter = span.enter();

        match msg.tag() {
            Tag::TERMINATE => return Ok(()),
            Tag::QUERY => {
                error_state = false;
                handle_simple_query(socket, dispatcher, principal, backend_key, &msg).await?;
            }
            Tag::SYNC => {
                error_state = false;
                socket.write_all(ready_for_query().as_bytes()).await?;
            }
            Tag::FLUSH => {}
            _ if error_state => {
                // Extended protocol error state: discard until Sync.
            }
            Tag::PARSE => {
                if let Err(e) = handle_parse(&msg, &mut extended) {
                    error_state = true;
                    socket.write_all(error_response(&e).as_bytes()).await?;
                } else {
                    socket.write_all(MessageBuilder::new(Tag::PARSE_COMPLETE).finish().as_bytes()).await?;
                }
            }
            Tag::BIND => {
                if let Err(e) = handle_bind(&msg, &mut extended) {
                    error_state = true;
                    socket.write_all(error_response(&e).as_bytes()).await?;
                } else {
                    socket.write_all(MessageBuilder::new(Tag::BIND_COMPLETE).finish().as_bytes()).await?;
                }
            }
            Tag::DESCRIBE => {
                handle_describe(socket, &msg, &extended).await?;
            }
            Tag::EXECUTE => {
                match dispatch_extended(socket, dispatcher, principal, backend_key, &extended).await {
                    Ok(()) => {}
                    Err(e) => {
                        error_state = true;
                        socket.write_all(error_response(&e).as_bytes()).await?;
                    }
                }
            }
            Tag::CLOSE => {
                extended = ExtendedState::default();
                socket.write_all(MessageBuilder::new(Tag::CLOSE_COMPLETE).finish().as_bytes()).await?;
            }
            _ => {
                let err = Error::not_implemented(format!("unhandled message tag {}", msg.tag()));
                socket.write_all(error_response(&err).as_bytes()).await?;
                socket.write_all(ready_for_query().as_bytes()).await?;
            }
        }
    }
}

async fn handle_simple_query(
    socket: &mut TcpStream,
    dispatcher: &Dispatcher,
    principal: &str,
    backend_key: BackendKey,
    msg: &Message,
) -> Result<()> {
    let body = msg.body();
    let sql = std::str::from_utf8(&body[..body.len().saturating_sub(1)])
        .map_err(|e| Error::validation(e.to_string()))?;

    match dispatcher.dispatch(backend_key, principal, sql).await {
        Ok(result) => {
            write_result(socket, &result).await?;
            let tag = crate::pgguard::query_type::command_tag(
                crate::pgguard::query_type::QueryType::from(sql),
                result.rows.len(),
            );
            socket
                .write_all(MessageBuilder::new(Tag::COMMAND_COMPLETE).write_str(&tag).finish().as_bytes())
                .await?;
        }
        Err(e) => {
            socket.write_all(error_response(&e).as_bytes()).await?;
        }
    }
    socket.write_all(ready_for_query().as_bytes()).await?;
    Ok(())
}

async fn dispatch_extended(
    socket: &mut TcpStream,
    dispatcher: &Dispatcher,
    principal: &str,
    backend_key: BackendKey,
    extended: &ExtendedState,
) -> Result<()> {
    let sql = extended
        .bound_sql
        .as_ref()
        .or(extended.statement_sql.as_ref())
        .ok_or_else(|| Error::validation("Execute without a prior Bind"))?;
    let result = dispatcher.dispatch(backend_key, principal, sql).await?;
    write_result(socket, &result).await?;
    let tag = crate::pgguard::query_type::command_tag(
        crate::pgguard::query_type::QueryType::from(sql.as_str()),
        result.rows.len(),
    );
    socket
        .write_all(MessageBuilder::new(Tag::COMMAND_COMPLETE).write_str(&tag).finish().as_bytes())
        .await?;
    Ok(())
}

async fn write_result(socket: &mut TcpStream, result: &crate::pgguard::executor::ExecutedQuery) -> Result<()> {
    let mut row_desc = MessageBuilder::new(Tag::ROW_DESCRIPTION);
    row_desc.write_i16(result.columns.len() as i16);
    for name in &result.columns {
        row_desc
            .write_str(name)
            .write_i32(0) // table_oid
            .write_i16(0) // attno
            .write_i32(25) // type_oid: text
            .write_i16(-1) // type_len
            .write_i32(-1) // type_mod
            .write_i16(0); // format_code: text
    }
    socket.write_all(row_desc.finish().as_bytes()).await?;

    for row in &result.rows {
        let mut data_row = MessageBuilder::new(Tag::DATA_ROW);
        data_row.write_i16(row.len() as i16);
        for value in row {
            data_row.write_value(value.as_deref());
        }
        socket.write_all(data_row.finish().as_bytes()).await?;
    }
    Ok(())
}

fn handle_parse(msg: &Message, extended: &mut ExtendedState) -> Result<()> {
    let mut reader = MessageReader::from_slice(msg.body());
    let statement_name = reader.read_cstr()?;
    if !statement_name.is_empty() {
        return Err(Error::not_implemented("only the unnamed prepared statement is supported"));
    }
    let query = reader.read_cstr()?.to_string();
    let num_params = reader.read_i16()?;
    let mut param_oids = Vec::with_capacity(num_params.max(0) as usize);
    for _ in 0..num_params {
        param_oids.push(reader.read_i32()?);
    }
    extended.statement_sql = Some(query);
    extended.param_oids = param_oids;
    extended.bound_sql = None;
    Ok(())
}

fn handle_bind(msg: &Message, extended: &mut ExtendedState) -> Result<()> {
    let mut reader = MessageReader::from_slice(msg.body());
    let portal_name = reader.read_cstr()?;
    if !portal_name.is_empty() {
        return Err(Error::not_implemented("only the unnamed portal is supported"));
    }
    let statement_name = reader.read_cstr()?;
    if !statement_name.is_empty() {
        return Err(Error::not_implemented("only the unnamed prepared statement is supported"));
    }

    let num_format_codes = reader.read_i16()?;
    let mut format_codes = Vec::with_capacity(num_format_codes.max(0) as usize);
    for _ in 0..num_format_codes {
        format_codes.push(reader.read_i16()?);
    }

    let num_params = reader.read_i16()?;
    let statement_sql = extended
        .statement_sql
        .clone()
        .ok_or_else(|| Error::validation("Bind without a prior Parse"))?;

    let mut literals = Vec::with_capacity(num_params.max(0) as usize);
    for i in 0..num_params as usize {
        let len = reader.read_i32()?;
        let value = if len < 0 { None } else { Some(reader.read_bytes(len as usize)?) };
        let code = if format_codes.is_empty() {
            0
        } else if format_codes.len() == 1 {
            format_codes[0]
        } else {
            *format_codes.get(i).unwrap_or(&0)
        };
        let format = FormatCode::from_i16(code)?;
        let oid = extended.param_oids.get(i).copied().unwrap_or(0);
        literals.push(decode_param(format, oid, value)?);
    }

    extended.bound_sql = Some(substitute_params(&statement_sql, &literals));
    Ok(())
}

/// Replaces `$N` placeholders from the highest index downward so `$1` never matches as a
/// prefix of `$10`.
fn substitute_params(sql: &str, literals: &[String]) -> String {
    let mut out = sql.to_string();
    for (i, literal) in literals.iter().enumerate().rev() {
        let token = format!("${}", i + 1);
        out = out.replace(&token, literal);
    }
    out
}

async fn handle_describe(socket: &mut TcpStream, msg: &Message, extended: &ExtendedState) -> Result<()> {
    let mut reader = MessageReader::from_slice(msg.body());
    let target = reader.read_byte()?;
    let _name = reader.read_cstr()?;

    if target == b'S' {
        let mut desc = MessageBuilder::new(Tag::PARAMETER_DESCRIPTION);
        desc.write_i16(extended.param_oids.len() as i16);
        for oid in &extended.param_oids {
            desc.write_i32(*oid);
        }
        socket.write_all(desc.finish().as_bytes()).await?;
    }
    socket.write_all(MessageBuilder::new(Tag::NO_DATA).finish().as_bytes()).await?;
    Ok(())
}

fn error_response(err: &Error) -> Message {
    let mut b = MessageBuilder::new(Tag::ERROR_RESPONSE);
    b.write_byte(b'S').write_str("ERROR");
    b.write_byte(b'C').write_str(err.sqlstate());
    b.write_byte(b'M').write_str(&err.to_string());
    b.write_byte(0);
    b.finish()
}

async fn read_message(socket: &mut TcpStream, parser: &mut MessageParser) -> Result<Option<Message>> {
    loop {
        if let Some(msg) = parser.next()? {
            return Ok(Some(msg));
        }
        let mut buf = [0u8; 8192];
        let n = socket.read(&mut buf).await?;
        if n == 0 {
            return Ok(None);
        }
        parser.bytes_mut().extend_from_slice(&buf[..n]);
    }
}

async fn fill_at_least(socket: &mut TcpStream, parser: &mut MessageParser, n: usize) -> Result<()> {
    while parser.bytes_mut().len() < n {
        let mut buf = [0u8; 8192];
        let read = socket.read(&mut buf).await?;
        if read == 0 {
            return Err(Error::validation("connection closed during startup"));
        }
        parser.bytes_mut().extend_from_slice(&buf[..read]);
    }
    Ok(())
}

fn take_exact(parser: &mut MessageParser, n: usize) -> Vec<u8> {
    let bytes = parser.bytes_mut();
    let taken = bytes[..n].to_vec();
    parser.advance(n);
    taken
}
