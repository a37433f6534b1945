//! Bind-parameter decoding (§4.2): turns wire-format parameter values (text or binary,
//! per a declared OID) into the SQL literal text substituted into `$N` placeholders.

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, Timelike};

use crate::pgguard::error::{Error, Result};

// Well-known type OIDs this server understands in binary format.
pub const OID_BOOL: i32 = 16;
pub const OID_INT8: i32 = 20;
pub const OID_INT2: i32 = 21;
pub const OID_INT4: i32 = 23;
pub const OID_TEXT: i32 = 25;
pub const OID_FLOAT4: i32 = 700;
pub const OID_FLOAT8: i32 = 701;
pub const OID_CHAR_BPCHAR: i32 = 18;
pub const OID_NAME: i32 = 19;
pub const OID_VARCHAR: i32 = 1043;
pub const OID_DATE: i32 = 1082;
pub const OID_TIMESTAMP: i32 = 1114;
pub const OID_TIMESTAMPTZ: i32 = 1184;
pub const OID_NUMERIC: i32 = 1700;
pub const OID_UUID: i32 = 2950;

/// 0 = text, 1 = binary; any other value is a protocol violation.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum FormatCode {
    Text,
    Binary,
}

impl FormatCode {
    pub fn from_i16(code: i16) -> Result<Self> {
        match code {
            0 => Ok(FormatCode::Text),
            1 => Ok(FormatCode::Binary),
            other => Err(Error::not_implemented(format!("unsupported format code {other}"))),
        }
    }
}

/// Decodes one bind parameter value into the SQL literal text it should be substituted
/// as. `value` is `None` for a SQL NULL (wire length -1).
pub fn decode_param(format: FormatCode, oid: i32, value: Option<&[u8]>) -> Result<String> {
    let Some(bytes) = value else {
        return Ok("NULL".to_string());
    };
    match format {
        FormatCode::Text => {
            let s = std::str::from_utf8(bytes).map_err(|e| Error::validation(e.to_string()))?;
            Ok(quote_literal(s))
        }
        FormatCode::Binary => decode_binary(oid, bytes),
    }
}

fn decode_binary(oid: i32, bytes: &[u8]) -> Result<String> {
    match oid {
        OID_BOOL => {
            expect_len(bytes, 1, oid)?;
            Ok(if bytes[0] != 0 { "TRUE".to_string() } else { "FALSE".to_string() })
        }
        OID_INT2 => {
            expect_len(bytes, 2, oid)?;
            Ok(i16::from_be_bytes(bytes.try_into().unwrap()).to_string())
        }
        OID_INT4 => {
            expect_len(bytes, 4, oid)?;
            Ok(i32::from_be_bytes(bytes.try_into().unwrap()).to_string())
        }
        OID_INT8 => {
            expect_len(bytes, 8, oid)?;
            Ok(i64::from_be_bytes(bytes.try_into().unwrap()).to_string())
        }
        OID_FLOAT4 => {
            expect_len(bytes, 4, oid)?;
            let f = f32::from_be_bytes(bytes.try_into().unwrap());
            Ok(ryu::Buffer::new().format(f).to_string())
        }
        OID_FLOAT8 => {
            expect_len(bytes, 8, oid)?;
            let f = f64::from_be_bytes(bytes.try_into().unwrap());
            Ok(ryu::Buffer::new().format(f).to_string())
        }
        OID_DATE => {
            expect_len(bytes, 4, oid)?;
            let days = i32::from_be_bytes(bytes.try_into().unwrap());
            let date = pg_epoch_date() + Duration::days(days as i64);
            Ok(format!("'{}'::DATE", date.format("%Y-%m-%d")))
        }
        OID_TIMESTAMP => {
            expect_len(bytes, 8, oid)?;
            let micros = i64::from_be_bytes(bytes.try_into().unwrap());
            let ts = pg_epoch_datetime() + micros_duration(micros);
            Ok(format!("'{}'::TIMESTAMP", format_timestamp(&ts)))
        }
        OID_TIMESTAMPTZ => {
            expect_len(bytes, 8, oid)?;
            let micros = i64::from_be_bytes(bytes.try_into().unwrap());
            let ts = pg_epoch_datetime() + micros_duration(micros);
            let utc = chrono::DateTime::<chrono::Utc>::from_naive_utc_and_offset(ts, chrono::Utc);
            Ok(format!("'{}'::TIMESTAMPTZ", utc.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)))
        }
        OID_NUMERIC => Ok(decode_numeric(bytes)?),
        OID_UUID => {
            expect_len(bytes, 16, oid)?;
            Ok(format!("'{}'::UUID", format_uuid(bytes)))
        }
        OID_CHAR_BPCHAR | OID_NAME | OID_TEXT | OID_VARCHAR => {
            let s = std::str::from_utf8(bytes).map_err(|e| Error::validation(e.to_string()))?;
            Ok(quote_literal(s))
        }
        other => Err(Error::not_implemented(format!(
            "no binary decoder for parameter type OID {other}"
        ))),
    }
}

fn expect_len(bytes: &[u8], expected: usize, oid: i32) -> Result<()> {
    if bytes.len() != expected {
        return Err(Error::not_implemented(format!(
            "binary parameter for OID {oid} expected {expected} bytes, got {}",
            bytes.len()
        )));
    }
    Ok(())
}

/// Writes `s` as a single-quoted SQL string literal, doubling embedded quotes.
/// Grounded on `riverdb::pg::sql::escape::escape_str`.
pub fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        if c == '\'' {
            out.push('\'');
        }
        out.push(c);
    }
    out.push('\'');
    out
}

fn pg_epoch_date() -> NaiveDate {
    NaiveDate::from_ymd_opt(2000, 1, 1).expect("valid date")
}

fn pg_epoch_datetime() -> NaiveDateTime {
    pg_epoch_date().and_hms_opt(0, 0, 0).expect("valid time")
}

fn micros_duration(micros: i64) -> Duration {
    Duration::microseconds(micros)
}

fn format_timestamp(ts: &NaiveDateTime) -> String {
    format!(
        "{:04}-{:02}-{:02} {:02}:{:02}:{:02}.{:06}",
        ts.year(),
        ts.month(),
        ts.day(),
        ts.hour(),
        ts.minute(),
        ts.second(),
        ts.and_utc().timestamp_subsec_micros()
    )
}

fn format_uuid(bytes: &[u8]) -> String {
    let mut s = String::with_capacity(36);
    for (i, b) in bytes.iter().enumerate() {
        if matches!(i, 4 | 6 | 8 | 10) {
            s.push('-');
        }
        s.push_str(&format!("{b:02x}"));
    }
    s
}

/// Decodes the Postgres binary `numeric` wire format: `ndigits(i16) weight(i16)
/// sign(u16) dscale(u16) digit[ndigits](i16, base-10000)`.
fn decode_numeric(bytes: &[u8]) -> Result<String> {
    if bytes.len() < 8 {
        return Err(Error::not_implemented("truncated numeric parameter"));
    }
    let ndigits = i16::from_be_bytes([bytes[0], bytes[1]]) as i32;
    let weight = i16::from_be_bytes([bytes[2], bytes[3]]) as i32;
    let sign = u16::from_be_bytes([bytes[4], bytes[5]]);
    let dscale = u16::from_be_bytes([bytes[6], bytes[7]]) as i32;

    const NUMERIC_NAN: u16 = 0xC000;
    const NUMERIC_NEG: u16 = 0x4000;
    if sign == NUMERIC_NAN {
        return Err(Error::not_implemented("NaN numeric parameter is not supported"));
    }

    if bytes.len() < 8 + ndigits as usize * 2 {
        return Err(Error::not_implemented("truncated numeric parameter digits"));
    }
    let mut digits = Vec::with_capacity(ndigits as usize);
    for i in 0..ndigits {
        let off = 8 + (i as usize) * 2;
        digits.push(i16::from_be_bytes([bytes[off], bytes[off + 1]]) as i32);
    }

    // position(i) = weight - i; positive positions are integer digit-groups (base 10000),
    // negative positions are fractional digit-groups. Groups absent from `digits` (either
    // beyond ndigits or below position 0 before the first stored digit) are zero.
    let mut int_groups: std::collections::BTreeMap<i32, i32> = std::collections::BTreeMap::new();
    let mut frac_groups: std::collections::BTreeMap<i32, i32> = std::collections::BTreeMap::new();
    for (i, d) in digits.iter().enumerate() {
        let pos = weight - i as i32;
        if pos >= 0 {
            int_groups.insert(pos, *d);
        } else {
            frac_groups.insert(-pos - 1, *d);
        }
    }

    let mut int_part = String::new();
    if weight >= 0 {
        for pos in (0..=weight).rev() {
            let g = int_groups.get(&pos).copied().unwrap_or(0);
            if int_part.is_empty() {
                int_part.push_str(&g.to_string());
            } else {
                int_part.push_str(&format!("{g:04}"));
            }
        }
    } else {
        int_part.push('0');
    }

    let frac_group_count = (dscale + 3) / 4;
    let mut frac_digits = String::new();
    for idx in 0..frac_group_count {
        let g = frac_groups.get(&idx).copied().unwrap_or(0);
        frac_digits.push_str(&format!("{g:04}"));
    }
    frac_digits.truncate(dscale as usize);
    while frac_digits.len() < dscale as usize {
        frac_digits.push('0');
    }

    let mut out = String::new();
    if sign == NUMERIC_NEG {
        out.push('-');
    }
    out.push_str(&int_part);
    if dscale > 0 {
        out.push('.');
        out.push_str(&frac_digits);
    }
    Ok(out)
}
