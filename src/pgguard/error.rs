use std::fmt::{self, Debug, Display, Formatter};
use std::io;

/// Domain error, boxed to keep `Result<T>` small (mirrors `riverdb::common::errors::Error`).
#[derive(Debug)]
pub struct Error {
    kind: Box<ErrorKind>,
}

pub type Result<T> = std::result::Result<T, Error>;

/// The error taxonomy from the error-handling design: each variant maps to exactly one
/// SQLSTATE. `NotFound` and `Validation` have sub-shades because the spec maps them to
/// different codes depending on what was missing / malformed.
#[derive(Debug)]
pub enum ErrorKind {
    /// Principal lacks the privilege required for the requested action.
    AccessDenied(String),
    /// A referenced entity (principal, group, grant, filter, mask...) is absent.
    NotFound(String),
    /// A referenced table could not be found during introspection.
    TableNotFound(String),
    /// Malformed request/argument that isn't a parse or column-reference failure.
    Validation(String),
    /// SQL failed to parse.
    ParseError(String),
    /// A column reference could not be resolved (e.g. while qualifying a row filter,
    /// or a masked column absent from the target table).
    ColumnError(String),
    /// Unique-constraint violation in the metastore.
    Conflict(String),
    /// Recognized but unsupported wire-protocol feature.
    NotImplemented(String),
    /// Startup packet failed authentication-specification requirements (e.g. no `user`).
    AuthInvalid(String),
    /// The execution context was cancelled or its deadline elapsed.
    Cancelled(String),
    /// Everything else: I/O, metastore transport failures, internal invariants.
    Internal(String),
    Io(io::Error),
}

impl Error {
    pub fn access_denied<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::AccessDenied(msg.into()))
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::NotFound(msg.into()))
    }

    pub fn table_not_found<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::TableNotFound(msg.into()))
    }

    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Validation(msg.into()))
    }

    pub fn parse_error<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::ParseError(msg.into()))
    }

    pub fn column_error<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::ColumnError(msg.into()))
    }

    pub fn conflict<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Conflict(msg.into()))
    }

    pub fn not_implemented<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::NotImplemented(msg.into()))
    }

    pub fn auth_invalid<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::AuthInvalid(msg.into()))
    }

    pub fn cancelled<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Cancelled(msg.into()))
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::new(ErrorKind::Internal(msg.into()))
    }

    fn new(kind: ErrorKind) -> Self {
        Error { kind: Box::new(kind) }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.kind
    }

    /// The SQLSTATE this error maps to, per the error-handling design table.
    pub fn sqlstate(&self) -> &'static str {
        match &*self.kind {
            ErrorKind::AccessDenied(_) => "42501",
            ErrorKind::NotFound(_) => "42704",
            ErrorKind::TableNotFound(_) => "42P01",
            ErrorKind::Validation(_) => "22023",
            ErrorKind::ParseError(_) => "42601",
            ErrorKind::ColumnError(_) => "42703",
            ErrorKind::Conflict(_) => "23505",
            ErrorKind::NotImplemented(_) => "0A000",
            ErrorKind::AuthInvalid(_) => "28000",
            ErrorKind::Cancelled(_) => "57014",
            ErrorKind::Internal(_) | ErrorKind::Io(_) => "XX000",
        }
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::internal(s.to_string())
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::internal(s)
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error { kind: Box::new(ErrorKind::Io(err)) }
    }
}

impl From<serde_yaml::Error> for Error {
    fn from(err: serde_yaml::Error) -> Self {
        Error::internal(err.to_string())
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        Display::fmt(&self.kind, f)
    }
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::AccessDenied(m) => f.write_str(m),
            ErrorKind::NotFound(m) => f.write_str(m),
            ErrorKind::TableNotFound(m) => f.write_str(m),
            ErrorKind::Validation(m) => f.write_str(m),
            ErrorKind::ParseError(m) => f.write_str(m),
            ErrorKind::ColumnError(m) => f.write_str(m),
            ErrorKind::Conflict(m) => f.write_str(m),
            ErrorKind::NotImplemented(m) => f.write_str(m),
            ErrorKind::AuthInvalid(m) => f.write_str(m),
            ErrorKind::Cancelled(m) => f.write_str(m),
            ErrorKind::Internal(m) => f.write_str(m),
            ErrorKind::Io(e) => Display::fmt(e, f),
        }
    }
}

impl std::error::Error for Error {}
