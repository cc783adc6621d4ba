//! Request and response lines
//!
//! Requests are pipe-delimited UTF-8 strings. Field 0 is the command name,
//! compared case-insensitively; the engine never looks past it.

use std::fmt;

use crate::error::ProtocolError;

/// Field separator
pub const FIELD_SEPARATOR: char = '|';

/// Reply to the universal `PING` command
pub const PONG: &str = "PONG";

/// Substituted when a router returns an empty response
pub const INTERNAL_ERROR_REPLY: &str = "ERROR|Internal server error";

/// A parsed request line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request<'a> {
    raw: &'a str,
    fields: Vec<&'a str>,
    command: String,
}

impl<'a> Request<'a> {
    /// Split a request line into its fields
    pub fn parse(raw: &'a str) -> Self {
        let fields: Vec<&'a str> = raw.split(FIELD_SEPARATOR).collect();
        let command = fields
            .first()
            .map(|f| f.trim().to_uppercase())
            .unwrap_or_default();

        Self {
            raw,
            fields,
            command,
        }
    }

    /// The original line
    pub fn raw(&self) -> &'a str {
        self.raw
    }

    /// Uppercased command name (field 0)
    pub fn command(&self) -> &str {
        &self.command
    }

    /// Field `index`, if present. Field 0 is returned as sent.
    pub fn field(&self, index: usize) -> Option<&'a str> {
        self.fields.get(index).copied()
    }

    /// All fields including the command
    pub fn fields(&self) -> &[&'a str] {
        &self.fields
    }

    /// Fields after the command
    pub fn args(&self) -> &[&'a str] {
        self.fields.get(1..).unwrap_or(&[])
    }

    /// Number of fields after the command
    pub fn arg_count(&self) -> usize {
        self.args().len()
    }
}

/// A response line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    /// `SUCCESS|payload`
    Success(String),
    /// `ERROR|reason`
    Error(String),
    /// `TAG|payload`, for domain tags such as `AUCTIONS`
    Tagged { tag: String, payload: String },
    /// Sent verbatim
    Text(String),
}

impl Response {
    pub fn success(payload: impl Into<String>) -> Self {
        Response::Success(payload.into())
    }

    pub fn error(reason: impl Into<String>) -> Self {
        Response::Error(reason.into())
    }

    pub fn tagged(tag: impl Into<String>, payload: impl Into<String>) -> Self {
        Response::Tagged {
            tag: tag.into(),
            payload: payload.into(),
        }
    }

    pub fn text(line: impl Into<String>) -> Self {
        Response::Text(line.into())
    }

    pub fn pong() -> Self {
        Response::Text(PONG.to_string())
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Response::Error(_))
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Response::Success(payload) => write!(f, "SUCCESS|{}", payload),
            Response::Error(reason) => write!(f, "ERROR|{}", reason),
            Response::Tagged { tag, payload } => write!(f, "{}|{}", tag, payload),
            Response::Text(line) => f.write_str(line),
        }
    }
}

impl From<ProtocolError> for Response {
    fn from(err: ProtocolError) -> Self {
        Response::Error(err.to_string())
    }
}

/// Check a trimmed message before it reaches a router
pub fn validate_message(message: &str, max_len: usize) -> Result<(), ProtocolError> {
    if message.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if message.contains('\0') {
        return Err(ProtocolError::InvalidCharacters);
    }
    if message.len() > max_len {
        return Err(ProtocolError::MessageTooLong {
            len: message.len(),
            max: max_len,
        });
    }
    Ok(())
}
