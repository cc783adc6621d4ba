//! Error handling module
//!
//! Defines custom error types for the Linewire engine.

use std::io;

use thiserror::Error;

/// Generic reply sent when the router faults on a well-formed message
pub const PROCESSING_FAILED_REPLY: &str = "ERROR|Message processing failed";

/// Main error type for the Linewire engine
#[derive(Error, Debug)]
pub enum LinewireError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Protocol-related errors
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Cipher transport errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Listener startup errors
    #[error("Startup error: {0}")]
    Startup(#[from] StartupError),

    /// Source address is over its admission budget
    #[error("Admission denied for {0}")]
    AdmissionDenied(String),

    /// The command router faulted while handling a message
    #[error("Dispatch failure: {0}")]
    DispatchFailure(String),

    /// I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

impl LinewireError {
    /// The `ERROR|...` line a peer should see for this error, if any.
    ///
    /// Transport-level faults have no peer to notify and admission denials
    /// never produce a response frame, so both map to `None`.
    pub fn peer_message(&self) -> Option<String> {
        match self {
            LinewireError::Protocol(e) => Some(format!("ERROR|{}", e)),
            LinewireError::DispatchFailure(_) => Some(PROCESSING_FAILED_REPLY.to_string()),
            _ => None,
        }
    }
}

/// Network-specific errors
#[derive(Error, Debug)]
pub enum NetworkError {
    #[error("Too many connections from {0}")]
    TooManyConnections(String),

    #[error("Read error: {0}")]
    ReadError(String),

    #[error("Write error: {0}")]
    WriteError(String),
}

/// Protocol-specific errors.
///
/// The display text of each variant is what the peer receives after `ERROR|`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Message cannot be empty")]
    EmptyMessage,

    #[error("Message contains invalid characters")]
    InvalidCharacters,

    #[error("Message is too long")]
    MessageTooLong { len: usize, max: usize },

    #[error("Frame too large")]
    FrameTooLarge { size: usize, max: usize },

    #[error("Empty frame")]
    EmptyFrame,

    #[error("Unknown frame tag: {0}")]
    UnknownFrameTag(u8),

    #[error("Malformed encrypted frame")]
    MalformedEncryptedFrame,
}

/// Cipher transport errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Invalid input: {0}")]
    InvalidInput(&'static str),

    #[error("Cipher failure: {0}")]
    CryptoFailure(String),

    #[error("Invalid base64 payload: {0}")]
    InvalidBase64(String),

    #[error("Decrypted payload is not valid UTF-8")]
    InvalidUtf8,
}

/// Listener startup errors
#[derive(Error, Debug)]
pub enum StartupError {
    #[error("Listener is already running")]
    AlreadyRunning,

    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
}

/// Result type alias for Linewire operations
pub type Result<T> = std::result::Result<T, LinewireError>;
