//! Frame handler module
//!
//! Turns one inbound frame into at most one outbound frame:
//! - Decrypt, or fall back to plaintext in legacy mode
//! - Trim, and drop frames that are empty after trimming
//! - Optional per-message admission
//! - Validate and dispatch to the command router
//! - Encode the response, encrypting it when the cipher is active
//!
//! Nothing here touches the socket; failures on one frame become `ERROR|...`
//! replies and never end the session.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use tracing::{debug, trace, warn};

use crate::error::{LinewireError, ProtocolError, PROCESSING_FAILED_REPLY};
use crate::net::buffer::FrameTag;
use crate::net::transport::InboundFrame;
use crate::protocol::{validate_message, INTERNAL_ERROR_REPLY};
use crate::AppState;

/// Bytes ready to be written for one response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundFrame {
    /// Mode tag (only written in framed mode)
    pub tag: FrameTag,
    pub bytes: Vec<u8>,
}

/// What the session should do after a frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrameOutcome {
    /// Nothing to send
    Ignored,
    /// Send this frame
    Reply(OutboundFrame),
    /// Address is over budget; close without a response
    Denied,
}

/// Per-frame processing for one service
pub struct FrameHandler {
    state: Arc<AppState>,
}

impl FrameHandler {
    pub fn new(state: Arc<AppState>) -> Self {
        Self { state }
    }

    /// Process one frame from `address`
    pub fn process(&self, address: &str, frame: InboundFrame) -> FrameOutcome {
        let text = match self.decode(frame) {
            Ok(text) => text,
            Err(e) => {
                debug!(address = %address, error = %e, "Rejected frame");
                return FrameOutcome::Reply(self.error_reply(e));
            }
        };

        let message = text.trim();
        if message.is_empty() {
            trace!(address = %address, "Ignoring blank frame");
            return FrameOutcome::Ignored;
        }

        if self.state.config.admission.limit_messages && !self.state.admission.allow(address) {
            return FrameOutcome::Denied;
        }

        if let Err(e) = validate_message(message, self.state.config.network.max_message_len) {
            debug!(address = %address, error = %e, "Invalid message");
            return FrameOutcome::Reply(self.error_reply(e));
        }

        let response = self.dispatch(address, message);
        FrameOutcome::Reply(self.encode_reply(&response))
    }

    /// Recover the request text from a frame
    pub fn decode(&self, frame: InboundFrame) -> Result<String, ProtocolError> {
        match frame {
            InboundFrame::Raw(raw) => Ok(self.decode_legacy(&raw)),
            InboundFrame::Tagged {
                tag: FrameTag::Plaintext,
                payload,
            } => Ok(String::from_utf8_lossy(&payload).into_owned()),
            InboundFrame::Tagged {
                tag: FrameTag::Encrypted,
                payload,
            } => {
                let cipher = self
                    .state
                    .cipher
                    .as_deref()
                    .ok_or(ProtocolError::MalformedEncryptedFrame)?;
                let plain = cipher
                    .decrypt(&payload)
                    .map_err(|_| ProtocolError::MalformedEncryptedFrame)?;
                String::from_utf8(plain).map_err(|_| ProtocolError::MalformedEncryptedFrame)
            }
            InboundFrame::Invalid(e) => Err(e),
        }
    }

    /// Try to decrypt; on any failure the original bytes are the plaintext
    fn decode_legacy(&self, raw: &[u8]) -> String {
        if let Some(cipher) = self.state.active_cipher() {
            match cipher.decrypt(raw) {
                Ok(plain) => match String::from_utf8(plain) {
                    Ok(text) => return text,
                    Err(_) => trace!("Decrypted bytes are not UTF-8, treating frame as plaintext"),
                },
                Err(e) => trace!(error = %e, "Decrypt failed, treating frame as plaintext"),
            }
        }
        String::from_utf8_lossy(raw).into_owned()
    }

    /// Run the router, containing any panic it raises
    fn dispatch(&self, address: &str, message: &str) -> String {
        let router = &self.state.router;
        match panic::catch_unwind(AssertUnwindSafe(|| router.dispatch(message))) {
            Ok(response) if response.is_empty() => {
                warn!(address = %address, "Router returned an empty response");
                INTERNAL_ERROR_REPLY.to_string()
            }
            Ok(response) => response,
            Err(payload) => {
                let err = LinewireError::DispatchFailure(panic_reason(payload.as_ref()));
                warn!(address = %address, error = %err, "Message processing failed");
                err.peer_message()
                    .unwrap_or_else(|| PROCESSING_FAILED_REPLY.to_string())
            }
        }
    }

    fn error_reply(&self, err: ProtocolError) -> OutboundFrame {
        let line = LinewireError::from(err)
            .peer_message()
            .unwrap_or_else(|| PROCESSING_FAILED_REPLY.to_string());
        self.encode_reply(&line)
    }

    /// Append the line terminator and encrypt when possible
    pub fn encode_reply(&self, line: &str) -> OutboundFrame {
        let mut bytes = Vec::with_capacity(line.len() + 1);
        bytes.extend_from_slice(line.as_bytes());
        bytes.push(b'\n');

        if let Some(cipher) = self.state.active_cipher() {
            match cipher.encrypt(&bytes) {
                Ok(encrypted) => {
                    return OutboundFrame {
                        tag: FrameTag::Encrypted,
                        bytes: encrypted,
                    }
                }
                Err(e) => warn!(error = %e, "Encrypt failed, sending plaintext"),
            }
        }

        OutboundFrame {
            tag: FrameTag::Plaintext,
            bytes,
        }
    }
}

fn panic_reason(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "router panicked".to_string()
    }
}
