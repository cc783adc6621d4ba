//! Protocol module
//!
//! The line protocol shared by every service:
//! - Request parsing and response rendering
//! - The command router contract the engine dispatches to

pub mod request;
pub mod router;

pub use request::{validate_message, Request, Response, INTERNAL_ERROR_REPLY, PONG};
pub use router::{CommandRouter, CommandTable};
