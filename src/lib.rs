//! Linewire Service Engine Library
//!
//! This library provides the connection engine shared by the line-oriented TCP
//! services (login, character, chat, auction, quest, game). A service supplies
//! a [`protocol::CommandRouter`]; the engine handles everything between the
//! socket and the router.
//!
//! ## Modules
//!
//! - `admission` - Per-address fixed-window admission control
//! - `config` - Engine configuration management
//! - `crypto` - AES-256-CBC cipher transport
//! - `error` - Error types and result definitions
//! - `net` - Listener, framing and session handling
//! - `protocol` - Request/response lines and the router contract

pub mod admission;
pub mod config;
pub mod crypto;
pub mod error;
pub mod net;
pub mod protocol;
pub mod state;

// Re-export commonly used types
pub use admission::AdmissionController;
pub use config::ServerConfig;
pub use error::{LinewireError, Result};
pub use net::Listener;
pub use protocol::{CommandRouter, CommandTable};
pub use state::AppState;

/// Engine version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
