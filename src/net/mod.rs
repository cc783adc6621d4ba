//! Networking module
//!
//! This module handles all network-related functionality for the engine:
//! - TCP listener with admission gate and connection cap
//! - Legacy and length-prefixed framing
//! - Per-frame decrypt/dispatch/encrypt handling
//! - Session management and the connection loop

pub mod buffer;
pub mod handler;
pub mod listener;
pub mod session;
pub mod transport;

pub use listener::Listener;
