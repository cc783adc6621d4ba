//! Cryptography module
//!
//! This module provides the symmetric cipher shared by every session:
//! - AES-256-CBC payload encryption with passphrase-derived keys
//! - Random per-message or fixed derived IVs

pub mod cipher;

// Re-export commonly used types
pub use cipher::{CipherKeyMaterial, CipherTransport, IvMode};
