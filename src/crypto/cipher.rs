//! AES-256-CBC cipher transport
//!
//! Payloads are encrypted as whole buffers with PKCS#7 padding. The key is the
//! SHA-256 digest of the configured passphrase and the derived IV is the first
//! 16 bytes of SHA-256 over the passphrase followed by `"IV"`.
//!
//! Two IV disciplines are supported:
//! - [`IvMode::Random`] draws a fresh IV per message and prepends it to the
//!   ciphertext (`iv || ciphertext`)
//! - [`IvMode::Fixed`] reuses the derived IV for every message, which is what
//!   older clients of the six services expect on the wire
//!
//! The transport never falls back to plaintext on its own; callers decide what
//! a failed decryption means.

use std::fmt;

use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::CryptoError;

type Aes256CbcEnc = cbc::Encryptor<Aes256>;
type Aes256CbcDec = cbc::Decryptor<Aes256>;

/// AES block size in bytes
pub const BLOCK_SIZE: usize = 16;

/// Key size in bytes (AES-256)
pub const KEY_SIZE: usize = 32;

/// IV size in bytes
pub const IV_SIZE: usize = 16;

/// Suffix appended to the passphrase when deriving the fixed IV
const IV_DERIVATION_SUFFIX: &str = "IV";

/// How the cipher chooses an IV for each message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IvMode {
    /// Fresh random IV per message, prepended to the ciphertext
    #[default]
    Random,
    /// Derived IV reused for every message
    Fixed,
}

impl std::str::FromStr for IvMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "random" => Ok(IvMode::Random),
            "fixed" => Ok(IvMode::Fixed),
            other => Err(format!("unknown IV mode: {}", other)),
        }
    }
}

/// Key material derived once from a passphrase
#[derive(Clone, PartialEq, Eq)]
pub struct CipherKeyMaterial {
    /// 256-bit AES key
    pub key: [u8; KEY_SIZE],
    /// 128-bit derived IV (only used by [`IvMode::Fixed`])
    pub iv: [u8; IV_SIZE],
}

impl CipherKeyMaterial {
    /// Derive key and IV from a passphrase
    pub fn derive(passphrase: &str) -> Result<Self, CryptoError> {
        if passphrase.is_empty() {
            return Err(CryptoError::InvalidInput("passphrase cannot be empty"));
        }

        let key: [u8; KEY_SIZE] = Sha256::digest(passphrase.as_bytes()).into();

        let iv_seed = format!("{}{}", passphrase, IV_DERIVATION_SUFFIX);
        let iv_digest = Sha256::digest(iv_seed.as_bytes());
        let mut iv = [0u8; IV_SIZE];
        iv.copy_from_slice(&iv_digest[..IV_SIZE]);

        Ok(Self { key, iv })
    }
}

impl fmt::Debug for CipherKeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("CipherKeyMaterial(..)")
    }
}

/// Symmetric cipher shared read-only by every session
#[derive(Clone)]
pub struct CipherTransport {
    material: CipherKeyMaterial,
    iv_mode: IvMode,
}

impl fmt::Debug for CipherTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CipherTransport")
            .field("iv_mode", &self.iv_mode)
            .finish_non_exhaustive()
    }
}

impl CipherTransport {
    /// Create a cipher from a passphrase
    pub fn new(passphrase: &str, iv_mode: IvMode) -> Result<Self, CryptoError> {
        Ok(Self::with_material(CipherKeyMaterial::derive(passphrase)?, iv_mode))
    }

    /// Create a cipher from already-derived key material
    pub fn with_material(material: CipherKeyMaterial, iv_mode: IvMode) -> Self {
        Self { material, iv_mode }
    }

    /// The IV discipline in use
    pub fn iv_mode(&self) -> IvMode {
        self.iv_mode
    }

    /// Encrypt a non-empty payload
    pub fn encrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.is_empty() {
            return Err(CryptoError::InvalidInput("data cannot be empty"));
        }

        match self.iv_mode {
            IvMode::Fixed => Ok(self.encrypt_with_iv(data, &self.material.iv)),
            IvMode::Random => {
                let mut iv = [0u8; IV_SIZE];
                OsRng.try_fill_bytes(&mut iv).map_err(|e| {
                    CryptoError::CryptoFailure(format!("IV generation failed: {}", e))
                })?;

                let ciphertext = self.encrypt_with_iv(data, &iv);
                let mut framed = Vec::with_capacity(IV_SIZE + ciphertext.len());
                framed.extend_from_slice(&iv);
                framed.extend_from_slice(&ciphertext);
                Ok(framed)
            }
        }
    }

    /// Decrypt a payload produced by [`CipherTransport::encrypt`]
    pub fn decrypt(&self, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
        if data.is_empty() {
            return Err(CryptoError::InvalidInput("data cannot be empty"));
        }

        match self.iv_mode {
            IvMode::Fixed => self.decrypt_with_iv(data, &self.material.iv),
            IvMode::Random => {
                if data.len() < IV_SIZE + BLOCK_SIZE {
                    return Err(CryptoError::CryptoFailure(
                        "ciphertext too short (missing IV)".to_string(),
                    ));
                }
                let (iv, ciphertext) = data.split_at(IV_SIZE);
                let mut iv_bytes = [0u8; IV_SIZE];
                iv_bytes.copy_from_slice(iv);
                self.decrypt_with_iv(ciphertext, &iv_bytes)
            }
        }
    }

    /// Encrypt a string and return the ciphertext as base64
    pub fn encrypt_string(&self, text: &str) -> Result<String, CryptoError> {
        if text.is_empty() {
            return Err(CryptoError::InvalidInput("text cannot be empty"));
        }
        let encrypted = self.encrypt(text.as_bytes())?;
        Ok(STANDARD.encode(encrypted))
    }

    /// Decode base64 ciphertext and decrypt it to a string
    pub fn decrypt_string(&self, encoded: &str) -> Result<String, CryptoError> {
        if encoded.is_empty() {
            return Err(CryptoError::InvalidInput("encrypted text cannot be empty"));
        }
        let data = STANDARD
            .decode(encoded.trim())
            .map_err(|e| CryptoError::InvalidBase64(e.to_string()))?;
        let decrypted = self.decrypt(&data)?;
        String::from_utf8(decrypted).map_err(|_| CryptoError::InvalidUtf8)
    }

    fn encrypt_with_iv(&self, data: &[u8], iv: &[u8; IV_SIZE]) -> Vec<u8> {
        Aes256CbcEnc::new(&self.material.key.into(), &(*iv).into())
            .encrypt_padded_vec_mut::<Pkcs7>(data)
    }

    fn decrypt_with_iv(&self, data: &[u8], iv: &[u8; IV_SIZE]) -> Result<Vec<u8>, CryptoError> {
        if data.len() % BLOCK_SIZE != 0 {
            return Err(CryptoError::CryptoFailure(format!(
                "ciphertext length {} is not a multiple of the block size",
                data.len()
            )));
        }

        Aes256CbcDec::new(&self.material.key.into(), &(*iv).into())
            .decrypt_padded_vec_mut::<Pkcs7>(data)
            .map_err(|_| {
                CryptoError::CryptoFailure("invalid key or corrupted data".to_string())
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const PASSPHRASE: &str = "correct horse battery staple";

    #[test]
    fn test_key_derivation() {
        let material = CipherKeyMaterial::derive(PASSPHRASE).unwrap();

        let expected_key: [u8; 32] = Sha256::digest(PASSPHRASE.as_bytes()).into();
        assert_eq!(material.key, expected_key);

        let iv_digest = Sha256::digest(format!("{}IV", PASSPHRASE).as_bytes());
        assert_eq!(&material.iv[..], &iv_digest[..16]);
    }

    #[test]
    fn test_empty_passphrase_rejected() {
        assert!(CipherKeyMaterial::derive("").is_err());
        assert!(CipherTransport::new("", IvMode::Random).is_err());
    }

    #[test]
    fn test_round_trip_random_iv() {
        let cipher = CipherTransport::new(PASSPHRASE, IvMode::Random).unwrap();

        let payloads: [&[u8]; 4] = [b"x", b"PING", b"0123456789abcdef", &[0u8; 1000]];
        for payload in payloads {
            let encrypted = cipher.encrypt(payload).unwrap();
            assert_eq!(encrypted.len() % BLOCK_SIZE, 0);
            assert!(encrypted.len() >= IV_SIZE + BLOCK_SIZE);
            assert_eq!(cipher.decrypt(&encrypted).unwrap(), payload.to_vec());
        }
    }

    #[test]
    fn test_round_trip_fixed_iv() {
        let cipher = CipherTransport::new(PASSPHRASE, IvMode::Fixed).unwrap();

        let encrypted = cipher.encrypt(b"LIST_AUCTIONS").unwrap();
        assert_eq!(encrypted.len(), BLOCK_SIZE);
        assert_eq!(cipher.decrypt(&encrypted).unwrap(), b"LIST_AUCTIONS".to_vec());
    }

    #[test]
    fn test_random_iv_varies_per_message() {
        let cipher = CipherTransport::new(PASSPHRASE, IvMode::Random).unwrap();

        let first = cipher.encrypt(b"PONG\n").unwrap();
        let second = cipher.encrypt(b"PONG\n").unwrap();
        assert_ne!(first, second);
        assert_ne!(first[..IV_SIZE], second[..IV_SIZE]);
    }

    #[test]
    fn test_fixed_iv_is_deterministic() {
        let a = CipherTransport::new(PASSPHRASE, IvMode::Fixed).unwrap();
        let b = CipherTransport::new(PASSPHRASE, IvMode::Fixed).unwrap();

        assert_eq!(a.encrypt(b"PONG\n").unwrap(), b.encrypt(b"PONG\n").unwrap());
    }

    #[test]
    fn test_encrypt_empty_is_invalid_input() {
        let cipher = CipherTransport::new(PASSPHRASE, IvMode::Random).unwrap();

        assert!(matches!(
            cipher.encrypt(b""),
            Err(CryptoError::InvalidInput(_))
        ));
        assert!(matches!(
            cipher.encrypt_string(""),
            Err(CryptoError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_plaintext_fails_to_decrypt() {
        for mode in [IvMode::Random, IvMode::Fixed] {
            let cipher = CipherTransport::new(PASSPHRASE, mode).unwrap();
            assert!(matches!(
                cipher.decrypt(b"PING"),
                Err(CryptoError::CryptoFailure(_))
            ));
        }
    }

    #[test]
    fn test_wrong_key_fails_to_decrypt() {
        let cipher = CipherTransport::new(PASSPHRASE, IvMode::Fixed).unwrap();
        let other = CipherTransport::new("another passphrase", IvMode::Fixed).unwrap();

        let encrypted = cipher.encrypt(b"CREATE_AUCTION|bob|Sword|1|10").unwrap();
        // A wrong key yields garbage that almost never carries valid padding
        match other.decrypt(&encrypted) {
            Err(CryptoError::CryptoFailure(_)) => {}
            Ok(garbage) => assert_ne!(garbage, b"CREATE_AUCTION|bob|Sword|1|10".to_vec()),
            Err(e) => panic!("unexpected error: {}", e),
        }
    }

    #[test]
    fn test_string_wrappers() {
        let cipher = CipherTransport::new(PASSPHRASE, IvMode::Random).unwrap();

        let encoded = cipher.encrypt_string("SUCCESS|token|42").unwrap();
        assert!(STANDARD.decode(&encoded).is_ok());
        assert_eq!(cipher.decrypt_string(&encoded).unwrap(), "SUCCESS|token|42");

        assert!(matches!(
            cipher.decrypt_string("not base64!"),
            Err(CryptoError::InvalidBase64(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let cipher = CipherTransport::new(PASSPHRASE, IvMode::Fixed).unwrap();
        let rendered = format!("{:?}", cipher);
        assert!(rendered.contains("Fixed"));
        assert!(rendered.contains(".."));
    }

    #[test]
    fn test_iv_mode_from_str() {
        assert_eq!("random".parse::<IvMode>().unwrap(), IvMode::Random);
        assert_eq!("FIXED".parse::<IvMode>().unwrap(), IvMode::Fixed);
        assert!("cbc".parse::<IvMode>().is_err());
    }
}
