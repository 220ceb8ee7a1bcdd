//! Message text encryption for Gigi chat
//!
//! This crate provides the codec used to protect message text before it is
//! written to the shared document store:
//! - Password-based key derivation (PBKDF2 over HMAC-SHA256)
//! - AES-256-CBC encryption with the IV prepended to the ciphertext
//! - Fail-soft decryption that never breaks a chat view

pub mod encryption;
pub mod error;
pub mod key_derivation;

pub use encryption::{decrypt, encrypt, MessageCipher, IV_LEN};
pub use error::CryptoError;
pub use key_derivation::{derive_key, validate_encryption_key, EncryptionKey, KEY_LEN};
