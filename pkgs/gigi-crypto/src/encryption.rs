//! AES-256-CBC message text encryption
//!
//! Ciphertext layout: `base64(iv ++ aes256cbc_pkcs7(text))`. The IV is 16 raw
//! bytes drawn from the operating system CSPRNG and travels with the
//! ciphertext, so only the key has to be shared between members.

use aes::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use rand::{rngs::OsRng, RngCore};
use tracing::warn;

use crate::{CryptoError, EncryptionKey};

type Aes256CbcEnc = cbc::Encryptor<aes::Aes256>;
type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// IV length in raw bytes (one AES block)
pub const IV_LEN: usize = 16;

/// Encrypt message text with a random IV prepended to the ciphertext.
pub fn encrypt(text: &str, key: &EncryptionKey) -> Result<String, CryptoError> {
    let mut iv = [0u8; IV_LEN];
    OsRng
        .try_fill_bytes(&mut iv)
        .map_err(|e| CryptoError::Encryption(format!("IV generation failed: {}", e)))?;

    let cipher = Aes256CbcEnc::new_from_slices(key.as_bytes(), &iv)
        .map_err(|e| CryptoError::Encryption(e.to_string()))?;
    let cipher_bytes = cipher.encrypt_padded_vec_mut::<Pkcs7>(text.as_bytes());

    let mut sealed = Vec::with_capacity(IV_LEN + cipher_bytes.len());
    sealed.extend_from_slice(&iv);
    sealed.extend_from_slice(&cipher_bytes);

    Ok(STANDARD.encode(sealed))
}

/// Decrypt message text, returning the input unchanged when it cannot be
/// decrypted (wrong key, plaintext input, malformed or legacy ciphertext).
pub fn decrypt(cipher: &str, key: &EncryptionKey) -> String {
    match try_decrypt(cipher, key) {
        Ok(text) => text,
        Err(reason) => {
            warn!("Leaving message text as-is, decrypt failed: {}", reason);
            cipher.to_string()
        }
    }
}

fn try_decrypt(cipher: &str, key: &EncryptionKey) -> Result<String, String> {
    let sealed = STANDARD
        .decode(cipher)
        .map_err(|e| format!("not base64: {}", e))?;

    // Need the IV and at least one block
    if sealed.len() < IV_LEN * 2 {
        return Err(format!("too short ({} bytes)", sealed.len()));
    }
    let (iv, cipher_bytes) = sealed.split_at(IV_LEN);

    let plain = Aes256CbcDec::new_from_slices(key.as_bytes(), iv)
        .map_err(|e| e.to_string())?
        .decrypt_padded_vec_mut::<Pkcs7>(cipher_bytes)
        .map_err(|_| "bad padding".to_string())?;

    String::from_utf8(plain).map_err(|_| "invalid UTF-8".to_string())
}

/// A derived key bundled with the codec operations
#[derive(Debug, Clone)]
pub struct MessageCipher {
    key: EncryptionKey,
}

impl MessageCipher {
    pub fn new(key: EncryptionKey) -> Self {
        Self { key }
    }

    /// Derive the key from a shared password and salt.
    pub fn from_password(password: &str, salt: &str, iterations: u32) -> Result<Self, CryptoError> {
        Ok(Self::new(EncryptionKey::derive(password, salt, iterations)?))
    }

    pub fn seal(&self, text: &str) -> Result<String, CryptoError> {
        encrypt(text, &self.key)
    }

    pub fn open(&self, cipher: &str) -> String {
        decrypt(cipher, &self.key)
    }
}
