//! Password-based key derivation for message encryption

use pbkdf2::pbkdf2_hmac;
use sha2::Sha256;
use tracing::debug;

use crate::CryptoError;

/// AES-256 key length in bytes
pub const KEY_LEN: usize = 32;

/// Derive raw key material from a password using PBKDF2-HMAC-SHA256.
///
/// All four parameters are required: an empty password or salt, zero
/// iterations, or a zero key length fail with `InvalidArgument`.
pub fn derive_key(
    password: &str,
    salt: &str,
    iterations: u32,
    key_length: usize,
) -> Result<Vec<u8>, CryptoError> {
    if password.is_empty() {
        return Err(CryptoError::InvalidArgument("password must not be empty"));
    }
    if salt.is_empty() {
        return Err(CryptoError::InvalidArgument("salt must not be empty"));
    }
    if iterations == 0 {
        return Err(CryptoError::InvalidArgument("iterations must be positive"));
    }
    if key_length == 0 {
        return Err(CryptoError::InvalidArgument("key length must be positive"));
    }

    let mut key = vec![0u8; key_length];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt.as_bytes(), iterations, &mut key);

    debug!(
        "Derived {}-byte key with {} PBKDF2 iterations",
        key_length, iterations
    );
    Ok(key)
}

/// Check that raw key material can be used for AES-256.
pub fn validate_encryption_key(key: &[u8]) -> Result<(), CryptoError> {
    if key.len() != KEY_LEN {
        return Err(CryptoError::InvalidKeyLength {
            expected: KEY_LEN,
            actual: key.len(),
        });
    }
    Ok(())
}

/// A validated AES-256 key
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl EncryptionKey {
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        validate_encryption_key(bytes)?;
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(bytes);
        Ok(Self(key))
    }

    /// Derive a 32-byte key from password and salt.
    pub fn derive(password: &str, salt: &str, iterations: u32) -> Result<Self, CryptoError> {
        let bytes = derive_key(password, salt, iterations, KEY_LEN)?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

// Keys never show up in logs.
impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("EncryptionKey(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_derive_key_is_deterministic() {
        let a = derive_key("hunter2", "salt", 1000, 32).unwrap();
        let b = derive_key("hunter2", "salt", 1000, 32).unwrap();

        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
    }

    #[test]
    fn test_derive_key_depends_on_salt() {
        let a = derive_key("hunter2", "salt-a", 1000, 32).unwrap();
        let b = derive_key("hunter2", "salt-b", 1000, 32).unwrap();

        assert_ne!(a, b, "Different salts should produce different keys");
    }

    #[test]
    fn test_known_vector() {
        // RFC 7914 section 11 PBKDF2-HMAC-SHA256 vector
        let key = derive_key("passwd", "salt", 1, 64).unwrap();
        let expected: [u8; 8] = [0x55, 0xac, 0x04, 0x6e, 0x56, 0xe3, 0x08, 0x9f];

        assert_eq!(&key[..8], &expected);
    }

    #[test]
    fn test_missing_arguments_rejected() {
        assert!(matches!(
            derive_key("", "salt", 1000, 32),
            Err(CryptoError::InvalidArgument(_))
        ));
        assert!(matches!(
            derive_key("password", "", 1000, 32),
            Err(CryptoError::InvalidArgument(_))
        ));
        assert!(matches!(
            derive_key("password", "salt", 0, 32),
            Err(CryptoError::InvalidArgument(_))
        ));
        assert!(matches!(
            derive_key("password", "salt", 1000, 0),
            Err(CryptoError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_validate_encryption_key() {
        assert!(validate_encryption_key(&[7u8; 32]).is_ok());
        assert!(matches!(
            validate_encryption_key(&[7u8; 16]),
            Err(CryptoError::InvalidKeyLength {
                expected: 32,
                actual: 16
            })
        ));
    }

    #[test]
    fn test_debug_hides_key() {
        let key = EncryptionKey::from_bytes(&[1u8; 32]).unwrap();
        assert_eq!(format!("{:?}", key), "EncryptionKey(..)");
    }
}
