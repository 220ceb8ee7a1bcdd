use thiserror::Error;

/// Errors raised by the message codec
#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error("Invalid key length: expected {expected} bytes, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Encryption failed: {0}")]
    Encryption(String),
}
