use gigi_crypto::CryptoError;
use gigi_store::{BlobError, StoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChatError {
    #[error("No conversation established for this session")]
    NoConversation,

    #[error("Conversation not found: {0}")]
    ConversationNotFound(String),

    #[error("Message not found: {0}")]
    MessageNotFound(String),

    #[error("Message {0} is not pending")]
    NotPending(String),

    #[error("Media attachment has no local file: {0}")]
    MissingMediaFile(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Blob error: {0}")]
    Blob(#[from] BlobError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
