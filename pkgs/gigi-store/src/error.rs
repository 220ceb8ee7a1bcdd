use std::path::PathBuf;

use thiserror::Error;

/// Errors returned by document store implementations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Document not found: {0}")]
    NotFound(String),

    #[error("Transaction on {path} aborted after {attempts} attempts")]
    TransactionAborted { path: String, attempts: u32 },

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Errors returned by blob store implementations
#[derive(Debug, Error)]
pub enum BlobError {
    #[error("Local file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Blob not found: {0}")]
    NotFound(String),

    #[error("Upload failed: {0}")]
    Upload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
