//! In-memory blob store

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{BlobError, BlobStore, StorageRef};

/// Blob store that keeps uploaded file contents in memory and hands out
/// `memory://` URLs
pub struct MemoryBlobStore {
    bucket: String,
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            blobs: Mutex::new(HashMap::new()),
        }
    }

    /// Contents stored at `remote_path`, if any
    pub fn contents(&self, remote_path: &str) -> Option<Vec<u8>> {
        self.blobs.lock().get(remote_path).cloned()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new("gigi-chat")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<StorageRef, BlobError> {
        if !tokio::fs::try_exists(local_path).await? {
            return Err(BlobError::FileNotFound(local_path.to_path_buf()));
        }
        let bytes = tokio::fs::read(local_path).await?;
        let size = bytes.len();

        self.blobs.lock().insert(remote_path.to_string(), bytes);

        info!(
            "Uploaded {} ({} bytes) to {}",
            local_path.display(),
            size,
            remote_path
        );
        Ok(StorageRef {
            path: remote_path.to_string(),
        })
    }

    async fn download_url(&self, reference: &StorageRef) -> Result<String, BlobError> {
        if !self.blobs.lock().contains_key(&reference.path) {
            return Err(BlobError::NotFound(reference.path.clone()));
        }
        let url = format!("memory://{}/{}", self.bucket, reference.path);
        debug!("Resolved {} to {}", reference.path, url);
        Ok(url)
    }
}
