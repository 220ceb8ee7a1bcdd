//! Gigi Store - document and blob storage collaborators for Gigi chat
//!
//! The chat core never talks to a concrete database. It depends on two
//! collaborators defined here:
//!
//! - **DocumentStore**: a hosted real-time document database. Documents live
//!   in collections, can be created with a generated id, read, merge-written,
//!   range-queried with ordering/limit/cursor, watched through a change
//!   stream, and updated with an atomic read-modify-write transaction.
//! - **BlobStore**: uploads a local file to a storage path and resolves the
//!   resulting reference to a public URL.
//!
//! In-memory implementations of both ([`MemoryDocumentStore`],
//! [`MemoryBlobStore`]) back the tests and the demo, and document the
//! semantics any hosted backend adapter has to provide.
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use gigi_store::{DocumentRef, DocumentStore, MemoryDocumentStore, OrderDirection, Query};
//! use serde_json::json;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = MemoryDocumentStore::new();
//!
//! let id = store
//!     .create("notes", gigi_store::to_document(&json!({ "createdAt": 1 }))?)
//!     .await?;
//! let note = store.get(&DocumentRef::new("notes", id)).await?;
//! assert!(note.is_some());
//!
//! let newest = store
//!     .query(Query::new("notes").order_by("createdAt", OrderDirection::Descending).limit(20))
//!     .await?;
//! assert_eq!(newest.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub mod document;
pub mod error;
pub mod memory;
pub mod memory_blob;

pub use document::{
    compare_values, merge_documents, to_document, ChangeEvent, ChangeKind, Cursor, Document,
    DocumentRef, Filter, OrderDirection, Query, Snapshot,
};
pub use error::{BlobError, StoreError};
pub use memory::MemoryDocumentStore;
pub use memory_blob::MemoryBlobStore;

/// Identifier of a registered collection listener
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(pub u64);

/// Live change stream for one collection
#[derive(Debug)]
pub struct ChangeFeed {
    pub listener: ListenerId,
    pub events: mpsc::UnboundedReceiver<ChangeEvent>,
}

/// Read-modify-write step of a transaction.
///
/// Receives the current document (`None` when it does not exist) and returns
/// the full replacement document, or `None` to finish without writing. The
/// step may run several times when a concurrent writer wins the race, so it
/// must not have side effects.
pub type TransactionFn<'a> =
    dyn Fn(Option<&Document>) -> Result<Option<Document>, StoreError> + Send + Sync + 'a;

/// Hosted document database collaborator
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Create a document with a generated id and return the id
    async fn create(&self, collection: &str, data: Document) -> Result<String, StoreError>;

    async fn get(&self, doc: &DocumentRef) -> Result<Option<Snapshot>, StoreError>;

    /// Merge-write: nested objects are merged, the document is created when absent
    async fn set_merge(&self, doc: &DocumentRef, data: Document) -> Result<(), StoreError>;

    async fn query(&self, query: Query) -> Result<Vec<Snapshot>, StoreError>;

    /// Atomic read-modify-write with optimistic retry
    async fn run_transaction(
        &self,
        doc: &DocumentRef,
        update: &TransactionFn<'_>,
    ) -> Result<(), StoreError>;

    /// Open a change stream on a collection. Existing documents are delivered
    /// first as `Added` events.
    fn listen(&self, collection: &str) -> Result<ChangeFeed, StoreError>;

    /// Close a change stream opened with [`DocumentStore::listen`]
    fn unlisten(&self, listener: ListenerId);
}

/// Reference to an uploaded blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageRef {
    pub path: String,
}

/// Blob storage collaborator used for media attachments
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload a local file to `remote_path`
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<StorageRef, BlobError>;

    /// Resolve a reference to a publicly readable URL
    async fn download_url(&self, reference: &StorageRef) -> Result<String, BlobError>;
}
