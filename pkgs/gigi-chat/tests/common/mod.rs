//! Test doubles shared by the gigi-chat integration tests

#![allow(dead_code)]

use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use gigi_chat::{ChatBackend, ChatConfig};
use gigi_store::{
    BlobError, BlobStore, ChangeFeed, DocumentRef, DocumentStore, ListenerId, MemoryBlobStore,
    MemoryDocumentStore, Query, Snapshot, StorageRef, StoreError, TransactionFn,
};
use parking_lot::Mutex;
use tokio::sync::mpsc;

/// Document store that records the collection of every `create` call
#[derive(Default)]
pub struct RecordingStore {
    pub inner: MemoryDocumentStore,
    pub creates: Mutex<Vec<String>>,
}

impl RecordingStore {
    pub fn creates(&self) -> Vec<String> {
        self.creates.lock().clone()
    }
}

#[async_trait]
impl DocumentStore for RecordingStore {
    async fn create(&self, collection: &str, data: gigi_store::Document) -> Result<String, StoreError> {
        self.creates.lock().push(collection.to_string());
        self.inner.create(collection, data).await
    }

    async fn get(&self, doc: &DocumentRef) -> Result<Option<Snapshot>, StoreError> {
        self.inner.get(doc).await
    }

    async fn set_merge(&self, doc: &DocumentRef, data: gigi_store::Document) -> Result<(), StoreError> {
        self.inner.set_merge(doc, data).await
    }

    async fn query(&self, query: Query) -> Result<Vec<Snapshot>, StoreError> {
        self.inner.query(query).await
    }

    async fn run_transaction(
        &self,
        doc: &DocumentRef,
        update: &TransactionFn<'_>,
    ) -> Result<(), StoreError> {
        self.inner.run_transaction(doc, update).await
    }

    fn listen(&self, collection: &str) -> Result<ChangeFeed, StoreError> {
        self.inner.listen(collection)
    }

    fn unlisten(&self, listener: ListenerId) {
        self.inner.unlisten(listener)
    }
}

/// Document store whose message writes and transactions fail a set number
/// of times
#[derive(Default)]
pub struct FaultyStore {
    pub inner: MemoryDocumentStore,
    failing_message_creates: AtomicUsize,
    failing_transactions: AtomicUsize,
}

impl FaultyStore {
    pub fn fail_message_creates(&self, times: usize) {
        self.failing_message_creates.store(times, Ordering::SeqCst);
    }

    pub fn fail_transactions(&self, times: usize) {
        self.failing_transactions.store(times, Ordering::SeqCst);
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl DocumentStore for FaultyStore {
    async fn create(&self, collection: &str, data: gigi_store::Document) -> Result<String, StoreError> {
        if collection.ends_with("/messages") && Self::take_failure(&self.failing_message_creates) {
            return Err(StoreError::Backend("write rejected".to_string()));
        }
        self.inner.create(collection, data).await
    }

    async fn get(&self, doc: &DocumentRef) -> Result<Option<Snapshot>, StoreError> {
        self.inner.get(doc).await
    }

    async fn set_merge(&self, doc: &DocumentRef, data: gigi_store::Document) -> Result<(), StoreError> {
        self.inner.set_merge(doc, data).await
    }

    async fn query(&self, query: Query) -> Result<Vec<Snapshot>, StoreError> {
        self.inner.query(query).await
    }

    async fn run_transaction(
        &self,
        doc: &DocumentRef,
        update: &TransactionFn<'_>,
    ) -> Result<(), StoreError> {
        if Self::take_failure(&self.failing_transactions) {
            return Err(StoreError::Backend("transaction unavailable".to_string()));
        }
        self.inner.run_transaction(doc, update).await
    }

    fn listen(&self, collection: &str) -> Result<ChangeFeed, StoreError> {
        self.inner.listen(collection)
    }

    fn unlisten(&self, listener: ListenerId) {
        self.inner.unlisten(listener)
    }
}

/// Blob store whose uploads can be switched to fail
#[derive(Default)]
pub struct FlakyBlobStore {
    pub inner: MemoryBlobStore,
    pub failing: AtomicBool,
}

impl FlakyBlobStore {
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }
}

#[async_trait]
impl BlobStore for FlakyBlobStore {
    async fn upload(&self, local_path: &Path, remote_path: &str) -> Result<StorageRef, BlobError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(BlobError::Upload("network unreachable".to_string()));
        }
        self.inner.upload(local_path, remote_path).await
    }

    async fn download_url(&self, reference: &StorageRef) -> Result<String, BlobError> {
        self.inner.download_url(reference).await
    }
}

pub fn memory_backend() -> (ChatBackend, Arc<MemoryDocumentStore>) {
    let docs = Arc::new(MemoryDocumentStore::new());
    let backend = ChatBackend::new(docs.clone(), Arc::new(MemoryBlobStore::default()));
    (backend, docs)
}

pub fn config_with_page_size(page_size: usize) -> ChatConfig {
    ChatConfig {
        page_size,
        ..ChatConfig::default()
    }
}

/// Callback that forwards into a channel, plus the receiving end
pub fn collector<T: Send + 'static>() -> (impl FnMut(T) + Send + 'static, mpsc::UnboundedReceiver<T>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        move |item| {
            let _ = tx.send(item);
        },
        rx,
    )
}

pub async fn next<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> T {
    tokio::time::timeout(Duration::from_secs(2), rx.recv())
        .await
        .expect("Timed out waiting for event")
        .expect("Channel closed")
}

/// True when nothing arrives within a short grace period
pub async fn stays_quiet<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> bool {
    tokio::time::timeout(Duration::from_millis(100), rx.recv())
        .await
        .is_err()
}
