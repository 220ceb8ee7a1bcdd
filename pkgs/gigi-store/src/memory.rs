//! In-memory document store

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::document::{
    compare_values, merge_documents, ChangeEvent, ChangeKind, Cursor, Document, DocumentRef,
    OrderDirection, Query, Snapshot,
};
use crate::{ChangeFeed, DocumentStore, ListenerId, StoreError, TransactionFn};

/// Attempts before a contended transaction gives up
pub const MAX_TRANSACTION_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone)]
struct Versioned {
    data: Document,
    version: u64,
}

struct Listener {
    collection: String,
    sender: mpsc::UnboundedSender<ChangeEvent>,
}

#[derive(Default)]
struct Inner {
    collections: HashMap<String, BTreeMap<String, Versioned>>,
    listeners: HashMap<ListenerId, Listener>,
}

impl Inner {
    fn version_of(&self, doc: &DocumentRef) -> u64 {
        self.collections
            .get(&doc.collection)
            .and_then(|docs| docs.get(&doc.id))
            .map(|v| v.version)
            .unwrap_or(0)
    }

    /// Replace a document and notify listeners of its collection
    fn write(&mut self, doc: &DocumentRef, data: Document) {
        let docs = self.collections.entry(doc.collection.clone()).or_default();
        let kind = match docs.get_mut(&doc.id) {
            Some(existing) => {
                existing.data = data.clone();
                existing.version += 1;
                ChangeKind::Modified
            }
            None => {
                docs.insert(
                    doc.id.clone(),
                    Versioned {
                        data: data.clone(),
                        version: 1,
                    },
                );
                ChangeKind::Added
            }
        };
        self.notify(
            &doc.collection,
            ChangeEvent {
                kind,
                document: Snapshot::new(doc.id.clone(), data),
            },
        );
    }

    fn notify(&mut self, collection: &str, event: ChangeEvent) {
        self.listeners.retain(|id, listener| {
            if listener.collection != collection {
                return true;
            }
            let delivered = listener.sender.send(event.clone()).is_ok();
            if !delivered {
                debug!("Dropping closed listener {:?} on {}", id, collection);
            }
            delivered
        });
    }
}

/// Document store kept entirely in process memory.
///
/// Writes are applied under a lock and fan out to every listener of the
/// collection. Transactions use optimistic concurrency: the document version
/// read by the update step must still be current at commit time, otherwise
/// the step is re-run against the fresh document.
pub struct MemoryDocumentStore {
    inner: Mutex<Inner>,
    next_listener: AtomicU64,
}

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            next_listener: AtomicU64::new(1),
        }
    }

    /// Number of documents currently stored in a collection
    pub fn count(&self, collection: &str) -> usize {
        self.inner
            .lock()
            .collections
            .get(collection)
            .map(|docs| docs.len())
            .unwrap_or(0)
    }

    /// Number of open listeners across all collections
    pub fn listener_count(&self) -> usize {
        self.inner.lock().listeners.len()
    }
}

impl Default for MemoryDocumentStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Position of `snapshot` relative to a cursor in query order
fn cmp_to_cursor(snapshot: &Snapshot, field: &str, cursor: &Cursor) -> Ordering {
    let value = snapshot.field(field).unwrap_or(&Value::Null);
    compare_values(value, &cursor.value).then_with(|| snapshot.id.cmp(&cursor.id))
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    async fn create(&self, collection: &str, data: Document) -> Result<String, StoreError> {
        let id = uuid::Uuid::new_v4().simple().to_string();
        let doc = DocumentRef::new(collection, id.clone());

        self.inner.lock().write(&doc, data);

        debug!("Created document {}", doc);
        Ok(id)
    }

    async fn get(&self, doc: &DocumentRef) -> Result<Option<Snapshot>, StoreError> {
        let inner = self.inner.lock();
        Ok(inner
            .collections
            .get(&doc.collection)
            .and_then(|docs| docs.get(&doc.id))
            .map(|v| Snapshot::new(doc.id.clone(), v.data.clone())))
    }

    async fn set_merge(&self, doc: &DocumentRef, data: Document) -> Result<(), StoreError> {
        let mut inner = self.inner.lock();

        let mut merged = inner
            .collections
            .get(&doc.collection)
            .and_then(|docs| docs.get(&doc.id))
            .map(|v| v.data.clone())
            .unwrap_or_default();
        merge_documents(&mut merged, data);
        inner.write(doc, merged);

        debug!("Merged into document {}", doc);
        Ok(())
    }

    async fn query(&self, query: Query) -> Result<Vec<Snapshot>, StoreError> {
        let mut results: Vec<Snapshot> = {
            let inner = self.inner.lock();
            match inner.collections.get(&query.collection) {
                Some(docs) => docs
                    .iter()
                    .filter(|(_, v)| query.filters.iter().all(|f| f.matches(&v.data)))
                    .map(|(id, v)| Snapshot::new(id.clone(), v.data.clone()))
                    .collect(),
                None => Vec::new(),
            }
        };

        if let Some((field, direction)) = &query.order_by {
            // Ties on the ordered field fall back to the document id so that
            // cursors always point at a unique position.
            results.sort_by(|a, b| {
                let null = Value::Null;
                let ord = compare_values(
                    a.field(field).unwrap_or(&null),
                    b.field(field).unwrap_or(&null),
                )
                .then_with(|| a.id.cmp(&b.id));
                match direction {
                    OrderDirection::Ascending => ord,
                    OrderDirection::Descending => ord.reverse(),
                }
            });

            if let Some(cursor) = &query.start_after {
                results.retain(|snapshot| {
                    let ord = cmp_to_cursor(snapshot, field, cursor);
                    match direction {
                        OrderDirection::Ascending => ord == Ordering::Greater,
                        OrderDirection::Descending => ord == Ordering::Less,
                    }
                });
            }
        } else if query.start_after.is_some() {
            return Err(StoreError::Backend(
                "start_after requires an order_by clause".to_string(),
            ));
        }

        if let Some(limit) = query.limit {
            results.truncate(limit);
        }

        debug!(
            "Query on {} returned {} documents",
            query.collection,
            results.len()
        );
        Ok(results)
    }

    async fn run_transaction(
        &self,
        doc: &DocumentRef,
        update: &TransactionFn<'_>,
    ) -> Result<(), StoreError> {
        for attempt in 1..=MAX_TRANSACTION_ATTEMPTS {
            let (current, version) = {
                let inner = self.inner.lock();
                let current = inner
                    .collections
                    .get(&doc.collection)
                    .and_then(|docs| docs.get(&doc.id))
                    .cloned();
                let version = current.as_ref().map(|v| v.version).unwrap_or(0);
                (current.map(|v| v.data), version)
            };

            let next = match update(current.as_ref())? {
                Some(next) => next,
                None => return Ok(()),
            };

            // Give concurrent writers a chance to land between read and commit,
            // like a round trip to a hosted backend would.
            tokio::task::yield_now().await;

            let mut inner = self.inner.lock();
            if inner.version_of(doc) != version {
                warn!(
                    "Transaction on {} conflicted (attempt {}/{}), retrying",
                    doc, attempt, MAX_TRANSACTION_ATTEMPTS
                );
                continue;
            }
            inner.write(doc, next);
            debug!("Transaction on {} committed", doc);
            return Ok(());
        }

        Err(StoreError::TransactionAborted {
            path: doc.path(),
            attempts: MAX_TRANSACTION_ATTEMPTS,
        })
    }

    fn listen(&self, collection: &str) -> Result<ChangeFeed, StoreError> {
        let listener = ListenerId(self.next_listener.fetch_add(1, AtomicOrdering::Relaxed));
        let (sender, events) = mpsc::unbounded_channel();

        let mut inner = self.inner.lock();
        if let Some(docs) = inner.collections.get(collection) {
            for (id, v) in docs {
                let _ = sender.send(ChangeEvent {
                    kind: ChangeKind::Added,
                    document: Snapshot::new(id.clone(), v.data.clone()),
                });
            }
        }
        inner.listeners.insert(
            listener,
            Listener {
                collection: collection.to_string(),
                sender,
            },
        );

        info!("Listener {:?} opened on {}", listener, collection);
        Ok(ChangeFeed { listener, events })
    }

    fn unlisten(&self, listener: ListenerId) {
        if self.inner.lock().listeners.remove(&listener).is_some() {
            info!("Listener {:?} closed", listener);
        }
    }
}
