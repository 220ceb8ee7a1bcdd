//! Gigi Chat - one-to-one chat synchronization core
//!
//! This crate keeps a conversation and its messages in sync with a hosted
//! real-time document database:
//!
//! - **Lazy conversations**: the first send creates the conversation record.
//! - **Pending/sent protocol**: a message is written as `pending`, then
//!   promoted to `sent` (with its media URL attached). Receivers only see
//!   the promotion.
//! - **Unread ledger**: per-member unread counters updated in one atomic
//!   transaction per send, plus typing flags.
//! - **History**: newest-first pages walking backwards with a cursor.
//! - **Encryption**: optional AES-256-CBC message text with fail-soft
//!   decryption (see `gigi-crypto`).
//!
//! # Example Usage
//!
//! ```rust,no_run
//! use gigi_chat::{ChatBackend, ChatConfig, ChatSession, UserIdentity};
//!
//! # async fn example() -> Result<(), gigi_chat::ChatError> {
//! let backend = ChatBackend::in_memory();
//! let alice = UserIdentity::new("alice", "Alice");
//! let bob = UserIdentity::new("bob", "Bob");
//!
//! let mut session = ChatSession::open(&backend, alice, vec![bob], None, ChatConfig::default())?;
//! let sent = session.send_message("hello").await?;
//! println!("{} at {}", sent.text, sent.created_at);
//!
//! let page = session.load_history().await?;
//! assert_eq!(page.len(), 1);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use gigi_store::{BlobStore, DocumentStore, MemoryBlobStore, MemoryDocumentStore};

pub mod config;
pub mod conversation_repository;
pub mod error;
pub mod formatter;
pub mod ledger;
pub mod message_store;
pub mod models;
pub mod session;
pub mod subscription;
pub mod typing;

pub use config::{ChatConfig, EncryptionConfig};
pub use conversation_repository::ConversationRepository;
pub use error::ChatError;
pub use formatter::{blacklist_regex, filter_bad_words, format_message, FormatOptions};
pub use ledger::UnreadLedger;
pub use message_store::{delivered_record, ConversationDraft, MessageStore};
pub use models::*;
pub use session::ChatSession;
pub use subscription::Subscription;
pub use typing::TypingDebouncer;

/// The storage collaborators a chat runs against
#[derive(Clone)]
pub struct ChatBackend {
    pub docs: Arc<dyn DocumentStore>,
    pub blobs: Arc<dyn BlobStore>,
}

impl ChatBackend {
    pub fn new(docs: Arc<dyn DocumentStore>, blobs: Arc<dyn BlobStore>) -> Self {
        Self { docs, blobs }
    }

    /// Backend kept entirely in process memory
    pub fn in_memory() -> Self {
        Self::new(
            Arc::new(MemoryDocumentStore::new()),
            Arc::new(MemoryBlobStore::default()),
        )
    }
}
