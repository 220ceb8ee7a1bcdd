//! Messages of one conversation: append with the pending/sent protocol,
//! backward pagination and the delivery stream

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use chrono::Utc;
use gigi_crypto::MessageCipher;
use gigi_store::{
    to_document, BlobStore, ChangeEvent, ChangeKind, Cursor, DocumentRef, DocumentStore,
    OrderDirection, Query, Snapshot,
};
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::config::ChatConfig;
use crate::conversation_repository::ConversationRepository;
use crate::ledger::UnreadLedger;
use crate::models::{MessageKind, MessageRecord, MessageStatus, Page};
use crate::subscription::Subscription;
use crate::{ChatBackend, ChatError};

const ORDER_FIELD: &str = "createdAt";

/// Settings used when the first send has to create the conversation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConversationDraft {
    /// Members besides the sender
    pub members: Vec<String>,
    pub name: Option<String>,
    pub image: Option<String>,
}

impl ConversationDraft {
    pub fn with_members(members: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            members: members.into_iter().map(Into::into).collect(),
            ..Default::default()
        }
    }
}

/// Message store bound to one sender and (eventually) one conversation.
///
/// Holds the pagination cursor, so pagination takes `&mut self` and only one
/// page request can be in flight at a time.
pub struct MessageStore {
    docs: Arc<dyn DocumentStore>,
    blobs: Arc<dyn BlobStore>,
    conversations: ConversationRepository,
    ledger: UnreadLedger,
    sender_id: String,
    draft: ConversationDraft,
    conversation_id: Option<String>,
    /// False until a caller-supplied conversation id has been looked up
    conversation_verified: bool,
    cursor: Option<Cursor>,
    cipher: Option<MessageCipher>,
    conversations_collection: String,
    messages_collection: String,
    media_root: String,
    last_created_at: i64,
}

impl MessageStore {
    /// Build a store for `sender_id`. The encryption key, when configured, is
    /// derived here once.
    pub fn new(
        backend: &ChatBackend,
        sender_id: impl Into<String>,
        draft: ConversationDraft,
        conversation_id: Option<String>,
        config: &ChatConfig,
    ) -> Result<Self, ChatError> {
        config.validate()?;
        let cipher = config
            .encryption
            .as_ref()
            .map(|encryption| encryption.cipher())
            .transpose()?;

        Ok(Self {
            docs: backend.docs.clone(),
            blobs: backend.blobs.clone(),
            conversations: ConversationRepository::new(
                backend.docs.clone(),
                config.conversations_collection.clone(),
            ),
            ledger: UnreadLedger::new(backend.docs.clone(), config.conversations_collection.clone()),
            sender_id: sender_id.into(),
            draft,
            conversation_verified: conversation_id.is_none(),
            conversation_id,
            cursor: None,
            cipher,
            conversations_collection: config.conversations_collection.clone(),
            messages_collection: config.messages_collection.clone(),
            media_root: config.media_root.clone(),
            last_created_at: 0,
        })
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.conversation_id.as_deref()
    }

    pub fn sender_id(&self) -> &str {
        &self.sender_id
    }

    pub fn encryption_enabled(&self) -> bool {
        self.cipher.is_some()
    }

    pub fn cipher(&self) -> Option<&MessageCipher> {
        self.cipher.as_ref()
    }

    pub fn ledger(&self) -> &UnreadLedger {
        &self.ledger
    }

    pub fn conversations(&self) -> &ConversationRepository {
        &self.conversations
    }

    fn messages_path(&self, conversation_id: &str) -> String {
        format!(
            "{}/{}/{}",
            self.conversations_collection, conversation_id, self.messages_collection
        )
    }

    /// Strictly increasing epoch milliseconds for records written by this store
    fn next_created_at(&mut self) -> i64 {
        let now = Utc::now().timestamp_millis();
        self.last_created_at = now.max(self.last_created_at + 1);
        self.last_created_at
    }

    async fn ensure_conversation(&mut self) -> Result<String, ChatError> {
        if let Some(id) = self.conversation_id.clone() {
            // Sending into a record without `members` would never count the peers
            if !self.conversation_verified {
                if self.conversations.get(&id).await?.is_none() {
                    return Err(ChatError::ConversationNotFound(id));
                }
                self.conversation_verified = true;
            }
            return Ok(id);
        }

        let conversation = self
            .conversations
            .create(
                &self.sender_id,
                &self.draft.members,
                self.draft.name.clone(),
                self.draft.image.clone(),
            )
            .await?;
        info!("Lazily created conversation {}", conversation.id);
        self.conversation_id = Some(conversation.id.clone());
        self.conversation_verified = true;
        Ok(conversation.id)
    }

    /// Send a message and return it in its final `sent` state.
    ///
    /// The conversation is created first when the store has none. The record
    /// is written as `pending` before the unread ledger counts it, so a
    /// failed write is never counted. When a later step fails, the record
    /// stays `pending` and can be resumed with [`MessageStore::retry_pending`].
    pub async fn append(&mut self, text: &str, kind: MessageKind) -> Result<MessageRecord, ChatError> {
        let conversation_id = self.ensure_conversation().await?;

        // Refuse to send plaintext when encryption was asked for
        let stored_text = match &self.cipher {
            Some(cipher) => cipher.seal(text)?,
            None => text.to_string(),
        };

        let mut record = MessageRecord {
            id: String::new(),
            sender_id: self.sender_id.clone(),
            text: stored_text,
            created_at: Some(self.next_created_at()),
            status: MessageStatus::Pending,
            read_by: BTreeMap::from([(self.sender_id.clone(), true)]),
            counted: false,
            kind,
        };

        let collection = self.messages_path(&conversation_id);
        record.id = match self.docs.create(&collection, to_document(&record)?).await {
            Ok(id) => id,
            Err(e) => {
                error!("Failed to write message to {}: {}", collection, e);
                return Err(e.into());
            }
        };
        debug!("Message {} written as pending", record.id);

        self.count(&conversation_id, &mut record).await?;
        self.deliver(&conversation_id, record).await
    }

    /// Record the message in the unread ledger, then mark the record as
    /// counted. Only the marker write failing can let a retry count it again.
    async fn count(&self, conversation_id: &str, record: &mut MessageRecord) -> Result<(), ChatError> {
        if let Err(e) = self.ledger.record_send(conversation_id, &record.latest()).await {
            error!(
                "Failed to update unread ledger of {}, message {} left pending: {}",
                conversation_id, record.id, e
            );
            return Err(e);
        }

        let doc = DocumentRef::new(self.messages_path(conversation_id), record.id.clone());
        if let Err(e) = self.docs.set_merge(&doc, to_document(&json!({ "counted": true }))?).await {
            error!("Failed to mark message {} as counted: {}", record.id, e);
            return Err(e.into());
        }
        record.counted = true;
        Ok(())
    }

    /// Upload the attachment (if any) and promote the record to `sent` in a
    /// single write
    async fn deliver(
        &self,
        conversation_id: &str,
        mut record: MessageRecord,
    ) -> Result<MessageRecord, ChatError> {
        if record.kind.is_media() {
            record.kind = match self.upload_media(conversation_id, &record).await {
                Ok(kind) => kind,
                Err(e) => {
                    error!("Upload for message {} failed, left pending: {}", record.id, e);
                    return Err(e);
                }
            };
        }
        record.status = MessageStatus::Sent;

        let doc = DocumentRef::new(self.messages_path(conversation_id), record.id.clone());
        let patch = if record.kind.is_media() {
            to_document(&record)?
        } else {
            to_document(&json!({ "status": MessageStatus::Sent }))?
        };
        if let Err(e) = self.docs.set_merge(&doc, patch).await {
            error!("Failed to promote message {}, left pending: {}", record.id, e);
            return Err(e.into());
        }

        info!("Message {} sent in {}", record.id, conversation_id);
        Ok(record)
    }

    async fn upload_media(
        &self,
        conversation_id: &str,
        record: &MessageRecord,
    ) -> Result<MessageKind, ChatError> {
        let local = record
            .kind
            .local_path()
            .ok_or_else(|| ChatError::MissingMediaFile(record.id.clone()))?;
        let local = Path::new(local);

        let remote = match record.kind.extension() {
            Some(ext) => format!(
                "{}/{}/{}/{}.{}",
                self.media_root,
                conversation_id,
                record.kind.storage_folder(),
                record.id,
                ext
            ),
            None => format!(
                "{}/{}/{}/{}",
                self.media_root,
                conversation_id,
                record.kind.storage_folder(),
                record.id
            ),
        };

        let reference = self.blobs.upload(local, &remote).await?;
        let url = self.blobs.download_url(&reference).await?;
        let size = tokio::fs::metadata(local).await.ok().map(|m| m.len());

        Ok(record.kind.clone().with_upload(url, size))
    }

    /// Resume a message stuck in `pending`. The unread ledger is only
    /// updated when it never recorded the message.
    pub async fn retry_pending(&self, message_id: &str) -> Result<MessageRecord, ChatError> {
        let conversation_id = self
            .conversation_id
            .clone()
            .ok_or(ChatError::NoConversation)?;
        let doc = DocumentRef::new(self.messages_path(&conversation_id), message_id);

        let snapshot = self
            .docs
            .get(&doc)
            .await?
            .ok_or_else(|| ChatError::MessageNotFound(message_id.to_string()))?;
        let mut record = MessageRecord::from_snapshot(&snapshot)?;
        if record.status != MessageStatus::Pending {
            return Err(ChatError::NotPending(message_id.to_string()));
        }

        info!("Retrying pending message {}", message_id);
        if !record.counted {
            self.count(&conversation_id, &mut record).await?;
        }
        self.deliver(&conversation_id, record).await
    }

    /// Newest page of history. Resets the cursor to the oldest record returned.
    pub async fn get_history(&mut self, page_size: usize) -> Result<Page<MessageRecord>, ChatError> {
        let Some(conversation_id) = self.conversation_id.clone() else {
            debug!("No conversation yet, history is empty");
            self.cursor = None;
            return Ok(Page::empty());
        };

        let query = Query::new(self.messages_path(&conversation_id))
            .order_by(ORDER_FIELD, OrderDirection::Descending)
            .limit(page_size.max(1) + 1);
        let (page, cursor) = self.fetch_page(query, page_size.max(1)).await?;
        self.cursor = cursor;

        debug!(
            "Loaded {} messages of {} (has_more: {})",
            page.len(),
            conversation_id,
            page.has_more
        );
        Ok(page)
    }

    /// Next older page after the cursor. Without a cursor this is an empty page.
    pub async fn get_more(&mut self, page_size: usize) -> Result<Page<MessageRecord>, ChatError> {
        let (Some(conversation_id), Some(cursor)) = (self.conversation_id.clone(), self.cursor.clone())
        else {
            warn!("get_more called before any history was loaded");
            return Ok(Page::empty());
        };

        let query = Query::new(self.messages_path(&conversation_id))
            .order_by(ORDER_FIELD, OrderDirection::Descending)
            .start_after(cursor)
            .limit(page_size.max(1) + 1);
        let (page, cursor) = self.fetch_page(query, page_size.max(1)).await?;
        if cursor.is_some() {
            self.cursor = cursor;
        }

        debug!(
            "Loaded {} older messages of {} (has_more: {})",
            page.len(),
            conversation_id,
            page.has_more
        );
        Ok(page)
    }

    /// Run a `page_size + 1` query and split off the look-ahead record
    async fn fetch_page(
        &self,
        query: Query,
        page_size: usize,
    ) -> Result<(Page<MessageRecord>, Option<Cursor>), ChatError> {
        let mut snapshots = self.docs.query(query).await?;
        let has_more = snapshots.len() > page_size;
        snapshots.truncate(page_size);

        let cursor = snapshots
            .last()
            .map(|oldest| Cursor::from_snapshot(oldest, ORDER_FIELD));
        let messages = snapshots
            .iter()
            .map(|snapshot| self.decode(snapshot))
            .collect::<Result<Vec<_>, _>>()?;

        Ok((Page { messages, has_more }, cursor))
    }

    fn decode(&self, snapshot: &Snapshot) -> Result<MessageRecord, ChatError> {
        let mut record = MessageRecord::from_snapshot(snapshot)?;
        if let Some(cipher) = &self.cipher {
            record.text = cipher.open(&record.text);
        }
        Ok(record)
    }

    /// Stream messages as they become visible.
    ///
    /// Records are passed on as stored; an encrypted conversation delivers
    /// ciphertext.
    pub fn subscribe<F>(&self, mut on_delivered: F) -> Result<Subscription, ChatError>
    where
        F: FnMut(MessageRecord) + Send + 'static,
    {
        let conversation_id = self
            .conversation_id
            .as_deref()
            .ok_or(ChatError::NoConversation)?;
        let feed = self.docs.listen(&self.messages_path(conversation_id))?;

        info!("Subscribed to messages of {}", conversation_id);
        Ok(Subscription::spawn(self.docs.clone(), feed, move |event| {
            if let Some(record) = delivered_record(&event) {
                on_delivered(record);
            }
        }))
    }
}

/// The visibility gate of the delivery stream: only a modification whose
/// resulting status is `sent` counts as a delivery.
pub fn delivered_record(event: &ChangeEvent) -> Option<MessageRecord> {
    if event.kind != ChangeKind::Modified {
        return None;
    }
    match MessageRecord::from_snapshot(&event.document) {
        Ok(record) if record.status == MessageStatus::Sent => Some(record),
        Ok(_) => None,
        Err(e) => {
            warn!("Skipping malformed message {}: {}", event.document.id, e);
            None
        }
    }
}
