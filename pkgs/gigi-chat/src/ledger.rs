//! Per-member unread counters and typing flags on the conversation record

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use gigi_store::{Document, DocumentRef, DocumentStore};
use serde_json::{json, Map, Value};
use tracing::{debug, info};

use crate::models::{Conversation, LatestMessage};
use crate::ChatError;

/// Unread ledger for the conversations of one collection
#[derive(Clone)]
pub struct UnreadLedger {
    docs: Arc<dyn DocumentStore>,
    collection: String,
}

impl UnreadLedger {
    pub fn new(docs: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            docs,
            collection: collection.into(),
        }
    }

    fn conversation_ref(&self, conversation_id: &str) -> DocumentRef {
        DocumentRef::new(self.collection.clone(), conversation_id)
    }

    /// Reset the sender's counter and increment every other member's, atomically
    pub async fn bump_on_send(&self, conversation_id: &str, sender_id: &str) -> Result<(), ChatError> {
        self.apply_send(conversation_id, sender_id, None).await
    }

    /// Same as [`UnreadLedger::bump_on_send`], also replacing `latestMessage`
    /// in the same transaction
    pub async fn record_send(
        &self,
        conversation_id: &str,
        latest: &LatestMessage,
    ) -> Result<(), ChatError> {
        self.apply_send(conversation_id, &latest.sender_id, Some(latest))
            .await
    }

    async fn apply_send(
        &self,
        conversation_id: &str,
        sender_id: &str,
        latest: Option<&LatestMessage>,
    ) -> Result<(), ChatError> {
        let doc = self.conversation_ref(conversation_id);
        let latest_value = latest.map(serde_json::to_value).transpose()?;
        let now = Utc::now().timestamp_millis();

        // A missing record is a normal outcome here: the first send creates
        // it inside the same transaction.
        self.docs
            .run_transaction(&doc, &|current| {
                let mut next = current.cloned().unwrap_or_default();
                let counters = bumped_counters(&next, sender_id);
                next.insert("unRead".to_string(), Value::Object(counters));
                if let Some(latest) = &latest_value {
                    if is_newer(&next, latest) {
                        next.insert("latestMessage".to_string(), latest.clone());
                    }
                }
                next.insert("updatedAt".to_string(), json!(now));
                Ok(Some(next))
            })
            .await?;

        debug!(
            "Bumped unread counters in {} for send by {}",
            conversation_id, sender_id
        );
        Ok(())
    }

    /// Zero the member's unread counter
    pub async fn mark_read(&self, conversation_id: &str, member_id: &str) -> Result<(), ChatError> {
        let patch = single_entry("unRead", member_id, json!(0));
        self.docs
            .set_merge(&self.conversation_ref(conversation_id), patch)
            .await?;

        info!("Marked {} as read by {}", conversation_id, member_id);
        Ok(())
    }

    /// Set the member's typing flag. Debouncing is up to the caller.
    pub async fn set_typing(
        &self,
        conversation_id: &str,
        member_id: &str,
        is_typing: bool,
    ) -> Result<(), ChatError> {
        let patch = single_entry("typing", member_id, json!(is_typing));
        self.docs
            .set_merge(&self.conversation_ref(conversation_id), patch)
            .await?;

        debug!(
            "Typing flag of {} in {} set to {}",
            member_id, conversation_id, is_typing
        );
        Ok(())
    }

    /// Current unread counter of a member; 0 when the conversation is unknown
    pub async fn unread_count(&self, conversation_id: &str, member_id: &str) -> Result<i64, ChatError> {
        match self.docs.get(&self.conversation_ref(conversation_id)).await? {
            Some(snapshot) => Ok(Conversation::from_snapshot(&snapshot)?.unread_for(member_id)),
            None => Ok(0),
        }
    }
}

/// `{ field: { key: value } }`
fn single_entry(field: &str, key: &str, value: Value) -> Document {
    let mut inner = Map::new();
    inner.insert(key.to_string(), value);
    let mut patch = Document::new();
    patch.insert(field.to_string(), Value::Object(inner));
    patch
}

/// A late-counted message (e.g. resumed by a retry) must not replace a
/// newer preview
fn is_newer(conversation: &Document, latest: &Value) -> bool {
    let created_at = |value: &Value| value.get("createdAt").and_then(Value::as_i64);
    match conversation.get("latestMessage").and_then(created_at) {
        Some(current) => created_at(latest).map_or(true, |candidate| candidate >= current),
        None => true,
    }
}

/// New `unRead` map after `sender_id` sends: the sender is reset to 0 and
/// every other known member (listed in `members` or already in `unRead`)
/// goes up by one.
pub(crate) fn bumped_counters(conversation: &Document, sender_id: &str) -> Map<String, Value> {
    let current = conversation.get("unRead").and_then(Value::as_object);

    let mut members: BTreeSet<String> = conversation
        .get("members")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();
    if let Some(current) = current {
        members.extend(current.keys().cloned());
    }
    members.insert(sender_id.to_string());

    members
        .into_iter()
        .map(|member| {
            let count = if member == sender_id {
                0
            } else {
                current
                    .and_then(|c| c.get(&member))
                    .and_then(Value::as_i64)
                    .unwrap_or(0)
                    + 1
            };
            (member, json!(count))
        })
        .collect()
}
