//! Conversation records: creation, lookup, listing and change streams

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::Utc;
use gigi_store::{to_document, ChangeKind, DocumentRef, DocumentStore, OrderDirection, Query};
use tracing::{debug, info, warn};

use crate::models::Conversation;
use crate::subscription::Subscription;
use crate::ChatError;

#[derive(Clone)]
pub struct ConversationRepository {
    docs: Arc<dyn DocumentStore>,
    collection: String,
}

impl ConversationRepository {
    pub fn new(docs: Arc<dyn DocumentStore>, collection: impl Into<String>) -> Self {
        Self {
            docs,
            collection: collection.into(),
        }
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Create a conversation. The creator is always a member; every member
    /// starts with an unread count of 0 and typing off.
    pub async fn create(
        &self,
        creator_id: &str,
        member_ids: &[String],
        name: Option<String>,
        image: Option<String>,
    ) -> Result<Conversation, ChatError> {
        let mut members: Vec<String> = Vec::with_capacity(member_ids.len() + 1);
        for id in std::iter::once(creator_id).chain(member_ids.iter().map(String::as_str)) {
            if !members.iter().any(|m| m == id) {
                members.push(id.to_string());
            }
        }

        let now = Utc::now().timestamp_millis();
        let mut conversation = Conversation {
            id: String::new(),
            un_read: members.iter().map(|m| (m.clone(), 0)).collect(),
            typing: members.iter().map(|m| (m.clone(), false)).collect(),
            members,
            name,
            image,
            latest_message: None,
            created_at: now,
            updated_at: now,
        };

        let id = self
            .docs
            .create(&self.collection, to_document(&conversation)?)
            .await?;
        conversation.id = id;

        info!(
            "Created conversation {} with members {:?}",
            conversation.id, conversation.members
        );
        Ok(conversation)
    }

    pub async fn get(&self, conversation_id: &str) -> Result<Option<Conversation>, ChatError> {
        let doc = DocumentRef::new(self.collection.clone(), conversation_id);
        match self.docs.get(&doc).await? {
            Some(snapshot) => Ok(Some(Conversation::from_snapshot(&snapshot)?)),
            None => Ok(None),
        }
    }

    /// Conversations of a user, most recently updated first
    pub async fn list(&self, for_user_id: &str) -> Result<Vec<Conversation>, ChatError> {
        let snapshots = self
            .docs
            .query(
                Query::new(self.collection.clone())
                    .where_array_contains("members", for_user_id)
                    .order_by("updatedAt", OrderDirection::Descending),
            )
            .await?;

        let conversations = snapshots
            .iter()
            .map(Conversation::from_snapshot)
            .collect::<Result<Vec<_>, _>>()?;

        debug!(
            "Listed {} conversations for {}",
            conversations.len(),
            for_user_id
        );
        Ok(conversations)
    }

    /// Most recently updated conversation whose member set is exactly `member_ids`
    pub async fn find_by_members(
        &self,
        member_ids: &[String],
    ) -> Result<Option<Conversation>, ChatError> {
        let Some(first) = member_ids.first() else {
            return Ok(None);
        };
        let wanted: BTreeSet<&str> = member_ids.iter().map(String::as_str).collect();

        Ok(self.list(first).await?.into_iter().find(|c| {
            c.members.iter().map(String::as_str).collect::<BTreeSet<_>>() == wanted
        }))
    }

    /// Stream modifications of the user's conversations
    pub fn subscribe_to_list_updates<F>(
        &self,
        for_user_id: &str,
        mut on_change: F,
    ) -> Result<Subscription, ChatError>
    where
        F: FnMut(Conversation) + Send + 'static,
    {
        let feed = self.docs.listen(&self.collection)?;
        let user = for_user_id.to_string();

        Ok(Subscription::spawn(self.docs.clone(), feed, move |event| {
            if event.kind != ChangeKind::Modified {
                return;
            }
            match Conversation::from_snapshot(&event.document) {
                Ok(conversation) if conversation.members.contains(&user) => {
                    on_change(conversation)
                }
                Ok(_) => {}
                Err(e) => warn!("Skipping malformed conversation {}: {}", event.document.id, e),
            }
        }))
    }
}
