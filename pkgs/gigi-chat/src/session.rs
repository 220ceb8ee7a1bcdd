//! Per-conversation chat session driven by the UI layer

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, info};

use crate::config::ChatConfig;
use crate::formatter::{blacklist_regex, format_message, FormatOptions};
use crate::message_store::{ConversationDraft, MessageStore};
use crate::models::{DisplayMessage, MessageKind, MessageRecord, Page, UserIdentity};
use crate::subscription::Subscription;
use crate::typing::TypingDebouncer;
use crate::{ChatBackend, ChatError};

/// Display identities of everyone in a session, keyed by member id
#[derive(Debug, Clone)]
struct Participants {
    me: UserIdentity,
    peers: HashMap<String, UserIdentity>,
}

impl Participants {
    fn identity(&self, member_id: &str) -> UserIdentity {
        if member_id == self.me.id {
            return self.me.clone();
        }
        self.peers
            .get(member_id)
            .cloned()
            .unwrap_or_else(|| UserIdentity::unknown(member_id))
    }
}

/// One user's view of one conversation.
///
/// Sessions are independent: open as many as there are active
/// conversations. The conversation is created on the first send when the
/// session is opened without an id.
pub struct ChatSession {
    store: MessageStore,
    participants: Participants,
    blacklist: Option<Regex>,
    config: ChatConfig,
}

impl ChatSession {
    pub fn open(
        backend: &ChatBackend,
        me: UserIdentity,
        peers: Vec<UserIdentity>,
        conversation_id: Option<String>,
        config: ChatConfig,
    ) -> Result<Self, ChatError> {
        let draft = ConversationDraft::with_members(peers.iter().map(|p| p.id.clone()));
        let store = MessageStore::new(backend, me.id.clone(), draft, conversation_id, &config)?;

        info!(
            "Opened chat session for {} (conversation: {:?})",
            me.id,
            store.conversation_id()
        );
        Ok(Self {
            store,
            participants: Participants {
                me,
                peers: peers.into_iter().map(|p| (p.id.clone(), p)).collect(),
            },
            blacklist: None,
            config,
        })
    }

    /// Open a session on the existing conversation between `me` and `peers`,
    /// if there is one
    pub async fn resume(
        backend: &ChatBackend,
        me: UserIdentity,
        peers: Vec<UserIdentity>,
        config: ChatConfig,
    ) -> Result<Self, ChatError> {
        let mut session = Self::open(backend, me, peers, None, config)?;

        let mut members = vec![session.participants.me.id.clone()];
        members.extend(session.participants.peers.keys().cloned());
        let existing = session.store.conversations().find_by_members(&members).await?;
        if let Some(existing) = existing {
            debug!("Resuming conversation {}", existing.id);
            session = Self::open(
                backend,
                session.participants.me,
                session.participants.peers.into_values().collect(),
                Some(existing.id),
                session.config,
            )?;
        }
        Ok(session)
    }

    /// Mask the given words in every message this session hands out
    pub fn with_blacklist<I, S>(mut self, words: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.blacklist = blacklist_regex(words);
        self
    }

    pub fn conversation_id(&self) -> Option<&str> {
        self.store.conversation_id()
    }

    pub fn me(&self) -> &UserIdentity {
        &self.participants.me
    }

    pub fn config(&self) -> &ChatConfig {
        &self.config
    }

    fn require_conversation(&self) -> Result<&str, ChatError> {
        self.store
            .conversation_id()
            .ok_or(ChatError::NoConversation)
    }

    /// Format a record as stored (text may be ciphertext)
    fn display_stored(&self, record: &MessageRecord) -> DisplayMessage {
        let options = FormatOptions {
            blacklist: self.blacklist.as_ref(),
            decrypt: self.store.cipher(),
        };
        format_message(
            record,
            &self.participants.identity(&record.sender_id),
            &options,
        )
    }

    /// Format a record whose text was already decrypted by the store
    fn display_page(&self, page: Page<MessageRecord>) -> Page<DisplayMessage> {
        let options = FormatOptions {
            blacklist: self.blacklist.as_ref(),
            decrypt: None,
        };
        page.map(|record| {
            format_message(
                &record,
                &self.participants.identity(&record.sender_id),
                &options,
            )
        })
    }

    pub async fn send_message(&mut self, text: &str) -> Result<DisplayMessage, ChatError> {
        let record = self.store.append(text, MessageKind::Text).await?;
        Ok(self.display_stored(&record))
    }

    /// Send an attachment with an optional caption
    pub async fn send_media(
        &mut self,
        text: &str,
        kind: MessageKind,
    ) -> Result<DisplayMessage, ChatError> {
        let record = self.store.append(text, kind).await?;
        Ok(self.display_stored(&record))
    }

    /// Retry a message left `pending` by a failed upload or write
    pub async fn retry_pending(&self, message_id: &str) -> Result<DisplayMessage, ChatError> {
        let record = self.store.retry_pending(message_id).await?;
        Ok(self.display_stored(&record))
    }

    /// Newest page of history; resets pagination
    pub async fn load_history(&mut self) -> Result<Page<DisplayMessage>, ChatError> {
        let page = self.store.get_history(self.config.page_size).await?;
        Ok(self.display_page(page))
    }

    /// Next older page
    pub async fn on_load_earlier(&mut self) -> Result<Page<DisplayMessage>, ChatError> {
        let page = self.store.get_more(self.config.page_size).await?;
        Ok(self.display_page(page))
    }

    pub async fn set_typing(&self, is_typing: bool) -> Result<(), ChatError> {
        let conversation_id = self.require_conversation()?;
        self.store
            .ledger()
            .set_typing(conversation_id, &self.participants.me.id, is_typing)
            .await
    }

    pub async fn mark_read(&self) -> Result<(), ChatError> {
        let conversation_id = self.require_conversation()?;
        self.store
            .ledger()
            .mark_read(conversation_id, &self.participants.me.id)
            .await
    }

    /// Unread messages for this session's user
    pub async fn unread_count(&self) -> Result<i64, ChatError> {
        let conversation_id = self.require_conversation()?;
        self.store
            .ledger()
            .unread_count(conversation_id, &self.participants.me.id)
            .await
    }

    /// Debouncer for this user's typing flag, using the configured timeout
    pub fn typing_debouncer(&self) -> Result<TypingDebouncer, ChatError> {
        let conversation_id = self.require_conversation()?;
        Ok(TypingDebouncer::new(
            self.store.ledger().clone(),
            conversation_id,
            self.participants.me.id.clone(),
            self.config.typing_timeout(),
        ))
    }

    /// Stream newly delivered messages, formatted for display
    pub fn subscribe<F>(&self, mut on_message: F) -> Result<Subscription, ChatError>
    where
        F: FnMut(DisplayMessage) + Send + 'static,
    {
        let participants = self.participants.clone();
        let blacklist = self.blacklist.clone();
        let cipher = self.store.cipher().cloned();

        self.store.subscribe(move |record| {
            let options = FormatOptions {
                blacklist: blacklist.as_ref(),
                decrypt: cipher.as_ref(),
            };
            on_message(format_message(
                &record,
                &participants.identity(&record.sender_id),
                &options,
            ));
        })
    }

    /// Stream the ids of the other members currently typing. Only changes
    /// are reported; sends and read receipts on the conversation are not.
    pub fn subscribe_typing<F>(&self, mut on_typing: F) -> Result<Subscription, ChatError>
    where
        F: FnMut(Vec<String>) + Send + 'static,
    {
        let conversation_id = self.require_conversation()?.to_string();
        let me = self.participants.me.id.clone();
        let mut last: Option<Vec<String>> = None;

        self.store
            .conversations()
            .subscribe_to_list_updates(&self.participants.me.id, move |conversation| {
                if conversation.id != conversation_id {
                    return;
                }
                let typing = conversation.typing_except(&me);
                if last.as_ref() != Some(&typing) {
                    last = Some(typing.clone());
                    on_typing(typing);
                }
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_sender_gets_placeholder() {
        let participants = Participants {
            me: UserIdentity::new("alice", "Alice"),
            peers: HashMap::from([("bob".to_string(), UserIdentity::new("bob", "Bob"))]),
        };

        assert_eq!(participants.identity("alice").name, "Alice");
        assert_eq!(participants.identity("bob").name, "Bob");
        assert_eq!(participants.identity("mallory"), UserIdentity::unknown("mallory"));
    }
}
