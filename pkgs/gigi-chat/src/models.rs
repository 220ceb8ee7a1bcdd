//! Records exchanged with the document store and the UI layer

use std::collections::BTreeMap;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ChatError;
use gigi_store::Snapshot;

/// Visibility state of a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Written but not yet visible to receivers
    Pending,
    /// Promoted; content is final except for the media URL backfill
    Sent,
}

/// Image, video or voice attachment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaSource {
    /// Local file on the sending device
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    /// Public URL, set once the upload completes
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Document attachment
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DocumentSource {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub size: Option<u64>,
}

/// Message variant, stored as a `type` tag next to the message fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum MessageKind {
    #[default]
    Text,
    Image(MediaSource),
    Video(MediaSource),
    Voice(MediaSource),
    Document(DocumentSource),
}

impl MessageKind {
    /// Guess the attachment variant for a local file from its MIME type
    pub fn from_path(path: &Path) -> Self {
        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_lowercase());
        let local = Some(path.to_string_lossy().into_owned());
        let media = || MediaSource {
            path: local.clone(),
            url: None,
            extension: extension.clone(),
            size: None,
        };

        match mime_guess::from_path(path).first() {
            Some(mime) if mime.type_() == mime_guess::mime::IMAGE => MessageKind::Image(media()),
            Some(mime) if mime.type_() == mime_guess::mime::VIDEO => MessageKind::Video(media()),
            Some(mime) if mime.type_() == mime_guess::mime::AUDIO => MessageKind::Voice(media()),
            _ => MessageKind::Document(DocumentSource {
                path: local.clone(),
                url: None,
                name: path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "document".to_string()),
                extension: extension.clone(),
                size: None,
            }),
        }
    }

    pub fn is_media(&self) -> bool {
        !matches!(self, MessageKind::Text)
    }

    pub fn local_path(&self) -> Option<&str> {
        match self {
            MessageKind::Text => None,
            MessageKind::Image(m) | MessageKind::Video(m) | MessageKind::Voice(m) => m.path.as_deref(),
            MessageKind::Document(d) => d.path.as_deref(),
        }
    }

    pub fn url(&self) -> Option<&str> {
        match self {
            MessageKind::Text => None,
            MessageKind::Image(m) | MessageKind::Video(m) | MessageKind::Voice(m) => m.url.as_deref(),
            MessageKind::Document(d) => d.url.as_deref(),
        }
    }

    pub fn extension(&self) -> Option<&str> {
        match self {
            MessageKind::Text => None,
            MessageKind::Image(m) | MessageKind::Video(m) | MessageKind::Voice(m) => {
                m.extension.as_deref()
            }
            MessageKind::Document(d) => d.extension.as_deref(),
        }
    }

    /// Attach the resolved URL and, when known, the uploaded size
    pub fn with_upload(self, url: String, size: Option<u64>) -> Self {
        match self {
            MessageKind::Text => MessageKind::Text,
            MessageKind::Image(m) => MessageKind::Image(m.uploaded(url, size)),
            MessageKind::Video(m) => MessageKind::Video(m.uploaded(url, size)),
            MessageKind::Voice(m) => MessageKind::Voice(m.uploaded(url, size)),
            MessageKind::Document(mut d) => {
                d.url = Some(url);
                d.size = d.size.or(size);
                MessageKind::Document(d)
            }
        }
    }

    /// Folder used for uploads of this variant
    pub fn storage_folder(&self) -> &'static str {
        match self {
            MessageKind::Text => "text",
            MessageKind::Image(_) => "images",
            MessageKind::Video(_) => "videos",
            MessageKind::Voice(_) => "voices",
            MessageKind::Document(_) => "documents",
        }
    }
}

impl MediaSource {
    fn uploaded(mut self, url: String, size: Option<u64>) -> Self {
        self.url = Some(url);
        self.size = self.size.or(size);
        self
    }
}

/// A message as stored in a conversation's message collection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRecord {
    /// Document id; not part of the stored body
    #[serde(skip)]
    pub id: String,
    pub sender_id: String,
    /// Plaintext, or ciphertext when the conversation is encrypted
    #[serde(default)]
    pub text: String,
    /// Epoch milliseconds; sort and pagination key
    #[serde(default)]
    pub created_at: Option<i64>,
    pub status: MessageStatus,
    #[serde(default)]
    pub read_by: BTreeMap<String, bool>,
    /// Whether the unread ledger has recorded this message. Records without
    /// the field predate it and were counted when written.
    #[serde(default = "counted_by_default")]
    pub counted: bool,
    #[serde(flatten)]
    pub kind: MessageKind,
}

fn counted_by_default() -> bool {
    true
}

impl MessageRecord {
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, ChatError> {
        let mut record: MessageRecord = snapshot.decode()?;
        record.id = snapshot.id.clone();
        Ok(record)
    }

    /// Preview of this record for the conversation's `latestMessage`
    pub fn latest(&self) -> LatestMessage {
        LatestMessage {
            text: self.text.clone(),
            sender_id: self.sender_id.clone(),
            created_at: self.created_at.unwrap_or_default(),
            read_by: self.read_by.clone(),
        }
    }
}

/// Preview of the newest message kept on the conversation record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestMessage {
    pub text: String,
    pub sender_id: String,
    pub created_at: i64,
    #[serde(default)]
    pub read_by: BTreeMap<String, bool>,
}

/// Conversation record with its aggregate state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    #[serde(skip)]
    pub id: String,
    /// Fixed at creation
    #[serde(default)]
    pub members: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub latest_message: Option<LatestMessage>,
    #[serde(default)]
    pub un_read: BTreeMap<String, i64>,
    #[serde(default)]
    pub typing: BTreeMap<String, bool>,
    #[serde(default)]
    pub created_at: i64,
    #[serde(default)]
    pub updated_at: i64,
}

impl Conversation {
    pub fn from_snapshot(snapshot: &Snapshot) -> Result<Self, ChatError> {
        let mut conversation: Conversation = snapshot.decode()?;
        conversation.id = snapshot.id.clone();
        Ok(conversation)
    }

    pub fn unread_for(&self, member_id: &str) -> i64 {
        self.un_read.get(member_id).copied().unwrap_or(0)
    }

    /// Members other than `member_id` whose typing flag is set
    pub fn typing_except(&self, member_id: &str) -> Vec<String> {
        self.typing
            .iter()
            .filter(|(id, typing)| **typing && id.as_str() != member_id)
            .map(|(id, _)| id.clone())
            .collect()
    }
}

/// Display identity of a chat participant
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserIdentity {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            avatar: None,
        }
    }

    pub fn with_avatar(mut self, avatar: impl Into<String>) -> Self {
        self.avatar = Some(avatar.into());
        self
    }

    /// Identity used for senders the session does not know about
    pub fn unknown(id: &str) -> Self {
        Self::new(id, id)
    }
}

/// Display-ready message handed to the UI layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DisplayMessage {
    #[serde(rename = "_id")]
    pub id: String,
    pub text: String,
    pub created_at: DateTime<Utc>,
    pub user: UserIdentity,
    pub status: MessageStatus,
    #[serde(default)]
    pub read_by: BTreeMap<String, bool>,
    #[serde(flatten)]
    pub kind: MessageKind,
}

/// One page of history, newest first
#[derive(Debug, Clone, PartialEq)]
pub struct Page<T> {
    pub messages: Vec<T>,
    /// Whether older messages remain beyond this page
    pub has_more: bool,
}

impl<T> Page<T> {
    pub fn empty() -> Self {
        Self {
            messages: Vec::new(),
            has_more: false,
        }
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn map<U>(self, f: impl FnMut(T) -> U) -> Page<U> {
        Page {
            messages: self.messages.into_iter().map(f).collect(),
            has_more: self.has_more,
        }
    }
}
