//! Chat configuration

use std::path::Path;
use std::time::Duration;

use gigi_crypto::{derive_key, EncryptionKey, MessageCipher};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::ChatError;

/// Configuration for a chat session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ChatConfig {
    /// Messages per history page (default: 20)
    pub page_size: usize,

    /// Inactivity before the typing flag is cleared, in milliseconds (default: 3000)
    pub typing_timeout_ms: u64,

    /// Collection holding conversation records (default: "conversations")
    pub conversations_collection: String,

    /// Per-conversation message sub-collection (default: "messages")
    pub messages_collection: String,

    /// Blob store prefix for media uploads (default: "chat-media")
    pub media_root: String,

    /// Encrypt message text when set
    pub encryption: Option<EncryptionConfig>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            page_size: 20,
            typing_timeout_ms: 3000,
            conversations_collection: "conversations".to_string(),
            messages_collection: "messages".to_string(),
            media_root: "chat-media".to_string(),
            encryption: None,
        }
    }
}

impl ChatConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ChatError> {
        let config: ChatConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a JSON file
    pub fn load(path: &Path) -> Result<Self, ChatError> {
        let json = std::fs::read_to_string(path)?;
        let config = Self::from_json_str(&json)?;
        info!("Loaded chat config from {}", path.display());
        Ok(config)
    }

    pub fn with_encryption(mut self, encryption: EncryptionConfig) -> Self {
        self.encryption = Some(encryption);
        self
    }

    pub fn typing_timeout(&self) -> Duration {
        Duration::from_millis(self.typing_timeout_ms)
    }

    pub fn validate(&self) -> Result<(), ChatError> {
        if self.page_size == 0 {
            return Err(ChatError::InvalidConfig("pageSize must be positive".into()));
        }
        if self.conversations_collection.is_empty() || self.messages_collection.is_empty() {
            return Err(ChatError::InvalidConfig(
                "collection names must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Shared-secret settings for message text encryption
#[derive(Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionConfig {
    pub password: String,
    pub salt: String,

    /// PBKDF2 rounds (default: 5000)
    #[serde(default = "default_iterations")]
    pub iterations: u32,

    /// Derived key length in bytes (default: 32)
    #[serde(default = "default_key_length")]
    pub key_length: usize,
}

fn default_iterations() -> u32 {
    5000
}

fn default_key_length() -> usize {
    32
}

impl EncryptionConfig {
    pub fn new(password: impl Into<String>, salt: impl Into<String>) -> Self {
        Self {
            password: password.into(),
            salt: salt.into(),
            iterations: default_iterations(),
            key_length: default_key_length(),
        }
    }

    /// Derive the message cipher described by this configuration
    pub fn cipher(&self) -> Result<MessageCipher, ChatError> {
        let bytes = derive_key(&self.password, &self.salt, self.iterations, self.key_length)?;
        Ok(MessageCipher::new(EncryptionKey::from_bytes(&bytes)?))
    }
}

impl std::fmt::Debug for EncryptionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionConfig")
            .field("password", &"<redacted>")
            .field("salt", &self.salt)
            .field("iterations", &self.iterations)
            .field("key_length", &self.key_length)
            .finish()
    }
}
