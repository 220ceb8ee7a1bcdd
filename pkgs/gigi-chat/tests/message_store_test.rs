//! Message store tests
//!
//! Append protocol, media uploads, pagination and the delivery stream

mod common;

use std::collections::HashSet;
use std::io::Write;
use std::sync::Arc;

use common::{
    collector, config_with_page_size, memory_backend, next, stays_quiet, FaultyStore,
    FlakyBlobStore,
};
use gigi_chat::{
    ChatBackend, ChatConfig, ChatError, ConversationDraft, EncryptionConfig, MessageKind,
    MessageRecord, MessageStatus, MessageStore,
};
use gigi_store::{DocumentStore, MemoryBlobStore, MemoryDocumentStore, OrderDirection, Query};
use serde_json::json;
use tempfile::NamedTempFile;

fn alice_store(backend: &ChatBackend, config: &ChatConfig) -> MessageStore {
    MessageStore::new(
        backend,
        "alice",
        ConversationDraft::with_members(["bob"]),
        None,
        config,
    )
    .expect("Failed to build store")
}

fn image_file(bytes: &[u8]) -> NamedTempFile {
    let mut file = tempfile::Builder::new()
        .suffix(".png")
        .tempfile()
        .expect("Failed to create temp file");
    file.write_all(bytes).unwrap();
    file
}

async fn stored_messages(docs: &MemoryDocumentStore, conversation_id: &str) -> Vec<MessageRecord> {
    docs.query(
        Query::new(format!("conversations/{}/messages", conversation_id))
            .order_by("createdAt", OrderDirection::Ascending),
    )
    .await
    .unwrap()
    .iter()
    .map(|s| MessageRecord::from_snapshot(s).unwrap())
    .collect()
}

#[tokio::test]
async fn test_first_append_creates_conversation() {
    let (backend, docs) = memory_backend();
    let config = ChatConfig::default();
    let mut store = alice_store(&backend, &config);
    assert!(store.conversation_id().is_none());

    let sent = store.append("hi bob", MessageKind::Text).await.unwrap();

    let conversation_id = store.conversation_id().expect("Conversation adopted").to_string();
    assert_eq!(sent.status, MessageStatus::Sent);
    assert_eq!(sent.text, "hi bob");

    let conversation = store
        .conversations()
        .get(&conversation_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(conversation.members, vec!["alice".to_string(), "bob".to_string()]);
    assert_eq!(conversation.unread_for("bob"), 1);
    assert_eq!(conversation.unread_for("alice"), 0);
    assert_eq!(conversation.latest_message.unwrap().text, "hi bob");

    let stored = stored_messages(&docs, &conversation_id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, MessageStatus::Sent);
    assert_eq!(stored[0].read_by.get("alice"), Some(&true));
}

#[tokio::test]
async fn test_created_at_is_strictly_increasing() {
    let (backend, _) = memory_backend();
    let config = ChatConfig::default();
    let mut store = alice_store(&backend, &config);

    let mut previous = 0;
    for i in 0..10 {
        let sent = store.append(&format!("m{}", i), MessageKind::Text).await.unwrap();
        let created_at = sent.created_at.unwrap();
        assert!(created_at > previous);
        previous = created_at;
    }
}

#[tokio::test]
async fn test_media_is_uploaded_before_promotion() {
    let (backend, docs) = memory_backend();
    let config = ChatConfig::default();
    let mut store = alice_store(&backend, &config);
    let file = image_file(b"png bytes");

    let sent = store
        .append("look", MessageKind::from_path(file.path()))
        .await
        .unwrap();

    let conversation_id = store.conversation_id().unwrap().to_string();
    let expected_url = format!(
        "memory://gigi-chat/chat-media/{}/images/{}.png",
        conversation_id, sent.id
    );
    assert_eq!(sent.kind.url(), Some(expected_url.as_str()));
    match &sent.kind {
        MessageKind::Image(media) => assert_eq!(media.size, Some(9)),
        other => panic!("unexpected kind {:?}", other),
    }

    let stored = stored_messages(&docs, &conversation_id).await;
    assert_eq!(stored[0].status, MessageStatus::Sent);
    assert_eq!(stored[0].kind.url(), Some(expected_url.as_str()));
}

#[tokio::test]
async fn test_failed_upload_leaves_pending_until_retry() {
    let docs = Arc::new(MemoryDocumentStore::new());
    let blobs = Arc::new(FlakyBlobStore::default());
    let backend = ChatBackend::new(docs.clone(), blobs.clone());
    let config = ChatConfig::default();
    let mut store = alice_store(&backend, &config);
    let file = image_file(b"voice");

    blobs.set_failing(true);
    let err = store
        .append("", MessageKind::from_path(file.path()))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::Blob(_)));

    let conversation_id = store.conversation_id().unwrap().to_string();
    let stored = stored_messages(&docs, &conversation_id).await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].status, MessageStatus::Pending);
    assert!(stored[0].kind.url().is_none());

    blobs.set_failing(false);
    let retried = store.retry_pending(&stored[0].id).await.unwrap();
    assert_eq!(retried.status, MessageStatus::Sent);
    assert!(retried.kind.url().is_some());

    // The retry does not count the message twice
    assert_eq!(
        store.ledger().unread_count(&conversation_id, "bob").await.unwrap(),
        1
    );

    let err = store.retry_pending(&stored[0].id).await.unwrap_err();
    assert!(matches!(err, ChatError::NotPending(_)));
    let err = store.retry_pending("missing").await.unwrap_err();
    assert!(matches!(err, ChatError::MessageNotFound(_)));
}

fn faulty_backend() -> (ChatBackend, Arc<FaultyStore>) {
    let docs = Arc::new(FaultyStore::default());
    let backend = ChatBackend::new(docs.clone(), Arc::new(MemoryBlobStore::default()));
    (backend, docs)
}

#[tokio::test]
async fn test_failed_message_write_is_not_counted() {
    let (backend, docs) = faulty_backend();
    let config = ChatConfig::default();
    let mut store = alice_store(&backend, &config);
    store.append("first", MessageKind::Text).await.unwrap();
    let conversation_id = store.conversation_id().unwrap().to_string();

    docs.fail_message_creates(1);
    let err = store.append("lost", MessageKind::Text).await.unwrap_err();
    assert!(matches!(err, ChatError::Store(_)));
    store.append("again", MessageKind::Text).await.unwrap();

    let stored = stored_messages(&docs.inner, &conversation_id).await;
    let texts: Vec<_> = stored.iter().map(|m| m.text.as_str()).collect();
    assert_eq!(texts, vec!["first", "again"]);

    let conversation = store.conversations().get(&conversation_id).await.unwrap().unwrap();
    assert_eq!(conversation.unread_for("bob"), stored.len() as i64);
    assert_eq!(conversation.latest_message.unwrap().text, "again");
}

#[tokio::test]
async fn test_failed_ledger_update_is_counted_on_retry() {
    let (backend, docs) = faulty_backend();
    let config = ChatConfig::default();
    let mut store = alice_store(&backend, &config);
    store.append("first", MessageKind::Text).await.unwrap();
    let conversation_id = store.conversation_id().unwrap().to_string();

    docs.fail_transactions(1);
    assert!(store.append("queued", MessageKind::Text).await.is_err());

    let stored = stored_messages(&docs.inner, &conversation_id).await;
    assert_eq!(stored.len(), 2);
    assert_eq!(stored[1].status, MessageStatus::Pending);
    assert!(!stored[1].counted);
    assert_eq!(store.ledger().unread_count(&conversation_id, "bob").await.unwrap(), 1);

    let retried = store.retry_pending(&stored[1].id).await.unwrap();
    assert_eq!(retried.status, MessageStatus::Sent);
    assert!(retried.counted);

    let conversation = store.conversations().get(&conversation_id).await.unwrap().unwrap();
    assert_eq!(conversation.unread_for("bob"), 2);
    assert_eq!(conversation.latest_message.unwrap().text, "queued");

    let err = store.retry_pending(&stored[1].id).await.unwrap_err();
    assert!(matches!(err, ChatError::NotPending(_)));
    assert_eq!(store.ledger().unread_count(&conversation_id, "bob").await.unwrap(), 2);
}

#[tokio::test]
async fn test_unknown_conversation_id_is_rejected() {
    let (backend, docs) = memory_backend();
    let mut store = MessageStore::new(
        &backend,
        "alice",
        ConversationDraft::with_members(["bob"]),
        Some("ghost".to_string()),
        &ChatConfig::default(),
    )
    .unwrap();

    let err = store.append("hello?", MessageKind::Text).await.unwrap_err();
    assert!(matches!(err, ChatError::ConversationNotFound(id) if id == "ghost"));
    assert!(stored_messages(&docs, "ghost").await.is_empty());
    assert!(store.conversations().get("ghost").await.unwrap().is_none());
}

#[tokio::test]
async fn test_media_without_local_file() {
    let (backend, _) = memory_backend();
    let config = ChatConfig::default();
    let mut store = alice_store(&backend, &config);

    let err = store
        .append("", MessageKind::Voice(Default::default()))
        .await
        .unwrap_err();
    assert!(matches!(err, ChatError::MissingMediaFile(_)));
}

#[tokio::test]
async fn test_pages_cover_history_exactly_once() {
    let (backend, _) = memory_backend();
    let config = config_with_page_size(20);
    let mut store = alice_store(&backend, &config);
    for i in 0..45 {
        store.append(&format!("m{}", i), MessageKind::Text).await.unwrap();
    }

    let first = store.get_history(20).await.unwrap();
    assert_eq!(first.len(), 20);
    assert!(first.has_more);

    let mut all = first.messages;
    loop {
        let page = store.get_more(20).await.unwrap();
        all.extend(page.messages);
        if !page.has_more {
            break;
        }
    }

    assert_eq!(all.len(), 45);
    let ids: HashSet<_> = all.iter().map(|m| m.id.clone()).collect();
    assert_eq!(ids.len(), 45, "No duplicates");
    for pair in all.windows(2) {
        assert!(pair[0].created_at > pair[1].created_at, "Strictly descending");
    }
    assert_eq!(all[0].text, "m44");
    assert_eq!(all[44].text, "m0");
}

#[tokio::test]
async fn test_has_more_on_exact_multiple() {
    let (backend, _) = memory_backend();
    let config = ChatConfig::default();
    let mut store = alice_store(&backend, &config);
    for i in 0..10 {
        store.append(&format!("m{}", i), MessageKind::Text).await.unwrap();
    }

    let first = store.get_history(5).await.unwrap();
    assert!(first.has_more);
    let second = store.get_more(5).await.unwrap();
    assert_eq!(second.len(), 5);
    assert!(!second.has_more, "No phantom page after an exact multiple");

    let after_end = store.get_more(5).await.unwrap();
    assert!(after_end.is_empty());
    assert!(!after_end.has_more);
}

#[tokio::test]
async fn test_get_more_without_cursor_is_empty() {
    let (backend, _) = memory_backend();
    let config = ChatConfig::default();
    let mut store = alice_store(&backend, &config);
    store.append("hello", MessageKind::Text).await.unwrap();

    let page = store.get_more(20).await.unwrap();
    assert!(page.is_empty());
    assert!(!page.has_more);
}

#[tokio::test]
async fn test_history_before_first_send() {
    let (backend, _) = memory_backend();
    let config = ChatConfig::default();
    let mut store = alice_store(&backend, &config);

    assert!(store.get_history(20).await.unwrap().is_empty());
    assert!(store.get_more(20).await.unwrap().is_empty());
    assert!(store.conversation_id().is_none(), "Reads never create");
}

#[tokio::test]
async fn test_encrypted_text_is_stored_as_ciphertext() {
    let (backend, docs) = memory_backend();
    let config = ChatConfig::default().with_encryption(EncryptionConfig::new("shared", "salt"));
    let mut store = alice_store(&backend, &config);
    assert!(store.encryption_enabled());

    store.append("secret plans", MessageKind::Text).await.unwrap();
    let conversation_id = store.conversation_id().unwrap().to_string();

    let stored = stored_messages(&docs, &conversation_id).await;
    assert_ne!(stored[0].text, "secret plans");
    let conversation = store.conversations().get(&conversation_id).await.unwrap().unwrap();
    assert_ne!(conversation.latest_message.unwrap().text, "secret plans");

    let page = store.get_history(20).await.unwrap();
    assert_eq!(page.messages[0].text, "secret plans");
}

#[tokio::test]
async fn test_invalid_key_length_is_rejected_up_front() {
    let (backend, _) = memory_backend();
    let mut encryption = EncryptionConfig::new("shared", "salt");
    encryption.key_length = 24;
    let config = ChatConfig::default().with_encryption(encryption);

    let result = MessageStore::new(&backend, "alice", ConversationDraft::default(), None, &config);
    assert!(matches!(result, Err(ChatError::Crypto(_))));
}

#[tokio::test]
async fn test_subscribe_delivers_only_promoted_messages() {
    let (backend, _) = memory_backend();
    let config = ChatConfig::default();
    let mut alice = alice_store(&backend, &config);
    alice.append("before", MessageKind::Text).await.unwrap();
    let conversation_id = alice.conversation_id().unwrap().to_string();

    let bob = MessageStore::new(
        &backend,
        "bob",
        ConversationDraft::default(),
        Some(conversation_id),
        &config,
    )
    .unwrap();
    let (callback, mut delivered) = collector();
    let subscription = bob.subscribe(callback).unwrap();

    alice.append("after", MessageKind::Text).await.unwrap();

    let record = next(&mut delivered).await;
    assert_eq!(record.text, "after");
    assert_eq!(record.sender_id, "alice");
    assert_eq!(record.status, MessageStatus::Sent);
    assert!(stays_quiet(&mut delivered).await, "Delivered exactly once");

    subscription.dispose();
}

#[tokio::test]
async fn test_subscribe_requires_conversation() {
    let (backend, _) = memory_backend();
    let config = ChatConfig::default();
    let store = alice_store(&backend, &config);

    let result = store.subscribe(|_| {});
    assert!(matches!(result, Err(ChatError::NoConversation)));
}

#[tokio::test]
async fn test_records_use_camel_case_layout() {
    let (backend, docs) = memory_backend();
    let config = ChatConfig::default();
    let mut store = alice_store(&backend, &config);
    store.append("layout", MessageKind::Text).await.unwrap();
    let conversation_id = store.conversation_id().unwrap().to_string();

    let raw = docs
        .query(Query::new(format!("conversations/{}/messages", conversation_id)))
        .await
        .unwrap();
    let data = &raw[0].data;
    assert_eq!(data["senderId"], json!("alice"));
    assert_eq!(data["type"], json!("text"));
    assert_eq!(data["status"], json!("sent"));
    assert!(data["createdAt"].is_i64());
}
