#![allow(dead_code)]

use std::sync::Arc;

use threadline_backend::{
    ChannelId, Conversation, ConversationId, DEFAULT_CHANNEL_PREFIX, LiveDelivery, MemoryBackend,
    Participant, StoredMessage, UserId,
};
use threadline_sync::{ConversationSyncCore, SyncSettings};

pub const BUYER: &str = "u-ada";
pub const FIRST: &str = "c-grace";
pub const SECOND: &str = "c-alan";

pub fn backend() -> MemoryBackend {
    let backend = MemoryBackend::new();
    backend.insert_conversation(Conversation::new(
        FIRST,
        Participant::new(BUYER, "Ada Lovelace", "ada"),
        Participant::new("u-grace", "Grace Hopper", "grace").with_profile_photo("grace.png"),
    ));
    backend.insert_conversation(Conversation::new(
        SECOND,
        Participant::new(BUYER, "Ada Lovelace", "ada"),
        Participant::new("u-alan", "Alan Turing", "alan"),
    ));
    backend.seed_history(
        &conversation(FIRST),
        vec![
            StoredMessage::new("s1", "hi", 100),
            StoredMessage::new("s2", "hey", 200),
        ],
    );
    backend.seed_history(
        &conversation(SECOND),
        vec![StoredMessage::new("u-alan", "hello ada", 50)],
    );
    backend
}

pub fn core_with(backend: &MemoryBackend, settings: SyncSettings) -> Arc<ConversationSyncCore> {
    Arc::new(ConversationSyncCore::new(
        Arc::new(backend.clone()),
        Arc::new(backend.clone()),
        settings,
    ))
}

pub async fn ready_core(backend: &MemoryBackend) -> Arc<ConversationSyncCore> {
    let core = core_with(backend, SyncSettings::default());
    core.refresh_conversations(&buyer())
        .await
        .expect("conversation list loads");
    core
}

pub fn buyer() -> UserId {
    UserId::new(BUYER)
}

pub fn conversation(raw: &str) -> ConversationId {
    ConversationId::new(raw)
}

pub fn channel(raw: &str) -> ChannelId {
    ChannelId::for_conversation(DEFAULT_CHANNEL_PREFIX, &conversation(raw))
}

pub fn live(conversation_raw: &str, sender: &str, text: &str, timestamp: u64) -> LiveDelivery {
    LiveDelivery::new(channel(conversation_raw), sender, text, timestamp)
}
