//! Collaborator contracts consumed by the sync core, plus an in-process backend.

use std::future::Future;
use std::pin::Pin;

pub mod error;
pub mod ids;
pub mod memory;
pub mod types;

pub use error::{BackendError, BackendResult};
pub use ids::{ChannelId, ConversationId, DEFAULT_CHANNEL_PREFIX, SubscriptionHandle, UserId};
pub use memory::MemoryBackend;
pub use types::{Conversation, DeliverySink, LiveDelivery, Participant, StoredMessage};

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Historical fetch, send, and conversation listing.
pub trait MessageStore: Send + Sync {
    fn list_conversations_for_user<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, BackendResult<Vec<Conversation>>>;

    fn fetch_history<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, BackendResult<Vec<StoredMessage>>>;

    /// Persists and broadcasts one message, returning the stored form.
    fn send<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        sender_id: &'a UserId,
        text: &'a str,
    ) -> BoxFuture<'a, BackendResult<StoredMessage>>;

    /// Advisory signal that a client is now watching this conversation. Never fails.
    fn begin_tracking(&self, conversation_id: &ConversationId);
}

/// Topic-based push delivery.
pub trait RealtimeChannel: Send + Sync {
    fn subscribe<'a>(
        &'a self,
        channel: &'a ChannelId,
        sink: DeliverySink,
    ) -> BoxFuture<'a, BackendResult<SubscriptionHandle>>;

    fn unsubscribe<'a>(&'a self, handle: SubscriptionHandle) -> BoxFuture<'a, BackendResult<()>>;
}
