use std::sync::Arc;

use threadline_backend::{Conversation, ConversationId, Participant, StoredMessage, UserId};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::engine::{ConversationSyncCore, DeliveryOutcome, OpenOutcome, SyncSnapshot};
use crate::error::SyncResult;
use crate::log::LogEntry;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartOutcome {
    Opened(OpenOutcome),
    NoConversations,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// Stored by the backend; the caller may clear its draft.
    Sent(StoredMessage),
    /// Blank draft, nothing sent.
    Ignored,
    NoConversation,
}

/// Session controller for one signed-in user.
///
/// The delivery pump is spawned exactly once, here, so deliveries are applied in arrival
/// order on a single task for the whole session.
pub struct ChatSession {
    core: Arc<ConversationSyncCore>,
    viewer: UserId,
    revisions: watch::Receiver<u64>,
    pump: JoinHandle<()>,
}

impl ChatSession {
    /// Must be called from within a tokio runtime.
    pub fn new(core: Arc<ConversationSyncCore>, viewer: UserId) -> Self {
        let (revision_tx, revisions) = watch::channel(0);
        let pump = tokio::spawn(run_delivery_pump(core.clone(), revision_tx));
        Self {
            core,
            viewer,
            revisions,
            pump,
        }
    }

    pub fn core(&self) -> &Arc<ConversationSyncCore> {
        &self.core
    }

    pub fn viewer(&self) -> &UserId {
        &self.viewer
    }

    /// Bumped every time the pump appends a live message.
    pub fn revisions(&self) -> watch::Receiver<u64> {
        self.revisions.clone()
    }

    /// Loads the conversation list and opens `requested`, or the first listed conversation.
    pub async fn start(&self, requested: Option<ConversationId>) -> SyncResult<StartOutcome> {
        self.core.refresh_conversations(&self.viewer).await?;

        let target = match requested {
            Some(conversation_id) => conversation_id,
            None => match self.core.directory().first() {
                Some(conversation) => conversation.id.clone(),
                None => return Ok(StartOutcome::NoConversations),
            },
        };

        let outcome = self.core.open_conversation(&target).await?;
        Ok(StartOutcome::Opened(outcome))
    }

    /// Opens `conversation_id` unless it is already open and live.
    ///
    /// A conversation left selected by a failed open has no armed channel or subscription,
    /// so selecting it again retries the open.
    pub async fn select(
        &self,
        conversation_id: &ConversationId,
    ) -> SyncResult<Option<OpenOutcome>> {
        let snapshot = self.core.snapshot().await;
        let live = snapshot.armed_channel.is_some() && snapshot.subscription.is_some();
        if live && snapshot.conversation.as_ref() == Some(conversation_id) {
            return Ok(None);
        }
        self.core.open_conversation(conversation_id).await.map(Some)
    }

    pub async fn refresh(&self) -> SyncResult<usize> {
        self.core.refresh_conversations(&self.viewer).await
    }

    pub fn search(&self, term: &str) -> Vec<Conversation> {
        self.core.directory().search(term)
    }

    pub async fn submit(&self, draft: &str) -> SyncResult<SubmitOutcome> {
        if draft.trim().is_empty() {
            return Ok(SubmitOutcome::Ignored);
        }

        let Some(conversation_id) = self.core.current_conversation().await else {
            tracing::error!(viewer = %self.viewer, "no active conversation, message not sent");
            return Ok(SubmitOutcome::NoConversation);
        };

        let stored = self
            .core
            .send_message(&conversation_id, &self.viewer, draft)
            .await?;
        Ok(SubmitOutcome::Sent(stored))
    }

    /// The other party of the open conversation.
    pub async fn counterpart(&self) -> Option<Participant> {
        let conversation_id = self.core.current_conversation().await?;
        self.core
            .directory()
            .find(&conversation_id)
            .and_then(|conversation| conversation.counterpart(&self.viewer))
            .cloned()
    }

    pub fn is_own(&self, entry: &LogEntry) -> bool {
        entry.sender == self.viewer
    }

    pub async fn messages(&self) -> Vec<LogEntry> {
        self.core.snapshot().await.entries
    }

    pub async fn snapshot(&self) -> SyncSnapshot {
        self.core.snapshot().await
    }

    pub async fn shutdown(self) {
        self.core.close_conversation().await;
        self.pump.abort();
    }
}

impl Drop for ChatSession {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

async fn run_delivery_pump(core: Arc<ConversationSyncCore>, revisions: watch::Sender<u64>) {
    while let Some(outcome) = core.next_delivery().await {
        if let DeliveryOutcome::Accepted(id) = outcome {
            tracing::trace!(message_id = %id, "pump applied live message");
            revisions.send_modify(|revision| *revision += 1);
        }
    }
    tracing::debug!("delivery queue closed, pump exiting");
}
