use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use snafu::{ResultExt, ensure};
use threadline_backend::{
    ChannelId, ConversationId, DeliverySink, LiveDelivery, MessageStore, RealtimeChannel,
    StoredMessage, SubscriptionHandle, UserId,
};
use tokio::sync::{Mutex, mpsc, watch};

use crate::config::SyncSettings;
use crate::directory::ConversationDirectory;
use crate::error::{
    ChannelUnavailableSnafu, EmptyMessageSnafu, NoActiveConversationSnafu, StoreUnavailableSnafu,
    SyncError, SyncResult, UnknownConversationSnafu,
};
use crate::log::{LiveRejection, LogEntry, MessageId, MessageLog};

/// Subscription currently feeding the inbound queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveSubscription {
    pub channel: ChannelId,
    pub handle: SubscriptionHandle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpenOutcome {
    Opened {
        conversation_id: ConversationId,
        history_len: usize,
    },
    /// A later open or close took over before this one finished.
    Superseded { conversation_id: ConversationId },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Accepted(MessageId),
    ChannelMismatch,
    Incomplete,
    Stale { watermark: u64 },
}

impl DeliveryOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Self::Accepted(_))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSnapshot {
    pub conversation: Option<ConversationId>,
    pub entries: Vec<LogEntry>,
    pub watermark: u64,
    pub armed_channel: Option<ChannelId>,
    pub subscription: Option<ActiveSubscription>,
}

#[derive(Debug, Default)]
struct SyncState {
    conversation: Option<ConversationId>,
    log: MessageLog,
    // Deliveries are only accepted for this channel; armed after history is merged.
    armed_channel: Option<ChannelId>,
    subscription: Option<ActiveSubscription>,
}

impl SyncState {
    fn reset(&mut self, conversation: Option<ConversationId>) {
        self.log.clear();
        self.conversation = conversation;
        self.armed_channel = None;
    }
}

/// Message synchronization state for one client session.
///
/// Holds the log of the open conversation, merges history with live deliveries, and keeps
/// at most one realtime subscription open. Opens and closes are serialized; a newer call
/// bumps the generation token and every older call bails at its next completion point.
pub struct ConversationSyncCore {
    store: Arc<dyn MessageStore>,
    realtime: Arc<dyn RealtimeChannel>,
    settings: SyncSettings,
    directory: ArcSwap<ConversationDirectory>,
    state: Mutex<SyncState>,
    turn: Mutex<()>,
    generation: watch::Sender<u64>,
    sink: DeliverySink,
    inbound: Mutex<mpsc::UnboundedReceiver<LiveDelivery>>,
}

impl ConversationSyncCore {
    pub fn new(
        store: Arc<dyn MessageStore>,
        realtime: Arc<dyn RealtimeChannel>,
        settings: SyncSettings,
    ) -> Self {
        let (sink, inbound) = mpsc::unbounded_channel();
        let (generation, _) = watch::channel(0);
        Self {
            store,
            realtime,
            settings: settings.normalized(),
            directory: ArcSwap::from_pointee(ConversationDirectory::default()),
            state: Mutex::new(SyncState::default()),
            turn: Mutex::new(()),
            generation,
            sink,
            inbound: Mutex::new(inbound),
        }
    }

    pub fn settings(&self) -> &SyncSettings {
        &self.settings
    }

    pub fn channel_for(&self, conversation_id: &ConversationId) -> ChannelId {
        ChannelId::for_conversation(&self.settings.channel_prefix, conversation_id)
    }

    pub fn directory(&self) -> Arc<ConversationDirectory> {
        self.directory.load_full()
    }

    pub fn generation(&self) -> u64 {
        *self.generation.borrow()
    }

    /// Reloads the conversation list for `user_id`. Returns how many conversations are listed.
    pub async fn refresh_conversations(&self, user_id: &UserId) -> SyncResult<usize> {
        let conversations = bounded(
            "refresh-conversations",
            "conversation listing",
            self.settings.fetch_timeout(),
            self.store.list_conversations_for_user(user_id),
        )
        .await?
        .context(StoreUnavailableSnafu {
            stage: "refresh-conversations",
        })?;

        let directory = ConversationDirectory::for_user(user_id, conversations);
        let count = directory.len();
        if count == 0 {
            tracing::warn!(user_id = %user_id, "no conversations found for user");
        } else {
            tracing::info!(user_id = %user_id, count, "loaded conversations");
        }

        self.directory.store(Arc::new(directory));
        Ok(count)
    }

    pub async fn open_conversation(
        &self,
        conversation_id: &ConversationId,
    ) -> SyncResult<OpenOutcome> {
        ensure!(
            self.directory.load().contains(conversation_id),
            UnknownConversationSnafu {
                stage: "open-validate",
                conversation_id: conversation_id.clone(),
            }
        );

        let generation = self.bump_generation();
        let _turn = self.turn.lock().await;
        let superseded = || -> SyncResult<OpenOutcome> {
            tracing::debug!(conversation_id = %conversation_id, generation, "open superseded");
            Ok(OpenOutcome::Superseded {
                conversation_id: conversation_id.clone(),
            })
        };
        if !self.is_current(generation) {
            return superseded();
        }

        let channel = self.channel_for(conversation_id);
        self.state
            .lock()
            .await
            .reset(Some(conversation_id.clone()));
        self.store.begin_tracking(conversation_id);

        let fetched = self
            .while_current(
                generation,
                bounded(
                    "open-fetch-history",
                    "history fetch",
                    self.settings.fetch_timeout(),
                    self.store.fetch_history(conversation_id),
                ),
            )
            .await;
        let Some(fetched) = fetched else {
            return superseded();
        };
        let history = match fetched.and_then(|result| {
            result.context(StoreUnavailableSnafu {
                stage: "open-fetch-history",
            })
        }) {
            Ok(history) => history,
            Err(error) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    generation,
                    error = %error,
                    "failed to load previous messages"
                );
                // The old channel must not outlive the switch even when the new one never arms.
                self.teardown_active("open-history-failed").await;
                return Err(error);
            }
        };

        let history_len = {
            let mut state = self.state.lock().await;
            if !self.is_current(generation) {
                return superseded();
            }
            let appended = state.log.merge_history(history);
            state.armed_channel = Some(channel.clone());
            tracing::debug!(
                conversation_id = %conversation_id,
                appended,
                watermark = state.log.watermark(),
                "merged history"
            );
            state.log.len()
        };

        self.teardown_active("open-teardown-previous").await;

        let subscribed = bounded(
            "open-subscribe",
            "subscribe",
            self.settings.subscribe_timeout(),
            self.realtime.subscribe(&channel, self.sink.clone()),
        )
        .await
        .and_then(|result| {
            result.context(ChannelUnavailableSnafu {
                stage: "open-subscribe",
            })
        });
        let handle = match subscribed {
            Ok(handle) => handle,
            Err(error) => {
                tracing::error!(
                    conversation_id = %conversation_id,
                    channel = %channel,
                    error = %error,
                    "failed to subscribe to conversation channel"
                );
                self.disarm(generation).await;
                return Err(error);
            }
        };

        {
            let mut state = self.state.lock().await;
            if self.is_current(generation) {
                state.subscription = Some(ActiveSubscription {
                    channel: channel.clone(),
                    handle,
                });
                tracing::info!(
                    conversation_id = %conversation_id,
                    channel = %channel,
                    %handle,
                    history_len,
                    "subscribed to conversation"
                );
                return Ok(OpenOutcome::Opened {
                    conversation_id: conversation_id.clone(),
                    history_len,
                });
            }
        }

        self.release(handle, "open-release-superseded").await;
        superseded()
    }

    /// Tears down the subscription and forgets the open conversation.
    pub async fn close_conversation(&self) {
        self.bump_generation();
        let _turn = self.turn.lock().await;
        self.state.lock().await.reset(None);
        self.teardown_active("close-conversation").await;
    }

    /// Persists a message through the store. The local log is only touched when
    /// optimistic echo is enabled; otherwise the realtime echo brings it in.
    pub async fn send_message(
        &self,
        conversation_id: &ConversationId,
        sender_id: &UserId,
        text: &str,
    ) -> SyncResult<StoredMessage> {
        let text = text.trim();
        ensure!(!text.is_empty(), EmptyMessageSnafu { stage: "send-validate" });
        {
            let state = self.state.lock().await;
            ensure!(
                state.conversation.as_ref() == Some(conversation_id),
                NoActiveConversationSnafu {
                    stage: "send-validate",
                    conversation_id: conversation_id.clone(),
                }
            );
        }

        let stored = bounded(
            "send-message",
            "send",
            self.settings.send_timeout(),
            self.store.send(conversation_id, sender_id, text),
        )
        .await?
        .context(StoreUnavailableSnafu {
            stage: "send-message",
        })?;

        if self.settings.optimistic_echo {
            let delivery = LiveDelivery::from_stored(self.channel_for(conversation_id), &stored);
            let outcome = self.apply_delivery(delivery).await;
            tracing::debug!(
                conversation_id = %conversation_id,
                ?outcome,
                "applied optimistic echo"
            );
        }

        Ok(stored)
    }

    /// Applies one live delivery against the armed channel and the watermark.
    pub async fn apply_delivery(&self, delivery: LiveDelivery) -> DeliveryOutcome {
        let mut state = self.state.lock().await;
        if state.armed_channel.as_ref() != Some(&delivery.channel) {
            tracing::warn!(
                channel = %delivery.channel,
                armed = ?state.armed_channel,
                "message received for a different conversation"
            );
            return DeliveryOutcome::ChannelMismatch;
        }

        match state
            .log
            .accept_live(&delivery.sender, &delivery.text, delivery.timestamp)
        {
            Ok(id) => {
                tracing::debug!(
                    channel = %delivery.channel,
                    message_id = %id,
                    "appended live message"
                );
                DeliveryOutcome::Accepted(id)
            }
            Err(LiveRejection::Incomplete) => {
                tracing::warn!(
                    channel = %delivery.channel,
                    timestamp = delivery.timestamp,
                    "incomplete message data"
                );
                DeliveryOutcome::Incomplete
            }
            Err(LiveRejection::Stale { watermark }) => {
                tracing::warn!(
                    channel = %delivery.channel,
                    timestamp = delivery.timestamp,
                    watermark,
                    "duplicate or stale message"
                );
                DeliveryOutcome::Stale { watermark }
            }
        }
    }

    /// Applies every delivery already queued without waiting for more.
    pub async fn drain_deliveries(&self) -> Vec<DeliveryOutcome> {
        let mut inbound = self.inbound.lock().await;
        let mut outcomes = Vec::new();
        while let Ok(delivery) = inbound.try_recv() {
            outcomes.push(self.apply_delivery(delivery).await);
        }
        outcomes
    }

    /// Waits for the next queued delivery and applies it.
    ///
    /// Holds the inbound queue while waiting, so only one task should pump at a time.
    pub async fn next_delivery(&self) -> Option<DeliveryOutcome> {
        let delivery = self.inbound.lock().await.recv().await?;
        Some(self.apply_delivery(delivery).await)
    }

    pub async fn snapshot(&self) -> SyncSnapshot {
        let state = self.state.lock().await;
        SyncSnapshot {
            conversation: state.conversation.clone(),
            entries: state.log.entries().to_vec(),
            watermark: state.log.watermark(),
            armed_channel: state.armed_channel.clone(),
            subscription: state.subscription.clone(),
        }
    }

    pub async fn current_conversation(&self) -> Option<ConversationId> {
        self.state.lock().await.conversation.clone()
    }

    pub async fn watermark(&self) -> u64 {
        self.state.lock().await.log.watermark()
    }

    fn bump_generation(&self) -> u64 {
        let mut next = 0;
        self.generation.send_modify(|current| {
            *current += 1;
            next = *current;
        });
        next
    }

    fn is_current(&self, generation: u64) -> bool {
        *self.generation.borrow() == generation
    }

    /// Runs `work` unless the generation moves on first.
    async fn while_current<F>(&self, generation: u64, work: F) -> Option<F::Output>
    where
        F: Future,
    {
        let mut watcher = self.generation.subscribe();
        let moved_on = async move {
            let _ = watcher.wait_for(|current| *current != generation).await;
        };
        tokio::select! {
            output = work => Some(output),
            _ = moved_on => None,
        }
    }

    async fn disarm(&self, generation: u64) {
        let mut state = self.state.lock().await;
        if self.is_current(generation) {
            state.armed_channel = None;
        }
    }

    async fn teardown_active(&self, stage: &'static str) {
        let previous = self.state.lock().await.subscription.take();
        if let Some(previous) = previous {
            tracing::debug!(
                channel = %previous.channel,
                handle = %previous.handle,
                stage,
                "unsubscribing"
            );
            self.release(previous.handle, stage).await;
        }
    }

    /// Best-effort unsubscribe; failures are logged and swallowed.
    async fn release(&self, handle: SubscriptionHandle, stage: &'static str) {
        let outcome = bounded(
            stage,
            "unsubscribe",
            self.settings.unsubscribe_timeout(),
            self.realtime.unsubscribe(handle),
        )
        .await;
        match outcome {
            Ok(Ok(())) => tracing::debug!(%handle, stage, "unsubscribed"),
            Ok(Err(error)) => {
                tracing::warn!(%handle, stage, error = %error, "unsubscribe failed; ignoring")
            }
            Err(error) => {
                tracing::warn!(%handle, stage, error = %error, "unsubscribe timed out; ignoring")
            }
        }
    }
}

async fn bounded<T, F>(
    stage: &'static str,
    operation: &'static str,
    limit: Duration,
    work: F,
) -> SyncResult<T>
where
    F: Future<Output = T>,
{
    tokio::time::timeout(limit, work)
        .await
        .map_err(|_| SyncError::TimedOut {
            stage,
            operation,
            timeout_ms: limit.as_millis() as u64,
        })
}
