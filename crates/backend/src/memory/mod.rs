use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use snafu::OptionExt;

use super::error::{
    BackendResult, ChannelUnavailableSnafu, StoreUnavailableSnafu, UnknownConversationSnafu,
    UnknownSubscriptionSnafu,
};
use super::ids::{ChannelId, ConversationId, DEFAULT_CHANNEL_PREFIX, SubscriptionHandle, UserId};
use super::types::{Conversation, DeliverySink, LiveDelivery, StoredMessage};
use super::{BoxFuture, MessageStore, RealtimeChannel};

#[derive(Default)]
struct MemoryState {
    conversations: Vec<Conversation>,
    histories: HashMap<ConversationId, Vec<StoredMessage>>,
    subscribers: HashMap<SubscriptionHandle, Subscriber>,
    tracked: Vec<ConversationId>,
    history_delays: HashMap<ConversationId, Duration>,
    subscribe_delays: HashMap<ChannelId, Duration>,
}

struct Subscriber {
    channel: ChannelId,
    sink: DeliverySink,
}

/// Armed failure counters; each consumes one call when non-zero.
#[derive(Default)]
struct FaultPlan {
    history: AtomicUsize,
    subscribe: AtomicUsize,
    unsubscribe: AtomicUsize,
    send: AtomicUsize,
}

impl FaultPlan {
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |remaining| {
                remaining.checked_sub(1)
            })
            .is_ok()
    }
}

/// In-process message store and realtime hub.
///
/// `send` persists the message and then publishes it to every subscriber of the
/// conversation's channel, sender included, the same way the hosted backend echoes.
#[derive(Clone)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
    faults: Arc<FaultPlan>,
    channel_prefix: Arc<str>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_channel_prefix(DEFAULT_CHANNEL_PREFIX)
    }

    pub fn with_channel_prefix(prefix: &str) -> Self {
        Self {
            state: Arc::new(Mutex::new(MemoryState::default())),
            faults: Arc::new(FaultPlan::default()),
            channel_prefix: Arc::from(prefix),
        }
    }

    pub fn channel_prefix(&self) -> &str {
        &self.channel_prefix
    }

    pub fn insert_conversation(&self, conversation: Conversation) {
        let mut state = self.lock();
        state
            .histories
            .entry(conversation.id.clone())
            .or_default();
        state
            .conversations
            .retain(|existing| existing.id != conversation.id);
        state.conversations.push(conversation);
    }

    /// Replaces the stored history of a conversation verbatim.
    pub fn seed_history(&self, conversation_id: &ConversationId, messages: Vec<StoredMessage>) {
        self.lock()
            .histories
            .insert(conversation_id.clone(), messages);
    }

    pub fn history_of(&self, conversation_id: &ConversationId) -> Vec<StoredMessage> {
        self.lock()
            .histories
            .get(conversation_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Pushes a delivery to every subscriber of its channel. Returns how many sinks accepted it.
    pub fn publish(&self, delivery: LiveDelivery) -> usize {
        let mut state = self.lock();
        Self::publish_locked(&mut state, delivery)
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn subscribed_channels(&self) -> Vec<ChannelId> {
        let mut channels = self
            .lock()
            .subscribers
            .values()
            .map(|subscriber| subscriber.channel.clone())
            .collect::<Vec<_>>();
        channels.sort();
        channels
    }

    pub fn tracked_conversations(&self) -> Vec<ConversationId> {
        self.lock().tracked.clone()
    }

    pub fn delay_history(&self, conversation_id: &ConversationId, delay: Duration) {
        self.lock()
            .history_delays
            .insert(conversation_id.clone(), delay);
    }

    /// Holds `subscribe` on `channel` for `delay` before it registers the subscriber.
    pub fn delay_subscribe(&self, channel: &ChannelId, delay: Duration) {
        self.lock().subscribe_delays.insert(channel.clone(), delay);
    }

    pub fn fail_history(&self, times: usize) {
        self.faults.history.store(times, Ordering::Release);
    }

    pub fn fail_subscribe(&self, times: usize) {
        self.faults.subscribe.store(times, Ordering::Release);
    }

    pub fn fail_unsubscribe(&self, times: usize) {
        self.faults.unsubscribe.store(times, Ordering::Release);
    }

    pub fn fail_send(&self, times: usize) {
        self.faults.send.store(times, Ordering::Release);
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicked test thread must not wedge every other caller.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn publish_locked(state: &mut MemoryState, delivery: LiveDelivery) -> usize {
        let mut delivered = 0;
        state.subscribers.retain(|handle, subscriber| {
            if subscriber.channel != delivery.channel {
                return true;
            }
            match subscriber.sink.send(delivery.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(_) => {
                    tracing::debug!(
                        %handle,
                        channel = %subscriber.channel,
                        "dropping closed subscriber sink"
                    );
                    false
                }
            }
        });
        delivered
    }

    fn next_timestamp(history: &[StoredMessage]) -> u64 {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|elapsed| elapsed.as_millis() as u64)
            .unwrap_or_default();
        let floor = history
            .iter()
            .map(|message| message.timestamp)
            .max()
            .map_or(0, |latest| latest.saturating_add(1));
        now.max(floor)
    }
}

impl MessageStore for MemoryBackend {
    fn list_conversations_for_user<'a>(
        &'a self,
        user_id: &'a UserId,
    ) -> BoxFuture<'a, BackendResult<Vec<Conversation>>> {
        Box::pin(async move {
            let conversations = self
                .lock()
                .conversations
                .iter()
                .filter(|conversation| conversation.involves(user_id))
                .cloned()
                .collect::<Vec<_>>();
            Ok(conversations)
        })
    }

    fn fetch_history<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
    ) -> BoxFuture<'a, BackendResult<Vec<StoredMessage>>> {
        Box::pin(async move {
            let delay = self.lock().history_delays.get(conversation_id).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if FaultPlan::take(&self.faults.history) {
                return StoreUnavailableSnafu {
                    stage: "memory-fetch-history",
                    details: format!("injected history failure for '{conversation_id}'"),
                }
                .fail();
            }

            self.lock()
                .histories
                .get(conversation_id)
                .cloned()
                .context(UnknownConversationSnafu {
                    stage: "memory-fetch-history",
                    conversation_id: conversation_id.to_string(),
                })
        })
    }

    fn send<'a>(
        &'a self,
        conversation_id: &'a ConversationId,
        sender_id: &'a UserId,
        text: &'a str,
    ) -> BoxFuture<'a, BackendResult<StoredMessage>> {
        Box::pin(async move {
            if FaultPlan::take(&self.faults.send) {
                return StoreUnavailableSnafu {
                    stage: "memory-send",
                    details: format!("injected send failure for '{conversation_id}'"),
                }
                .fail();
            }

            let channel = ChannelId::for_conversation(&self.channel_prefix, conversation_id);
            let mut state = self.lock();
            let history =
                state
                    .histories
                    .get_mut(conversation_id)
                    .context(UnknownConversationSnafu {
                        stage: "memory-send",
                        conversation_id: conversation_id.to_string(),
                    })?;

            let stored = StoredMessage::new(
                sender_id.clone(),
                text,
                Self::next_timestamp(history),
            );
            history.push(stored.clone());

            let delivered =
                Self::publish_locked(&mut state, LiveDelivery::from_stored(channel, &stored));
            tracing::debug!(
                conversation_id = %conversation_id,
                timestamp = stored.timestamp,
                delivered,
                "stored and broadcast message"
            );
            Ok(stored)
        })
    }

    fn begin_tracking(&self, conversation_id: &ConversationId) {
        let mut state = self.lock();
        if !state.tracked.contains(conversation_id) {
            state.tracked.push(conversation_id.clone());
        }
    }
}

impl RealtimeChannel for MemoryBackend {
    fn subscribe<'a>(
        &'a self,
        channel: &'a ChannelId,
        sink: DeliverySink,
    ) -> BoxFuture<'a, BackendResult<SubscriptionHandle>> {
        Box::pin(async move {
            let delay = self.lock().subscribe_delays.get(channel).copied();
            if let Some(delay) = delay {
                tokio::time::sleep(delay).await;
            }

            if FaultPlan::take(&self.faults.subscribe) {
                return ChannelUnavailableSnafu {
                    stage: "memory-subscribe",
                    channel: channel.to_string(),
                    details: "injected subscribe failure".to_string(),
                }
                .fail();
            }

            let handle = SubscriptionHandle::new_v7();
            self.lock().subscribers.insert(
                handle,
                Subscriber {
                    channel: channel.clone(),
                    sink,
                },
            );
            tracing::debug!(%handle, %channel, "registered subscriber");
            Ok(handle)
        })
    }

    fn unsubscribe<'a>(&'a self, handle: SubscriptionHandle) -> BoxFuture<'a, BackendResult<()>> {
        Box::pin(async move {
            if FaultPlan::take(&self.faults.unsubscribe) {
                // The subscriber stays registered, matching a backend that never saw the request.
                return ChannelUnavailableSnafu {
                    stage: "memory-unsubscribe",
                    channel: handle.to_string(),
                    details: "injected unsubscribe failure".to_string(),
                }
                .fail();
            }

            self.lock()
                .subscribers
                .remove(&handle)
                .map(|_| ())
                .context(UnknownSubscriptionSnafu {
                    stage: "memory-unsubscribe",
                    handle: handle.to_string(),
                })
        })
    }
}
