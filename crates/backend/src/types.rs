use tokio::sync::mpsc;

use super::ids::{ChannelId, ConversationId, UserId};

/// One side of a two-party conversation, with the display metadata the client shows.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: UserId,
    pub full_name: String,
    pub user_name: String,
    pub profile_photo: Option<String>,
}

impl Participant {
    pub fn new(
        user_id: impl Into<UserId>,
        full_name: impl Into<String>,
        user_name: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            full_name: full_name.into(),
            user_name: user_name.into(),
            profile_photo: None,
        }
    }

    pub fn with_profile_photo(mut self, uri: impl Into<String>) -> Self {
        self.profile_photo = Some(uri.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Conversation {
    pub id: ConversationId,
    pub buyer: Participant,
    pub seller: Participant,
}

impl Conversation {
    pub fn new(id: impl Into<ConversationId>, buyer: Participant, seller: Participant) -> Self {
        Self {
            id: id.into(),
            buyer,
            seller,
        }
    }

    pub fn involves(&self, user_id: &UserId) -> bool {
        self.buyer.user_id == *user_id || self.seller.user_id == *user_id
    }

    /// Returns the party the viewer is talking to, or `None` when the viewer is not a member.
    pub fn counterpart(&self, viewer: &UserId) -> Option<&Participant> {
        if self.seller.user_id == *viewer {
            Some(&self.buyer)
        } else if self.buyer.user_id == *viewer {
            Some(&self.seller)
        } else {
            None
        }
    }
}

/// Message as persisted by the store. Timestamps are epoch milliseconds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredMessage {
    pub sender: UserId,
    pub text: String,
    pub timestamp: u64,
}

impl StoredMessage {
    pub fn new(sender: impl Into<UserId>, text: impl Into<String>, timestamp: u64) -> Self {
        Self {
            sender: sender.into(),
            text: text.into(),
            timestamp,
        }
    }
}

/// Payload pushed by a realtime channel. Empty `sender` or `text` means the field was missing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LiveDelivery {
    pub channel: ChannelId,
    pub sender: String,
    pub text: String,
    pub timestamp: u64,
}

impl LiveDelivery {
    pub fn new(
        channel: ChannelId,
        sender: impl Into<String>,
        text: impl Into<String>,
        timestamp: u64,
    ) -> Self {
        Self {
            channel,
            sender: sender.into(),
            text: text.into(),
            timestamp,
        }
    }

    pub fn from_stored(channel: ChannelId, message: &StoredMessage) -> Self {
        Self::new(
            channel,
            message.sender.as_str(),
            message.text.clone(),
            message.timestamp,
        )
    }
}

/// Inbound queue a realtime backend pushes deliveries into.
pub type DeliverySink = mpsc::UnboundedSender<LiveDelivery>;
