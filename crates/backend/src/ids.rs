use std::fmt;

use uuid::Uuid;

/// Channel prefix used by the hosted chat backend.
pub const DEFAULT_CHANNEL_PREFIX: &str = "chatMessages_";

// One macro for every string-backed id so conversions stay uniform across the workspace.
macro_rules! define_string_id {
    ($name:ident) => {
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
        pub struct $name(String);

        impl $name {
            pub fn new(raw: impl Into<String>) -> Self {
                Self(raw.into())
            }

            pub fn as_str(&self) -> &str {
                &self.0
            }

            pub fn into_inner(self) -> String {
                self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }
    };
}

define_string_id!(ConversationId);
define_string_id!(UserId);
define_string_id!(ChannelId);

impl ChannelId {
    /// Channel names are derived from the conversation id, one channel per conversation.
    pub fn for_conversation(prefix: &str, conversation_id: &ConversationId) -> Self {
        Self(format!("{prefix}{conversation_id}"))
    }

    pub fn conversation_id(&self, prefix: &str) -> Option<ConversationId> {
        self.0
            .strip_prefix(prefix)
            .filter(|raw| !raw.is_empty())
            .map(ConversationId::new)
    }
}

/// Opaque handle returned by a realtime backend for one subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionHandle(pub Uuid);

impl SubscriptionHandle {
    pub fn new(raw: Uuid) -> Self {
        Self(raw)
    }

    pub fn new_v7() -> Self {
        Self(Uuid::now_v7())
    }

    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "{}", self.0)
    }
}
