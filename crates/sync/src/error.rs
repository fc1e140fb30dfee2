use snafu::Snafu;
use threadline_backend::{BackendError, ConversationId};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum SyncError {
    #[snafu(display("conversation '{conversation_id}' is not in the conversation list"))]
    UnknownConversation {
        stage: &'static str,
        conversation_id: ConversationId,
    },
    #[snafu(display("message store unavailable on `{stage}`: {source}"))]
    StoreUnavailable {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("realtime channel unavailable on `{stage}`: {source}"))]
    ChannelUnavailable {
        stage: &'static str,
        source: BackendError,
    },
    #[snafu(display("no open conversation matches '{conversation_id}'"))]
    NoActiveConversation {
        stage: &'static str,
        conversation_id: ConversationId,
    },
    #[snafu(display("refusing to send an empty message"))]
    EmptyMessage { stage: &'static str },
    #[snafu(display("{operation} timed out after {timeout_ms}ms on `{stage}`"))]
    TimedOut {
        stage: &'static str,
        operation: &'static str,
        timeout_ms: u64,
    },
}

impl SyncError {
    /// Whether retrying the same call may succeed.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::StoreUnavailable { .. } | Self::ChannelUnavailable { .. } | Self::TimedOut { .. }
        )
    }
}

pub type SyncResult<T> = Result<T, SyncError>;
