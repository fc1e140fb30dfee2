use snafu::Snafu;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum BackendError {
    #[snafu(display("message store unavailable on `{stage}`: {details}"))]
    StoreUnavailable {
        stage: &'static str,
        details: String,
    },
    #[snafu(display("realtime channel '{channel}' unavailable on `{stage}`: {details}"))]
    ChannelUnavailable {
        stage: &'static str,
        channel: String,
        details: String,
    },
    #[snafu(display("subscription '{handle}' is not registered"))]
    UnknownSubscription {
        stage: &'static str,
        handle: String,
    },
    #[snafu(display("conversation '{conversation_id}' is not known to the store"))]
    UnknownConversation {
        stage: &'static str,
        conversation_id: String,
    },
}

pub type BackendResult<T> = Result<T, BackendError>;
