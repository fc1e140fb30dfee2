#![deny(unsafe_code)]

//! Conversation message synchronization: one ordered log per open conversation,
//! merged from history and a live realtime channel.

/// Settings loading and persistence.
pub mod config;
pub mod directory;
pub mod engine;
pub mod error;
pub mod log;
/// Session controller owning one core for one signed-in user.
pub mod session;

pub use config::{SettingsError, SettingsStore, SyncSettings};
pub use directory::ConversationDirectory;
pub use engine::{
    ActiveSubscription, ConversationSyncCore, DeliveryOutcome, OpenOutcome, SyncSnapshot,
};
pub use error::{SyncError, SyncResult};
pub use log::{LiveRejection, LogEntry, MessageId, MessageLog};
pub use session::{ChatSession, StartOutcome, SubmitOutcome};
