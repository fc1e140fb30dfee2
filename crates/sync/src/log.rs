use std::fmt;

use threadline_backend::{StoredMessage, UserId};

/// Stable identifier for one log entry.
///
/// `sequence` is assigned once at insertion and never recomputed; it restarts at zero
/// whenever the log is cleared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageId {
    pub timestamp: u64,
    pub sender: UserId,
    pub sequence: u64,
}

impl MessageId {
    /// Legacy `"<timestamp>-<position>"` key. Matches the positional id of an append-only log.
    pub fn positional_key(&self) -> String {
        format!("{}-{}", self.timestamp, self.sequence)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            formatter,
            "{}-{}-{}",
            self.timestamp, self.sender, self.sequence
        )
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub id: MessageId,
    pub sender: UserId,
    pub text: String,
    pub timestamp: u64,
}

/// Why a live message was not appended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveRejection {
    Incomplete,
    Stale { watermark: u64 },
}

/// Arrival-ordered message log for the open conversation, gated by a timestamp watermark.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageLog {
    entries: Vec<LogEntry>,
    watermark: u64,
    next_sequence: u64,
}

impl MessageLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.watermark = 0;
        self.next_sequence = 0;
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn watermark(&self) -> u64 {
        self.watermark
    }

    pub fn last(&self) -> Option<&LogEntry> {
        self.entries.last()
    }

    /// Appends history in store order, skipping messages already present, and
    /// raises the watermark to the newest timestamp seen. Returns how many were appended.
    pub fn merge_history<I>(&mut self, messages: I) -> usize
    where
        I: IntoIterator<Item = StoredMessage>,
    {
        let mut appended = 0;
        for message in messages {
            if self.contains_content(&message.sender, &message.text, message.timestamp) {
                continue;
            }

            let timestamp = message.timestamp;
            self.push(message.sender, message.text, timestamp);
            self.watermark = self.watermark.max(timestamp);
            appended += 1;
        }
        appended
    }

    /// Applies the live acceptance rule: both fields present and strictly newer than the watermark.
    pub fn accept_live(
        &mut self,
        sender: &str,
        text: &str,
        timestamp: u64,
    ) -> Result<MessageId, LiveRejection> {
        if sender.is_empty() || text.is_empty() {
            return Err(LiveRejection::Incomplete);
        }
        if timestamp <= self.watermark {
            return Err(LiveRejection::Stale {
                watermark: self.watermark,
            });
        }

        self.watermark = timestamp;
        Ok(self.push(UserId::new(sender), text.to_string(), timestamp))
    }

    fn contains_content(&self, sender: &UserId, text: &str, timestamp: u64) -> bool {
        self.entries.iter().any(|entry| {
            entry.timestamp == timestamp && entry.sender == *sender && entry.text == text
        })
    }

    fn push(&mut self, sender: UserId, text: String, timestamp: u64) -> MessageId {
        let id = MessageId {
            timestamp,
            sender: sender.clone(),
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.entries.push(LogEntry {
            id: id.clone(),
            sender,
            text,
            timestamp,
        });
        id
    }
}
