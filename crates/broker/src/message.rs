//! Message types exchanged with the broker.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Broker-assigned message identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MessageId(Uuid);

impl MessageId {
    /// Creates a new random message ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> Uuid {
        self.0
    }
}

impl Default for MessageId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A message to be sent to a topic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Destination topic.
    pub topic: String,
    /// Optional business key used for lookup (the order id in this system).
    pub keys: Option<String>,
    /// Serialized payload.
    pub body: Vec<u8>,
}

impl Message {
    /// Creates a message for the given topic and body.
    pub fn new(topic: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            topic: topic.into(),
            keys: None,
            body: body.into(),
        }
    }

    /// Sets the business key.
    pub fn with_keys(mut self, keys: impl Into<String>) -> Self {
        self.keys = Some(keys.into());
        self
    }

    /// Returns the body as a string, if valid UTF-8.
    pub fn body_str(&self) -> Option<&str> {
        std::str::from_utf8(&self.body).ok()
    }
}

/// A message as stored and delivered by the broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageExt {
    pub msg_id: MessageId,
    pub message: Message,
    /// How many times this message has been handed back for redelivery.
    pub reconsume_times: u32,
    pub born_at: DateTime<Utc>,
}

impl MessageExt {
    /// Wraps a freshly accepted message.
    pub fn new(message: Message) -> Self {
        Self {
            msg_id: MessageId::new(),
            message,
            reconsume_times: 0,
            born_at: Utc::now(),
        }
    }

    /// Sets the redelivery counter.
    pub fn with_reconsume_times(mut self, reconsume_times: u32) -> Self {
        self.reconsume_times = reconsume_times;
        self
    }

    pub fn topic(&self) -> &str {
        &self.message.topic
    }

    pub fn body(&self) -> &[u8] {
        &self.message.body
    }

    pub fn keys(&self) -> Option<&str> {
        self.message.keys.as_deref()
    }
}

/// Outcome of a local transaction as reported to the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalTransactionState {
    /// Make the half-message visible to consumers.
    Commit,
    /// Discard the half-message.
    Rollback,
    /// Not yet decided; the broker will ask again later.
    Unknown,
}

impl std::fmt::Display for LocalTransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LocalTransactionState::Commit => write!(f, "commit"),
            LocalTransactionState::Rollback => write!(f, "rollback"),
            LocalTransactionState::Unknown => write!(f, "unknown"),
        }
    }
}

/// Result of consuming a batch of messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConsumeResult {
    /// The whole batch was handled.
    Success,
    /// Redeliver the whole batch later with an incremented counter.
    RetryLater,
}
