use std::time::Duration;

use thiserror::Error;

use crate::MessageId;

/// Errors that can occur when talking to the message broker.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BrokerError {
    /// The broker refused or failed to store a message.
    #[error("Send to topic {topic} failed: {reason}")]
    SendFailed { topic: String, reason: String },

    /// The broker did not answer within the deadline.
    #[error("Broker {operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// No half-message exists with this identifier.
    #[error("Unknown transaction: {0}")]
    UnknownTransaction(MessageId),
}

/// Result type for broker operations.
pub type Result<T> = std::result::Result<T, BrokerError>;
