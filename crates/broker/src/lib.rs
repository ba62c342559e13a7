//! Message broker client abstraction.
//!
//! This crate provides:
//! - Plain, delayed and transactional (half-message) sends via [`MessageBroker`]
//! - The local-transaction callbacks a producer registers with the broker
//! - Consumer-group subscriptions with at-least-once, counted redelivery
//! - An in-memory broker for tests and single-process runs

pub mod broker;
pub mod error;
pub mod memory;
pub mod message;

pub use broker::{
    MessageBroker, MessageBrokerExt, MessageHandler, TransactionChecker, TransactionListener,
    TransactionSendResult,
};
pub use error::{BrokerError, Result};
pub use memory::{InMemoryBroker, InMemoryBrokerConfig};
pub use message::{ConsumeResult, LocalTransactionState, Message, MessageExt, MessageId};
