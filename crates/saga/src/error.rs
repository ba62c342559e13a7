//! Saga error types.

use std::time::Duration;

use broker::BrokerError;
use common::{IdError, OrderId};
use domain::DomainError;
use order_store::OrderStoreError;
use thiserror::Error;

use crate::messages::PayloadError;

/// Errors that can occur while coordinating or compensating orders.
#[derive(Debug, Error)]
pub enum SagaError {
    /// The request or a priced amount failed validation.
    #[error("Validation error: {0}")]
    Validation(#[from] DomainError),

    /// Goods service error.
    #[error("Goods service error: {0}")]
    GoodsService(String),

    /// Stock service error.
    #[error("Stock service error: {0}")]
    StockService(String),

    /// Order store error.
    #[error("Order store error: {0}")]
    Store(#[from] OrderStoreError),

    /// Message broker error.
    #[error("Broker error: {0}")]
    Broker(#[from] BrokerError),

    /// A message body could not be encoded or decoded.
    #[error("Payload error: {0}")]
    Payload(#[from] PayloadError),

    /// Identifier generation failed.
    #[error("Id generation error: {0}")]
    Id(#[from] IdError),

    /// An operation did not finish within its deadline.
    #[error("{operation} timed out after {after:?}")]
    Timeout {
        operation: &'static str,
        after: Duration,
    },

    /// Order not found.
    #[error("Order not found: {0}")]
    OrderNotFound(OrderId),

    /// An order carries a status outside the known set.
    #[error("Unexpected status {status:?} for order {order_id}")]
    UnexpectedStatus { order_id: OrderId, status: String },

    /// The local transaction never ran for a half-message that was accepted.
    #[error("Local transaction for order {0} did not run")]
    TransactionIncomplete(OrderId),

    /// A configuration value cannot be used.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(&'static str),
}

impl SagaError {
    /// Returns true if the error is a deadline expiry.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            SagaError::Timeout { .. } | SagaError::Broker(BrokerError::Timeout { .. })
        )
    }

    /// Returns true if the error was raised before any remote call.
    pub fn is_validation(&self) -> bool {
        matches!(self, SagaError::Validation(_))
    }
}

/// Convenience type alias for saga results.
pub type Result<T> = std::result::Result<T, SagaError>;
