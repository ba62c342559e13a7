use thiserror::Error;

use crate::OrderId;

/// Errors that can occur when interacting with the order store.
#[derive(Debug, Error)]
pub enum OrderStoreError {
    /// An order with this identifier already exists.
    #[error("Order already exists: {0}")]
    DuplicateOrder(OrderId),

    /// The quantity does not fit the 32-bit `num` column.
    #[error("Quantity {num} out of range for order {order_id}")]
    QuantityOutOfRange { order_id: OrderId, num: u32 },

    /// A stored status value is outside the known set.
    #[error("Unknown status {status:?} stored for order {order_id}")]
    UnknownStatus { order_id: OrderId, status: String },

    /// The store refused the operation (used by the in-memory store's failure knobs).
    #[error("Order store unavailable: {0}")]
    Unavailable(String),

    /// A database error occurred.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A database migration error occurred.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Result type for order store operations.
pub type Result<T> = std::result::Result<T, OrderStoreError>;
