//! Domain error types.

use thiserror::Error;

/// Errors raised by domain validation and parsing.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DomainError {
    /// User id must be positive.
    #[error("Invalid user id: {0}")]
    InvalidUser(i64),

    /// Goods id must be positive.
    #[error("Invalid goods id: {0}")]
    InvalidGoods(i64),

    /// Quantity must be positive and fit the stored 32-bit column.
    #[error("Invalid quantity: {0} (must be between 1 and 2147483647)")]
    InvalidQuantity(u32),

    /// A required text field is empty.
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    /// A text field exceeds its maximum length.
    #[error("Field {field} exceeds {max_len} characters")]
    FieldTooLong { field: &'static str, max_len: usize },

    /// A price string is not a non-negative integer amount of minor units.
    #[error("Invalid price: {raw:?}")]
    InvalidPrice { raw: String },

    /// Price multiplied by quantity overflows.
    #[error("Pay amount overflow")]
    AmountOverflow,

    /// A status value outside the known set.
    #[error("Unknown order status: {0:?}")]
    UnknownStatus(String),
}
