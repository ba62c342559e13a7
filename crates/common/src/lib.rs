//! Shared identifier types.
//!
//! Every order is keyed by an [`OrderId`] minted by an [`IdGenerator`]. The
//! same identifier correlates the RPC calls, the database rows, and every
//! message produced for the order.

pub mod snowflake;
pub mod types;

pub use snowflake::{IdError, IdGenerator};
pub use types::OrderId;
