//! Transactional persistence for orders.
//!
//! The [`OrderStore`] trait is the narrow interface the coordinator,
//! compensator and scanner share: atomic create, read by id, conditional
//! status update and the identifier-range queries used by reconciliation.

pub mod error;
pub mod memory;
pub mod postgres;
pub mod store;

pub use common::OrderId;
pub use error::{OrderStoreError, Result};
pub use memory::InMemoryOrderStore;
pub use postgres::PostgresOrderStore;
pub use store::{OrderStore, OrderStoreExt};
