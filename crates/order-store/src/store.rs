use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{NewOrder, Order, OrderDetail, OrderStatus, ShardParam};

use crate::{OrderId, Result};

/// Core trait for order store implementations.
///
/// All implementations must be thread-safe (Send + Sync). Status changes
/// happen only through [`OrderStore::update_status_if`], never as blind
/// overwrites.
#[async_trait]
pub trait OrderStore: Send + Sync {
    /// Persists an order and its detail row atomically.
    ///
    /// Either both rows are written or neither is. Fails with
    /// `DuplicateOrder` if the identifier is already taken.
    async fn create_order(&self, order: &NewOrder) -> Result<()>;

    /// Retrieves the order header row.
    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>>;

    /// Retrieves the order detail row.
    async fn get_order_detail(&self, order_id: OrderId) -> Result<Option<OrderDetail>>;

    /// Moves both rows from `expected` to `new` if the order is currently in `expected`.
    ///
    /// Returns true if this call performed the transition, false if the order
    /// was missing or in another status.
    async fn update_status_if(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool>;

    /// Returns the smallest order identifier created at or after `since`.
    async fn min_order_id_since(&self, since: DateTime<Utc>) -> Result<Option<OrderId>>;

    /// Returns the `(min, max)` identifiers of orders with id at least `from`.
    async fn order_id_bounds(&self, from: OrderId) -> Result<Option<(OrderId, OrderId)>>;

    /// Returns unpaid orders within the shard created strictly before `created_before`.
    ///
    /// Results are ordered by identifier.
    async fn find_stale_unpaid(
        &self,
        shard: &ShardParam,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderDetail>>;
}

/// Extension trait providing convenience methods for order stores.
#[async_trait]
pub trait OrderStoreExt: OrderStore {
    /// Checks if an order exists.
    async fn order_exists(&self, order_id: OrderId) -> Result<bool> {
        Ok(self.get_order(order_id).await?.is_some())
    }

    /// Returns the current status of an order, if it exists.
    async fn order_status(&self, order_id: OrderId) -> Result<Option<OrderStatus>> {
        Ok(self.get_order(order_id).await?.map(|order| order.status))
    }
}

// Blanket implementation for all OrderStore implementations
impl<T: OrderStore + ?Sized> OrderStoreExt for T {}
