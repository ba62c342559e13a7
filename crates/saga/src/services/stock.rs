//! Stock reservation service trait and in-memory implementation.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use async_trait::async_trait;
use common::OrderId;
use domain::GoodsId;

use crate::error::SagaError;

/// Trait for the stock reservation RPCs.
///
/// Both calls are keyed by order id. `rollback_stock` must be idempotent:
/// repeating it for the same order releases the reservation at most once.
#[async_trait]
pub trait StockService: Send + Sync {
    /// Reserves `num` units of `goods_id` for `order_id`.
    async fn reduce_stock(
        &self,
        goods_id: GoodsId,
        num: u32,
        order_id: OrderId,
    ) -> Result<(), SagaError>;

    /// Releases the reservation made for `order_id`.
    async fn rollback_stock(
        &self,
        goods_id: GoodsId,
        num: u32,
        order_id: OrderId,
    ) -> Result<(), SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryStockState {
    available: HashMap<GoodsId, u64>,
    reservations: HashMap<OrderId, (GoodsId, u32)>,
    /// Orders whose reservation was rolled back (or refused before it existed).
    rolled_back: HashSet<OrderId>,
    releases: usize,
    rollback_calls: usize,
    fail_on_reduce: bool,
    fail_on_rollback: bool,
    reduce_delay: Option<Duration>,
    rollback_delay: Option<Duration>,
}

/// In-memory stock service for testing and local runs.
///
/// A rollback for an order that was never reserved leaves a tombstone so a
/// late `reduce_stock` for the same order is refused.
#[derive(Debug, Clone, Default)]
pub struct InMemoryStockService {
    state: Arc<RwLock<InMemoryStockState>>,
}

impl InMemoryStockService {
    /// Creates a new in-memory stock service with no goods.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the available quantity of a good.
    pub fn set_stock(&self, goods_id: GoodsId, quantity: u64) {
        self.write().available.insert(goods_id, quantity);
    }

    /// Configures the service to fail reserve calls.
    pub fn set_fail_on_reduce(&self, fail: bool) {
        self.write().fail_on_reduce = fail;
    }

    /// Configures the service to fail rollback calls.
    pub fn set_fail_on_rollback(&self, fail: bool) {
        self.write().fail_on_rollback = fail;
    }

    /// Delays the response of reserve calls; the reservation itself is applied first.
    pub fn set_reduce_delay(&self, delay: Option<Duration>) {
        self.write().reduce_delay = delay;
    }

    /// Delays rollback calls before they are applied.
    pub fn set_rollback_delay(&self, delay: Option<Duration>) {
        self.write().rollback_delay = delay;
    }

    /// Returns the available quantity of a good.
    pub fn available(&self, goods_id: GoodsId) -> u64 {
        self.read().available.get(&goods_id).copied().unwrap_or(0)
    }

    /// Returns the quantity currently reserved for an order.
    pub fn reserved_quantity(&self, order_id: OrderId) -> Option<u32> {
        self.read().reservations.get(&order_id).map(|(_, num)| *num)
    }

    /// Returns the number of active reservations.
    pub fn reservation_count(&self) -> usize {
        self.read().reservations.len()
    }

    /// Returns how many reservations were actually released.
    pub fn release_count(&self) -> usize {
        self.read().releases
    }

    /// Returns how many rollback calls were received, including repeats.
    pub fn rollback_calls(&self) -> usize {
        self.read().rollback_calls
    }

    fn read(&self) -> RwLockReadGuard<'_, InMemoryStockState> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, InMemoryStockState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl StockService for InMemoryStockService {
    async fn reduce_stock(
        &self,
        goods_id: GoodsId,
        num: u32,
        order_id: OrderId,
    ) -> Result<(), SagaError> {
        let delay = {
            let mut state = self.write();

            if state.fail_on_reduce {
                return Err(SagaError::StockService("stock service unavailable".to_string()));
            }
            if state.rolled_back.contains(&order_id) {
                return Err(SagaError::StockService(format!(
                    "order {order_id} already rolled back"
                )));
            }
            if state.reservations.contains_key(&order_id) {
                return Ok(());
            }

            let available = state.available.get(&goods_id).copied().unwrap_or(0);
            if available < u64::from(num) {
                return Err(SagaError::StockService(format!(
                    "insufficient stock for goods {goods_id}: {available} < {num}"
                )));
            }
            state.available.insert(goods_id, available - u64::from(num));
            state.reservations.insert(order_id, (goods_id, num));
            state.reduce_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }

    async fn rollback_stock(
        &self,
        _goods_id: GoodsId,
        _num: u32,
        order_id: OrderId,
    ) -> Result<(), SagaError> {
        let delay = {
            let mut state = self.write();
            state.rollback_calls += 1;
            if state.fail_on_rollback {
                return Err(SagaError::StockService(
                    "stock rollback unavailable".to_string(),
                ));
            }
            state.rollback_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let mut state = self.write();
        if let Some((goods_id, num)) = state.reservations.remove(&order_id) {
            *state.available.entry(goods_id).or_insert(0) += u64::from(num);
            state.releases += 1;
        }
        state.rolled_back.insert(order_id);
        Ok(())
    }
}
