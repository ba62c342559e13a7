use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{NewOrder, Order, OrderDetail, OrderStatus, ShardParam};
use tokio::sync::RwLock;

use crate::{OrderId, OrderStoreError, Result, store::OrderStore};

#[derive(Default)]
struct Tables {
    orders: BTreeMap<OrderId, Order>,
    details: BTreeMap<OrderId, OrderDetail>,
}

/// In-memory order store implementation for testing and local runs.
///
/// Both tables live behind one lock so creates and conditional updates are
/// atomic across the pair, matching the PostgreSQL transaction semantics.
#[derive(Clone, Default)]
pub struct InMemoryOrderStore {
    tables: Arc<RwLock<Tables>>,
    fail_on_create: Arc<AtomicBool>,
    fail_on_read: Arc<AtomicBool>,
}

impl InMemoryOrderStore {
    /// Creates a new empty in-memory order store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes subsequent `create_order` calls fail.
    pub fn set_fail_on_create(&self, fail: bool) {
        self.fail_on_create.store(fail, Ordering::SeqCst);
    }

    /// Makes subsequent reads fail.
    pub fn set_fail_on_read(&self, fail: bool) {
        self.fail_on_read.store(fail, Ordering::SeqCst);
    }

    /// Returns the number of order rows.
    pub async fn order_count(&self) -> usize {
        self.tables.read().await.orders.len()
    }

    /// Returns the number of detail rows.
    pub async fn detail_count(&self) -> usize {
        self.tables.read().await.details.len()
    }

    /// Clears both tables.
    pub async fn clear(&self) {
        let mut tables = self.tables.write().await;
        tables.orders.clear();
        tables.details.clear();
    }

    fn check_read(&self) -> Result<()> {
        if self.fail_on_read.load(Ordering::SeqCst) {
            return Err(OrderStoreError::Unavailable(
                "simulated read failure".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl OrderStore for InMemoryOrderStore {
    async fn create_order(&self, order: &NewOrder) -> Result<()> {
        if self.fail_on_create.load(Ordering::SeqCst) {
            return Err(OrderStoreError::Unavailable(
                "simulated write failure".to_string(),
            ));
        }

        let order_id = order.order_id();
        if i32::try_from(order.detail.num).is_err() {
            return Err(OrderStoreError::QuantityOutOfRange {
                order_id,
                num: order.detail.num,
            });
        }
        let mut tables = self.tables.write().await;
        if tables.orders.contains_key(&order_id) || tables.details.contains_key(&order_id) {
            return Err(OrderStoreError::DuplicateOrder(order_id));
        }
        tables.orders.insert(order_id, order.order.clone());
        tables.details.insert(order_id, order.detail.clone());
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        self.check_read()?;
        Ok(self.tables.read().await.orders.get(&order_id).cloned())
    }

    async fn get_order_detail(&self, order_id: OrderId) -> Result<Option<OrderDetail>> {
        self.check_read()?;
        Ok(self.tables.read().await.details.get(&order_id).cloned())
    }

    async fn update_status_if(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Tables { orders, details } = &mut *tables;

        let Some(order) = orders.get_mut(&order_id) else {
            return Ok(false);
        };
        if order.status != expected {
            return Ok(false);
        }

        order.status = new;
        order.updated_at = Utc::now();
        if let Some(detail) = details.get_mut(&order_id) {
            detail.status = new;
        }
        Ok(true)
    }

    async fn min_order_id_since(&self, since: DateTime<Utc>) -> Result<Option<OrderId>> {
        self.check_read()?;
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .values()
            .filter(|o| o.created_at >= since)
            .map(|o| o.order_id)
            .min())
    }

    async fn order_id_bounds(&self, from: OrderId) -> Result<Option<(OrderId, OrderId)>> {
        self.check_read()?;
        let tables = self.tables.read().await;
        let mut ids = tables.orders.range(from..).map(|(id, _)| *id);
        let Some(min) = ids.next() else {
            return Ok(None);
        };
        let max = ids.last().unwrap_or(min);
        Ok(Some((min, max)))
    }

    async fn find_stale_unpaid(
        &self,
        shard: &ShardParam,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderDetail>> {
        self.check_read()?;
        let tables = self.tables.read().await;
        Ok(tables
            .orders
            .range(shard.start_id..=shard.end_id)
            .filter(|(_, o)| o.status.is_unpaid() && o.created_at < created_before)
            .filter_map(|(id, _)| tables.details.get(id).cloned())
            .collect())
    }
}
