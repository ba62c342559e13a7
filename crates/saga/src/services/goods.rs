//! Goods price service trait and in-memory implementation.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use domain::{GoodsId, GoodsSnapshot, UserId};

use crate::error::SagaError;

/// Trait for the goods catalog RPC.
#[async_trait]
pub trait GoodsService: Send + Sync {
    /// Returns the current snapshot (title, price string, brief) of a good.
    async fn get_goods_detail(
        &self,
        goods_id: GoodsId,
        user_id: UserId,
    ) -> Result<GoodsSnapshot, SagaError>;
}

#[derive(Debug, Default)]
struct InMemoryGoodsState {
    catalog: HashMap<GoodsId, GoodsSnapshot>,
    fail_on_lookup: bool,
    delay: Option<Duration>,
    calls: usize,
}

/// In-memory goods service for testing and local runs.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGoodsService {
    state: Arc<RwLock<InMemoryGoodsState>>,
}

impl InMemoryGoodsService {
    /// Creates an empty catalog.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds or replaces a good.
    pub fn insert_goods(
        &self,
        goods_id: GoodsId,
        title: impl Into<String>,
        price: impl Into<String>,
        brief: impl Into<String>,
    ) {
        self.write().catalog.insert(
            goods_id,
            GoodsSnapshot {
                title: title.into(),
                price: price.into(),
                brief: brief.into(),
            },
        );
    }

    /// Configures the service to fail lookups.
    pub fn set_fail_on_lookup(&self, fail: bool) {
        self.write().fail_on_lookup = fail;
    }

    /// Delays every lookup by `delay`.
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.write().delay = delay;
    }

    /// Returns how many lookups were made.
    pub fn call_count(&self) -> usize {
        self.state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .calls
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, InMemoryGoodsState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl GoodsService for InMemoryGoodsService {
    async fn get_goods_detail(
        &self,
        goods_id: GoodsId,
        _user_id: UserId,
    ) -> Result<GoodsSnapshot, SagaError> {
        let (delay, result) = {
            let mut state = self.write();
            state.calls += 1;
            let result = if state.fail_on_lookup {
                Err(SagaError::GoodsService("goods service unavailable".to_string()))
            } else {
                state
                    .catalog
                    .get(&goods_id)
                    .cloned()
                    .ok_or_else(|| SagaError::GoodsService(format!("goods {goods_id} not found")))
            };
            (state.delay, result)
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        result
    }
}
