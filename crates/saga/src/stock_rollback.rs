//! Consumer that applies stock-rollback requests.
//!
//! The stock side owns this topic in production. This handler lets a
//! single-process deployment close the loop against its own stock client.

use async_trait::async_trait;
use broker::{ConsumeResult, MessageExt, MessageHandler};

use crate::config::{Deadlines, Topics};
use crate::deadline::with_deadline;
use crate::messages::{Payload, StockRollbackPayload};
use crate::services::StockService;

/// Releases reservations named in stock-rollback messages.
pub struct StockRollbackConsumer<K: StockService> {
    stock: K,
    topics: Topics,
    deadlines: Deadlines,
}

impl<K: StockService> StockRollbackConsumer<K> {
    pub fn new(stock: K, topics: Topics, deadlines: Deadlines) -> Self {
        Self {
            stock,
            topics,
            deadlines,
        }
    }
}

#[async_trait]
impl<K: StockService> MessageHandler for StockRollbackConsumer<K> {
    async fn consume(&self, messages: &[MessageExt]) -> ConsumeResult {
        let mut result = ConsumeResult::Success;
        for message in messages {
            if message.topic() != self.topics.stock_rollback {
                continue;
            }
            let request = match StockRollbackPayload::decode(message.body()) {
                Ok(request) => request,
                Err(e) => {
                    tracing::error!(msg_id = %message.msg_id, error = %e, "undecodable stock rollback request");
                    result = ConsumeResult::RetryLater;
                    continue;
                }
            };

            let released = with_deadline(
                "rollback_stock",
                self.deadlines.rpc,
                self.stock
                    .rollback_stock(request.goods_id, request.num, request.order_id),
            )
            .await;
            match released {
                Ok(()) => tracing::info!(
                    order_id = %request.order_id,
                    reason = %request.reason,
                    "stock rollback applied"
                ),
                Err(e) => {
                    tracing::warn!(order_id = %request.order_id, error = %e, "stock rollback failed");
                    result = ConsumeResult::RetryLater;
                }
            }
        }
        result
    }
}
