//! Timeout compensator: the consumer of delayed pay-timeout messages.
//!
//! For every order still unpaid when its payment window closes, the stock
//! reservation is released through [`release_unpaid_order`]. Messages that
//! keep failing are moved to the dead-letter topic once their redelivery
//! counter reaches the configured ceiling.

use async_trait::async_trait;
use broker::{ConsumeResult, Message, MessageBroker, MessageExt, MessageHandler};
use domain::OrderStatus;
use order_store::OrderStore;

use crate::compensation::{ReleaseOutcome, ReleaseTarget, release_unpaid_order};
use crate::config::{CompensatorConfig, StatusSource};
use crate::deadline::with_deadline;
use crate::error::SagaError;
use crate::messages::{PayTimeoutPayload, Payload};
use crate::services::StockService;

/// What handling one pay-timeout message did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// The order was unpaid and its stock has been released.
    Released,
    /// A concurrent path finalized the order first.
    AlreadyFinalized,
    /// The order had already left `unpaid`; nothing to do.
    NoAction(OrderStatus),
}

impl TimeoutOutcome {
    fn label(&self) -> &'static str {
        match self {
            TimeoutOutcome::Released => "released",
            TimeoutOutcome::AlreadyFinalized => "already_finalized",
            TimeoutOutcome::NoAction(_) => "no_action",
        }
    }
}

/// Consumer for the pay-timeout topic.
pub struct TimeoutCompensator<S, K, B>
where
    S: OrderStore,
    K: StockService,
    B: MessageBroker,
{
    store: S,
    stock: K,
    broker: B,
    config: CompensatorConfig,
}

impl<S, K, B> TimeoutCompensator<S, K, B>
where
    S: OrderStore,
    K: StockService,
    B: MessageBroker,
{
    /// Creates a new compensator.
    pub fn new(store: S, stock: K, broker: B, config: CompensatorConfig) -> Self {
        Self {
            store,
            stock,
            broker,
            config,
        }
    }

    pub fn config(&self) -> &CompensatorConfig {
        &self.config
    }

    /// Handles a single pay-timeout message.
    #[tracing::instrument(skip(self, message), fields(msg_id = %message.msg_id, reconsume_times = message.reconsume_times))]
    pub async fn handle(&self, message: &MessageExt) -> Result<TimeoutOutcome, SagaError> {
        let payload = PayTimeoutPayload::decode(message.body())?;
        let (status, target) = self.resolve(&payload).await?;

        if !status.is_unpaid() {
            tracing::info!(order_id = %payload.order_id, %status, "order no longer unpaid, nothing to compensate");
            return Ok(TimeoutOutcome::NoAction(status));
        }

        let outcome =
            release_unpaid_order(&self.store, &self.stock, target, &self.config.deadlines).await?;
        Ok(match outcome {
            ReleaseOutcome::Released => TimeoutOutcome::Released,
            ReleaseOutcome::AlreadyFinalized => TimeoutOutcome::AlreadyFinalized,
        })
    }

    /// Determines the current status and the reservation to release.
    async fn resolve(
        &self,
        payload: &PayTimeoutPayload,
    ) -> Result<(OrderStatus, ReleaseTarget), SagaError> {
        let order_id = payload.order_id;
        match self.config.status_source {
            StatusSource::Store => {
                let detail = with_deadline(
                    "get_order_detail",
                    self.config.deadlines.store,
                    self.store.get_order_detail(order_id),
                )
                .await?
                .ok_or(SagaError::OrderNotFound(order_id))?;
                Ok((detail.status, ReleaseTarget::from(&detail)))
            }
            StatusSource::Embedded => {
                let status = payload.status().map_err(|_| SagaError::UnexpectedStatus {
                    order_id,
                    status: payload.status.clone(),
                })?;
                let target = ReleaseTarget {
                    order_id,
                    goods_id: payload.goods_id,
                    num: payload.num,
                };
                Ok((status, target))
            }
        }
    }

    /// Forwards the original body to the dead-letter topic.
    async fn dead_letter(&self, message: &MessageExt) -> Result<(), SagaError> {
        let mut forwarded = Message::new(&self.config.topics.dead_letter, message.body().to_vec());
        forwarded.keys = message.message.keys.clone();
        with_deadline(
            "send_dead_letter",
            self.config.deadlines.broker,
            self.broker.send(forwarded),
        )
        .await?;
        metrics::counter!("dead_lettered_messages_total").increment(1);
        Ok(())
    }

    /// Handles one message; returns true if it must be redelivered.
    async fn process(&self, message: &MessageExt) -> bool {
        if message.topic() != self.config.topics.pay_timeout {
            tracing::debug!(topic = message.topic(), "ignoring message from unrelated topic");
            return false;
        }

        let error = match self.handle(message).await {
            Ok(outcome) => {
                metrics::counter!("timeout_compensations_total", "outcome" => outcome.label())
                    .increment(1);
                return false;
            }
            Err(e) => e,
        };

        metrics::counter!("timeout_compensations_total", "outcome" => "failed").increment(1);
        match &error {
            SagaError::UnexpectedStatus { .. } | SagaError::Payload(_) => {
                tracing::error!(msg_id = %message.msg_id, error = %error, "pay timeout message is not processable");
            }
            _ => {
                tracing::warn!(msg_id = %message.msg_id, error = %error, "pay timeout handling failed");
            }
        }

        if message.reconsume_times < self.config.max_reconsume_times {
            return true;
        }

        match self.dead_letter(message).await {
            Ok(()) => {
                tracing::error!(
                    msg_id = %message.msg_id,
                    reconsume_times = message.reconsume_times,
                    "redelivery ceiling reached, message moved to dead-letter topic"
                );
                false
            }
            Err(e) => {
                tracing::error!(msg_id = %message.msg_id, error = %e, "dead-letter forward failed");
                true
            }
        }
    }
}

#[async_trait]
impl<S, K, B> MessageHandler for TimeoutCompensator<S, K, B>
where
    S: OrderStore,
    K: StockService,
    B: MessageBroker,
{
    async fn consume(&self, messages: &[MessageExt]) -> ConsumeResult {
        let mut retry = false;
        for message in messages {
            retry |= self.process(message).await;
        }
        if retry {
            ConsumeResult::RetryLater
        } else {
            ConsumeResult::Success
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryStockService;
    use broker::InMemoryBroker;
    use chrono::Utc;
    use common::OrderId;
    use domain::{CreateOrderRequest, GoodsId, GoodsSnapshot, Money, NewOrder, UserId};
    use order_store::{InMemoryOrderStore, OrderStoreExt};

    type TestCompensator =
        TimeoutCompensator<InMemoryOrderStore, InMemoryStockService, InMemoryBroker>;

    struct Fixture {
        compensator: TestCompensator,
        store: InMemoryOrderStore,
        stock: InMemoryStockService,
        broker: InMemoryBroker,
    }

    fn fixture(config: CompensatorConfig) -> Fixture {
        let store = InMemoryOrderStore::new();
        let stock = InMemoryStockService::new();
        let broker = InMemoryBroker::new();
        stock.set_stock(GoodsId::new(1001), 10);
        let compensator =
            TimeoutCompensator::new(store.clone(), stock.clone(), broker.clone(), config);
        Fixture {
            compensator,
            store,
            stock,
            broker,
        }
    }

    async fn place_order(f: &Fixture, id: i64) -> OrderId {
        let order_id = OrderId::new(id);
        let goods_id = GoodsId::new(1001);
        f.stock.reduce_stock(goods_id, 2, order_id).await.unwrap();
        let request = CreateOrderRequest::new(goods_id, 2, UserId::new(1), "a", "b", "c");
        let goods = GoodsSnapshot {
            title: "Widget".to_string(),
            price: "500".to_string(),
            brief: String::new(),
        };
        f.store
            .create_order(&NewOrder::unpaid(
                order_id,
                &request,
                goods,
                Money::from_minor(1000),
                Utc::now(),
            ))
            .await
            .unwrap();
        order_id
    }

    fn timeout_message(order_id: OrderId, reconsume_times: u32) -> MessageExt {
        let payload = PayTimeoutPayload::pending(order_id, GoodsId::new(1001), 2);
        MessageExt::new(payload.to_message("pay_timeout").unwrap())
            .with_reconsume_times(reconsume_times)
    }

    #[tokio::test]
    async fn test_unpaid_order_is_released() {
        let f = fixture(CompensatorConfig::default());
        let order_id = place_order(&f, 1).await;

        let result = f.compensator.consume(&[timeout_message(order_id, 0)]).await;

        assert_eq!(result, ConsumeResult::Success);
        assert_eq!(
            f.store.order_status(order_id).await.unwrap(),
            Some(OrderStatus::Timeout)
        );
        assert_eq!(f.stock.available(GoodsId::new(1001)), 10);
    }

    #[tokio::test]
    async fn test_paid_order_is_untouched() {
        let f = fixture(CompensatorConfig::default());
        let order_id = place_order(&f, 1).await;
        f.store
            .update_status_if(order_id, OrderStatus::Unpaid, OrderStatus::Paid)
            .await
            .unwrap();

        let outcome = f.compensator.handle(&timeout_message(order_id, 0)).await;

        assert_eq!(outcome.unwrap(), TimeoutOutcome::NoAction(OrderStatus::Paid));
        assert_eq!(f.stock.rollback_calls(), 0);
    }

    #[tokio::test]
    async fn test_other_topics_are_ignored() {
        let f = fixture(CompensatorConfig::default());
        let message = MessageExt::new(Message::new("order_created_successfully", "{}"));

        assert_eq!(f.compensator.consume(&[message]).await, ConsumeResult::Success);
        assert_eq!(f.broker.message_count("dead_letter_queue"), 0);
    }

    #[tokio::test]
    async fn test_malformed_payload_is_retried() {
        let f = fixture(CompensatorConfig::default());
        let message = MessageExt::new(Message::new("pay_timeout", "not json"));

        assert_eq!(
            f.compensator.consume(&[message]).await,
            ConsumeResult::RetryLater
        );
    }

    #[tokio::test]
    async fn test_missing_order_is_retried_from_store() {
        let f = fixture(CompensatorConfig::default());

        let result = f
            .compensator
            .handle(&timeout_message(OrderId::new(404), 0))
            .await;
        assert!(matches!(result, Err(SagaError::OrderNotFound(_))));
    }

    #[tokio::test]
    async fn test_embedded_status_source_trusts_snapshot() {
        let f = fixture(CompensatorConfig {
            status_source: StatusSource::Embedded,
            ..Default::default()
        });
        let order_id = place_order(&f, 1).await;

        let outcome = f
            .compensator
            .handle(&timeout_message(order_id, 0))
            .await
            .unwrap();
        assert_eq!(outcome, TimeoutOutcome::Released);
    }

    #[tokio::test]
    async fn test_unknown_embedded_status_is_an_error() {
        let f = fixture(CompensatorConfig {
            status_source: StatusSource::Embedded,
            ..Default::default()
        });
        let mut payload = PayTimeoutPayload::pending(OrderId::new(1), GoodsId::new(1001), 2);
        payload.status = "shipped".to_string();
        let message = MessageExt::new(payload.to_message("pay_timeout").unwrap());

        let result = f.compensator.handle(&message).await;
        assert!(matches!(
            result,
            Err(SagaError::UnexpectedStatus { ref status, .. }) if status == "shipped"
        ));
        assert_eq!(f.compensator.consume(&[message]).await, ConsumeResult::RetryLater);
    }

    #[tokio::test]
    async fn test_failure_below_ceiling_retries() {
        let f = fixture(CompensatorConfig::default());
        let order_id = place_order(&f, 1).await;
        f.stock.set_fail_on_rollback(true);

        let result = f.compensator.consume(&[timeout_message(order_id, 2)]).await;

        assert_eq!(result, ConsumeResult::RetryLater);
        assert_eq!(f.broker.message_count("dead_letter_queue"), 0);
        assert_eq!(
            f.store.order_status(order_id).await.unwrap(),
            Some(OrderStatus::Unpaid)
        );
    }

    #[tokio::test]
    async fn test_failure_at_ceiling_dead_letters_original_body() {
        let f = fixture(CompensatorConfig::default());
        let order_id = place_order(&f, 1).await;
        f.stock.set_fail_on_rollback(true);
        let message = timeout_message(order_id, 3);

        let result = f.compensator.consume(std::slice::from_ref(&message)).await;

        assert_eq!(result, ConsumeResult::Success);
        let dead = f.broker.messages("dead_letter_queue");
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].body(), message.body());
    }

    #[tokio::test]
    async fn test_dead_letter_forward_failure_retries() {
        let f = fixture(CompensatorConfig::default());
        f.broker.fail_sends_to("dead_letter_queue", true);
        let message = MessageExt::new(Message::new("pay_timeout", "garbage")).with_reconsume_times(5);

        assert_eq!(
            f.compensator.consume(&[message]).await,
            ConsumeResult::RetryLater
        );
    }

    #[tokio::test]
    async fn test_batch_retries_if_any_item_fails() {
        let f = fixture(CompensatorConfig::default());
        let good = place_order(&f, 1).await;
        let bad = MessageExt::new(Message::new("pay_timeout", "garbage"));

        let result = f
            .compensator
            .consume(&[timeout_message(good, 0), bad])
            .await;

        assert_eq!(result, ConsumeResult::RetryLater);
        assert_eq!(
            f.store.order_status(good).await.unwrap(),
            Some(OrderStatus::Timeout)
        );
    }
}
