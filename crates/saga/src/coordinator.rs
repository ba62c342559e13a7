//! Order transaction coordinator.
//!
//! Creating an order spans the goods service, the stock service and the
//! order store with no shared transaction. The coordinator makes it appear
//! atomic with a transactional message:
//!
//! ```text
//! begin ──► send half ──► decide (steps 2-7) ──► commit | rollback
//!                              ▲
//!         broker check ────────┘ recheck: order row exists?
//! ```
//!
//! `decide` reports `Commit` only after every step succeeded and `Rollback`
//! whenever the reservation must be undone; the broker asks `recheck` about
//! any half-message left unresolved.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use broker::{
    LocalTransactionState, Message, MessageBroker, MessageBrokerExt, MessageExt,
    TransactionChecker, TransactionListener,
};
use chrono::Utc;
use common::{IdGenerator, OrderId};
use domain::{CreateOrderRequest, DomainError, Money, NewOrder, OrderStatus};
use order_store::{OrderStore, OrderStoreExt};
use serde::Serialize;

use crate::config::CoordinatorConfig;
use crate::deadline::with_deadline;
use crate::error::SagaError;
use crate::messages::{
    CreateOrderHalfPayload, OrderCreatedPayload, PayTimeoutPayload, Payload, StockRollbackPayload,
};
use crate::services::{GoodsService, StockService};

/// Successful create-order response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderResponse {
    pub order_id: OrderId,
    /// Total pay amount in minor units.
    pub price: Money,
}

/// A validated request with its identifier, ready for the local transaction.
#[derive(Debug, Clone)]
pub struct PendingOrder {
    pub order_id: OrderId,
    pub request: CreateOrderRequest,
}

impl PendingOrder {
    /// Body of the half-message for this order.
    pub fn half_payload(&self) -> CreateOrderHalfPayload {
        CreateOrderHalfPayload::new(self.order_id, self.request.goods_id, self.request.num)
    }
}

/// Outcome of the local transaction.
#[derive(Debug)]
pub enum Decision {
    /// Every step succeeded.
    Commit(CreateOrderResponse),
    /// The transaction failed; any reservation has been compensated.
    Rollback(SagaError),
    /// The order is persisted and supervised, but the success notice failed.
    /// The half-message is left for the broker's check, which commits it.
    /// This is the only outcome reported as `Unknown`.
    Unconfirmed(SagaError),
}

impl Decision {
    /// State reported to the broker.
    pub fn state(&self) -> LocalTransactionState {
        match self {
            Decision::Commit(_) => LocalTransactionState::Commit,
            Decision::Rollback(_) => LocalTransactionState::Rollback,
            Decision::Unconfirmed(_) => LocalTransactionState::Unknown,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Decision::Commit(_) => "commit",
            Decision::Rollback(_) => "rollback",
            Decision::Unconfirmed(_) => "unconfirmed",
        }
    }

    /// Result handed to the caller.
    pub fn into_result(self) -> Result<CreateOrderResponse, SagaError> {
        match self {
            Decision::Commit(response) => Ok(response),
            Decision::Rollback(e) | Decision::Unconfirmed(e) => Err(e),
        }
    }
}

/// Drives the create-order transaction.
pub struct OrderCoordinator<S, G, K, B>
where
    S: OrderStore,
    G: GoodsService,
    K: StockService,
    B: MessageBroker,
{
    store: S,
    goods: G,
    stock: K,
    broker: B,
    ids: Arc<IdGenerator>,
    config: CoordinatorConfig,
}

impl<S, G, K, B> OrderCoordinator<S, G, K, B>
where
    S: OrderStore,
    G: GoodsService,
    K: StockService,
    B: MessageBroker,
{
    /// Creates a new coordinator.
    pub fn new(
        store: S,
        goods: G,
        stock: K,
        broker: B,
        ids: Arc<IdGenerator>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            store,
            goods,
            stock,
            broker,
            ids,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    /// Creates an order.
    ///
    /// On failure no order identifier is exposed and no reservation is left
    /// unsupervised.
    #[tracing::instrument(
        skip(self, request),
        fields(goods_id = %request.goods_id, user_id = %request.user_id, num = request.num)
    )]
    pub async fn create_order(
        &self,
        request: CreateOrderRequest,
    ) -> Result<CreateOrderResponse, SagaError> {
        let started = Instant::now();
        let pending = self.begin(request)?;
        let half = pending
            .half_payload()
            .to_message(&self.config.topics.create_order)?;

        let transaction = LocalTransaction::new(self, &pending);
        let sent = self
            .broker
            .send_in_transaction(half, &transaction, self.config.deadlines.broker)
            .await?;

        let decision = transaction
            .into_decision()
            .ok_or(SagaError::TransactionIncomplete(pending.order_id))?;

        metrics::counter!("order_transactions_total", "decision" => decision.label())
            .increment(1);
        metrics::histogram!("order_create_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        tracing::info!(
            order_id = %pending.order_id,
            msg_id = %sent.msg_id,
            decision = decision.label(),
            acknowledged = sent.acknowledged,
            "order transaction finished"
        );

        decision.into_result()
    }

    /// Validates the request and assigns the order identifier.
    pub fn begin(&self, request: CreateOrderRequest) -> Result<PendingOrder, SagaError> {
        request.validate()?;
        let order_id = self.ids.next_id()?;
        Ok(PendingOrder { order_id, request })
    }

    /// Runs the local transaction for a pending order.
    #[tracing::instrument(skip(self, pending), fields(order_id = %pending.order_id))]
    pub async fn decide(&self, pending: &PendingOrder) -> Decision {
        let order_id = pending.order_id;
        let request = &pending.request;
        let deadlines = self.config.deadlines;

        let goods = match with_deadline(
            "get_goods_detail",
            deadlines.rpc,
            self.goods.get_goods_detail(request.goods_id, request.user_id),
        )
        .await
        {
            Ok(goods) => goods,
            Err(e) => {
                tracing::warn!(error = %e, "goods lookup failed");
                return Decision::Rollback(e);
            }
        };

        let pay_amount = match price_order(&goods.price, request.num) {
            Ok(amount) => amount,
            Err(e) => {
                tracing::warn!(price = %goods.price, error = %e, "order could not be priced");
                return Decision::Rollback(e);
            }
        };

        if let Err(e) = with_deadline(
            "reduce_stock",
            deadlines.rpc,
            self.stock
                .reduce_stock(request.goods_id, request.num, order_id),
        )
        .await
        {
            // An expired deadline may hide an applied reservation.
            if e.is_timeout() {
                self.request_stock_rollback(pending, "reduce_stock_timeout")
                    .await;
            }
            tracing::warn!(error = %e, "stock reservation failed");
            return Decision::Rollback(e);
        }

        let new_order = NewOrder::unpaid(order_id, request, goods, pay_amount, Utc::now());
        if let Err(e) = with_deadline(
            "persist_order",
            deadlines.store,
            self.store.create_order(&new_order),
        )
        .await
        {
            tracing::error!(error = %e, "order persistence failed");
            self.request_stock_rollback(pending, "persist_failed").await;
            return Decision::Rollback(e);
        }
        metrics::counter!("orders_created_total").increment(1);

        let timeout_notice = PayTimeoutPayload::pending(order_id, request.goods_id, request.num);
        if let Err(e) = self
            .send_payload(
                &self.config.topics.pay_timeout,
                &timeout_notice,
                Some(self.config.pay_timeout_delay),
            )
            .await
        {
            tracing::error!(error = %e, "pay timeout scheduling failed");
            self.request_stock_rollback(pending, "pay_timeout_schedule_failed")
                .await;
            self.cancel_unsupervised(order_id).await;
            return Decision::Rollback(e);
        }

        if let Err(e) = self
            .send_payload(
                &self.config.topics.order_created,
                &OrderCreatedPayload::success(order_id),
                None,
            )
            .await
        {
            tracing::warn!(error = %e, "success notice failed, leaving transaction to broker check");
            return Decision::Unconfirmed(e);
        }

        Decision::Commit(CreateOrderResponse {
            order_id,
            price: pay_amount,
        })
    }

    /// Answers the broker's status inquiry for a half-message.
    ///
    /// The order row is the source of truth: present means the transaction
    /// committed, absent means it must be rolled back and any reservation
    /// released.
    #[tracing::instrument(skip(self, half), fields(order_id = %half.order_id))]
    pub async fn recheck(&self, half: &CreateOrderHalfPayload) -> LocalTransactionState {
        let exists = with_deadline(
            "check_order_exists",
            self.config.deadlines.store,
            self.store.order_exists(half.order_id),
        )
        .await;

        match exists {
            Ok(true) => LocalTransactionState::Commit,
            Ok(false) => {
                let request = StockRollbackPayload::new(
                    half.order_id,
                    half.goods_id,
                    half.num,
                    "transaction_check_order_missing",
                );
                self.publish_stock_rollback(&request).await;
                LocalTransactionState::Rollback
            }
            Err(e) => {
                tracing::warn!(error = %e, "order lookup failed, leaving half-message unresolved");
                LocalTransactionState::Unknown
            }
        }
    }

    async fn send_payload<P: Payload + Sync>(
        &self,
        topic: &str,
        payload: &P,
        delay: Option<Duration>,
    ) -> Result<(), SagaError> {
        let message = payload.to_message(topic)?;
        let deadline = self.config.deadlines.broker;
        match delay {
            Some(delay) => {
                with_deadline("send_delayed", deadline, self.broker.send_delayed(message, delay))
                    .await?
            }
            None => with_deadline("send", deadline, self.broker.send(message)).await?,
        };
        Ok(())
    }

    async fn request_stock_rollback(&self, pending: &PendingOrder, reason: &str) {
        let request = StockRollbackPayload::new(
            pending.order_id,
            pending.request.goods_id,
            pending.request.num,
            reason,
        );
        self.publish_stock_rollback(&request).await;
    }

    async fn publish_stock_rollback(&self, request: &StockRollbackPayload) {
        metrics::counter!("stock_rollback_requests_total").increment(1);
        match self
            .send_payload(&self.config.topics.stock_rollback, request, None)
            .await
        {
            Ok(()) => tracing::info!(
                order_id = %request.order_id,
                reason = %request.reason,
                "stock rollback requested"
            ),
            Err(e) => tracing::error!(
                order_id = %request.order_id,
                reason = %request.reason,
                error = %e,
                "stock rollback request could not be published"
            ),
        }
    }

    /// Marks a persisted order cancelled when its timeout could not be scheduled.
    async fn cancel_unsupervised(&self, order_id: OrderId) {
        let cancelled = with_deadline(
            "cancel_order",
            self.config.deadlines.store,
            self.store
                .update_status_if(order_id, OrderStatus::Unpaid, OrderStatus::Cancelled),
        )
        .await;
        match cancelled {
            Ok(true) => tracing::info!(%order_id, "order cancelled"),
            Ok(false) => tracing::warn!(%order_id, "order was no longer unpaid, not cancelled"),
            Err(e) => tracing::error!(%order_id, error = %e, "order could not be cancelled"),
        }
    }
}

/// Parses the unit price and multiplies it by the quantity.
fn price_order(price: &str, num: u32) -> Result<Money, SagaError> {
    let unit = Money::parse_minor(price)?;
    unit.checked_multiply(num)
        .ok_or(SagaError::Validation(DomainError::AmountOverflow))
}

#[async_trait]
impl<S, G, K, B> TransactionChecker for OrderCoordinator<S, G, K, B>
where
    S: OrderStore,
    G: GoodsService,
    K: StockService,
    B: MessageBroker,
{
    async fn check_local_transaction(&self, message: &MessageExt) -> LocalTransactionState {
        match CreateOrderHalfPayload::decode(message.body()) {
            Ok(half) => self.recheck(&half).await,
            Err(e) => {
                tracing::error!(
                    msg_id = %message.msg_id,
                    error = %e,
                    "undecodable half-message, rolling back"
                );
                LocalTransactionState::Rollback
            }
        }
    }
}

/// Binds one pending order to the broker's transactional send.
struct LocalTransaction<'c, S, G, K, B>
where
    S: OrderStore,
    G: GoodsService,
    K: StockService,
    B: MessageBroker,
{
    coordinator: &'c OrderCoordinator<S, G, K, B>,
    pending: &'c PendingOrder,
    decision: Mutex<Option<Decision>>,
}

impl<'c, S, G, K, B> LocalTransaction<'c, S, G, K, B>
where
    S: OrderStore,
    G: GoodsService,
    K: StockService,
    B: MessageBroker,
{
    fn new(coordinator: &'c OrderCoordinator<S, G, K, B>, pending: &'c PendingOrder) -> Self {
        Self {
            coordinator,
            pending,
            decision: Mutex::new(None),
        }
    }

    fn into_decision(self) -> Option<Decision> {
        self.decision
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

#[async_trait]
impl<S, G, K, B> TransactionChecker for LocalTransaction<'_, S, G, K, B>
where
    S: OrderStore,
    G: GoodsService,
    K: StockService,
    B: MessageBroker,
{
    async fn check_local_transaction(&self, message: &MessageExt) -> LocalTransactionState {
        self.coordinator.check_local_transaction(message).await
    }
}

#[async_trait]
impl<S, G, K, B> TransactionListener for LocalTransaction<'_, S, G, K, B>
where
    S: OrderStore,
    G: GoodsService,
    K: StockService,
    B: MessageBroker,
{
    async fn execute_local_transaction(&self, _message: &Message) -> LocalTransactionState {
        let decision = self.coordinator.decide(self.pending).await;
        let state = decision.state();
        *self
            .decision
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(decision);
        state
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::{InMemoryGoodsService, InMemoryStockService};
    use broker::InMemoryBroker;
    use domain::{GoodsId, UserId};
    use order_store::InMemoryOrderStore;

    type TestCoordinator = OrderCoordinator<
        InMemoryOrderStore,
        InMemoryGoodsService,
        InMemoryStockService,
        InMemoryBroker,
    >;

    fn setup() -> (
        TestCoordinator,
        InMemoryOrderStore,
        InMemoryGoodsService,
        InMemoryStockService,
        InMemoryBroker,
    ) {
        let store = InMemoryOrderStore::new();
        let goods = InMemoryGoodsService::new();
        let stock = InMemoryStockService::new();
        let broker = InMemoryBroker::new();
        goods.insert_goods(GoodsId::new(1001), "Widget", "500", "A widget");
        stock.set_stock(GoodsId::new(1001), 100);

        let coordinator = OrderCoordinator::new(
            store.clone(),
            goods.clone(),
            stock.clone(),
            broker.clone(),
            Arc::new(IdGenerator::with_machine_id(1).unwrap()),
            CoordinatorConfig::default(),
        );
        (coordinator, store, goods, stock, broker)
    }

    fn request(num: u32) -> CreateOrderRequest {
        CreateOrderRequest::new(
            GoodsId::new(1001),
            num,
            UserId::new(1),
            "1 Main Street",
            "Alice",
            "5550100",
        )
    }

    #[test]
    fn test_price_order() {
        assert_eq!(price_order("500", 3).unwrap(), Money::from_minor(1500));
        assert!(matches!(
            price_order("", 1),
            Err(SagaError::Validation(DomainError::InvalidPrice { .. }))
        ));
        assert!(matches!(
            price_order(&i64::MAX.to_string(), 2),
            Err(SagaError::Validation(DomainError::AmountOverflow))
        ));
    }

    #[tokio::test]
    async fn test_begin_rejects_invalid_request_before_remote_calls() {
        let (coordinator, _, goods, _, broker) = setup();

        let result = coordinator.create_order(request(0)).await;

        assert!(matches!(result, Err(SagaError::Validation(_))));
        assert_eq!(goods.call_count(), 0);
        assert_eq!(broker.half_message_count(), 0);
    }

    #[tokio::test]
    async fn test_decide_commits_on_full_success() {
        let (coordinator, store, _, stock, broker) = setup();
        let pending = coordinator.begin(request(3)).unwrap();

        let decision = coordinator.decide(&pending).await;

        assert_eq!(decision.state(), LocalTransactionState::Commit);
        assert!(store.order_exists(pending.order_id).await.unwrap());
        assert_eq!(stock.reserved_quantity(pending.order_id), Some(3));
        assert_eq!(broker.scheduled_count(), 1);
        assert_eq!(broker.message_count("order_created_successfully"), 1);
    }

    #[tokio::test]
    async fn test_unparseable_price_rolls_back_without_reserving() {
        let (coordinator, store, goods, stock, _) = setup();
        goods.insert_goods(GoodsId::new(1001), "Widget", "12.50", "");
        let pending = coordinator.begin(request(1)).unwrap();

        let decision = coordinator.decide(&pending).await;

        assert!(matches!(decision, Decision::Rollback(SagaError::Validation(_))));
        assert_eq!(stock.reservation_count(), 0);
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_rollback_before_persistence_leaves_no_row() {
        let (coordinator, store, goods, stock, _) = setup();

        goods.set_fail_on_lookup(true);
        let pending = coordinator.begin(request(1)).unwrap();
        assert_eq!(
            coordinator.decide(&pending).await.state(),
            LocalTransactionState::Rollback
        );
        assert!(!store.order_exists(pending.order_id).await.unwrap());
        goods.set_fail_on_lookup(false);

        stock.set_fail_on_reduce(true);
        let pending = coordinator.begin(request(1)).unwrap();
        assert_eq!(
            coordinator.decide(&pending).await.state(),
            LocalTransactionState::Rollback
        );
        assert!(!store.order_exists(pending.order_id).await.unwrap());
        stock.set_fail_on_reduce(false);

        store.set_fail_on_create(true);
        let pending = coordinator.begin(request(1)).unwrap();
        assert_eq!(
            coordinator.decide(&pending).await.state(),
            LocalTransactionState::Rollback
        );
        store.set_fail_on_create(false);
        assert!(!store.order_exists(pending.order_id).await.unwrap());
        assert_eq!(store.order_count().await, 0);
    }

    #[tokio::test]
    async fn test_pay_timeout_failure_cancels_and_requests_rollback() {
        let (coordinator, store, _, _, broker) = setup();
        broker.fail_sends_to("pay_timeout", true);
        let pending = coordinator.begin(request(2)).unwrap();

        let decision = coordinator.decide(&pending).await;

        assert_eq!(decision.state(), LocalTransactionState::Rollback);
        assert_eq!(
            store.order_status(pending.order_id).await.unwrap(),
            Some(OrderStatus::Cancelled)
        );
        let requests = broker.messages("stock_rollback_needed");
        assert_eq!(requests.len(), 1);
        let payload = StockRollbackPayload::decode(requests[0].body()).unwrap();
        assert_eq!(payload.order_id, pending.order_id);
        assert_eq!(payload.num, 2);
    }

    #[tokio::test]
    async fn test_success_notice_failure_is_unconfirmed() {
        let (coordinator, store, _, _, broker) = setup();
        broker.fail_sends_to("order_created_successfully", true);
        let pending = coordinator.begin(request(1)).unwrap();

        let decision = coordinator.decide(&pending).await;

        assert_eq!(decision.state(), LocalTransactionState::Unknown);
        assert!(store.order_exists(pending.order_id).await.unwrap());
        assert_eq!(broker.scheduled_count(), 1);
        assert_eq!(broker.message_count("stock_rollback_needed"), 0);
    }

    #[tokio::test]
    async fn test_recheck_commits_when_order_exists() {
        let (coordinator, _, _, _, _) = setup();
        let pending = coordinator.begin(request(1)).unwrap();
        coordinator.decide(&pending).await;

        let state = coordinator.recheck(&pending.half_payload()).await;
        assert_eq!(state, LocalTransactionState::Commit);
    }

    #[tokio::test]
    async fn test_recheck_rolls_back_and_compensates_missing_order() {
        let (coordinator, _, _, _, broker) = setup();
        let half = CreateOrderHalfPayload::new(OrderId::new(77), GoodsId::new(1001), 4);

        let state = coordinator.recheck(&half).await;

        assert_eq!(state, LocalTransactionState::Rollback);
        let requests = broker.messages("stock_rollback_needed");
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].keys(), Some("77"));
    }

    #[tokio::test]
    async fn test_recheck_store_error_leaves_unknown() {
        let (coordinator, store, _, _, _) = setup();
        store.set_fail_on_read(true);
        let half = CreateOrderHalfPayload::new(OrderId::new(1), GoodsId::new(1001), 1);

        assert_eq!(
            coordinator.recheck(&half).await,
            LocalTransactionState::Unknown
        );
    }

    #[tokio::test]
    async fn test_undecodable_half_message_rolls_back() {
        let (coordinator, _, _, _, _) = setup();
        let message = MessageExt::new(Message::new("create_order", "garbage"));

        assert_eq!(
            coordinator.check_local_transaction(&message).await,
            LocalTransactionState::Rollback
        );
    }
}
