//! HTTP API server for the order transaction service.
//!
//! Provides REST endpoints for creating and reading orders, with structured
//! logging (tracing) and Prometheus metrics. The transaction flow runs
//! against in-process goods, stock and broker clients.

pub mod config;
pub mod error;
pub mod routes;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};
use broker::InMemoryBroker;
use common::{IdError, IdGenerator};
use domain::GoodsId;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::OrderStore;
use saga::{
    InMemoryGoodsService, InMemoryStockService, OrderCoordinator, ReconciliationScanner,
    StockRollbackConsumer, TimeoutCompensator,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use config::Config;
use routes::orders::AppState;

/// Goods available in the in-process catalog: `(id, title, unit price, stock)`.
pub const DEMO_GOODS: &[(i64, &str, &str, u64)] = &[
    (1001, "Mechanical keyboard", "500", 1_000),
    (1002, "Wireless mouse", "129", 500),
];

/// Consumer group of the pay-timeout subscription.
pub const TIMEOUT_GROUP: &str = "order_timeout_group";
/// Consumer group of the stock-rollback subscription.
pub const STOCK_ROLLBACK_GROUP: &str = "stock_rollback_group";

/// Everything the binary runs besides the router.
pub struct AppServices<S: OrderStore + Clone + 'static> {
    pub state: Arc<AppState<S>>,
    pub broker: InMemoryBroker,
    pub goods: InMemoryGoodsService,
    pub stock: InMemoryStockService,
    pub scanner: ReconciliationScanner<S, InMemoryStockService>,
}

/// Creates the Axum application router with all routes and shared state.
pub fn create_app<S: OrderStore + Clone + 'static>(
    state: Arc<AppState<S>>,
    metrics_handle: PrometheusHandle,
) -> Router {
    let metrics_router = Router::new()
        .route("/metrics", get(routes::metrics::get))
        .with_state(metrics_handle);

    Router::new()
        .route("/health", get(routes::health::check))
        .route("/orders", post(routes::orders::create::<S>))
        .route("/orders/{id}", get(routes::orders::get::<S>))
        .with_state(state)
        .merge(metrics_router)
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
}

/// Wires the coordinator, consumers and scanner around `store`.
///
/// The goods catalog and stock levels are seeded from [`DEMO_GOODS`].
pub fn create_default_state<S: OrderStore + Clone + 'static>(
    store: S,
    config: &Config,
) -> Result<AppServices<S>, IdError> {
    let ids = Arc::new(IdGenerator::with_machine_id(config.machine_id)?);

    let goods = InMemoryGoodsService::new();
    let stock = InMemoryStockService::new();
    for &(id, title, price, quantity) in DEMO_GOODS {
        goods.insert_goods(GoodsId::new(id), title, price, "");
        stock.set_stock(GoodsId::new(id), quantity);
    }

    let broker = InMemoryBroker::with_config(config.broker());
    let coordinator_config = config.coordinator();
    let topics = coordinator_config.topics.clone();

    let coordinator = Arc::new(OrderCoordinator::new(
        store.clone(),
        goods.clone(),
        stock.clone(),
        broker.clone(),
        ids,
        coordinator_config,
    ));

    let compensator = TimeoutCompensator::new(
        store.clone(),
        stock.clone(),
        broker.clone(),
        config.compensator(),
    );
    broker.subscribe(&topics.pay_timeout, TIMEOUT_GROUP, Arc::new(compensator));

    let stock_consumer = StockRollbackConsumer::new(stock.clone(), topics.clone(), config.deadlines());
    broker.subscribe(
        &topics.stock_rollback,
        STOCK_ROLLBACK_GROUP,
        Arc::new(stock_consumer),
    );

    let scanner = ReconciliationScanner::new(store.clone(), stock.clone(), config.scanner());
    let state = Arc::new(AppState { coordinator, store });

    Ok(AppServices {
        state,
        broker,
        goods,
        stock,
        scanner,
    })
}
