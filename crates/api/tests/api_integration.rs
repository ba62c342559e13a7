//! Integration tests for the API server.

use std::sync::OnceLock;
use std::time::Duration;

use api::AppServices;
use api::config::Config;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use domain::GoodsId;
use metrics_exporter_prometheus::PrometheusHandle;
use order_store::InMemoryOrderStore;
use tower::ServiceExt;

static METRICS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

fn get_metrics_handle() -> PrometheusHandle {
    METRICS_HANDLE
        .get_or_init(|| {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            builder
                .install_recorder()
                .expect("failed to install Prometheus recorder")
        })
        .clone()
}

struct TestHarness {
    app: axum::Router,
    services: AppServices<InMemoryOrderStore>,
    store: InMemoryOrderStore,
}

impl TestHarness {
    fn new() -> Self {
        let store = InMemoryOrderStore::new();
        let services = api::create_default_state(store.clone(), &Config::default()).unwrap();
        let app = api::create_app(services.state.clone(), get_metrics_handle());
        Self {
            app,
            services,
            store,
        }
    }

    async fn post_order(&self, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let response = self
            .app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/orders")
                    .header("content-type", "application/json")
                    .body(Body::from(serde_json::to_string(&body).unwrap()))
                    .unwrap(),
            )
            .await
            .unwrap();
        read_json(response).await
    }

    async fn get(&self, uri: &str) -> (StatusCode, serde_json::Value) {
        let response = self
            .app
            .clone()
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        read_json(response).await
    }
}

async fn read_json(response: axum::response::Response) -> (StatusCode, serde_json::Value) {
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let json = serde_json::from_slice(&body).unwrap_or(serde_json::Value::Null);
    (status, json)
}

fn order_body(goods_id: i64, num: u32) -> serde_json::Value {
    serde_json::json!({
        "goodsId": goods_id,
        "num": num,
        "userId": 42,
        "address": "1 Main Street",
        "name": "Alice",
        "phone": "5550100"
    })
}

#[tokio::test]
async fn test_health_check() {
    let harness = TestHarness::new();

    let (status, json) = harness.get("/health").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
}

#[tokio::test]
async fn test_create_order_prices_quantity() {
    let harness = TestHarness::new();

    let (status, json) = harness.post_order(order_body(1001, 3)).await;

    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(json["price"], 1500);
    assert!(json["orderId"].as_i64().unwrap() > 0);
    assert_eq!(harness.services.stock.available(GoodsId::new(1001)), 997);
}

#[tokio::test]
async fn test_create_and_get_order() {
    let harness = TestHarness::new();

    let (_, created) = harness.post_order(order_body(1002, 2)).await;
    let order_id = created["orderId"].as_i64().unwrap();

    let (status, order) = harness.get(&format!("/orders/{order_id}")).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(order["orderId"], order_id);
    assert_eq!(order["status"], "unpaid");
    assert_eq!(order["payAmount"], 258);
    assert_eq!(order["goodsId"], 1002);
    assert_eq!(order["num"], 2);
    assert_eq!(order["price"], "129");
    assert_eq!(order["title"], "Wireless mouse");
    assert_eq!(order["receiveName"], "Alice");
}

#[tokio::test]
async fn test_get_nonexistent_order() {
    let harness = TestHarness::new();

    let (status, json) = harness.get("/orders/123456789").await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(json["error"].as_str().unwrap().contains("123456789"));
}

#[tokio::test]
async fn test_get_with_malformed_id() {
    let harness = TestHarness::new();

    let (status, _) = harness.get("/orders/not-a-number").await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_request_is_rejected() {
    let harness = TestHarness::new();

    let (status, json) = harness.post_order(order_body(1001, 0)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().is_some());
    assert!(json.get("orderId").is_none());
    assert_eq!(harness.store.order_count().await, 0);
}

#[tokio::test]
async fn test_quantity_beyond_column_width_is_rejected() {
    let harness = TestHarness::new();

    let (status, json) = harness.post_order(order_body(1001, 3_000_000_000)).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(json["error"].as_str().unwrap().contains("3000000000"));
    assert_eq!(harness.store.order_count().await, 0);
    assert_eq!(harness.services.stock.available(GoodsId::new(1001)), 1_000);
}

#[tokio::test]
async fn test_unknown_goods_fails_without_order() {
    let harness = TestHarness::new();

    let (status, json) = harness.post_order(order_body(9999, 1)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(json["error"], "internal error");
    assert_eq!(harness.store.order_count().await, 0);
}

#[tokio::test]
async fn test_insufficient_stock_fails_without_order() {
    let harness = TestHarness::new();

    let (status, _) = harness.post_order(order_body(1002, 501)).await;

    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(harness.store.order_count().await, 0);
    assert_eq!(harness.services.stock.available(GoodsId::new(1002)), 500);
}

#[tokio::test]
async fn test_persistence_failure_releases_stock_through_consumer() {
    let harness = TestHarness::new();
    harness.store.set_fail_on_create(true);

    let (status, _) = harness.post_order(order_body(1001, 4)).await;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(harness.services.stock.available(GoodsId::new(1001)), 996);

    // The stock-rollback request is applied by its consumer.
    harness.services.broker.pump().await;
    assert_eq!(harness.services.stock.available(GoodsId::new(1001)), 1_000);
}

#[tokio::test(start_paused = true)]
async fn test_unpaid_order_times_out() {
    let harness = TestHarness::new();
    let (_, created) = harness.post_order(order_body(1001, 2)).await;
    let order_id = created["orderId"].as_i64().unwrap();

    tokio::time::advance(Duration::from_secs(31)).await;
    harness.services.broker.pump().await;

    let (_, order) = harness.get(&format!("/orders/{order_id}")).await;
    assert_eq!(order["status"], "timeout");
    assert_eq!(harness.services.stock.available(GoodsId::new(1001)), 1_000);
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let harness = TestHarness::new();
    harness.post_order(order_body(1001, 1)).await;

    let response = harness
        .app
        .clone()
        .oneshot(
            Request::builder()
                .uri("/metrics")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();
    assert!(text.contains("order_transactions_total"));
}
