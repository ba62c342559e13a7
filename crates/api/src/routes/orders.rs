//! Order creation and lookup endpoints.

use std::sync::Arc;

use axum::Json;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use broker::InMemoryBroker;
use chrono::{DateTime, Utc};
use common::OrderId;
use domain::{CreateOrderRequest, GoodsId, Money, OrderStatus, UserId};
use order_store::OrderStore;
use saga::{CreateOrderResponse, InMemoryGoodsService, InMemoryStockService, OrderCoordinator};
use serde::Serialize;

use crate::error::ApiError;

/// Coordinator wired to the in-process goods, stock and broker clients.
pub type AppCoordinator<S> =
    OrderCoordinator<S, InMemoryGoodsService, InMemoryStockService, InMemoryBroker>;

/// Shared application state accessible from all handlers.
pub struct AppState<S: OrderStore + Clone + 'static> {
    pub coordinator: Arc<AppCoordinator<S>>,
    pub store: S,
}

// -- Response types --

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub status: OrderStatus,
    pub pay_amount: Money,
    pub goods_id: GoodsId,
    pub num: u32,
    pub title: String,
    pub price: String,
    pub receive_address: String,
    pub receive_name: String,
    pub receive_phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// -- Handlers --

/// POST /orders: create an order through the transactional flow.
#[tracing::instrument(skip(state, req))]
pub async fn create<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Json(req): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<CreateOrderResponse>), ApiError> {
    let response = state.coordinator.create_order(req).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// GET /orders/{id}: read both rows of an order.
#[tracing::instrument(skip(state))]
pub async fn get<S: OrderStore + Clone + 'static>(
    State(state): State<Arc<AppState<S>>>,
    Path(id): Path<String>,
) -> Result<Json<OrderView>, ApiError> {
    let order_id: OrderId = id
        .parse()
        .map_err(|e| ApiError::BadRequest(format!("Invalid order ID: {e}")))?;

    let order = state
        .store
        .get_order(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} not found")))?;
    let detail = state
        .store
        .get_order_detail(order_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Order {order_id} has no detail")))?;

    Ok(Json(OrderView {
        order_id,
        user_id: order.user_id,
        status: order.status,
        pay_amount: order.pay_amount,
        goods_id: detail.goods_id,
        num: detail.num,
        title: detail.title,
        price: detail.price,
        receive_address: order.receive_address,
        receive_name: order.receive_name,
        receive_phone: order.receive_phone,
        created_at: order.created_at,
        updated_at: order.updated_at,
    }))
}
