//! Domain layer for the order transaction service.
//!
//! This crate provides:
//! - Order and OrderDetail rows and the create-order request
//! - The closed `OrderStatus` state machine
//! - Money in integer minor units
//! - Shard planning for reconciliation scans

pub mod error;
pub mod order;
pub mod shard;

pub use common::OrderId;
pub use error::DomainError;
pub use order::{
    CreateOrderRequest, GoodsId, GoodsSnapshot, MAX_QUANTITY, Money, NewOrder, Order, OrderDetail,
    OrderStatus, UserId,
};
pub use shard::{ShardParam, plan_shards};
