//! Order rows, status, and related value objects.

mod commands;
mod model;
mod state;
mod value_objects;

pub use commands::{CreateOrderRequest, MAX_QUANTITY};
pub use model::{GoodsSnapshot, NewOrder, Order, OrderDetail};
pub use state::OrderStatus;
pub use value_objects::{GoodsId, Money, UserId};
