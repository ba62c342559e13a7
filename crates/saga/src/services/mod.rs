//! Remote service traits and in-memory implementations.

pub mod goods;
pub mod stock;

pub use goods::{GoodsService, InMemoryGoodsService};
pub use stock::{InMemoryStockService, StockService};
