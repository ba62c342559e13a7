//! Transactional order creation with timeout compensation.
//!
//! This crate ties the order store, the broker and the remote goods/stock
//! services together:
//! - [`OrderCoordinator`] runs order creation as a broker local transaction
//!   (`begin` / `decide` / `recheck`)
//! - [`TimeoutCompensator`] consumes delayed pay-timeout messages and releases
//!   stock held by orders that were never paid
//! - [`ReconciliationScanner`] periodically sweeps stale unpaid orders the
//!   event path missed
//!
//! Both compensation paths share [`release_unpaid_order`], which claims the
//! order with a conditional status update before touching stock.

pub mod compensation;
pub mod compensator;
pub mod config;
pub mod coordinator;
pub mod deadline;
pub mod error;
pub mod messages;
pub mod scanner;
pub mod services;
pub mod stock_rollback;

pub use compensation::{ReleaseOutcome, ReleaseTarget, release_unpaid_order};
pub use compensator::{TimeoutCompensator, TimeoutOutcome};
pub use config::{CompensatorConfig, CoordinatorConfig, Deadlines, ScannerConfig, StatusSource, Topics};
pub use coordinator::{CreateOrderResponse, Decision, OrderCoordinator, PendingOrder};
pub use error::{Result, SagaError};
pub use messages::{
    CreateOrderHalfPayload, OrderCreatedPayload, PayTimeoutPayload, Payload, PayloadError,
    StockRollbackPayload,
};
pub use scanner::{ReconciliationScanner, ScanReport};
pub use services::{GoodsService, InMemoryGoodsService, InMemoryStockService, StockService};
pub use stock_rollback::StockRollbackConsumer;
