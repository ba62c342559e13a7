//! Releasing the stock held by an unpaid order.
//!
//! Shared by the timeout compensator and the reconciliation scanner. The
//! order is claimed with a conditional `unpaid -> timeout` update before any
//! stock is touched, so concurrent paths (a second delivery, a scan, a
//! payment) can never both act on the same order.

use common::OrderId;
use domain::{GoodsId, OrderDetail, OrderStatus};
use order_store::OrderStore;

use crate::config::Deadlines;
use crate::deadline::with_deadline;
use crate::error::SagaError;
use crate::services::StockService;

/// The reservation to release: exactly what was reserved for the order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReleaseTarget {
    pub order_id: OrderId,
    pub goods_id: GoodsId,
    pub num: u32,
}

impl From<&OrderDetail> for ReleaseTarget {
    fn from(detail: &OrderDetail) -> Self {
        Self {
            order_id: detail.order_id,
            goods_id: detail.goods_id,
            num: detail.num,
        }
    }
}

/// Result of a release attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReleaseOutcome {
    /// This call moved the order to `timeout` and released its stock.
    Released,
    /// The order was no longer unpaid; nothing was done.
    AlreadyFinalized,
}

impl ReleaseOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReleaseOutcome::Released => "released",
            ReleaseOutcome::AlreadyFinalized => "already_finalized",
        }
    }
}

/// Moves an unpaid order to `timeout` and releases its reservation.
///
/// If the stock rollback fails, the claim is handed back (`timeout -> unpaid`)
/// so a later delivery or scan retries, and the rollback error is returned.
/// A rollback that hit its deadline may already have been applied, so the
/// order stays in `timeout` and is left for operator follow-up.
#[tracing::instrument(skip(store, stock, deadlines), fields(order_id = %target.order_id))]
pub async fn release_unpaid_order<S, K>(
    store: &S,
    stock: &K,
    target: ReleaseTarget,
    deadlines: &Deadlines,
) -> Result<ReleaseOutcome, SagaError>
where
    S: OrderStore + ?Sized,
    K: StockService + ?Sized,
{
    let ReleaseTarget {
        order_id,
        goods_id,
        num,
    } = target;

    let claimed = with_deadline(
        "claim_unpaid_order",
        deadlines.store,
        store.update_status_if(order_id, OrderStatus::Unpaid, OrderStatus::Timeout),
    )
    .await?;
    if !claimed {
        tracing::debug!("order already finalized, skipping release");
        return Ok(ReleaseOutcome::AlreadyFinalized);
    }

    let rollback = with_deadline(
        "rollback_stock",
        deadlines.rpc,
        stock.rollback_stock(goods_id, num, order_id),
    )
    .await;

    if let Err(e) = rollback {
        if e.is_timeout() {
            metrics::counter!("stock_rollback_ambiguous_total").increment(1);
            tracing::error!(
                error = %e,
                %goods_id,
                num,
                "stock rollback outcome unknown, order left in timeout for manual reconciliation"
            );
            return Err(e);
        }
        tracing::warn!(error = %e, "stock rollback failed, handing claim back");
        let reverted = with_deadline(
            "release_claim",
            deadlines.store,
            store.update_status_if(order_id, OrderStatus::Timeout, OrderStatus::Unpaid),
        )
        .await;
        match reverted {
            Ok(true) => {}
            Ok(false) => {
                tracing::error!("claim no longer held, order left in timeout with stock reserved")
            }
            Err(revert_err) => tracing::error!(
                error = %revert_err,
                "could not hand claim back, order left in timeout with stock reserved"
            ),
        }
        return Err(e);
    }

    tracing::info!(%goods_id, num, "unpaid order timed out, stock released");
    Ok(ReleaseOutcome::Released)
}
