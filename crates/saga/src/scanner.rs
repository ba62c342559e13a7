//! Periodic sharded reconciliation of stale unpaid orders.
//!
//! The event path can miss an order (a lost delayed message, a crash between
//! steps). Each cycle splits the recent identifier range into shards, scans
//! them concurrently and runs [`release_unpaid_order`] on every unpaid order
//! older than the staleness threshold.

use chrono::{DateTime, TimeDelta, Utc};
use domain::{OrderDetail, ShardParam, plan_shards};
use futures_util::future::join_all;
use order_store::OrderStore;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::compensation::{ReleaseOutcome, ReleaseTarget, release_unpaid_order};
use crate::config::ScannerConfig;
use crate::deadline::with_deadline;
use crate::error::SagaError;
use crate::services::StockService;

/// Summary of one scan cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ScanReport {
    pub shards: usize,
    pub candidates: usize,
    pub compensated: usize,
    pub already_finalized: usize,
    pub failed: usize,
}

impl ScanReport {
    fn merge(&mut self, shard: ScanReport) {
        self.candidates += shard.candidates;
        self.compensated += shard.compensated;
        self.already_finalized += shard.already_finalized;
        self.failed += shard.failed;
    }
}

/// Background scanner that compensates unpaid orders the event path missed.
#[derive(Clone)]
pub struct ReconciliationScanner<S, K>
where
    S: OrderStore + Clone + 'static,
    K: StockService + Clone + 'static,
{
    store: S,
    stock: K,
    config: ScannerConfig,
}

impl<S, K> ReconciliationScanner<S, K>
where
    S: OrderStore + Clone + 'static,
    K: StockService + Clone + 'static,
{
    pub fn new(store: S, stock: K, config: ScannerConfig) -> Self {
        Self {
            store,
            stock,
            config,
        }
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Runs one cycle against the current wall clock.
    pub async fn scan_once(&self) -> Result<ScanReport, SagaError> {
        self.scan_at(Utc::now()).await
    }

    /// Runs one cycle as if the current time were `now`.
    #[tracing::instrument(skip(self), fields(shard_count = self.config.shard_count))]
    pub async fn scan_at(&self, now: DateTime<Utc>) -> Result<ScanReport, SagaError> {
        let started = Instant::now();
        let lookback = to_time_delta(self.config.lookback, "scan lookback out of range")?;
        let stale_after = to_time_delta(self.config.stale_after, "stale threshold out of range")?;
        let deadline = self.config.deadlines.store;

        let mut report = ScanReport::default();

        let lower = with_deadline(
            "min_order_id_since",
            deadline,
            self.store.min_order_id_since(now - lookback),
        )
        .await?;
        let Some(lower) = lower else {
            tracing::debug!("no orders within lookback window");
            self.record_cycle(&report, started);
            return Ok(report);
        };

        let bounds = with_deadline("order_id_bounds", deadline, self.store.order_id_bounds(lower))
            .await?;
        let Some((min_id, max_id)) = bounds else {
            self.record_cycle(&report, started);
            return Ok(report);
        };

        let shards = plan_shards(min_id, max_id, self.config.shard_count);
        report.shards = shards.len();
        let created_before = now - stale_after;

        let results = join_all(
            shards
                .iter()
                .map(|shard| self.scan_shard(shard, created_before)),
        )
        .await;
        for shard in results {
            report.merge(shard);
        }

        tracing::info!(
            shards = report.shards,
            candidates = report.candidates,
            compensated = report.compensated,
            already_finalized = report.already_finalized,
            failed = report.failed,
            "reconciliation cycle finished"
        );
        self.record_cycle(&report, started);
        Ok(report)
    }

    #[tracing::instrument(skip(self, shard), fields(shard_id = shard.shard_id, start_id = %shard.start_id, end_id = %shard.end_id))]
    async fn scan_shard(&self, shard: &ShardParam, created_before: DateTime<Utc>) -> ScanReport {
        let mut report = ScanReport::default();

        let candidates = match with_deadline(
            "find_stale_unpaid",
            self.config.deadlines.store,
            self.store.find_stale_unpaid(shard, created_before),
        )
        .await
        {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "shard query failed, skipping shard");
                return report;
            }
        };

        report.candidates = candidates.len();
        for detail in &candidates {
            match self.compensate(detail).await {
                Ok(ReleaseOutcome::Released) => report.compensated += 1,
                Ok(ReleaseOutcome::AlreadyFinalized) => report.already_finalized += 1,
                Err(e) => {
                    tracing::warn!(order_id = %detail.order_id, error = %e, "stale order compensation failed");
                    report.failed += 1;
                }
            }
        }
        report
    }

    /// Runs the release in its own task so an expired wait leaves it to finish.
    async fn compensate(&self, detail: &OrderDetail) -> Result<ReleaseOutcome, SagaError> {
        let store = self.store.clone();
        let stock = self.stock.clone();
        let deadlines = self.config.deadlines;
        let target = ReleaseTarget::from(detail);

        let handle = tokio::spawn(async move {
            release_unpaid_order(&store, &stock, target, &deadlines).await
        });

        match tokio::time::timeout(self.config.order_timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(SagaError::StockService(format!(
                "compensation task failed: {join_err}"
            ))),
            Err(_) => Err(SagaError::Timeout {
                operation: "compensate_stale_order",
                after: self.config.order_timeout,
            }),
        }
    }

    fn record_cycle(&self, report: &ScanReport, started: Instant) {
        metrics::counter!("reconciliation_cycles_total").increment(1);
        metrics::counter!("reconciliation_orders_compensated_total")
            .increment(report.compensated as u64);
        metrics::histogram!("reconciliation_cycle_duration_seconds")
            .record(started.elapsed().as_secs_f64());
    }

    /// Scans every `interval` until `shutdown` flips to true.
    ///
    /// Shutdown is observed between cycles; a running cycle completes.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval_at(
            Instant::now() + self.config.interval,
            self.config.interval,
        );
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        tracing::info!(interval_secs = self.config.interval.as_secs(), "reconciliation scanner started");
        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.scan_once().await {
                        tracing::error!(error = %e, "reconciliation cycle failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }
        tracing::info!("reconciliation scanner stopped");
    }
}

fn to_time_delta(duration: std::time::Duration, what: &'static str) -> Result<TimeDelta, SagaError> {
    TimeDelta::from_std(duration).map_err(|_| SagaError::InvalidConfig(what))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::InMemoryStockService;
    use common::OrderId;
    use domain::{CreateOrderRequest, GoodsId, GoodsSnapshot, Money, NewOrder, OrderStatus, UserId};
    use order_store::{InMemoryOrderStore, OrderStoreExt};
    use std::time::Duration;

    const GOODS: i64 = 1001;

    struct Fixture {
        scanner: ReconciliationScanner<InMemoryOrderStore, InMemoryStockService>,
        store: InMemoryOrderStore,
        stock: InMemoryStockService,
        now: DateTime<Utc>,
    }

    fn fixture(shard_count: usize) -> Fixture {
        let store = InMemoryOrderStore::new();
        let stock = InMemoryStockService::new();
        stock.set_stock(GoodsId::new(GOODS), 1_000);
        let config = ScannerConfig {
            shard_count,
            ..Default::default()
        };
        Fixture {
            scanner: ReconciliationScanner::new(store.clone(), stock.clone(), config),
            store,
            stock,
            now: Utc::now(),
        }
    }

    async fn place(f: &Fixture, id: i64, age: TimeDelta) -> OrderId {
        let order_id = OrderId::new(id);
        let goods_id = GoodsId::new(GOODS);
        f.stock.reduce_stock(goods_id, 1, order_id).await.unwrap();
        let request = CreateOrderRequest::new(goods_id, 1, UserId::new(7), "a", "b", "c");
        let goods = GoodsSnapshot {
            title: "Widget".to_string(),
            price: "500".to_string(),
            brief: String::new(),
        };
        let order = NewOrder::unpaid(order_id, &request, goods, Money::from_minor(500), f.now)
            .created_at(f.now - age);
        f.store.create_order(&order).await.unwrap();
        order_id
    }

    #[tokio::test]
    async fn test_empty_store_does_nothing() {
        let f = fixture(4);
        let report = f.scanner.scan_at(f.now).await.unwrap();
        assert_eq!(report, ScanReport::default());
    }

    #[tokio::test]
    async fn test_stale_unpaid_orders_are_compensated() {
        let f = fixture(3);
        let stale = TimeDelta::hours(1);
        for id in 100..110 {
            place(&f, id, stale).await;
        }

        let report = f.scanner.scan_at(f.now).await.unwrap();

        assert_eq!(report.shards, 3);
        assert_eq!(report.candidates, 10);
        assert_eq!(report.compensated, 10);
        assert_eq!(f.stock.available(GoodsId::new(GOODS)), 1_000);
        for id in 100..110 {
            assert_eq!(
                f.store.order_status(OrderId::new(id)).await.unwrap(),
                Some(OrderStatus::Timeout)
            );
        }
    }

    #[tokio::test]
    async fn test_recent_and_paid_orders_are_skipped() {
        let f = fixture(2);
        let old = place(&f, 1, TimeDelta::hours(2)).await;
        let fresh = place(&f, 2, TimeDelta::minutes(5)).await;
        let paid = place(&f, 3, TimeDelta::hours(2)).await;
        f.store
            .update_status_if(paid, OrderStatus::Unpaid, OrderStatus::Paid)
            .await
            .unwrap();

        let report = f.scanner.scan_at(f.now).await.unwrap();

        assert_eq!(report.candidates, 1);
        assert_eq!(report.compensated, 1);
        assert_eq!(f.store.order_status(old).await.unwrap(), Some(OrderStatus::Timeout));
        assert_eq!(f.store.order_status(fresh).await.unwrap(), Some(OrderStatus::Unpaid));
        assert_eq!(f.store.order_status(paid).await.unwrap(), Some(OrderStatus::Paid));
    }

    #[tokio::test]
    async fn test_orders_outside_lookback_are_ignored() {
        let f = fixture(2);
        let ancient = place(&f, 1, TimeDelta::days(30)).await;

        let report = f.scanner.scan_at(f.now).await.unwrap();

        assert_eq!(report, ScanReport::default());
        assert_eq!(f.store.order_status(ancient).await.unwrap(), Some(OrderStatus::Unpaid));
    }

    #[tokio::test]
    async fn test_more_shards_than_ids() {
        let f = fixture(10);
        place(&f, 5, TimeDelta::hours(1)).await;
        place(&f, 6, TimeDelta::hours(1)).await;

        let report = f.scanner.scan_at(f.now).await.unwrap();

        assert_eq!(report.shards, 2);
        assert_eq!(report.compensated, 2);
    }

    #[tokio::test]
    async fn test_second_cycle_finds_nothing() {
        let f = fixture(4);
        place(&f, 1, TimeDelta::hours(1)).await;

        f.scanner.scan_at(f.now).await.unwrap();
        let second = f.scanner.scan_at(f.now).await.unwrap();

        assert_eq!(second.candidates, 0);
        assert_eq!(f.stock.release_count(), 1);
    }

    #[tokio::test]
    async fn test_failed_rollbacks_are_counted_and_retried_next_cycle() {
        let f = fixture(1);
        let order_id = place(&f, 1, TimeDelta::hours(1)).await;
        f.stock.set_fail_on_rollback(true);

        let report = f.scanner.scan_at(f.now).await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(f.store.order_status(order_id).await.unwrap(), Some(OrderStatus::Unpaid));

        f.stock.set_fail_on_rollback(false);
        let report = f.scanner.scan_at(f.now).await.unwrap();
        assert_eq!(report.compensated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_compensation_hits_per_order_timeout() {
        let f = fixture(1);
        place(&f, 1, TimeDelta::hours(1)).await;
        f.stock.set_rollback_delay(Some(Duration::from_secs(2)));
        let scanner = ReconciliationScanner::new(
            f.store.clone(),
            f.stock.clone(),
            ScannerConfig {
                shard_count: 1,
                order_timeout: Duration::from_millis(500),
                ..Default::default()
            },
        );

        let report = scanner.scan_at(f.now).await.unwrap();
        assert_eq!(report.failed, 1);

        // The spawned release keeps running and finishes on its own.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(f.stock.release_count(), 1);
        assert_eq!(
            f.store.order_status(OrderId::new(1)).await.unwrap(),
            Some(OrderStatus::Timeout)
        );
    }

    #[tokio::test]
    async fn test_store_failure_surfaces() {
        let f = fixture(2);
        place(&f, 1, TimeDelta::hours(1)).await;
        f.store.set_fail_on_read(true);

        assert!(matches!(
            f.scanner.scan_at(f.now).await,
            Err(SagaError::Store(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let f = fixture(2);
        let (tx, rx) = watch::channel(false);
        let scanner = f.scanner.clone();
        let task = tokio::spawn(async move { scanner.run(rx).await });

        tokio::time::sleep(Duration::from_secs(301)).await;
        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
