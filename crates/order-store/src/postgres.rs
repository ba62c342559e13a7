use async_trait::async_trait;
use chrono::{DateTime, Utc};
use domain::{GoodsId, Money, NewOrder, Order, OrderDetail, OrderStatus, ShardParam, UserId};
use sqlx::{PgPool, Row, postgres::PgRow};

use crate::{OrderId, OrderStoreError, Result, store::OrderStore};

/// PostgreSQL-backed order store implementation.
#[derive(Clone)]
pub struct PostgresOrderStore {
    pool: PgPool,
}

impl PostgresOrderStore {
    /// Creates a new PostgreSQL order store.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Gets a reference to the underlying connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Runs the database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }

    fn parse_status(order_id: OrderId, raw: String) -> Result<OrderStatus> {
        raw.parse()
            .map_err(|_| OrderStoreError::UnknownStatus {
                order_id,
                status: raw,
            })
    }

    fn row_to_order(row: PgRow) -> Result<Order> {
        let order_id = OrderId::new(row.try_get("order_id")?);
        Ok(Order {
            order_id,
            user_id: UserId::new(row.try_get("user_id")?),
            pay_amount: Money::from_minor(row.try_get("pay_amount")?),
            status: Self::parse_status(order_id, row.try_get("status")?)?,
            receive_address: row.try_get("receive_address")?,
            receive_name: row.try_get("receive_name")?,
            receive_phone: row.try_get("receive_phone")?,
            created_at: row.try_get("created_at")?,
            updated_at: row.try_get("updated_at")?,
        })
    }

    fn row_to_detail(row: PgRow) -> Result<OrderDetail> {
        let order_id = OrderId::new(row.try_get("order_id")?);
        let num: i32 = row.try_get("num")?;
        Ok(OrderDetail {
            order_id,
            user_id: UserId::new(row.try_get("user_id")?),
            goods_id: GoodsId::new(row.try_get("goods_id")?),
            num: num.max(0) as u32,
            title: row.try_get("title")?,
            price: row.try_get("price")?,
            brief: row.try_get("brief")?,
            pay_amount: Money::from_minor(row.try_get("pay_amount")?),
            status: Self::parse_status(order_id, row.try_get("status")?)?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[async_trait]
impl OrderStore for PostgresOrderStore {
    async fn create_order(&self, new_order: &NewOrder) -> Result<()> {
        let order = &new_order.order;
        let detail = &new_order.detail;
        let order_id = order.order_id;
        let num = i32::try_from(detail.num).map_err(|_| OrderStoreError::QuantityOutOfRange {
            order_id,
            num: detail.num,
        })?;

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO orders (order_id, user_id, pay_amount, status, receive_address, receive_name, receive_phone, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(order_id.as_i64())
        .bind(order.user_id.as_i64())
        .bind(order.pay_amount.minor())
        .bind(order.status.as_str())
        .bind(&order.receive_address)
        .bind(&order.receive_name)
        .bind(&order.receive_phone)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            if let sqlx::Error::Database(ref db_err) = e
                && db_err.is_unique_violation()
            {
                return OrderStoreError::DuplicateOrder(order_id);
            }
            OrderStoreError::Database(e)
        })?;

        sqlx::query(
            r#"
            INSERT INTO order_details (order_id, user_id, goods_id, num, title, price, brief, pay_amount, status, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order_id.as_i64())
        .bind(detail.user_id.as_i64())
        .bind(detail.goods_id.as_i64())
        .bind(num)
        .bind(&detail.title)
        .bind(&detail.price)
        .bind(&detail.brief)
        .bind(detail.pay_amount.minor())
        .bind(detail.status.as_str())
        .bind(detail.created_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        tracing::debug!(%order_id, "Order rows persisted");
        Ok(())
    }

    async fn get_order(&self, order_id: OrderId) -> Result<Option<Order>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, user_id, pay_amount, status, receive_address, receive_name, receive_phone, created_at, updated_at
            FROM orders
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_order).transpose()
    }

    async fn get_order_detail(&self, order_id: OrderId) -> Result<Option<OrderDetail>> {
        let row = sqlx::query(
            r#"
            SELECT order_id, user_id, goods_id, num, title, price, brief, pay_amount, status, created_at
            FROM order_details
            WHERE order_id = $1
            "#,
        )
        .bind(order_id.as_i64())
        .fetch_optional(&self.pool)
        .await?;

        row.map(Self::row_to_detail).transpose()
    }

    async fn update_status_if(
        &self,
        order_id: OrderId,
        expected: OrderStatus,
        new: OrderStatus,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE orders
            SET status = $3, updated_at = NOW()
            WHERE order_id = $1 AND status = $2
            "#,
        )
        .bind(order_id.as_i64())
        .bind(expected.as_str())
        .bind(new.as_str())
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        sqlx::query("UPDATE order_details SET status = $2 WHERE order_id = $1")
            .bind(order_id.as_i64())
            .bind(new.as_str())
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        metrics::counter!("order_status_transitions_total", "to" => new.as_str()).increment(1);
        Ok(true)
    }

    async fn min_order_id_since(&self, since: DateTime<Utc>) -> Result<Option<OrderId>> {
        let id: Option<i64> =
            sqlx::query_scalar("SELECT MIN(order_id) FROM orders WHERE created_at >= $1")
                .bind(since)
                .fetch_one(&self.pool)
                .await?;

        Ok(id.map(OrderId::new))
    }

    async fn order_id_bounds(&self, from: OrderId) -> Result<Option<(OrderId, OrderId)>> {
        let row = sqlx::query(
            "SELECT MIN(order_id) AS min_id, MAX(order_id) AS max_id FROM orders WHERE order_id >= $1",
        )
        .bind(from.as_i64())
        .fetch_one(&self.pool)
        .await?;

        let min: Option<i64> = row.try_get("min_id")?;
        let max: Option<i64> = row.try_get("max_id")?;
        Ok(min
            .zip(max)
            .map(|(min, max)| (OrderId::new(min), OrderId::new(max))))
    }

    async fn find_stale_unpaid(
        &self,
        shard: &ShardParam,
        created_before: DateTime<Utc>,
    ) -> Result<Vec<OrderDetail>> {
        let rows = sqlx::query(
            r#"
            SELECT d.order_id, d.user_id, d.goods_id, d.num, d.title, d.price, d.brief, d.pay_amount, o.status, d.created_at
            FROM orders o
            JOIN order_details d ON d.order_id = o.order_id
            WHERE o.order_id BETWEEN $1 AND $2
              AND o.status = $3
              AND o.created_at < $4
            ORDER BY o.order_id ASC
            "#,
        )
        .bind(shard.start_id.as_i64())
        .bind(shard.end_id.as_i64())
        .bind(OrderStatus::Unpaid.as_str())
        .bind(created_before)
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Self::row_to_detail).collect()
    }
}
