//! Persisted order rows.

use chrono::{DateTime, Utc};
use common::OrderId;
use serde::{Deserialize, Serialize};

use super::{CreateOrderRequest, GoodsId, Money, OrderStatus, UserId};

/// Snapshot of a good taken when the order was priced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GoodsSnapshot {
    pub title: String,
    /// Unit price exactly as returned by the goods service.
    pub price: String,
    pub brief: String,
}

/// One order header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub pay_amount: Money,
    pub status: OrderStatus,
    pub receive_address: String,
    pub receive_name: String,
    pub receive_phone: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One order line row, created in the same transaction as its [`Order`].
///
/// `(goods_id, num)` is exactly what was reserved against the stock service
/// for `order_id`; compensation releases that pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDetail {
    pub order_id: OrderId,
    pub user_id: UserId,
    pub goods_id: GoodsId,
    pub num: u32,
    pub title: String,
    pub price: String,
    pub brief: String,
    pub pay_amount: Money,
    /// Mirrors [`Order::status`].
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
}

/// The pair of rows making up a new order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub order: Order,
    pub detail: OrderDetail,
}

impl NewOrder {
    /// Builds the unpaid order and detail rows for a priced request.
    pub fn unpaid(
        order_id: OrderId,
        request: &CreateOrderRequest,
        goods: GoodsSnapshot,
        pay_amount: Money,
        now: DateTime<Utc>,
    ) -> Self {
        let order = Order {
            order_id,
            user_id: request.user_id,
            pay_amount,
            status: OrderStatus::Unpaid,
            receive_address: request.address.clone(),
            receive_name: request.name.clone(),
            receive_phone: request.phone.clone(),
            created_at: now,
            updated_at: now,
        };
        let detail = OrderDetail {
            order_id,
            user_id: request.user_id,
            goods_id: request.goods_id,
            num: request.num,
            title: goods.title,
            price: goods.price,
            brief: goods.brief,
            pay_amount,
            status: OrderStatus::Unpaid,
            created_at: now,
        };
        Self { order, detail }
    }

    /// Returns the order identifier shared by both rows.
    pub fn order_id(&self) -> OrderId {
        self.order.order_id
    }

    /// Shifts both creation timestamps, keeping the pair consistent.
    pub fn created_at(mut self, at: DateTime<Utc>) -> Self {
        self.order.created_at = at;
        self.order.updated_at = at;
        self.detail.created_at = at;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unpaid_builds_paired_rows() {
        let request = CreateOrderRequest::new(
            GoodsId::new(1001),
            3,
            UserId::new(7),
            "addr",
            "name",
            "555",
        );
        let goods = GoodsSnapshot {
            title: "Widget".to_string(),
            price: "500".to_string(),
            brief: "A widget".to_string(),
        };
        let now = Utc::now();
        let new_order = NewOrder::unpaid(
            OrderId::new(99),
            &request,
            goods,
            Money::from_minor(1500),
            now,
        );

        assert_eq!(new_order.order_id(), OrderId::new(99));
        assert_eq!(new_order.order.status, OrderStatus::Unpaid);
        assert_eq!(new_order.detail.status, OrderStatus::Unpaid);
        assert_eq!(new_order.order.pay_amount, Money::from_minor(1500));
        assert_eq!(new_order.detail.pay_amount, Money::from_minor(1500));
        assert_eq!(new_order.detail.goods_id, GoodsId::new(1001));
        assert_eq!(new_order.detail.num, 3);
        assert_eq!(new_order.detail.price, "500");
        assert_eq!(new_order.order.receive_name, "name");
    }

    #[test]
    fn test_created_at_moves_both_rows() {
        let request =
            CreateOrderRequest::new(GoodsId::new(1), 1, UserId::new(1), "a", "b", "c");
        let goods = GoodsSnapshot {
            title: String::new(),
            price: "1".to_string(),
            brief: String::new(),
        };
        let earlier = Utc::now() - chrono::Duration::hours(2);
        let new_order = NewOrder::unpaid(
            OrderId::new(1),
            &request,
            goods,
            Money::from_minor(1),
            Utc::now(),
        )
        .created_at(earlier);

        assert_eq!(new_order.order.created_at, earlier);
        assert_eq!(new_order.detail.created_at, earlier);
    }
}
