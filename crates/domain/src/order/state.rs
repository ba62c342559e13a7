//! Order status state machine.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The payment status of an order.
///
/// State transitions (all via conditional updates):
/// ```text
/// Unpaid ──┬──► Paid
///          ├──► Cancelled
///          └──► Timeout
/// ```
///
/// `Timeout ──► Unpaid` is only used to hand back a compensation claim
/// whose stock rollback definitely failed. A rollback that timed out keeps
/// the order in `Timeout`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    /// Created, awaiting payment. Stock is reserved.
    #[default]
    #[serde(alias = "pending")]
    Unpaid,

    /// Payment received (terminal state).
    Paid,

    /// Cancelled before payment (terminal state).
    Cancelled,

    /// Payment window elapsed and stock was released (terminal state).
    Timeout,
}

impl OrderStatus {
    /// Returns true if the order still holds a stock reservation awaiting payment.
    pub fn is_unpaid(&self) -> bool {
        matches!(self, OrderStatus::Unpaid)
    }

    /// Returns true if this is a terminal state.
    pub fn is_terminal(&self) -> bool {
        !self.is_unpaid()
    }

    /// Returns true if a conditional update from `self` to `next` is a legal transition.
    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        matches!(
            (self, next),
            (OrderStatus::Unpaid, OrderStatus::Paid)
                | (OrderStatus::Unpaid, OrderStatus::Cancelled)
                | (OrderStatus::Unpaid, OrderStatus::Timeout)
                | (OrderStatus::Timeout, OrderStatus::Unpaid)
        )
    }

    /// Returns the status as stored and transmitted.
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Unpaid => "unpaid",
            OrderStatus::Paid => "paid",
            OrderStatus::Cancelled => "cancelled",
            OrderStatus::Timeout => "timeout",
        }
    }
}

impl std::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unpaid" | "pending" => Ok(OrderStatus::Unpaid),
            "paid" => Ok(OrderStatus::Paid),
            "cancelled" => Ok(OrderStatus::Cancelled),
            "timeout" => Ok(OrderStatus::Timeout),
            other => Err(DomainError::UnknownStatus(other.to_string())),
        }
    }
}
