//! Order commands.

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

use super::{GoodsId, UserId};

const MAX_PHONE_LEN: usize = 20;
const MAX_TEXT_LEN: usize = 128;

/// Largest quantity a single order line may carry; the `num` column is a 32-bit integer.
pub const MAX_QUANTITY: u32 = i32::MAX as u32;

/// Request to create a single-line order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderRequest {
    /// The good being purchased.
    pub goods_id: GoodsId,

    /// Quantity to purchase.
    pub num: u32,

    /// The purchasing user.
    pub user_id: UserId,

    /// Shipping address.
    pub address: String,

    /// Recipient name.
    pub name: String,

    /// Recipient phone number.
    pub phone: String,
}

impl CreateOrderRequest {
    /// Creates a new request.
    pub fn new(
        goods_id: GoodsId,
        num: u32,
        user_id: UserId,
        address: impl Into<String>,
        name: impl Into<String>,
        phone: impl Into<String>,
    ) -> Self {
        Self {
            goods_id,
            num,
            user_id,
            address: address.into(),
            name: name.into(),
            phone: phone.into(),
        }
    }

    /// Validates the request before any remote call is made.
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.user_id.as_i64() <= 0 {
            return Err(DomainError::InvalidUser(self.user_id.as_i64()));
        }
        if self.goods_id.as_i64() <= 0 {
            return Err(DomainError::InvalidGoods(self.goods_id.as_i64()));
        }
        if self.num == 0 || self.num > MAX_QUANTITY {
            return Err(DomainError::InvalidQuantity(self.num));
        }
        check_text("address", &self.address, MAX_TEXT_LEN)?;
        check_text("name", &self.name, MAX_TEXT_LEN)?;
        check_text("phone", &self.phone, MAX_PHONE_LEN)?;
        Ok(())
    }
}

fn check_text(field: &'static str, value: &str, max_len: usize) -> Result<(), DomainError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(DomainError::MissingField(field));
    }
    if trimmed.chars().count() > max_len {
        return Err(DomainError::FieldTooLong { field, max_len });
    }
    Ok(())
}
