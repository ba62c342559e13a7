//! Versioned payload schemas for every topic in the order flow.
//!
//! Payloads are camelCase JSON carrying a `version` field. Unknown fields
//! are ignored so schemas can grow additively; a body written by a newer
//! schema version is rejected as [`PayloadError::UnsupportedVersion`] rather
//! than misread.

use broker::Message;
use common::OrderId;
use domain::{GoodsId, OrderStatus};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use thiserror::Error;

/// Current schema version written by this service.
pub const SCHEMA_VERSION: u32 = 1;

/// Status value carried by the success notice.
pub const STATUS_SUCCESS: &str = "success";

/// Errors raised while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum PayloadError {
    /// The body is not valid JSON for the expected schema.
    #[error("Malformed payload: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The body was written by a schema version this service cannot read.
    #[error("Unsupported payload version {found} (supported up to {supported})")]
    UnsupportedVersion { found: u32, supported: u32 },
}

fn current_version() -> u32 {
    SCHEMA_VERSION
}

#[derive(Deserialize)]
struct VersionHeader {
    #[serde(default = "current_version")]
    version: u32,
}

/// Shared encode/decode behaviour of all payloads.
pub trait Payload: Serialize + DeserializeOwned {
    /// Order the payload refers to; used as the message key.
    fn order_id(&self) -> OrderId;

    /// Serializes the payload to JSON bytes.
    fn encode(&self) -> Result<Vec<u8>, PayloadError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parses a payload, checking the schema version first.
    fn decode(body: &[u8]) -> Result<Self, PayloadError> {
        let header: VersionHeader = serde_json::from_slice(body)?;
        if header.version == 0 || header.version > SCHEMA_VERSION {
            return Err(PayloadError::UnsupportedVersion {
                found: header.version,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(serde_json::from_slice(body)?)
    }

    /// Builds a broker message for `topic` keyed by the order id.
    fn to_message(&self, topic: &str) -> Result<Message, PayloadError> {
        Ok(Message::new(topic, self.encode()?).with_keys(self.order_id().to_string()))
    }
}

/// Half-message body of the create-order transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateOrderHalfPayload {
    #[serde(default = "current_version")]
    pub version: u32,
    pub order_id: OrderId,
    pub goods_id: GoodsId,
    pub num: u32,
}

impl CreateOrderHalfPayload {
    pub fn new(order_id: OrderId, goods_id: GoodsId, num: u32) -> Self {
        Self {
            version: SCHEMA_VERSION,
            order_id,
            goods_id,
            num,
        }
    }
}

impl Payload for CreateOrderHalfPayload {
    fn order_id(&self) -> OrderId {
        self.order_id
    }
}

/// Delayed message that fires when the payment window closes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayTimeoutPayload {
    #[serde(default = "current_version")]
    pub version: u32,
    pub order_id: OrderId,
    pub goods_id: GoodsId,
    pub num: u32,
    /// Status snapshot at send time, kept as text so unknown values surface
    /// as errors at the consumer instead of failing deserialization.
    pub status: String,
}

impl PayTimeoutPayload {
    /// Builds the payload sent right after the order is persisted.
    pub fn pending(order_id: OrderId, goods_id: GoodsId, num: u32) -> Self {
        Self {
            version: SCHEMA_VERSION,
            order_id,
            goods_id,
            num,
            status: "pending".to_string(),
        }
    }

    /// Parses the embedded status snapshot.
    pub fn status(&self) -> Result<OrderStatus, domain::DomainError> {
        self.status.parse()
    }
}

impl Payload for PayTimeoutPayload {
    fn order_id(&self) -> OrderId {
        self.order_id
    }
}

/// Success notice published once the order transaction completed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreatedPayload {
    #[serde(default = "current_version")]
    pub version: u32,
    pub order_id: OrderId,
    pub status: String,
}

impl OrderCreatedPayload {
    pub fn success(order_id: OrderId) -> Self {
        Self {
            version: SCHEMA_VERSION,
            order_id,
            status: STATUS_SUCCESS.to_string(),
        }
    }
}

impl Payload for OrderCreatedPayload {
    fn order_id(&self) -> OrderId {
        self.order_id
    }
}

/// Request for the stock side to release a reservation by order id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockRollbackPayload {
    #[serde(default = "current_version")]
    pub version: u32,
    pub order_id: OrderId,
    pub goods_id: GoodsId,
    pub num: u32,
    pub reason: String,
}

impl StockRollbackPayload {
    pub fn new(order_id: OrderId, goods_id: GoodsId, num: u32, reason: impl Into<String>) -> Self {
        Self {
            version: SCHEMA_VERSION,
            order_id,
            goods_id,
            num,
            reason: reason.into(),
        }
    }
}

impl Payload for StockRollbackPayload {
    fn order_id(&self) -> OrderId {
        self.order_id
    }
}
