use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod phonepe;

/// Order submitted to the gateway. Amount is always in minor units.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrderRequest {
    pub merchant_order_id: String,
    pub amount_minor: u64,
    pub redirect_url: String,
    pub message: String,
    pub payer: PayerInfo,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayerInfo {
    pub full_name: String,
    pub email: String,
    pub phone: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayOrder {
    /// Gateway-side id; distinct from the merchant order id.
    pub gateway_order_id: String,
    pub checkout_ref: String,
    pub state: OrderState,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrderState {
    Pending,
    Completed,
    Failed,
    Other(String),
}

impl OrderState {
    pub fn parse(raw: &str) -> Self {
        match raw.to_ascii_uppercase().as_str() {
            "PENDING" => OrderState::Pending,
            "COMPLETED" => OrderState::Completed,
            "FAILED" => OrderState::Failed,
            other => OrderState::Other(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            OrderState::Pending => "PENDING",
            OrderState::Completed => "COMPLETED",
            OrderState::Failed => "FAILED",
            OrderState::Other(raw) => raw,
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderState::Pending)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrderStatus {
    pub state: OrderState,
    pub amount_minor: u64,
    pub gateway_order_id: Option<String>,
    pub transaction_id: Option<String>,
    pub payment_mode: Option<String>,
    pub error_code: Option<String>,
}

#[derive(Error, Debug)]
pub enum GatewayError {
    #[error("Gateway authentication failed: {0}")]
    Auth(String),

    #[error("Gateway request timed out")]
    Timeout,

    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Gateway rejected request with status {status}: {message}")]
    Rejected { status: u16, message: String },

    #[error("Unexpected gateway response: {0}")]
    Decode(String),
}

impl From<reqwest::Error> for GatewayError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            GatewayError::Timeout
        } else if err.is_decode() {
            GatewayError::Decode(err.to_string())
        } else {
            GatewayError::Transport(err.to_string())
        }
    }
}

/// Remote payment authority. Implementations own their credentials and
/// transport; nothing here is process-global.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_order(&self, request: GatewayOrderRequest) -> Result<GatewayOrder, GatewayError>;
    async fn order_status(&self, merchant_order_id: &str) -> Result<OrderStatus, GatewayError>;
    fn gateway_name(&self) -> &str;
}
