use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::Mutex;

use super::{GatewayError, GatewayOrder, GatewayOrderRequest, OrderState, OrderStatus, PaymentGateway};
use crate::config::GatewayConfig;

/// Refresh the access token this long before the gateway says it expires.
const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

/// Hosted checkout gateway (PhonePe standard checkout, v2 API).
///
/// Each instance carries its own credentials and token cache, so tests can
/// point one at a local fake while production uses the configured endpoints.
pub struct PhonePeGateway {
    config: GatewayConfig,
    client: reqwest::Client,
    token: Mutex<Option<CachedToken>>,
}

#[derive(Debug, Clone)]
struct CachedToken {
    header_value: String,
    expires_at: i64,
}

impl CachedToken {
    fn is_fresh(&self, now: i64) -> bool {
        now + TOKEN_REFRESH_MARGIN_SECS < self.expires_at
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    expires_at: Option<i64>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderBody {
    merchant_order_id: String,
    amount: u64,
    meta_info: MetaInfo,
    payment_flow: PaymentFlow,
}

#[derive(Debug, Serialize)]
struct MetaInfo {
    udf1: String,
    udf2: String,
    udf3: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PaymentFlow {
    #[serde(rename = "type")]
    flow_type: &'static str,
    message: String,
    merchant_urls: MerchantUrls,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct MerchantUrls {
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreateOrderResponse {
    order_id: String,
    state: String,
    redirect_url: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    #[serde(default)]
    order_id: Option<String>,
    state: String,
    amount: u64,
    #[serde(default)]
    payment_details: Vec<PaymentDetail>,
    #[serde(default)]
    error_code: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PaymentDetail {
    #[serde(default)]
    transaction_id: Option<String>,
    #[serde(default)]
    payment_mode: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    code: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl PhonePeGateway {
    pub fn new(config: GatewayConfig) -> Result<Self, GatewayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;

        Ok(Self {
            config,
            client,
            token: Mutex::new(None),
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Status URL with the order id as a single escaped path segment.
    fn status_url(&self, merchant_order_id: &str) -> Result<reqwest::Url, GatewayError> {
        let mut url = reqwest::Url::parse(&self.endpoint("/checkout/v2/order"))
            .map_err(|e| GatewayError::Transport(format!("invalid base url: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| GatewayError::Transport("base url cannot carry a path".to_string()))?
            .push(merchant_order_id)
            .push("status");
        Ok(url)
    }

    async fn authorization(&self) -> Result<String, GatewayError> {
        let mut cached = self.token.lock().await;
        let now = chrono::Utc::now().timestamp();

        if let Some(token) = cached.as_ref() {
            if token.is_fresh(now) {
                return Ok(token.header_value.clone());
            }
        }

        tracing::debug!("Requesting gateway access token");
        let client_version = self.config.client_version.to_string();
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_version", client_version.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("grant_type", "client_credentials"),
        ];

        let response = self
            .client
            .post(&self.config.auth_url)
            .form(&form)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(GatewayError::Auth(format!("status {}: {}", status, text)));
        }

        let token: TokenResponse = response.json().await?;
        let token_type = token.token_type.unwrap_or_else(|| "O-Bearer".to_string());
        let fresh = CachedToken {
            header_value: format!("{} {}", token_type, token.access_token),
            // Without an expiry, reuse the token only for this request.
            expires_at: token.expires_at.unwrap_or(now),
        };
        let header = fresh.header_value.clone();
        *cached = Some(fresh);

        Ok(header)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn rejection(&self, response: reqwest::Response) -> GatewayError {
        let status = response.status();
        if status == reqwest::StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorBody>(&text)
            .ok()
            .and_then(|body| body.message.or(body.code))
            .unwrap_or(text);

        GatewayError::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[async_trait]
impl PaymentGateway for PhonePeGateway {
    async fn create_order(&self, request: GatewayOrderRequest) -> Result<GatewayOrder, GatewayError> {
        tracing::info!(
            merchant_order_id = %request.merchant_order_id,
            amount_minor = request.amount_minor,
            "Creating gateway order"
        );

        let authorization = self.authorization().await?;
        let body = CreateOrderBody {
            merchant_order_id: request.merchant_order_id.clone(),
            amount: request.amount_minor,
            meta_info: MetaInfo {
                udf1: request.payer.full_name.clone(),
                udf2: request.payer.email.clone(),
                udf3: request.payer.phone.clone().unwrap_or_default(),
            },
            payment_flow: PaymentFlow {
                flow_type: "PG_CHECKOUT",
                message: request.message.clone(),
                merchant_urls: MerchantUrls {
                    redirect_url: request.redirect_url.clone(),
                },
            },
        };

        let response = self
            .client
            .post(self.endpoint("/checkout/v2/pay"))
            .header("Authorization", authorization)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.rejection(response).await);
        }

        let created: CreateOrderResponse = response.json().await?;
        Ok(GatewayOrder {
            gateway_order_id: created.order_id,
            checkout_ref: created.redirect_url,
            state: OrderState::parse(&created.state),
        })
    }

    async fn order_status(&self, merchant_order_id: &str) -> Result<OrderStatus, GatewayError> {
        let authorization = self.authorization().await?;

        let response = self
            .client
            .get(self.status_url(merchant_order_id)?)
            .header("Authorization", authorization)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(self.rejection(response).await);
        }

        let status: StatusResponse = response.json().await?;
        let first = status.payment_details.into_iter().next();

        Ok(OrderStatus {
            state: OrderState::parse(&status.state),
            amount_minor: status.amount,
            gateway_order_id: status.order_id,
            transaction_id: first.as_ref().and_then(|d| d.transaction_id.clone()),
            payment_mode: first.and_then(|d| d.payment_mode),
            error_code: status.error_code,
        })
    }

    fn gateway_name(&self) -> &str {
        "phonepe"
    }
}
