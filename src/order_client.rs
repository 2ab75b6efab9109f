use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use crate::amount::AmountUnit;
use crate::error::{PaymentError, PaymentResult};
use crate::gateway::{GatewayOrderRequest, OrderStatus, PayerInfo, PaymentGateway};
use crate::money::{convert_major_to_minor, convert_minor_to_major, MajorAmount};
use crate::session::return_url_for;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrder {
    pub merchant_order_id: String,
    pub amount_minor: u64,
    /// Hosted checkout URL, also accepted by the embedded widget as its token URL.
    pub checkout_ref: String,
}

/// Thin wrapper over a [`PaymentGateway`] that speaks in donor amounts and
/// the payment error taxonomy.
#[derive(Clone)]
pub struct OrderClient {
    gateway: Arc<dyn PaymentGateway>,
    unit: AmountUnit,
    subunit_ratio: u64,
    redirect_url: String,
}

impl OrderClient {
    pub fn new(
        gateway: Arc<dyn PaymentGateway>,
        unit: AmountUnit,
        subunit_ratio: u64,
        redirect_url: impl Into<String>,
    ) -> Self {
        Self {
            gateway,
            unit,
            subunit_ratio,
            redirect_url: redirect_url.into(),
        }
    }

    pub fn gateway_name(&self) -> &str {
        self.gateway.gateway_name()
    }

    fn describe(&self, amount: u64) -> String {
        match self.unit {
            AmountUnit::Major => format!("{} (major units)", amount),
            AmountUnit::Minor => format!("{} (minor units)", amount),
        }
    }

    pub fn to_minor(&self, amount: u64) -> PaymentResult<u64> {
        match self.unit {
            AmountUnit::Minor => Ok(amount),
            AmountUnit::Major => convert_major_to_minor(amount, self.subunit_ratio).ok_or_else(|| {
                PaymentError::Validation(format!("{} is too large", amount))
            }),
        }
    }

    /// Creates a gateway order for `amount`, expressed in the configured donor unit.
    pub async fn create_order(&self, amount: u64, payer: PayerInfo) -> PaymentResult<PaymentOrder> {
        if amount == 0 {
            return Err(PaymentError::Validation("Amount must be positive".to_string()));
        }
        let amount_minor = self.to_minor(amount)?;
        let merchant_order_id = new_merchant_order_id();
        let redirect_url = return_url_for(&self.redirect_url, &merchant_order_id)
            .map_err(|e| PaymentError::OrderCreation(format!("invalid redirect url: {}", e)))?;

        let request = GatewayOrderRequest {
            merchant_order_id: merchant_order_id.clone(),
            amount_minor,
            redirect_url,
            message: format!("Donation from {}", payer.full_name),
            payer,
        };

        let order = self.gateway.create_order(request).await.map_err(|e| {
            tracing::error!(
                merchant_order_id = %merchant_order_id,
                error = %e,
                "Gateway order creation failed"
            );
            PaymentError::OrderCreation(format!(
                "could not create order for {}: {}",
                self.describe(amount),
                e
            ))
        })?;

        tracing::info!(
            merchant_order_id = %merchant_order_id,
            gateway_order_id = %order.gateway_order_id,
            "Gateway order created"
        );

        Ok(PaymentOrder {
            merchant_order_id,
            amount_minor,
            checkout_ref: order.checkout_ref,
        })
    }

    pub async fn get_order_status(&self, merchant_order_id: &str) -> PaymentResult<OrderStatus> {
        self.gateway
            .order_status(merchant_order_id)
            .await
            .map_err(|e| PaymentError::StatusQuery(e.to_string()))
    }

    pub fn convert_minor_to_major(&self, amount_minor: u64) -> MajorAmount {
        convert_minor_to_major(amount_minor, self.subunit_ratio)
    }
}

/// True for ids shaped like the ones [`new_merchant_order_id`] issues:
/// 1 to 63 ASCII alphanumerics, `_` or `-`.
pub fn is_valid_merchant_order_id(merchant_order_id: &str) -> bool {
    !merchant_order_id.is_empty()
        && merchant_order_id.len() <= 63
        && merchant_order_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Unique, gateway-safe merchant order id (alphanumerics and `_`, under 64 chars).
pub fn new_merchant_order_id() -> String {
    let suffix = Uuid::new_v4().simple().to_string();
    format!(
        "DON_{}_{}",
        chrono::Utc::now().format("%Y%m%d%H%M%S"),
        &suffix[..12]
    )
}
