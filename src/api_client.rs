//! The donor page's view of our own backend.

use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;

use crate::donation::DonationIntent;
use crate::error::{PaymentError, PaymentResult};
use crate::order_client::PaymentOrder;
use crate::reconcile::{VerifyRequest, VerifyResponse};
use crate::service::DonationService;

pub const CREATE_ORDER_PATH: &str = "/api/payments/create-order";
pub const VERIFY_PATH: &str = "/api/payments/verify";

#[async_trait]
pub trait DonationApi: Send + Sync {
    async fn create_order(&self, intent: &DonationIntent) -> PaymentResult<PaymentOrder>;
    async fn verify(&self, request: &VerifyRequest) -> PaymentResult<VerifyResponse>;
}

#[derive(Deserialize)]
struct ErrorBody {
    error: String,
}

/// Talks to the donation backend over HTTP.
#[derive(Clone)]
pub struct HttpDonationApi {
    base_url: String,
    client: Client,
}

impl HttpDonationApi {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> PaymentResult<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| PaymentError::OrderCreation(e.to_string()))?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Reads a JSON body, or the `{error}` message of a non-2xx response.
async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, (u16, String)> {
    let status = response.status();
    if status.is_success() {
        return response
            .json::<T>()
            .await
            .map_err(|e| (status.as_u16(), format!("invalid response: {}", e)));
    }

    let text = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<ErrorBody>(&text)
        .map(|body| body.error)
        .unwrap_or(text);
    Err((status.as_u16(), message))
}

#[async_trait]
impl DonationApi for HttpDonationApi {
    async fn create_order(&self, intent: &DonationIntent) -> PaymentResult<PaymentOrder> {
        let response = self
            .client
            .post(self.url(CREATE_ORDER_PATH))
            .json(intent)
            .send()
            .await
            .map_err(|e| PaymentError::OrderCreation(e.to_string()))?;

        read_json(response).await.map_err(|(status, message)| {
            if (400..500).contains(&status) {
                PaymentError::Validation(message)
            } else {
                PaymentError::OrderCreation(message)
            }
        })
    }

    async fn verify(&self, request: &VerifyRequest) -> PaymentResult<VerifyResponse> {
        let response = self
            .client
            .post(self.url(VERIFY_PATH))
            .json(request)
            .send()
            .await
            .map_err(|e| PaymentError::StatusQuery(e.to_string()))?;

        read_json(response)
            .await
            .map_err(|(_, message)| PaymentError::StatusQuery(message))
    }
}

/// Calls the service in-process, for deployments that embed the flow next to
/// the backend.
#[derive(Clone)]
pub struct LocalDonationApi {
    service: Arc<DonationService>,
}

impl LocalDonationApi {
    pub fn new(service: Arc<DonationService>) -> Self {
        Self { service }
    }
}

#[async_trait]
impl DonationApi for LocalDonationApi {
    async fn create_order(&self, intent: &DonationIntent) -> PaymentResult<PaymentOrder> {
        self.service.create_order(intent).await
    }

    async fn verify(&self, request: &VerifyRequest) -> PaymentResult<VerifyResponse> {
        self.service.verify(request).await
    }
}
