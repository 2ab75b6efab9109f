use axum::{
    extract::{rejection::JsonRejection, State},
    response::Json,
};
use serde_json::{json, Value};

use crate::app::AppState;
use crate::donation::{DonationForm, DonationIntent, VolunteerApplication};
use crate::error::{AppError, AppResult};
use crate::order_client::PaymentOrder;
use crate::reconcile::{VerifyRequest, VerifyResponse};

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| AppError::InvalidInput(rejection.body_text()))
}

pub async fn health_check(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": "healthy",
        "gateway": state.service.gateway_name(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

pub async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<DonationIntent>, JsonRejection>,
) -> AppResult<Json<PaymentOrder>> {
    let intent = body(payload)?;
    let order = state.service.create_order(&intent).await?;
    Ok(Json(order))
}

pub async fn verify_payment(
    State(state): State<AppState>,
    payload: Result<Json<VerifyRequest>, JsonRejection>,
) -> AppResult<Json<VerifyResponse>> {
    let request = body(payload)?;
    let response = state.service.verify(&request).await?;
    Ok(Json(response))
}

pub async fn record_donation(
    State(state): State<AppState>,
    payload: Result<Json<DonationForm>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let form = body(payload)?;
    let message = state.service.record_intent(&form).await?;
    Ok(Json(json!({
        "success": true,
        "message": message
    })))
}

pub async fn record_volunteer(
    State(state): State<AppState>,
    payload: Result<Json<VolunteerApplication>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let application = body(payload)?;
    let message = state.service.record_volunteer(&application).await?;
    Ok(Json(json!({
        "success": true,
        "message": message
    })))
}
