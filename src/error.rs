use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use validator::ValidationErrorsKind;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PaymentError {
    /// Bad or missing form fields; raised before any network call.
    #[error("{0}")]
    Validation(String),

    #[error("Order creation failed: {0}")]
    OrderCreation(String),

    #[error("Could not check payment status: {0}")]
    StatusQuery(String),

    /// The gateway reported a terminal state other than COMPLETED.
    #[error("{0}")]
    PaymentNotCompleted(String),

    #[error("Payment was cancelled")]
    UserCancelled,

    #[error("Payment is still pending after {attempts} status checks")]
    VerificationTimedOut { attempts: u32 },

    /// Ledger or notification failure after settlement. Never surfaced to donors.
    #[error("Reconciliation side effect failed: {0}")]
    ReconciliationSideEffect(String),
}

impl PaymentError {
    /// Text safe to show a donor. Upstream details stay in the logs.
    pub fn donor_message(&self) -> String {
        match self {
            PaymentError::Validation(msg) => msg.clone(),
            PaymentError::OrderCreation(_) => {
                "We could not start the payment. Please try again.".to_string()
            }
            PaymentError::StatusQuery(_) => {
                "We could not confirm the payment status. Please contact us if you were charged."
                    .to_string()
            }
            PaymentError::PaymentNotCompleted(msg) => msg.clone(),
            PaymentError::UserCancelled => "Payment was cancelled.".to_string(),
            PaymentError::VerificationTimedOut { .. } => {
                "The payment is taking longer than expected. We will email you once it settles."
                    .to_string()
            }
            PaymentError::ReconciliationSideEffect(_) => "Internal server error".to_string(),
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = match &self {
            PaymentError::Validation(_) => StatusCode::BAD_REQUEST,
            PaymentError::OrderCreation(_) | PaymentError::StatusQuery(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        }

        let body = Json(json!({
            "error": self.donor_message(),
        }));

        (status, body).into_response()
    }
}

/// Flattens nested struct and list errors so flattened donor fields report too.
fn collect_messages(errors: &validator::ValidationErrors, out: &mut Vec<String>) {
    for (field, kind) in errors.errors() {
        match kind {
            ValidationErrorsKind::Field(errs) => {
                out.extend(errs.iter().map(|e| match &e.message {
                    Some(msg) => msg.to_string(),
                    None => format!("{} is invalid", field),
                }));
            }
            ValidationErrorsKind::Struct(inner) => collect_messages(inner, out),
            ValidationErrorsKind::List(items) => {
                for inner in items.values() {
                    collect_messages(inner, out);
                }
            }
        }
    }
}

impl From<validator::ValidationErrors> for PaymentError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages = Vec::new();
        collect_messages(&errors, &mut messages);
        messages.sort();
        messages.dedup();
        PaymentError::Validation(messages.join(", "))
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;

/// Errors at the HTTP edge that are not part of the payment taxonomy.
#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            AppError::Payment(err) => return err.into_response(),
            AppError::InvalidInput(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Internal(err) => {
                tracing::error!(error = %format!("{:#}", err), "Internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_string(),
                )
            }
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

pub type AppResult<T> = Result<T, AppError>;
