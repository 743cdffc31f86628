use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use paygate_core::PaymentError;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Payment(#[from] PaymentError),
}

impl AppError {
    fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::Payment(err) => match err {
                PaymentError::InvalidAmount(_) => StatusCode::BAD_REQUEST,
                PaymentError::InvalidStatus { .. } => StatusCode::CONFLICT,
                PaymentError::NotFound(_) => StatusCode::NOT_FOUND,
                PaymentError::Gateway(_) => StatusCode::BAD_GATEWAY,
                PaymentError::Disabled(_) => StatusCode::FORBIDDEN,
                PaymentError::NotImplemented(_) => StatusCode::NOT_IMPLEMENTED,
                PaymentError::RetryExceeded { .. } => StatusCode::CONFLICT,
                PaymentError::WebhookRejected(_) => StatusCode::BAD_REQUEST,
                PaymentError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let error_message = match &self {
            AppError::Payment(PaymentError::Internal(_)) => {
                tracing::error!("Internal Server Error: {}", self);
                "Internal Server Error".to_string()
            }
            AppError::Payment(PaymentError::Gateway(_)) => {
                tracing::warn!("Gateway error: {}", self);
                "Payment gateway error".to_string()
            }
            AppError::Payment(PaymentError::WebhookRejected(_)) => {
                tracing::warn!("Webhook rejected: {}", self);
                "Webhook rejected".to_string()
            }
            _ => self.to_string(),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}
