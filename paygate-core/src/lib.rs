pub mod audit;
pub mod gateway;
pub mod money;
pub mod payment;
pub mod repository;
pub mod settings;

pub use audit::{Actor, AuditAction, AuditLog};
pub use gateway::{
    GatewayAdapter, GatewayError, GatewayEvent, GatewayEventKind, GatewayRegistry, WebhookEvent,
    WebhookVerification,
};
pub use money::{Amount, Currency};
pub use payment::{
    CreatePaymentRequest, Metadata, Payment, PaymentGateway, PaymentMethod, PaymentStatus,
    RefundPaymentRequest,
};
pub use repository::{AuditStore, Page, PaymentStore, StoreError, StoreResult};
pub use settings::PaymentSettings;

/// Error taxonomy surfaced by every public payment operation.
#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),
    #[error("Invalid status: cannot {operation} a payment in status {current}")]
    InvalidStatus {
        operation: &'static str,
        current: PaymentStatus,
    },
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Gateway error: {0}")]
    Gateway(#[from] GatewayError),
    #[error("{0} is disabled")]
    Disabled(String),
    #[error("Not implemented: {0}")]
    NotImplemented(String),
    #[error("Retry limit reached after {attempts} attempts")]
    RetryExceeded { attempts: u32 },
    #[error("Webhook rejected: {0}")]
    WebhookRejected(String),
    #[error("Internal service error: {0}")]
    Internal(String),
}

impl From<StoreError> for PaymentError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => PaymentError::NotFound("payment".to_string()),
            StoreError::StatusConflict { actual, .. } => PaymentError::InvalidStatus {
                operation: "update",
                current: actual,
            },
            other => PaymentError::Internal(other.to_string()),
        }
    }
}

pub type PaymentResult<T> = Result<T, PaymentError>;
