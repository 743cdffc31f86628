use async_trait::async_trait;
use serde::Serialize;
use uuid::Uuid;

use crate::audit::AuditLog;
use crate::payment::{Metadata, Payment, PaymentGateway, PaymentStatus};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("record not found")]
    NotFound,
    #[error("status conflict: expected {expected}, found {actual}")]
    StatusConflict {
        expected: PaymentStatus,
        actual: PaymentStatus,
    },
    #[error("duplicate record: {0}")]
    Duplicate(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub payments: Vec<Payment>,
    pub total: i64,
}

/// Durable payment records.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn create(&self, payment: &Payment) -> StoreResult<()>;

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Payment>;

    /// Newest first.
    async fn get_by_order_id(&self, order_id: &str) -> StoreResult<Vec<Payment>>;

    async fn get_by_external_id(
        &self,
        gateway: PaymentGateway,
        external_id: &str,
    ) -> StoreResult<Payment>;

    /// Conditional write: applies only while the stored status still equals `from`.
    /// `failure_reason` replaces the stored reason, so `None` clears it.
    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        failure_reason: Option<&str>,
    ) -> StoreResult<Payment>;

    /// Rejects a (gateway, external id) pair already held by another payment.
    async fn update_external_transaction_id(&self, id: Uuid, external_id: &str)
        -> StoreResult<()>;

    async fn update_metadata(&self, id: Uuid, metadata: &Metadata) -> StoreResult<()>;

    async fn list(
        &self,
        limit: i64,
        offset: i64,
        status: Option<PaymentStatus>,
    ) -> StoreResult<Page>;
}

/// Append-only audit ledger.
#[async_trait]
pub trait AuditStore: Send + Sync {
    async fn create(&self, entry: &AuditLog) -> StoreResult<()>;

    async fn list_for_payment(&self, payment_id: Uuid, limit: i64) -> StoreResult<Vec<AuditLog>>;
}
