use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use paygate_core::{
    AuditLog, AuditStore, Metadata, Page, Payment, PaymentGateway, PaymentStatus, PaymentStore,
    StoreError, StoreResult,
};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Thread-safe in-memory payment store for tests and local runs.
///
/// Writes take the map's write lock, so each operation is atomic with respect
/// to the others, like a row-level update.
#[derive(Default, Clone)]
pub struct InMemoryPaymentStore {
    payments: Arc<RwLock<HashMap<Uuid, Payment>>>,
    failing_targets: Arc<RwLock<HashSet<PaymentStatus>>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes every transition into `status` fail with a backend error.
    pub async fn fail_transitions_to(&self, status: PaymentStatus) {
        self.failing_targets.write().await.insert(status);
    }

    pub async fn clear_failures(&self) {
        self.failing_targets.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.payments.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.payments.read().await.is_empty()
    }
}

fn newest_first(payments: &mut [Payment]) {
    payments.sort_by(|a, b| b.created_at.cmp(&a.created_at));
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, payment: &Payment) -> StoreResult<()> {
        let mut payments = self.payments.write().await;
        if payments.contains_key(&payment.id) {
            return Err(StoreError::Duplicate(format!("payment {}", payment.id)));
        }
        payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Payment> {
        let payments = self.payments.read().await;
        payments.get(&id).cloned().ok_or(StoreError::NotFound)
    }

    async fn get_by_order_id(&self, order_id: &str) -> StoreResult<Vec<Payment>> {
        let payments = self.payments.read().await;
        let mut found: Vec<Payment> = payments
            .values()
            .filter(|p| p.order_id == order_id)
            .cloned()
            .collect();
        newest_first(&mut found);
        Ok(found)
    }

    async fn get_by_external_id(
        &self,
        gateway: PaymentGateway,
        external_id: &str,
    ) -> StoreResult<Payment> {
        let payments = self.payments.read().await;
        payments
            .values()
            .find(|p| {
                p.payment_gateway == gateway
                    && p.external_transaction_id.as_deref() == Some(external_id)
            })
            .cloned()
            .ok_or(StoreError::NotFound)
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        failure_reason: Option<&str>,
    ) -> StoreResult<Payment> {
        if self.failing_targets.read().await.contains(&to) {
            return Err(StoreError::Backend(format!("injected failure writing {}", to)));
        }

        let mut payments = self.payments.write().await;
        let payment = payments.get_mut(&id).ok_or(StoreError::NotFound)?;
        if payment.status != from {
            return Err(StoreError::StatusConflict {
                expected: from,
                actual: payment.status,
            });
        }
        payment.status = to;
        payment.failure_reason = failure_reason.map(str::to_string);
        payment.updated_at = Utc::now();
        Ok(payment.clone())
    }

    async fn update_external_transaction_id(&self, id: Uuid, external_id: &str) -> StoreResult<()> {
        let mut payments = self.payments.write().await;
        let gateway = payments.get(&id).ok_or(StoreError::NotFound)?.payment_gateway;
        let taken = payments.values().any(|p| {
            p.id != id
                && p.payment_gateway == gateway
                && p.external_transaction_id.as_deref() == Some(external_id)
        });
        if taken {
            return Err(StoreError::Duplicate(format!(
                "{} transaction {}",
                gateway, external_id
            )));
        }

        if let Some(payment) = payments.get_mut(&id) {
            payment.external_transaction_id = Some(external_id.to_string());
            payment.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn update_metadata(&self, id: Uuid, metadata: &Metadata) -> StoreResult<()> {
        let mut payments = self.payments.write().await;
        let payment = payments.get_mut(&id).ok_or(StoreError::NotFound)?;
        payment.metadata = metadata.clone();
        payment.updated_at = Utc::now();
        Ok(())
    }

    async fn list(
        &self,
        limit: i64,
        offset: i64,
        status: Option<PaymentStatus>,
    ) -> StoreResult<Page> {
        let payments = self.payments.read().await;
        let mut matching: Vec<Payment> = payments
            .values()
            .filter(|p| status.is_none_or(|s| p.status == s))
            .cloned()
            .collect();
        newest_first(&mut matching);

        let total = matching.len() as i64;
        let payments = matching
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect();
        Ok(Page { payments, total })
    }
}

/// Append-only in-memory audit ledger.
#[derive(Default, Clone)]
pub struct InMemoryAuditStore {
    entries: Arc<RwLock<Vec<AuditLog>>>,
}

impl InMemoryAuditStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every entry in insertion order.
    pub async fn entries(&self) -> Vec<AuditLog> {
        self.entries.read().await.clone()
    }
}

#[async_trait]
impl AuditStore for InMemoryAuditStore {
    async fn create(&self, entry: &AuditLog) -> StoreResult<()> {
        self.entries.write().await.push(entry.clone());
        Ok(())
    }

    async fn list_for_payment(&self, payment_id: Uuid, limit: i64) -> StoreResult<Vec<AuditLog>> {
        let entries = self.entries.read().await;
        Ok(entries
            .iter()
            .rev()
            .filter(|e| e.payment_id == Some(payment_id))
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}
