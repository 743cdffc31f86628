use std::sync::Arc;

use paygate_core::{Actor, AuditAction, AuditLog, AuditStore};
use tracing::error;
use uuid::Uuid;

/// Best-effort audit writer. A failed write is logged and never fails the
/// operation being audited.
#[derive(Clone)]
pub struct AuditTrail {
    store: Arc<dyn AuditStore>,
    enabled: bool,
}

impl AuditTrail {
    pub fn new(store: Arc<dyn AuditStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn store(&self) -> &Arc<dyn AuditStore> {
        &self.store
    }

    pub async fn record(
        &self,
        payment_id: Option<Uuid>,
        action: AuditAction,
        actor: &Actor,
        details: impl Into<String>,
    ) {
        if !self.enabled {
            return;
        }
        let entry = AuditLog::new(payment_id, action, actor, details);
        if let Err(e) = self.store.create(&entry).await {
            error!(?payment_id, action = %action, error = %e, "failed to write audit entry");
        }
    }
}
