use std::sync::Arc;

use paygate_core::{
    Actor, AuditAction, AuditStore, GatewayRegistry, Payment, PaymentError, PaymentResult,
    PaymentSettings, PaymentStatus, PaymentStore,
};
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::audit::AuditTrail;
use crate::locks::{PaymentGuard, PaymentLocks};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessingOutcome {
    /// Another trigger already moved the payment past PENDING.
    Skipped { status: PaymentStatus },
    Succeeded { transaction_id: String },
    Failed { reason: String },
    /// The gateway outcome is known but could not be persisted.
    Inconsistent { gateway_outcome: PaymentStatus },
}

/// Shared state behind every guarded status mutation.
pub struct PaymentProcessor {
    payments: Arc<dyn PaymentStore>,
    audit: AuditTrail,
    gateways: GatewayRegistry,
    locks: PaymentLocks,
    settings: PaymentSettings,
}

impl PaymentProcessor {
    pub fn new(
        payments: Arc<dyn PaymentStore>,
        audit_store: Arc<dyn AuditStore>,
        gateways: GatewayRegistry,
        settings: PaymentSettings,
    ) -> Self {
        Self {
            payments,
            audit: AuditTrail::new(audit_store, settings.enable_audit_log),
            gateways,
            locks: PaymentLocks::new(),
            settings,
        }
    }

    pub fn payments(&self) -> &Arc<dyn PaymentStore> {
        &self.payments
    }

    pub fn audit(&self) -> &AuditTrail {
        &self.audit
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    pub fn settings(&self) -> &PaymentSettings {
        &self.settings
    }

    pub fn locks(&self) -> &PaymentLocks {
        &self.locks
    }

    pub async fn lock(&self, payment_id: Uuid) -> PaymentResult<PaymentGuard> {
        self.locks
            .acquire_timeout(payment_id, self.settings.processing.lock_timeout())
            .await
            .map_err(|e| PaymentError::Internal(e.to_string()))
    }

    /// Conditional status write for a payment the caller holds the lock for.
    pub async fn apply_transition(
        &self,
        guard: &PaymentGuard,
        payment: &Payment,
        to: PaymentStatus,
        failure_reason: Option<&str>,
        operation: &'static str,
    ) -> PaymentResult<Payment> {
        debug_assert_eq!(guard.payment_id(), payment.id);
        if !payment.status.can_transition_to(to) {
            return Err(PaymentError::InvalidStatus {
                operation,
                current: payment.status,
            });
        }
        let updated = self
            .payments
            .transition_status(payment.id, payment.status, to, failure_reason)
            .await?;
        debug!(payment_id = %payment.id, from = %payment.status, to = %to, "status transition");
        Ok(updated)
    }

    /// Runs one processing attempt. Safe to call from any number of triggers:
    /// only the one that finds the payment PENDING reaches the gateway.
    #[instrument(skip(self))]
    pub async fn process_payment(&self, payment_id: Uuid) -> PaymentResult<ProcessingOutcome> {
        let guard = self.lock(payment_id).await?;

        let payment = self.payments.get_by_id(payment_id).await?;
        if payment.status != PaymentStatus::Pending {
            debug!(status = %payment.status, "payment already advanced, skipping");
            return Ok(ProcessingOutcome::Skipped {
                status: payment.status,
            });
        }

        let payment = self
            .apply_transition(&guard, &payment, PaymentStatus::Processing, None, "process")
            .await?;

        let adapter = match self.gateways.resolve(payment.payment_gateway) {
            Ok(adapter) => adapter,
            Err(e) => return Ok(self.fail(&guard, &payment, e.to_string()).await),
        };

        info!(gateway = %payment.payment_gateway, amount = %payment.amount, "dispatching payment to gateway");
        match adapter.process_payment(&payment).await {
            Ok(transaction_id) => Ok(self.complete(&guard, &payment, transaction_id).await),
            Err(err) => {
                if let Some(reference) = err.transaction_id() {
                    self.record_reference(&payment, reference).await;
                }
                Ok(self.fail(&guard, &payment, err.to_string()).await)
            }
        }
    }

    async fn complete(
        &self,
        guard: &PaymentGuard,
        payment: &Payment,
        transaction_id: String,
    ) -> ProcessingOutcome {
        self.record_reference(payment, &transaction_id).await;

        match self
            .apply_transition(guard, payment, PaymentStatus::Succeeded, None, "complete")
            .await
        {
            Ok(_) => {
                info!(payment_id = %payment.id, %transaction_id, "payment succeeded");
                self.audit
                    .record(
                        Some(payment.id),
                        AuditAction::PaymentSucceeded,
                        &Actor::system(),
                        format!("Payment succeeded with transaction {}", transaction_id),
                    )
                    .await;
                ProcessingOutcome::Succeeded { transaction_id }
            }
            Err(e) => {
                error!(
                    payment_id = %payment.id,
                    %transaction_id,
                    error = %e,
                    inconsistency = "critical",
                    "gateway charge succeeded but status could not be saved"
                );
                ProcessingOutcome::Inconsistent {
                    gateway_outcome: PaymentStatus::Succeeded,
                }
            }
        }
    }

    async fn fail(
        &self,
        guard: &PaymentGuard,
        payment: &Payment,
        reason: String,
    ) -> ProcessingOutcome {
        warn!(payment_id = %payment.id, %reason, "payment failed");
        self.audit
            .record(
                Some(payment.id),
                AuditAction::PaymentFailed,
                &Actor::system(),
                format!("Payment failed: {}", reason),
            )
            .await;

        match self
            .apply_transition(guard, payment, PaymentStatus::Failed, Some(&reason), "fail")
            .await
        {
            Ok(_) => ProcessingOutcome::Failed { reason },
            Err(e) => {
                error!(
                    payment_id = %payment.id,
                    error = %e,
                    inconsistency = "critical",
                    "gateway rejected payment but status could not be saved"
                );
                ProcessingOutcome::Inconsistent {
                    gateway_outcome: PaymentStatus::Failed,
                }
            }
        }
    }

    async fn record_reference(&self, payment: &Payment, reference: &str) {
        if let Err(e) = self
            .payments
            .update_external_transaction_id(payment.id, reference)
            .await
        {
            error!(
                payment_id = %payment.id,
                reference,
                error = %e,
                inconsistency = "critical",
                "failed to save gateway transaction reference"
            );
        }
    }
}
