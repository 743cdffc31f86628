use std::sync::Arc;

use paygate_core::{
    Actor, AuditAction, GatewayEventKind, PaymentError, PaymentResult, PaymentStatus, StoreError,
    WebhookEvent, WebhookVerification,
};
use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::processor::PaymentProcessor;

const DEFAULT_FAILURE_REASON: &str = "Payment failed from webhook";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum WebhookOutcome {
    Applied { payment_id: Uuid, status: PaymentStatus },
    AlreadyApplied { payment_id: Uuid, status: PaymentStatus },
    /// No stored payment carries the referenced transaction.
    Unmatched { transaction_id: String },
    /// Event type with no bearing on payment status.
    Ignored { event_type: String },
}

/// Applies verified gateway notifications through the same guarded
/// transition path as synchronous processing.
#[derive(Clone)]
pub struct WebhookReconciler {
    processor: Arc<PaymentProcessor>,
}

impl WebhookReconciler {
    pub fn new(processor: Arc<PaymentProcessor>) -> Self {
        Self { processor }
    }

    #[instrument(skip(self, event), fields(event_id = %event.id, gateway = %event.gateway))]
    pub async fn process_webhook(&self, event: WebhookEvent) -> PaymentResult<WebhookOutcome> {
        if !self.processor.settings().enable_webhooks {
            return Err(PaymentError::Disabled("webhooks".to_string()));
        }
        let adapter = self.processor.gateways().resolve(event.gateway)?;
        let audit = self.processor.audit();
        let system = Actor::system();
        audit
            .record(
                None,
                AuditAction::WebhookReceived,
                &system,
                format!("{} webhook {} received", event.gateway, event.id),
            )
            .await;

        let verified = match adapter.verify_webhook(&event).await {
            WebhookVerification::Verified(verified) => verified,
            WebhookVerification::Rejected(reason) => {
                warn!(%reason, "webhook rejected");
                audit
                    .record(
                        None,
                        AuditAction::WebhookFailed,
                        &system,
                        format!("{} webhook {} rejected: {}", event.gateway, event.id, reason),
                    )
                    .await;
                return Err(PaymentError::WebhookRejected(reason));
            }
        };
        audit
            .record(
                None,
                AuditAction::WebhookVerified,
                &system,
                format!(
                    "{} webhook {} verified ({})",
                    event.gateway,
                    verified.id.as_deref().unwrap_or(&event.id),
                    verified.event_type
                ),
            )
            .await;

        let (target, failure_reason) = match verified.kind {
            GatewayEventKind::PaymentSucceeded => (PaymentStatus::Succeeded, None),
            GatewayEventKind::PaymentFailed { reason } => (
                PaymentStatus::Failed,
                Some(reason.unwrap_or_else(|| DEFAULT_FAILURE_REASON.to_string())),
            ),
            GatewayEventKind::Refunded => (PaymentStatus::Refunded, None),
            GatewayEventKind::Unhandled => {
                debug!(event_type = %verified.event_type, "ignoring unhandled webhook event");
                return Ok(WebhookOutcome::Ignored {
                    event_type: verified.event_type,
                });
            }
        };

        let Some(transaction_id) = verified.transaction_id.filter(|t| !t.is_empty()) else {
            return Err(PaymentError::WebhookRejected(format!(
                "{} event carries no transaction reference",
                verified.event_type
            )));
        };

        let payment = match self
            .processor
            .payments()
            .get_by_external_id(event.gateway, &transaction_id)
            .await
        {
            Ok(payment) => payment,
            Err(StoreError::NotFound) => {
                warn!(%transaction_id, "webhook references no known payment");
                return Ok(WebhookOutcome::Unmatched { transaction_id });
            }
            Err(e) => return Err(e.into()),
        };

        self.apply(payment.id, target, failure_reason.as_deref()).await
    }

    async fn apply(
        &self,
        payment_id: Uuid,
        target: PaymentStatus,
        failure_reason: Option<&str>,
    ) -> PaymentResult<WebhookOutcome> {
        let guard = self.processor.lock(payment_id).await?;
        let current = self.processor.payments().get_by_id(payment_id).await?;
        if current.status == target {
            debug!(%payment_id, status = %target, "webhook status already applied");
            return Ok(WebhookOutcome::AlreadyApplied {
                payment_id,
                status: target,
            });
        }

        self.processor
            .apply_transition(&guard, &current, target, failure_reason, "reconcile")
            .await?;
        drop(guard);

        info!(%payment_id, from = %current.status, to = %target, "payment reconciled from webhook");
        self.processor
            .audit()
            .record(
                Some(payment_id),
                AuditAction::PaymentProcessed,
                &Actor::system(),
                format!("Payment status updated via webhook: {}", target),
            )
            .await;
        Ok(WebhookOutcome::Applied {
            payment_id,
            status: target,
        })
    }
}
