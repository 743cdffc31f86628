use std::sync::Arc;

use paygate_core::payment::{
    META_REFUND_AMOUNT, META_REFUND_ID, META_REFUND_REASON, META_RETRY_ATTEMPTS,
};
use paygate_core::{
    Actor, Amount, AuditAction, AuditLog, CreatePaymentRequest, Page, Payment, PaymentError,
    PaymentResult, PaymentStatus, RefundPaymentRequest,
};
use serde_json::json;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::processor::PaymentProcessor;
use crate::queue::{spawn_worker, ProcessingJob, ProcessingQueue, ProcessingWorker};

const MAX_PAGE_SIZE: i64 = 100;

/// Public payment operations. Every mutation goes through the processor's
/// per-payment lock.
#[derive(Clone)]
pub struct PaymentOrchestrator {
    processor: Arc<PaymentProcessor>,
    queue: ProcessingQueue,
}

impl PaymentOrchestrator {
    /// Starts the processing worker alongside the orchestrator.
    pub fn start(processor: Arc<PaymentProcessor>) -> (Self, ProcessingWorker) {
        let (queue, worker) = spawn_worker(processor.clone());
        (Self { processor, queue }, worker)
    }

    pub fn processor(&self) -> &Arc<PaymentProcessor> {
        &self.processor
    }

    /// Persists a PENDING payment and schedules processing without waiting for
    /// the gateway.
    #[instrument(
        skip(self, request, actor),
        fields(order_id = %request.order_id, gateway = %request.payment_gateway)
    )]
    pub async fn create_payment(
        &self,
        request: CreatePaymentRequest,
        actor: &Actor,
    ) -> PaymentResult<Payment> {
        let amount = Amount::parse(&request.amount)?;

        let gateway = request.payment_gateway;
        if !self.processor.settings().gateway_enabled(gateway)
            || !self.processor.gateways().contains(gateway)
        {
            return Err(PaymentError::Disabled(format!("{} gateway", gateway)));
        }

        let payment = Payment::new(
            request.order_id,
            amount,
            request.currency,
            request.payment_method,
            gateway,
            request.metadata,
        );

        // Persist and hand off in a task of its own so a dropped caller cannot
        // leave a stored payment that was never scheduled.
        let processor = self.processor.clone();
        let queue = self.queue.clone();
        let actor = actor.clone();
        tokio::spawn(async move {
            processor.payments().create(&payment).await?;
            processor
                .audit()
                .record(
                    Some(payment.id),
                    AuditAction::PaymentCreated,
                    &actor,
                    format!(
                        "Payment created for order {} ({} {})",
                        payment.order_id, payment.amount, payment.currency
                    ),
                )
                .await;
            queue.submit(ProcessingJob::now(payment.id))?;
            info!(payment_id = %payment.id, "payment created");
            Ok::<_, PaymentError>(payment)
        })
        .await
        .map_err(|e| PaymentError::Internal(format!("payment creation task failed: {}", e)))?
    }

    pub async fn get_payment(&self, payment_id: Uuid) -> PaymentResult<Payment> {
        Ok(self.processor.payments().get_by_id(payment_id).await?)
    }

    pub async fn get_payments_by_order(&self, order_id: &str) -> PaymentResult<Vec<Payment>> {
        Ok(self.processor.payments().get_by_order_id(order_id).await?)
    }

    pub async fn list_payments(
        &self,
        limit: i64,
        offset: i64,
        status: Option<PaymentStatus>,
    ) -> PaymentResult<Page> {
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = offset.max(0);
        Ok(self.processor.payments().list(limit, offset, status).await?)
    }

    pub async fn audit_trail(&self, payment_id: Uuid, limit: i64) -> PaymentResult<Vec<AuditLog>> {
        self.get_payment(payment_id).await?;
        Ok(self
            .processor
            .audit()
            .store()
            .list_for_payment(payment_id, limit.clamp(1, MAX_PAGE_SIZE))
            .await?)
    }

    /// Moves a FAILED payment back to PENDING and schedules another attempt
    /// after the configured backoff.
    #[instrument(skip(self, actor))]
    pub async fn retry_payment(&self, payment_id: Uuid, actor: &Actor) -> PaymentResult<Payment> {
        let guard = self.processor.lock(payment_id).await?;
        let payment = self.processor.payments().get_by_id(payment_id).await?;
        if payment.status != PaymentStatus::Failed {
            return Err(PaymentError::InvalidStatus {
                operation: "retry",
                current: payment.status,
            });
        }

        let policy = &self.processor.settings().retry;
        let attempts = payment.retry_attempts();
        if attempts >= policy.max_attempts {
            return Err(PaymentError::RetryExceeded { attempts });
        }

        let attempt = attempts + 1;
        let mut metadata = payment.metadata.clone();
        metadata.insert(META_RETRY_ATTEMPTS.to_string(), json!(attempt));
        self.processor
            .payments()
            .update_metadata(payment_id, &metadata)
            .await?;
        let mut updated = match self
            .processor
            .apply_transition(&guard, &payment, PaymentStatus::Pending, None, "retry")
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                if let Err(restore) = self
                    .processor
                    .payments()
                    .update_metadata(payment_id, &payment.metadata)
                    .await
                {
                    warn!(error = %restore, "could not restore retry counter after failed retry");
                }
                return Err(e);
            }
        };
        updated.metadata = metadata;
        drop(guard);

        let delay = policy.backoff_for(attempt);
        self.queue.submit(ProcessingJob::delayed(payment_id, delay))?;
        self.processor
            .audit()
            .record(
                Some(payment_id),
                AuditAction::PaymentProcessed,
                actor,
                format!(
                    "Payment retry {} of {} scheduled in {}ms",
                    attempt,
                    policy.max_attempts,
                    delay.as_millis()
                ),
            )
            .await;
        info!(attempt, delay_ms = delay.as_millis() as u64, "payment retry scheduled");
        Ok(updated)
    }

    /// Refunds a SUCCEEDED payment in full, or partially when an amount is given.
    #[instrument(skip(self, request, actor))]
    pub async fn refund_payment(
        &self,
        payment_id: Uuid,
        request: RefundPaymentRequest,
        actor: &Actor,
    ) -> PaymentResult<Payment> {
        if !self.processor.settings().enable_refunds {
            return Err(PaymentError::Disabled("refunds".to_string()));
        }
        let partial = request.amount.as_deref().map(Amount::parse).transpose()?;

        let guard = self.processor.lock(payment_id).await?;
        let payment = self.processor.payments().get_by_id(payment_id).await?;
        if payment.status != PaymentStatus::Succeeded {
            return Err(PaymentError::InvalidStatus {
                operation: "refund",
                current: payment.status,
            });
        }
        if let Some(amount) = partial {
            if amount > payment.amount {
                return Err(PaymentError::InvalidAmount(format!(
                    "refund of {} exceeds payment amount {}",
                    amount, payment.amount
                )));
            }
        }
        let reference = payment
            .external_transaction_id
            .clone()
            .filter(|r| !r.is_empty())
            .ok_or_else(|| PaymentError::NotFound("gateway transaction reference".to_string()))?;

        let adapter = self.processor.gateways().resolve(payment.payment_gateway)?;
        let refund_id = adapter.refund_payment(&payment, &reference, partial).await?;
        let refunded_amount = partial.unwrap_or(payment.amount);
        info!(%refund_id, amount = %refunded_amount, "gateway refund accepted");

        let mut metadata = payment.metadata.clone();
        metadata.insert(META_REFUND_ID.to_string(), json!(refund_id));
        metadata.insert(META_REFUND_AMOUNT.to_string(), json!(refunded_amount.to_string()));
        if let Some(reason) = &request.reason {
            metadata.insert(META_REFUND_REASON.to_string(), json!(reason));
        }
        if let Err(e) = self
            .processor
            .payments()
            .update_metadata(payment_id, &metadata)
            .await
        {
            error!(%refund_id, error = %e, inconsistency = "critical", "refund issued but metadata could not be saved");
        }

        let mut updated = match self
            .processor
            .apply_transition(&guard, &payment, PaymentStatus::Refunded, None, "refund")
            .await
        {
            Ok(updated) => updated,
            Err(e) => {
                error!(%refund_id, error = %e, inconsistency = "critical", "refund issued but status could not be saved");
                return Err(e);
            }
        };
        updated.metadata = metadata;

        self.processor
            .audit()
            .record(
                Some(payment_id),
                AuditAction::PaymentRefunded,
                actor,
                format!("Payment refunded: {} ({})", refund_id, refunded_amount),
            )
            .await;
        Ok(updated)
    }

    /// Capture has no gateway flow yet; the payment is still resolved so an
    /// unknown id reports NotFound.
    pub async fn capture_payment(
        &self,
        payment_id: Uuid,
        _actor: &Actor,
    ) -> PaymentResult<Payment> {
        let _guard = self.processor.lock(payment_id).await?;
        self.processor.payments().get_by_id(payment_id).await?;
        Err(PaymentError::NotImplemented("payment capture".to_string()))
    }
}
