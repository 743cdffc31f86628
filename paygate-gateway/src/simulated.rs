//! In-process gateway with scripted outcomes, for local runs and tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use paygate_core::{
    Amount, GatewayAdapter, GatewayError, GatewayEvent, GatewayEventKind, Payment, PaymentGateway,
    WebhookEvent, WebhookVerification,
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

use crate::stripe::{verify_signature, SIGNATURE_HEADER};

#[derive(Debug, Clone, PartialEq)]
pub struct RefundCall {
    pub payment_id: Uuid,
    pub transaction_ref: String,
    pub amount: Option<Amount>,
}

/// Webhook body understood by the simulated gateway. Signed like Stripe.
#[derive(Debug, Deserialize)]
struct SimulatedEvent {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    transaction_id: Option<String>,
    reason: Option<String>,
}

pub struct SimulatedGateway {
    gateway: PaymentGateway,
    charge_result: Mutex<Option<Result<String, GatewayError>>>,
    refund_result: Mutex<Option<Result<String, GatewayError>>>,
    latency: Duration,
    webhook_secret: Option<String>,
    charges: AtomicUsize,
    refunds: Mutex<Vec<RefundCall>>,
}

impl SimulatedGateway {
    /// Succeeds every call with generated references.
    pub fn new(gateway: PaymentGateway) -> Self {
        Self {
            gateway,
            charge_result: Mutex::new(None),
            refund_result: Mutex::new(None),
            latency: Duration::ZERO,
            webhook_secret: None,
            charges: AtomicUsize::new(0),
            refunds: Mutex::new(Vec::new()),
        }
    }

    pub fn succeeding_with(gateway: PaymentGateway, transaction_id: &str) -> Self {
        let sim = Self::new(gateway);
        sim.set_charge_result(Ok(transaction_id.to_string()));
        sim
    }

    pub fn failing_with(gateway: PaymentGateway, error: GatewayError) -> Self {
        let sim = Self::new(gateway);
        sim.set_charge_result(Err(error));
        sim
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn with_webhook_secret(mut self, secret: &str) -> Self {
        self.webhook_secret = Some(secret.to_string());
        self
    }

    pub fn set_charge_result(&self, result: Result<String, GatewayError>) {
        *lock(&self.charge_result) = Some(result);
    }

    pub fn set_refund_result(&self, result: Result<String, GatewayError>) {
        *lock(&self.refund_result) = Some(result);
    }

    pub fn charge_count(&self) -> usize {
        self.charges.load(Ordering::SeqCst)
    }

    pub fn refund_calls(&self) -> Vec<RefundCall> {
        lock(&self.refunds).clone()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[async_trait]
impl GatewayAdapter for SimulatedGateway {
    fn gateway(&self) -> PaymentGateway {
        self.gateway
    }

    async fn process_payment(&self, payment: &Payment) -> Result<String, GatewayError> {
        self.charges.fetch_add(1, Ordering::SeqCst);
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let scripted = lock(&self.charge_result).clone();
        debug!(payment_id = %payment.id, gateway = %self.gateway, "simulated charge");
        scripted.unwrap_or_else(|| Ok(format!("sim_{}", Uuid::new_v4().simple())))
    }

    async fn refund_payment(
        &self,
        payment: &Payment,
        transaction_ref: &str,
        amount: Option<Amount>,
    ) -> Result<String, GatewayError> {
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let scripted = lock(&self.refund_result).clone();
        let result = scripted.unwrap_or_else(|| Ok(format!("re_{}", Uuid::new_v4().simple())));
        if result.is_ok() {
            lock(&self.refunds).push(RefundCall {
                payment_id: payment.id,
                transaction_ref: transaction_ref.to_string(),
                amount,
            });
        }
        result
    }

    async fn verify_webhook(&self, event: &WebhookEvent) -> WebhookVerification {
        let Some(secret) = self.webhook_secret.as_deref() else {
            return WebhookVerification::Rejected("webhook signing secret not configured".to_string());
        };
        let Some(header) = event.signature.as_deref().or_else(|| event.header(SIGNATURE_HEADER)) else {
            return WebhookVerification::Rejected("missing signature".to_string());
        };
        if let Err(reason) = verify_signature(secret, header, &event.payload, chrono::Utc::now().timestamp()) {
            return WebhookVerification::Rejected(reason);
        }

        let parsed: SimulatedEvent = match serde_json::from_str(&event.payload) {
            Ok(parsed) => parsed,
            Err(e) => return WebhookVerification::Rejected(format!("malformed event: {}", e)),
        };
        let kind = match parsed.event_type.as_str() {
            "payment.succeeded" => GatewayEventKind::PaymentSucceeded,
            "payment.failed" => GatewayEventKind::PaymentFailed { reason: parsed.reason },
            "payment.refunded" => GatewayEventKind::Refunded,
            _ => GatewayEventKind::Unhandled,
        };
        WebhookVerification::Verified(GatewayEvent {
            id: parsed.id,
            event_type: parsed.event_type,
            kind,
            transaction_id: parsed.transaction_id,
        })
    }
}
