#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use paygate_core::{
    Actor, Amount, CreatePaymentRequest, Currency, GatewayRegistry, Metadata, Payment,
    PaymentGateway, PaymentMethod, PaymentSettings, PaymentStatus, PaymentStore, WebhookEvent,
};
use paygate_engine::{PaymentOrchestrator, PaymentProcessor, ProcessingWorker, WebhookReconciler};
use paygate_gateway::stripe::{signature_header, SIGNATURE_HEADER};
use paygate_gateway::SimulatedGateway;
use paygate_store::{InMemoryAuditStore, InMemoryPaymentStore};
use uuid::Uuid;

pub const WEBHOOK_SECRET: &str = "whsec_test";

pub struct Harness {
    pub orchestrator: PaymentOrchestrator,
    pub reconciler: WebhookReconciler,
    pub processor: Arc<PaymentProcessor>,
    pub payments: InMemoryPaymentStore,
    pub audit: InMemoryAuditStore,
    pub stripe: Arc<SimulatedGateway>,
    pub paypal: Arc<SimulatedGateway>,
    pub worker: ProcessingWorker,
}

pub fn test_settings() -> PaymentSettings {
    let mut settings = PaymentSettings::default();
    settings.retry.backoff_ms = 10;
    settings.processing.lock_timeout_secs = 5;
    settings
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(test_settings())
    }

    pub fn with_settings(settings: PaymentSettings) -> Self {
        Self::build(
            settings,
            SimulatedGateway::new(PaymentGateway::Stripe),
            SimulatedGateway::new(PaymentGateway::Paypal),
        )
    }

    pub fn build(
        settings: PaymentSettings,
        stripe: SimulatedGateway,
        paypal: SimulatedGateway,
    ) -> Self {
        let stripe = Arc::new(stripe.with_webhook_secret(WEBHOOK_SECRET));
        let paypal = Arc::new(paypal.with_webhook_secret(WEBHOOK_SECRET));
        let registry = GatewayRegistry::new().with(stripe.clone()).with(paypal.clone());

        let payments = InMemoryPaymentStore::new();
        let audit = InMemoryAuditStore::new();
        let processor = Arc::new(PaymentProcessor::new(
            Arc::new(payments.clone()),
            Arc::new(audit.clone()),
            registry,
            settings,
        ));
        let (orchestrator, worker) = PaymentOrchestrator::start(processor.clone());
        let reconciler = WebhookReconciler::new(processor.clone());

        Self {
            orchestrator,
            reconciler,
            processor,
            payments,
            audit,
            stripe,
            paypal,
            worker,
        }
    }

    /// Stores a payment directly, bypassing the processing queue.
    pub async fn seed(
        &self,
        gateway: PaymentGateway,
        status: PaymentStatus,
        external_id: Option<&str>,
    ) -> Payment {
        let mut payment = Payment::new(
            format!("ORD-{}", Uuid::new_v4().simple()),
            Amount::parse("50.00").unwrap(),
            Currency::Usd,
            PaymentMethod::Card,
            gateway,
            Metadata::new(),
        );
        payment.status = status;
        payment.external_transaction_id = external_id.map(str::to_string);
        self.payments.create(&payment).await.unwrap();
        payment
    }

    /// Polls until the payment reaches `status`.
    pub async fn wait_for_status(&self, id: Uuid, status: PaymentStatus) -> Payment {
        let poll = async {
            loop {
                let payment = self.payments.get_by_id(id).await.unwrap();
                if payment.status == status {
                    return payment;
                }
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(Duration::from_secs(5), poll)
            .await
            .unwrap_or_else(|_| panic!("payment {} never reached {}", id, status))
    }
}

pub fn create_request(
    order_id: &str,
    amount: &str,
    gateway: PaymentGateway,
) -> CreatePaymentRequest {
    CreatePaymentRequest {
        order_id: order_id.to_string(),
        amount: amount.to_string(),
        currency: Currency::Usd,
        payment_method: PaymentMethod::Card,
        payment_gateway: gateway,
        metadata: Metadata::new(),
    }
}

pub fn operator() -> Actor {
    Actor::user("ops-1", "admin")
}

pub fn signed_webhook(gateway: PaymentGateway, payload: &str) -> WebhookEvent {
    let header = signature_header(WEBHOOK_SECRET, chrono::Utc::now().timestamp(), payload);
    WebhookEvent::new(gateway, payload).with_header(SIGNATURE_HEADER, header)
}

pub fn event_payload(event_type: &str, transaction_id: Option<&str>) -> String {
    serde_json::json!({
        "id": format!("evt_{}", Uuid::new_v4().simple()),
        "type": event_type,
        "transaction_id": transaction_id,
    })
    .to_string()
}
