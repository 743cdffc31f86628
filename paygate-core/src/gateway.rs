use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use uuid::Uuid;

use crate::money::Amount;
use crate::payment::{Payment, PaymentGateway};
use crate::PaymentError;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("payment declined: {reason}")]
    Declined {
        reason: String,
        transaction_id: Option<String>,
    },
    #[error("payment requires additional authentication")]
    RequiresAction { transaction_id: String },
    #[error("gateway request failed: {0}")]
    Transport(String),
    #[error("unexpected gateway response: {0}")]
    UnexpectedResponse(String),
    #[error("gateway misconfigured: {0}")]
    Configuration(String),
}

impl GatewayError {
    /// Provider reference created before the call failed, if any.
    pub fn transaction_id(&self) -> Option<&str> {
        match self {
            GatewayError::Declined { transaction_id, .. } => transaction_id.as_deref(),
            GatewayError::RequiresAction { transaction_id } => Some(transaction_id),
            _ => None,
        }
    }
}

/// Inbound notification as received, before verification.
#[derive(Debug, Clone)]
pub struct WebhookEvent {
    pub id: String,
    pub gateway: PaymentGateway,
    pub payload: String,
    pub signature: Option<String>,
    /// Lower-cased header names.
    pub headers: BTreeMap<String, String>,
}

impl WebhookEvent {
    pub fn new(gateway: PaymentGateway, payload: impl Into<String>) -> Self {
        Self {
            id: format!("webhook_{}", Uuid::new_v4()),
            gateway,
            payload: payload.into(),
            signature: None,
            headers: BTreeMap::new(),
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }

    pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
        self.headers.insert(name.to_ascii_lowercase(), value.into());
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayEventKind {
    PaymentSucceeded,
    PaymentFailed { reason: Option<String> },
    Refunded,
    Unhandled,
}

/// A verified event reduced to what reconciliation needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GatewayEvent {
    pub id: Option<String>,
    pub event_type: String,
    pub kind: GatewayEventKind,
    pub transaction_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookVerification {
    Verified(GatewayEvent),
    Rejected(String),
}

/// Capability every payment provider implements.
#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn gateway(&self) -> PaymentGateway;

    /// Charges the payment and returns the provider transaction id.
    async fn process_payment(&self, payment: &Payment) -> Result<String, GatewayError>;

    /// Refunds against `transaction_ref`; `None` refunds the full amount. Returns the refund id.
    async fn refund_payment(
        &self,
        payment: &Payment,
        transaction_ref: &str,
        amount: Option<Amount>,
    ) -> Result<String, GatewayError>;

    async fn verify_webhook(&self, event: &WebhookEvent) -> WebhookVerification;
}

/// Single dispatch point from a gateway identifier to its adapter.
#[derive(Clone, Default)]
pub struct GatewayRegistry {
    adapters: HashMap<PaymentGateway, Arc<dyn GatewayAdapter>>,
}

impl GatewayRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, adapter: Arc<dyn GatewayAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn register(&mut self, adapter: Arc<dyn GatewayAdapter>) {
        self.adapters.insert(adapter.gateway(), adapter);
    }

    pub fn contains(&self, gateway: PaymentGateway) -> bool {
        self.adapters.contains_key(&gateway)
    }

    pub fn resolve(
        &self,
        gateway: PaymentGateway,
    ) -> Result<Arc<dyn GatewayAdapter>, PaymentError> {
        self.adapters
            .get(&gateway)
            .cloned()
            .ok_or_else(|| PaymentError::Disabled(format!("{} gateway", gateway)))
    }
}

impl std::fmt::Debug for GatewayRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayRegistry")
            .field("gateways", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
