//! Stripe-style card gateway: payment intents over the form-encoded REST API
//! and `Stripe-Signature` webhook verification.

use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use paygate_core::settings::StripeSettings;
use paygate_core::{
    Amount, GatewayAdapter, GatewayError, GatewayEvent, GatewayEventKind, Payment, PaymentGateway,
    WebhookEvent, WebhookVerification,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use sha2::Sha256;
use tracing::{debug, info, warn};

pub const STRIPE_API_BASE: &str = "https://api.stripe.com";
pub const SIGNATURE_HEADER: &str = "stripe-signature";
const SIGNATURE_TOLERANCE_SECS: i64 = 300;

type HmacSha256 = Hmac<Sha256>;

pub struct StripeGateway {
    secret_key: String,
    webhook_secret: Option<String>,
    api_base: String,
    client: Client,
    allow_unverified: bool,
}

#[derive(Debug, Deserialize)]
struct PaymentIntentResponse {
    id: String,
    status: String,
    latest_charge: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    code: Option<String>,
    payment_intent: Option<IntentRef>,
}

#[derive(Debug, Deserialize)]
struct IntentRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct StripeEvent {
    id: Option<String>,
    #[serde(rename = "type")]
    event_type: String,
    data: StripeEventData,
}

#[derive(Debug, Deserialize)]
struct StripeEventData {
    object: serde_json::Value,
}

impl StripeGateway {
    pub fn new(settings: &StripeSettings, allow_unverified: bool) -> Result<Self, GatewayError> {
        if settings.secret_key.is_empty() {
            return Err(GatewayError::Configuration(
                "stripe secret_key is required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            secret_key: settings.secret_key.clone(),
            webhook_secret: settings.webhook_secret.clone().filter(|s| !s.is_empty()),
            api_base: settings
                .api_base
                .clone()
                .unwrap_or_else(|| STRIPE_API_BASE.to_string()),
            client,
            allow_unverified,
        })
    }

    async fn post_form<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(String, String)],
        idempotency_key: &str,
    ) -> Result<T, GatewayError> {
        let response = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .header("Idempotency-Key", idempotency_key)
            .form(params)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        read_response(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, GatewayError> {
        let response = self
            .client
            .get(format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key)
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        read_response(response).await
    }
}

async fn read_response<T: DeserializeOwned>(response: Response) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))?;

    if status.is_success() {
        return serde_json::from_str(&body)
            .map_err(|e| GatewayError::UnexpectedResponse(format!("invalid JSON: {}", e)));
    }

    let parsed = serde_json::from_str::<ErrorEnvelope>(&body).ok();
    let message = parsed
        .as_ref()
        .and_then(|env| env.error.message.clone().or_else(|| env.error.code.clone()))
        .unwrap_or_else(|| format!("HTTP {}", status));

    if status == StatusCode::PAYMENT_REQUIRED {
        return Err(GatewayError::Declined {
            reason: message,
            transaction_id: parsed.and_then(|env| env.error.payment_intent.map(|pi| pi.id)),
        });
    }
    Err(GatewayError::UnexpectedResponse(format!("{}: {}", status, message)))
}

#[async_trait]
impl GatewayAdapter for StripeGateway {
    fn gateway(&self) -> PaymentGateway {
        PaymentGateway::Stripe
    }

    async fn process_payment(&self, payment: &Payment) -> Result<String, GatewayError> {
        let cents = payment
            .amount
            .to_minor_units()
            .map_err(|e| GatewayError::Declined { reason: e.to_string(), transaction_id: None })?;

        let mut params = vec![
            ("amount".to_string(), cents.to_string()),
            ("currency".to_string(), payment.currency.as_str().to_ascii_lowercase()),
            ("metadata[order_id]".to_string(), payment.order_id.clone()),
            ("metadata[payment_id]".to_string(), payment.id.to_string()),
        ];
        if let Some(method) = payment.metadata_str("payment_method_id") {
            params.push(("payment_method".to_string(), method.to_string()));
            params.push(("confirm".to_string(), "true".to_string()));
        }

        let intent: PaymentIntentResponse = self
            .post_form("/v1/payment_intents", &params, &payment.idempotency_key())
            .await?;
        debug!(payment_id = %payment.id, intent_id = %intent.id, status = %intent.status, "Stripe intent created");

        match intent.status.as_str() {
            "succeeded" => Ok(intent.id),
            "requires_payment_method" | "requires_confirmation" | "requires_action" => {
                Err(GatewayError::RequiresAction { transaction_id: intent.id })
            }
            other => Err(GatewayError::Declined {
                reason: format!("payment status: {}", other),
                transaction_id: Some(intent.id),
            }),
        }
    }

    async fn refund_payment(
        &self,
        payment: &Payment,
        transaction_ref: &str,
        amount: Option<Amount>,
    ) -> Result<String, GatewayError> {
        let intent: PaymentIntentResponse = self
            .get(&format!("/v1/payment_intents/{}", transaction_ref))
            .await?;
        let charge = intent.latest_charge.ok_or_else(|| {
            GatewayError::UnexpectedResponse(format!("payment intent {} has no charge", intent.id))
        })?;

        let mut params = vec![
            ("charge".to_string(), charge),
            ("metadata[payment_id]".to_string(), payment.id.to_string()),
        ];
        if let Some(amount) = amount {
            let cents = amount
                .to_minor_units()
                .map_err(|e| GatewayError::Declined { reason: e.to_string(), transaction_id: None })?;
            params.push(("amount".to_string(), cents.to_string()));
        }

        let key = format!("refund-{}", payment.idempotency_key());
        let refund: RefundResponse = self.post_form("/v1/refunds", &params, &key).await?;
        info!(payment_id = %payment.id, refund_id = %refund.id, "Stripe refund created");
        Ok(refund.id)
    }

    async fn verify_webhook(&self, event: &WebhookEvent) -> WebhookVerification {
        let Some(secret) = self.webhook_secret.as_deref() else {
            if self.allow_unverified {
                warn!(event_id = %event.id, "accepting unverified Stripe webhook: no signing secret configured");
                return parse_event(&event.payload);
            }
            return WebhookVerification::Rejected("webhook signing secret not configured".to_string());
        };

        let Some(header) = event
            .signature
            .as_deref()
            .or_else(|| event.header(SIGNATURE_HEADER))
        else {
            return WebhookVerification::Rejected("missing Stripe-Signature header".to_string());
        };

        match verify_signature(secret, header, &event.payload, chrono::Utc::now().timestamp()) {
            Ok(()) => parse_event(&event.payload),
            Err(reason) => WebhookVerification::Rejected(reason),
        }
    }
}

/// Checks a `t=<unix>,v1=<hex>` header against HMAC-SHA256 of `"{t}.{payload}"`.
pub fn verify_signature(secret: &str, header: &str, payload: &str, now: i64) -> Result<(), String> {
    let mut timestamp = None;
    let mut candidates = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => candidates.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or("signature header has no timestamp")?;
    if candidates.is_empty() {
        return Err("signature header has no v1 signature".to_string());
    }
    if (now - timestamp).abs() > SIGNATURE_TOLERANCE_SECS {
        return Err("signature timestamp outside tolerance".to_string());
    }

    let signed = format!("{}.{}", timestamp, payload);
    for candidate in candidates {
        let Ok(expected) = hex::decode(candidate) else {
            continue;
        };
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| "invalid signing secret".to_string())?;
        mac.update(signed.as_bytes());
        // verify_slice compares in constant time
        if mac.verify_slice(&expected).is_ok() {
            return Ok(());
        }
    }
    Err("signature mismatch".to_string())
}

/// Builds a `Stripe-Signature` header value for `payload`.
pub fn signature_header(secret: &str, timestamp: i64, payload: &str) -> String {
    let mut mac = match HmacSha256::new_from_slice(secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return format!("t={}", timestamp),
    };
    mac.update(format!("{}.{}", timestamp, payload).as_bytes());
    format!("t={},v1={}", timestamp, hex::encode(mac.finalize().into_bytes()))
}

fn parse_event(payload: &str) -> WebhookVerification {
    let event: StripeEvent = match serde_json::from_str(payload) {
        Ok(event) => event,
        Err(e) => return WebhookVerification::Rejected(format!("malformed Stripe event: {}", e)),
    };

    let object = &event.data.object;
    let str_field = |key: &str| object.get(key).and_then(|v| v.as_str()).map(str::to_string);

    let (kind, transaction_id) = match event.event_type.as_str() {
        "payment_intent.succeeded" => (GatewayEventKind::PaymentSucceeded, str_field("id")),
        "payment_intent.payment_failed" => {
            let reason = object
                .pointer("/last_payment_error/message")
                .and_then(|v| v.as_str())
                .map(str::to_string);
            (GatewayEventKind::PaymentFailed { reason }, str_field("id"))
        }
        "charge.refunded" => (GatewayEventKind::Refunded, str_field("payment_intent")),
        _ => (GatewayEventKind::Unhandled, str_field("id")),
    };

    WebhookVerification::Verified(GatewayEvent {
        id: event.id,
        event_type: event.event_type,
        kind,
        transaction_id,
    })
}
