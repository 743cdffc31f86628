//! PayPal-style order gateway with OAuth2 client-credentials tokens.

use std::time::Duration;

use async_trait::async_trait;
use paygate_core::settings::{GatewayMode, PayPalSettings};
use paygate_core::{
    Amount, GatewayAdapter, GatewayError, GatewayEvent, GatewayEventKind, Payment, PaymentGateway,
    WebhookEvent, WebhookVerification,
};
use reqwest::{Client, Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, error, info, warn};

use crate::token::{AccessTokenCache, IssuedToken};

pub const PAYPAL_SANDBOX_BASE: &str = "https://api.sandbox.paypal.com";
pub const PAYPAL_LIVE_BASE: &str = "https://api.paypal.com";

const TRANSMISSION_HEADERS: [&str; 5] = [
    "paypal-transmission-id",
    "paypal-transmission-time",
    "paypal-cert-url",
    "paypal-auth-algo",
    "paypal-transmission-sig",
];

pub struct PayPalGateway {
    client_id: String,
    client_secret: String,
    webhook_id: Option<String>,
    api_base: String,
    client: Client,
    tokens: AccessTokenCache,
    allow_unverified: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct OrderResponse {
    id: String,
    status: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RefundResponse {
    id: String,
}

#[derive(Debug, Deserialize)]
struct VerifySignatureResponse {
    verification_status: String,
}

impl PayPalGateway {
    pub fn new(settings: &PayPalSettings, allow_unverified: bool) -> Result<Self, GatewayError> {
        if settings.client_id.is_empty() || settings.client_secret.is_empty() {
            return Err(GatewayError::Configuration(
                "paypal client_id and client_secret are required".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(settings.timeout_secs))
            .build()
            .map_err(|e| GatewayError::Configuration(format!("failed to build HTTP client: {}", e)))?;

        let api_base = settings.api_base.clone().unwrap_or_else(|| {
            match settings.mode {
                GatewayMode::Sandbox => PAYPAL_SANDBOX_BASE,
                GatewayMode::Live => PAYPAL_LIVE_BASE,
            }
            .to_string()
        });

        Ok(Self {
            client_id: settings.client_id.clone(),
            client_secret: settings.client_secret.clone(),
            webhook_id: settings.webhook_id.clone().filter(|s| !s.is_empty()),
            api_base,
            client,
            tokens: AccessTokenCache::default(),
            allow_unverified,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    async fn access_token(&self) -> Result<String, GatewayError> {
        self.tokens.get_or_refresh(|| self.fetch_token()).await
    }

    async fn fetch_token(&self) -> Result<IssuedToken, GatewayError> {
        let response = self
            .client
            .post(format!("{}/v1/oauth2/token", self.api_base))
            .basic_auth(&self.client_id, Some(&self.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;

        let token: TokenResponse = read_json(response, &[StatusCode::OK]).await?;
        Ok(IssuedToken {
            access_token: token.access_token,
            expires_in: Duration::from_secs(token.expires_in),
        })
    }

    async fn post_json<T: DeserializeOwned>(
        &self,
        path: &str,
        body: &serde_json::Value,
        request_id: Option<&str>,
        accept: &[StatusCode],
    ) -> Result<T, GatewayError> {
        let token = self.access_token().await?;
        let mut request = self
            .client
            .post(format!("{}{}", self.api_base, path))
            .bearer_auth(token)
            .json(body);
        if let Some(id) = request_id {
            request = request.header("PayPal-Request-Id", id);
        }

        let response = request
            .send()
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        if response.status() == StatusCode::UNAUTHORIZED {
            self.tokens.invalidate().await;
        }
        read_json(response, accept).await
    }

    async fn verify_remote(
        &self,
        event: &WebhookEvent,
        webhook_id: &str,
    ) -> Result<bool, GatewayError> {
        let mut headers = Vec::with_capacity(TRANSMISSION_HEADERS.len());
        for name in TRANSMISSION_HEADERS {
            match event.header(name) {
                Some(value) => headers.push(value.to_string()),
                None => return Ok(false),
            }
        }
        let webhook_event: serde_json::Value = serde_json::from_str(&event.payload)
            .map_err(|e| GatewayError::UnexpectedResponse(format!("malformed webhook body: {}", e)))?;

        let body = json!({
            "transmission_id": headers[0],
            "transmission_time": headers[1],
            "cert_url": headers[2],
            "auth_algo": headers[3],
            "transmission_sig": headers[4],
            "webhook_id": webhook_id,
            "webhook_event": webhook_event,
        });

        let result: VerifySignatureResponse = self
            .post_json("/v1/notifications/verify-webhook-signature", &body, None, &[StatusCode::OK])
            .await?;
        Ok(result.verification_status == "SUCCESS")
    }
}

async fn read_json<T: DeserializeOwned>(
    response: Response,
    accept: &[StatusCode],
) -> Result<T, GatewayError> {
    let status = response.status();
    let body = response
        .text()
        .await
        .map_err(|e| GatewayError::Transport(e.to_string()))?;

    if accept.contains(&status) {
        return serde_json::from_str(&body)
            .map_err(|e| GatewayError::UnexpectedResponse(format!("invalid JSON: {}", e)));
    }

    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            v.get("message")
                .or_else(|| v.get("error_description"))
                .and_then(|m| m.as_str())
                .map(str::to_string)
        })
        .unwrap_or(body);

    if status == StatusCode::UNPROCESSABLE_ENTITY {
        return Err(GatewayError::Declined { reason: message, transaction_id: None });
    }
    Err(GatewayError::UnexpectedResponse(format!("{}: {}", status, message)))
}

#[async_trait]
impl GatewayAdapter for PayPalGateway {
    fn gateway(&self) -> PaymentGateway {
        PaymentGateway::Paypal
    }

    async fn process_payment(&self, payment: &Payment) -> Result<String, GatewayError> {
        let body = json!({
            "intent": "CAPTURE",
            "purchase_units": [{
                "reference_id": payment.order_id,
                "custom_id": payment.id.to_string(),
                "amount": {
                    "currency_code": payment.currency.as_str(),
                    "value": payment.amount.to_fixed_2(),
                },
            }],
        });

        let order: OrderResponse = self
            .post_json(
                "/v2/checkout/orders",
                &body,
                Some(&payment.idempotency_key()),
                &[StatusCode::CREATED],
            )
            .await?;
        debug!(payment_id = %payment.id, order_id = %order.id, status = ?order.status, "PayPal order created");
        Ok(order.id)
    }

    async fn refund_payment(
        &self,
        payment: &Payment,
        transaction_ref: &str,
        amount: Option<Amount>,
    ) -> Result<String, GatewayError> {
        if transaction_ref.is_empty() {
            return Err(GatewayError::Declined {
                reason: "capture reference not found".to_string(),
                transaction_id: None,
            });
        }

        let body = match amount {
            Some(amount) => json!({
                "amount": {
                    "value": amount.to_fixed_2(),
                    "currency_code": payment.currency.as_str(),
                }
            }),
            None => json!({}),
        };

        let refund: RefundResponse = self
            .post_json(
                &format!("/v2/payments/captures/{}/refund", transaction_ref),
                &body,
                Some(&format!("refund-{}", payment.idempotency_key())),
                &[StatusCode::CREATED],
            )
            .await?;
        info!(payment_id = %payment.id, refund_id = %refund.id, "PayPal refund created");
        Ok(refund.id)
    }

    async fn verify_webhook(&self, event: &WebhookEvent) -> WebhookVerification {
        let Some(webhook_id) = self.webhook_id.as_deref() else {
            if self.allow_unverified {
                warn!(event_id = %event.id, "accepting unverified PayPal webhook: no webhook_id configured");
                return parse_event(&event.payload);
            }
            return WebhookVerification::Rejected("webhook_id not configured".to_string());
        };

        match self.verify_remote(event, webhook_id).await {
            Ok(true) => parse_event(&event.payload),
            Ok(false) => WebhookVerification::Rejected("signature verification failed".to_string()),
            Err(e) => {
                error!(event_id = %event.id, error = %e, "PayPal webhook verification call failed");
                WebhookVerification::Rejected(format!("verification unavailable: {}", e))
            }
        }
    }
}

fn parse_event(payload: &str) -> WebhookVerification {
    let value: serde_json::Value = match serde_json::from_str(payload) {
        Ok(value) => value,
        Err(e) => return WebhookVerification::Rejected(format!("malformed PayPal event: {}", e)),
    };

    let Some(event_type) = value.get("event_type").and_then(|v| v.as_str()) else {
        return WebhookVerification::Rejected("PayPal event has no event_type".to_string());
    };
    let resource = value.get("resource").cloned().unwrap_or_default();
    let text = |ptr: &str| resource.pointer(ptr).and_then(|v| v.as_str()).map(str::to_string);

    // Stored references are order ids; captures and refunds point back to them.
    let order_ref = text("/supplementary_data/related_ids/order_id");
    let kind = match event_type {
        "PAYMENT.CAPTURE.COMPLETED" => GatewayEventKind::PaymentSucceeded,
        "PAYMENT.CAPTURE.DENIED" => GatewayEventKind::PaymentFailed {
            reason: text("/status_details/reason"),
        },
        "PAYMENT.CAPTURE.REFUNDED" => GatewayEventKind::Refunded,
        _ => GatewayEventKind::Unhandled,
    };
    let transaction_id = match &kind {
        GatewayEventKind::Refunded => order_ref.or_else(|| up_link_id(&resource)),
        _ => order_ref.or_else(|| text("/id")),
    };

    WebhookVerification::Verified(GatewayEvent {
        id: value.get("id").and_then(|v| v.as_str()).map(str::to_string),
        event_type: event_type.to_string(),
        kind,
        transaction_id,
    })
}

/// Last path segment of the `rel: up` link (the capture a refund belongs to).
fn up_link_id(resource: &serde_json::Value) -> Option<String> {
    resource
        .get("links")?
        .as_array()?
        .iter()
        .find(|link| link.get("rel").and_then(|r| r.as_str()) == Some("up"))
        .and_then(|link| link.get("href")?.as_str())
        .and_then(|href| href.rsplit('/').next())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(mode: GatewayMode, webhook_id: Option<&str>) -> PayPalSettings {
        PayPalSettings {
            client_id: "client".to_string(),
            client_secret: "secret".to_string(),
            webhook_id: webhook_id.map(str::to_string),
            mode,
            ..PayPalSettings::default()
        }
    }

    #[test]
    fn test_mode_selects_base_url() {
        let sandbox = PayPalGateway::new(&settings(GatewayMode::Sandbox, None), false).unwrap();
        assert_eq!(sandbox.api_base(), PAYPAL_SANDBOX_BASE);
        let live = PayPalGateway::new(&settings(GatewayMode::Live, None), false).unwrap();
        assert_eq!(live.api_base(), PAYPAL_LIVE_BASE);
    }

    #[test]
    fn test_credentials_required() {
        let result = PayPalGateway::new(&PayPalSettings::default(), false);
        assert!(matches!(result, Err(GatewayError::Configuration(_))));
    }

    #[test]
    fn test_capture_completed_prefers_order_id() {
        let payload = json!({
            "id": "WH-1",
            "event_type": "PAYMENT.CAPTURE.COMPLETED",
            "resource": {
                "id": "CAP-1",
                "supplementary_data": { "related_ids": { "order_id": "ORDER-1" } }
            }
        })
        .to_string();
        match parse_event(&payload) {
            WebhookVerification::Verified(event) => {
                assert_eq!(event.kind, GatewayEventKind::PaymentSucceeded);
                assert_eq!(event.transaction_id.as_deref(), Some("ORDER-1"));
                assert_eq!(event.id.as_deref(), Some("WH-1"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_refund_falls_back_to_up_link() {
        let payload = json!({
            "event_type": "PAYMENT.CAPTURE.REFUNDED",
            "resource": {
                "id": "REF-1",
                "links": [
                    { "rel": "self", "href": "https://api.paypal.com/v2/payments/refunds/REF-1" },
                    { "rel": "up", "href": "https://api.paypal.com/v2/payments/captures/CAP-9" }
                ]
            }
        })
        .to_string();
        match parse_event(&payload) {
            WebhookVerification::Verified(event) => {
                assert_eq!(event.kind, GatewayEventKind::Refunded);
                assert_eq!(event.transaction_id.as_deref(), Some("CAP-9"));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_denied_carries_reason() {
        let payload = json!({
            "event_type": "PAYMENT.CAPTURE.DENIED",
            "resource": { "id": "CAP-2", "status_details": { "reason": "BUYER_COMPLAINT" } }
        })
        .to_string();
        assert!(matches!(
            parse_event(&payload),
            WebhookVerification::Verified(GatewayEvent {
                kind: GatewayEventKind::PaymentFailed { reason: Some(_) },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_unverified_requires_opt_in() {
        let payload = json!({ "event_type": "CHECKOUT.ORDER.APPROVED", "resource": {} }).to_string();
        let event = WebhookEvent::new(PaymentGateway::Paypal, payload);

        let strict = PayPalGateway::new(&settings(GatewayMode::Sandbox, None), false).unwrap();
        assert!(matches!(strict.verify_webhook(&event).await, WebhookVerification::Rejected(_)));

        let lenient = PayPalGateway::new(&settings(GatewayMode::Sandbox, None), true).unwrap();
        assert!(matches!(
            lenient.verify_webhook(&event).await,
            WebhookVerification::Verified(GatewayEvent { kind: GatewayEventKind::Unhandled, .. })
        ));
    }

    #[tokio::test]
    async fn test_missing_transmission_headers_reject_without_network() {
        let gateway = PayPalGateway::new(&settings(GatewayMode::Sandbox, Some("WH-ID")), false).unwrap();
        let event = WebhookEvent::new(PaymentGateway::Paypal, "{}");
        assert!(matches!(gateway.verify_webhook(&event).await, WebhookVerification::Rejected(_)));
    }

    #[tokio::test]
    async fn test_refund_without_reference_rejects_without_network() {
        let gateway = PayPalGateway::new(&settings(GatewayMode::Sandbox, None), false).unwrap();
        let payment = Payment::new(
            "ORD-1".to_string(),
            Amount::parse("10.00").unwrap(),
            paygate_core::Currency::Usd,
            paygate_core::PaymentMethod::Paypal,
            PaymentGateway::Paypal,
            paygate_core::Metadata::new(),
        );
        let result = gateway.refund_payment(&payment, "", None).await;
        assert!(matches!(result, Err(GatewayError::Declined { .. })));
    }
}
