use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::payment::ParseEnumError;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    PaymentCreated,
    PaymentProcessed,
    PaymentSucceeded,
    PaymentFailed,
    PaymentRefunded,
    PaymentCaptured,
    WebhookReceived,
    WebhookVerified,
    WebhookFailed,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            AuditAction::PaymentCreated => "PAYMENT_CREATED",
            AuditAction::PaymentProcessed => "PAYMENT_PROCESSED",
            AuditAction::PaymentSucceeded => "PAYMENT_SUCCEEDED",
            AuditAction::PaymentFailed => "PAYMENT_FAILED",
            AuditAction::PaymentRefunded => "PAYMENT_REFUNDED",
            AuditAction::PaymentCaptured => "PAYMENT_CAPTURED",
            AuditAction::WebhookReceived => "WEBHOOK_RECEIVED",
            AuditAction::WebhookVerified => "WEBHOOK_VERIFIED",
            AuditAction::WebhookFailed => "WEBHOOK_FAILED",
        }
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AuditAction {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let action = match s {
            "PAYMENT_CREATED" => AuditAction::PaymentCreated,
            "PAYMENT_PROCESSED" => AuditAction::PaymentProcessed,
            "PAYMENT_SUCCEEDED" => AuditAction::PaymentSucceeded,
            "PAYMENT_FAILED" => AuditAction::PaymentFailed,
            "PAYMENT_REFUNDED" => AuditAction::PaymentRefunded,
            "PAYMENT_CAPTURED" => AuditAction::PaymentCaptured,
            "WEBHOOK_RECEIVED" => AuditAction::WebhookReceived,
            "WEBHOOK_VERIFIED" => AuditAction::WebhookVerified,
            "WEBHOOK_FAILED" => AuditAction::WebhookFailed,
            _ => return Err(ParseEnumError::new("audit action", s)),
        };
        Ok(action)
    }
}

/// Who triggered an action. Webhook and worker activity has no human actor.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub id: Option<String>,
    pub actor_type: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl Actor {
    pub fn system() -> Self {
        Self::default()
    }

    pub fn user(id: impl Into<String>, actor_type: impl Into<String>) -> Self {
        Self {
            id: Some(id.into()),
            actor_type: Some(actor_type.into()),
            ..Self::default()
        }
    }

    pub fn with_client(mut self, ip_address: Option<String>, user_agent: Option<String>) -> Self {
        self.ip_address = ip_address;
        self.user_agent = user_agent;
        self
    }
}

/// Append-only compliance record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AuditLog {
    pub id: Uuid,
    pub payment_id: Option<Uuid>,
    pub action: AuditAction,
    pub actor_id: Option<String>,
    pub actor_type: Option<String>,
    pub details: String,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(
        payment_id: Option<Uuid>,
        action: AuditAction,
        actor: &Actor,
        details: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            payment_id,
            action,
            actor_id: actor.id.clone(),
            actor_type: actor.actor_type.clone(),
            details: details.into(),
            ip_address: actor.ip_address.clone(),
            user_agent: actor.user_agent.clone(),
            created_at: Utc::now(),
        }
    }
}
