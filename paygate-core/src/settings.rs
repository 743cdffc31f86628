use std::time::Duration;

use serde::Deserialize;

use crate::payment::PaymentGateway;

fn enabled() -> bool {
    true
}

/// Runtime switches read once at startup.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSettings {
    #[serde(default = "enabled")]
    pub enable_stripe: bool,
    #[serde(default = "enabled")]
    pub enable_paypal: bool,
    #[serde(default = "enabled")]
    pub enable_refunds: bool,
    #[serde(default = "enabled")]
    pub enable_webhooks: bool,
    #[serde(default = "enabled")]
    pub enable_audit_log: bool,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub processing: ProcessingLimits,
}

impl Default for PaymentSettings {
    fn default() -> Self {
        Self {
            enable_stripe: true,
            enable_paypal: true,
            enable_refunds: true,
            enable_webhooks: true,
            enable_audit_log: true,
            retry: RetryPolicy::default(),
            processing: ProcessingLimits::default(),
        }
    }
}

impl PaymentSettings {
    pub fn gateway_enabled(&self, gateway: PaymentGateway) -> bool {
        match gateway {
            PaymentGateway::Stripe => self.enable_stripe,
            PaymentGateway::Paypal => self.enable_paypal,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_max_attempts() -> u32 { 3 }
fn default_backoff_ms() -> u64 { 2000 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

impl RetryPolicy {
    /// Exponential delay for the n-th retry (1-based).
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_ms.saturating_mul(1u64 << exp))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingLimits {
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_max_concurrency")]
    pub max_concurrency: usize,
    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,
}

fn default_queue_capacity() -> usize { 1024 }
fn default_max_concurrency() -> usize { 16 }
fn default_lock_timeout_secs() -> u64 { 60 }

impl Default for ProcessingLimits {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            max_concurrency: default_max_concurrency(),
            lock_timeout_secs: default_lock_timeout_secs(),
        }
    }
}

impl ProcessingLimits {
    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum GatewayMode {
    #[default]
    Sandbox,
    Live,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StripeSettings {
    #[serde(default)]
    pub secret_key: String,
    pub webhook_secret: Option<String>,
    pub api_base: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PayPalSettings {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    pub webhook_id: Option<String>,
    #[serde(default)]
    pub mode: GatewayMode,
    pub api_base: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_timeout_secs() -> u64 { 30 }

impl Default for StripeSettings {
    fn default() -> Self {
        Self {
            secret_key: String::new(),
            webhook_secret: None,
            api_base: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

impl Default for PayPalSettings {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            webhook_id: None,
            mode: GatewayMode::default(),
            api_base: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}
