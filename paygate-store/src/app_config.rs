use paygate_core::settings::{PayPalSettings, StripeSettings};
use paygate_core::PaymentSettings;
use serde::Deserialize;
use std::env;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub auth: AuthConfig,
    #[serde(default)]
    pub payments: PaymentSettings,
    #[serde(default)]
    pub stripe: StripeSettings,
    #[serde(default)]
    pub paypal: PayPalSettings,
    #[serde(default)]
    pub webhooks: WebhookConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub port: u16,
}

#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Postgres,
    Memory,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub run_migrations: bool,
}

fn default_max_connections() -> u32 { 5 }
fn default_acquire_timeout() -> u64 { 3 }
fn default_true() -> bool { true }

#[derive(Debug, Deserialize, Clone)]
pub struct AuthConfig {
    pub jwt_secret: String,
}

#[derive(Debug, Deserialize, Clone, Default)]
pub struct WebhookConfig {
    /// Accept unsigned webhooks from gateways with no secret configured.
    /// Development only.
    #[serde(default)]
    pub allow_unverified: bool,
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = config::Config::builder()
            .add_source(config::File::with_name("config/default"))
            .add_source(config::File::with_name(&format!("config/{}", run_mode)).required(false))
            // Not checked in
            .add_source(config::File::with_name("config/local").required(false))
            // e.g. PAYGATE__PAYMENTS__ENABLE_PAYPAL=false
            .add_source(config::Environment::with_prefix("PAYGATE").separator("__"))
            .build()?;

        s.try_deserialize()
    }

    pub fn from_toml(source: &str) -> Result<Self, config::ConfigError> {
        config::Config::builder()
            .add_source(config::File::from_str(source, config::FileFormat::Toml))
            .build()?
            .try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use paygate_core::settings::GatewayMode;

    const MINIMAL: &str = r#"
        [server]
        port = 8080

        [database]
        url = "postgres://localhost/payments"

        [auth]
        jwt_secret = "secret"
    "#;

    #[test]
    fn test_defaults_fill_missing_sections() {
        let config = Config::from_toml(MINIMAL).unwrap();
        assert_eq!(config.database.backend, StorageBackend::Postgres);
        assert_eq!(config.database.max_connections, 5);
        assert!(config.payments.enable_stripe);
        assert!(config.payments.enable_audit_log);
        assert_eq!(config.payments.retry.max_attempts, 3);
        assert_eq!(config.paypal.mode, GatewayMode::Sandbox);
        assert!(!config.webhooks.allow_unverified);
    }

    #[test]
    fn test_overrides() {
        let source = format!(
            "{}\n{}",
            MINIMAL,
            r#"
            [payments]
            enable_paypal = false
            enable_refunds = false

            [payments.retry]
            max_attempts = 5
            backoff_ms = 100

            [paypal]
            mode = "live"

            [webhooks]
            allow_unverified = true
            "#
        );
        let config = Config::from_toml(&source).unwrap();
        assert!(!config.payments.enable_paypal);
        assert!(!config.payments.enable_refunds);
        assert_eq!(config.payments.retry.max_attempts, 5);
        assert_eq!(config.payments.retry.backoff_ms, 100);
        assert_eq!(config.paypal.mode, GatewayMode::Live);
        assert!(config.webhooks.allow_unverified);
    }

    #[test]
    fn test_missing_required_section_fails() {
        assert!(Config::from_toml("[server]\nport = 1").is_err());
    }
}
