//! Payment provider adapters.
//!
//! Each adapter implements [`paygate_core::GatewayAdapter`]; [`build_registry`]
//! wires the enabled ones into the single dispatch point the engine uses.

pub mod paypal;
pub mod simulated;
pub mod stripe;
pub mod token;

use std::sync::Arc;

use paygate_core::settings::{PayPalSettings, StripeSettings};
use paygate_core::{GatewayError, GatewayRegistry, PaymentSettings};
use tracing::{info, warn};

pub use paypal::PayPalGateway;
pub use simulated::{RefundCall, SimulatedGateway};
pub use stripe::StripeGateway;
pub use token::{AccessTokenCache, IssuedToken};

pub fn build_registry(
    payments: &PaymentSettings,
    stripe: &StripeSettings,
    paypal: &PayPalSettings,
    allow_unverified: bool,
) -> Result<GatewayRegistry, GatewayError> {
    let mut registry = GatewayRegistry::new();

    if payments.enable_stripe {
        registry.register(Arc::new(StripeGateway::new(stripe, allow_unverified)?));
        info!("Stripe gateway enabled");
    }
    if payments.enable_paypal {
        registry.register(Arc::new(PayPalGateway::new(paypal, allow_unverified)?));
        info!(mode = ?paypal.mode, "PayPal gateway enabled");
    }
    if allow_unverified {
        warn!("webhooks.allow_unverified is set: gateways without a webhook secret will accept unsigned events");
    }

    Ok(registry)
}
