use axum::{
    extract::{Path, State},
    http::HeaderMap,
    routing::post,
    Json, Router,
};
use paygate_core::{PaymentError, PaymentGateway, WebhookEvent};
use paygate_engine::WebhookOutcome;

use crate::{error::AppError, state::AppState};

pub fn routes() -> Router<AppState> {
    Router::new().route("/webhooks/{gateway}", post(receive_webhook))
}

/// POST /api/v1/webhooks/{gateway}
/// Signature checks need the body exactly as sent, so it is taken raw.
async fn receive_webhook(
    State(state): State<AppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: String,
) -> Result<Json<WebhookOutcome>, AppError> {
    let gateway: PaymentGateway = gateway
        .parse()
        .map_err(|_| PaymentError::NotFound(format!("gateway {}", gateway)))?;

    let mut event = WebhookEvent::new(gateway, body);
    for (name, value) in headers.iter() {
        if let Ok(value) = value.to_str() {
            event = event.with_header(name.as_str(), value);
        }
    }
    tracing::info!(gateway = %gateway, event_id = %event.id, "Received webhook");

    Ok(Json(state.reconciler.process_webhook(event).await?))
}
