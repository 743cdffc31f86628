use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Extension, Json, Router,
};
use paygate_core::{
    Actor, AuditLog, CreatePaymentRequest, Payment, PaymentStatus, RefundPaymentRequest,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{error::AppError, state::AppState};

const DEFAULT_PAGE_SIZE: i64 = 20;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ListResponse {
    pub payments: Vec<Payment>,
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Deserialize)]
pub struct AuditQuery {
    pub limit: Option<i64>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/payments", post(create_payment).get(list_payments))
        .route("/payments/{id}", get(get_payment))
        .route("/payments/order/{order_id}", get(get_payments_by_order))
        .route("/payments/{id}/refund", post(refund_payment))
        .route("/payments/{id}/capture", post(capture_payment))
        .route("/payments/{id}/retry", post(retry_payment))
        .route("/payments/{id}/audit", get(audit_trail))
}

/// POST /api/v1/payments
async fn create_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Json(request): Json<CreatePaymentRequest>,
) -> Result<(StatusCode, Json<Payment>), AppError> {
    let payment = state.orchestrator.create_payment(request, &actor).await?;
    Ok((StatusCode::CREATED, Json(payment)))
}

/// GET /api/v1/payments?limit=&offset=&status=
async fn list_payments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListResponse>, AppError> {
    let status = query
        .status
        .as_deref()
        .map(|s| s.to_ascii_uppercase().parse::<PaymentStatus>())
        .transpose()
        .map_err(|e| AppError::Validation(e.to_string()))?;
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    let offset = query.offset.unwrap_or(0);

    let page = state.orchestrator.list_payments(limit, offset, status).await?;
    Ok(Json(ListResponse {
        payments: page.payments,
        total: page.total,
        limit,
        offset,
    }))
}

async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.orchestrator.get_payment(id).await?))
}

async fn get_payments_by_order(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<Payment>>, AppError> {
    Ok(Json(state.orchestrator.get_payments_by_order(&order_id).await?))
}

/// POST /api/v1/payments/{id}/refund
/// Body may omit `amount` for a full refund.
async fn refund_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
    Json(request): Json<RefundPaymentRequest>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.orchestrator.refund_payment(id, request, &actor).await?))
}

async fn capture_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.orchestrator.capture_payment(id, &actor).await?))
}

async fn retry_payment(
    State(state): State<AppState>,
    Extension(actor): Extension<Actor>,
    Path(id): Path<Uuid>,
) -> Result<Json<Payment>, AppError> {
    Ok(Json(state.orchestrator.retry_payment(id, &actor).await?))
}

async fn audit_trail(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(query): Query<AuditQuery>,
) -> Result<Json<Vec<AuditLog>>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_PAGE_SIZE);
    Ok(Json(state.orchestrator.audit_trail(id, limit).await?))
}
