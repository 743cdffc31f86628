use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paygate_core::{
    Metadata, Page, Payment, PaymentGateway, PaymentStatus, PaymentStore, StoreError, StoreResult,
};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

const COLUMNS: &str = "id, order_id, amount, currency, status, payment_method, payment_gateway, \
                       external_transaction_id, metadata, failure_reason, created_at, updated_at";

pub struct PgPaymentStore {
    pool: PgPool,
}

impl PgPaymentStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct PaymentRow {
    id: Uuid,
    order_id: String,
    amount: String,
    currency: String,
    status: String,
    payment_method: String,
    payment_gateway: String,
    external_transaction_id: Option<String>,
    metadata: Json<Metadata>,
    failure_reason: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let corrupt = |field: &str, e: &dyn std::fmt::Display| {
            StoreError::Backend(format!("payment {} has invalid {}: {}", row.id, field, e))
        };
        Ok(Payment {
            id: row.id,
            amount: row.amount.parse().map_err(|e| corrupt("amount", &e))?,
            currency: row.currency.parse().map_err(|e| corrupt("currency", &e))?,
            status: row.status.parse().map_err(|e| corrupt("status", &e))?,
            payment_method: row.payment_method.parse().map_err(|e| corrupt("payment_method", &e))?,
            payment_gateway: row.payment_gateway.parse().map_err(|e| corrupt("payment_gateway", &e))?,
            order_id: row.order_id,
            external_transaction_id: row.external_transaction_id,
            metadata: row.metadata.0,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub(crate) fn backend(e: sqlx::Error) -> StoreError {
    match e {
        sqlx::Error::RowNotFound => StoreError::NotFound,
        sqlx::Error::Database(db) if db.is_unique_violation() => {
            StoreError::Duplicate(db.message().to_string())
        }
        other => StoreError::Backend(other.to_string()),
    }
}

#[async_trait]
impl PaymentStore for PgPaymentStore {
    async fn create(&self, payment: &Payment) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, order_id, amount, currency, status, payment_method,
                payment_gateway, external_transaction_id, metadata, failure_reason, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(payment.id)
        .bind(&payment.order_id)
        .bind(payment.amount.to_string())
        .bind(payment.currency.as_str())
        .bind(payment.status.as_str())
        .bind(payment.payment_method.as_str())
        .bind(payment.payment_gateway.as_str())
        .bind(&payment.external_transaction_id)
        .bind(Json(&payment.metadata))
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.updated_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> StoreResult<Payment> {
        let row: Option<PaymentRow> =
            sqlx::query_as(&format!("SELECT {} FROM payments WHERE id = $1", COLUMNS))
                .bind(id)
                .fetch_optional(&self.pool)
                .await
                .map_err(backend)?;
        row.ok_or(StoreError::NotFound)?.try_into()
    }

    async fn get_by_order_id(&self, order_id: &str) -> StoreResult<Vec<Payment>> {
        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE order_id = $1 ORDER BY created_at DESC",
            COLUMNS
        ))
        .bind(order_id)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;
        rows.into_iter().map(Payment::try_from).collect()
    }

    async fn get_by_external_id(
        &self,
        gateway: PaymentGateway,
        external_id: &str,
    ) -> StoreResult<Payment> {
        let row: Option<PaymentRow> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE payment_gateway = $1 AND external_transaction_id = $2",
            COLUMNS
        ))
        .bind(gateway.as_str())
        .bind(external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;
        row.ok_or(StoreError::NotFound)?.try_into()
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: PaymentStatus,
        to: PaymentStatus,
        failure_reason: Option<&str>,
    ) -> StoreResult<Payment> {
        let updated: Option<PaymentRow> = sqlx::query_as(&format!(
            r#"
            UPDATE payments
            SET status = $1, failure_reason = $2, updated_at = NOW()
            WHERE id = $3 AND status = $4
            RETURNING {}
            "#,
            COLUMNS
        ))
        .bind(to.as_str())
        .bind(failure_reason)
        .bind(id)
        .bind(from.as_str())
        .fetch_optional(&self.pool)
        .await
        .map_err(backend)?;

        if let Some(row) = updated {
            return row.try_into();
        }

        // Nothing matched: tell a missing row apart from a stale expectation.
        let actual: Option<String> = sqlx::query_scalar("SELECT status FROM payments WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;
        match actual {
            None => Err(StoreError::NotFound),
            Some(status) => Err(StoreError::StatusConflict {
                expected: from,
                actual: status
                    .parse()
                    .map_err(|e| StoreError::Backend(format!("invalid stored status: {}", e)))?,
            }),
        }
    }

    async fn update_external_transaction_id(&self, id: Uuid, external_id: &str) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE payments SET external_transaction_id = $1, updated_at = NOW() WHERE id = $2",
        )
        .bind(external_id)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn update_metadata(&self, id: Uuid, metadata: &Metadata) -> StoreResult<()> {
        let result =
            sqlx::query("UPDATE payments SET metadata = $1, updated_at = NOW() WHERE id = $2")
                .bind(Json(metadata))
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(backend)?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn list(
        &self,
        limit: i64,
        offset: i64,
        status: Option<PaymentStatus>,
    ) -> StoreResult<Page> {
        let status = status.map(|s| s.as_str());

        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM payments WHERE ($1::TEXT IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool)
        .await
        .map_err(backend)?;

        let rows: Vec<PaymentRow> = sqlx::query_as(&format!(
            r#"
            SELECT {} FROM payments
            WHERE ($1::TEXT IS NULL OR status = $1)
            ORDER BY created_at DESC
            LIMIT $2 OFFSET $3
            "#,
            COLUMNS
        ))
        .bind(status)
        .bind(limit)
        .bind(offset)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        Ok(Page {
            payments: rows
                .into_iter()
                .map(Payment::try_from)
                .collect::<StoreResult<_>>()?,
            total,
        })
    }
}
