use async_trait::async_trait;
use chrono::{DateTime, Utc};
use paygate_core::{AuditLog, AuditStore, StoreError, StoreResult};
use sqlx::PgPool;
use uuid::Uuid;

use crate::payment_repo::backend;

pub struct PgAuditStore {
    pool: PgPool,
}

impl PgAuditStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct AuditRow {
    id: Uuid,
    payment_id: Option<Uuid>,
    action: String,
    actor_id: Option<String>,
    actor_type: Option<String>,
    details: String,
    ip_address: Option<String>,
    user_agent: Option<String>,
    created_at: DateTime<Utc>,
}

#[async_trait]
impl AuditStore for PgAuditStore {
    async fn create(&self, entry: &AuditLog) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO audit_logs (id, payment_id, action, actor_id, actor_type, details,
                ip_address, user_agent, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(entry.id)
        .bind(entry.payment_id)
        .bind(entry.action.as_str())
        .bind(&entry.actor_id)
        .bind(&entry.actor_type)
        .bind(&entry.details)
        .bind(&entry.ip_address)
        .bind(&entry.user_agent)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await
        .map_err(backend)?;
        Ok(())
    }

    async fn list_for_payment(&self, payment_id: Uuid, limit: i64) -> StoreResult<Vec<AuditLog>> {
        let rows: Vec<AuditRow> = sqlx::query_as(
            r#"
            SELECT id, payment_id, action, actor_id, actor_type, details, ip_address, user_agent, created_at
            FROM audit_logs
            WHERE payment_id = $1
            ORDER BY created_at DESC
            LIMIT $2
            "#,
        )
        .bind(payment_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        rows.into_iter()
            .map(|row| {
                Ok(AuditLog {
                    id: row.id,
                    payment_id: row.payment_id,
                    action: row
                        .action
                        .parse()
                        .map_err(|e| StoreError::Backend(format!("audit {} has invalid action: {}", row.id, e)))?,
                    actor_id: row.actor_id,
                    actor_type: row.actor_type,
                    details: row.details,
                    ip_address: row.ip_address,
                    user_agent: row.user_agent,
                    created_at: row.created_at,
                })
            })
            .collect()
    }
}
