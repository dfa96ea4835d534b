//! Observer access audit log.
//!
//! Always written, never queried on the hot path.

use crate::error::Result;
use ox_domain::ObserverRole;
use sqlx::PgPool;
use tracing::warn;

/// One audited read.
#[derive(Debug, Clone)]
pub struct AccessRecord {
    pub observer_id: String,
    pub observer_role: ObserverRole,
    pub endpoint: String,
    pub query_params: serde_json::Value,
    pub response_count: i32,
}

/// Append an access record.
pub async fn record_access(pool: &PgPool, record: &AccessRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO observer_access_log (
            observer_id, observer_role, endpoint, query_params, response_count
        ) VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(&record.observer_id)
    .bind(record.observer_role.as_str())
    .bind(&record.endpoint)
    .bind(&record.query_params)
    .bind(record.response_count)
    .execute(pool)
    .await?;

    Ok(())
}

/// Audit failures must not fail the read they audit; log and move on.
pub async fn record_access_best_effort(pool: &PgPool, record: &AccessRecord) {
    if let Err(e) = record_access(pool, record).await {
        warn!(
            endpoint = %record.endpoint,
            observer = %record.observer_id,
            error = %e,
            "Failed to write observer access log"
        );
    }
}
