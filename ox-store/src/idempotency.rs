//! Idempotency wrapper.
//!
//! Any operation tagged with an idempotency key returns the byte-identical
//! cached response on replay, without re-applying side effects. Two callers
//! sharing a key with different request bodies is a conflict.

use crate::error::StoreError;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use std::future::Future;
use tracing::debug;

/// Fingerprint a request body so divergent replays can be rejected.
pub fn request_fingerprint(body: &serde_json::Value) -> String {
    let mut hasher = Sha256::new();
    hasher.update(body.to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Run `op` under an idempotency key.
///
/// - `key` absent: run `op` and return its result.
/// - Key unseen: reserve it as pending, run `op`, store the serialized
///   response, return it.
/// - Key seen with the same fingerprint: return the stored response without
///   side effects.
/// - Key seen with a different fingerprint: `IdempotencyConflict`.
/// - Key pending (original still in flight): `IdempotencyPending`; callers
///   surface this as a retriable conflict.
///
/// If `op` fails, the reservation is released so an honest retry can run.
/// Generic over the caller's error type so engine-level operations can be
/// wrapped without flattening their errors.
pub async fn with_idempotency<F, Fut, E>(
    pool: &PgPool,
    key: Option<&str>,
    body: &serde_json::Value,
    op: F,
) -> std::result::Result<serde_json::Value, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<serde_json::Value, E>>,
    E: From<StoreError>,
{
    let key = match key {
        Some(k) if !k.trim().is_empty() => k,
        _ => return op().await,
    };

    let fingerprint = request_fingerprint(body);

    let reserved = sqlx::query(
        r#"
        INSERT INTO idempotency_keys (idempotency_key, status, request_fingerprint)
        VALUES ($1, 'pending', $2)
        ON CONFLICT (idempotency_key) DO NOTHING
        "#,
    )
    .bind(key)
    .bind(&fingerprint)
    .execute(pool)
    .await
    .map_err(StoreError::from)?
    .rows_affected();

    if reserved == 0 {
        let row: Option<(String, Option<String>, Option<serde_json::Value>)> = sqlx::query_as(
            "SELECT status, request_fingerprint, response FROM idempotency_keys \
             WHERE idempotency_key = $1",
        )
        .bind(key)
        .fetch_optional(pool)
        .await
        .map_err(StoreError::from)?;

        let (status, stored_fingerprint, response) = row.ok_or_else(|| {
            E::from(StoreError::Database(format!(
                "idempotency row vanished for key {key}"
            )))
        })?;

        if stored_fingerprint.as_deref() != Some(fingerprint.as_str()) {
            return Err(E::from(StoreError::IdempotencyConflict { key: key.to_string() }));
        }

        return match (status.as_str(), response) {
            ("done", Some(response)) => {
                debug!(key, "Idempotent replay served from cache");
                Ok(response)
            }
            _ => Err(E::from(StoreError::IdempotencyPending { key: key.to_string() })),
        };
    }

    match op().await {
        Ok(response) => {
            sqlx::query(
                r#"
                UPDATE idempotency_keys
                SET status = 'done', response = $2, completed_at = NOW()
                WHERE idempotency_key = $1
                "#,
            )
            .bind(key)
            .bind(&response)
            .execute(pool)
            .await
            .map_err(StoreError::from)?;

            Ok(response)
        }
        Err(e) => {
            sqlx::query("DELETE FROM idempotency_keys WHERE idempotency_key = $1")
                .bind(key)
                .execute(pool)
                .await
                .map_err(StoreError::from)?;
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let body = json!({"amount": "100", "sponsor": "s1"});
        assert_eq!(request_fingerprint(&body), request_fingerprint(&body));
    }

    #[test]
    fn test_fingerprint_differs_for_different_bodies() {
        let a = json!({"amount": "100"});
        let b = json!({"amount": "101"});
        assert_ne!(request_fingerprint(&a), request_fingerprint(&b));
    }
}
