//! Error inbox.
//!
//! Internal errors are retained as fingerprinted counters plus the most
//! recent sample, never as an unbounded log.

use crate::error::Result;
use sha2::{Digest, Sha256};
use sqlx::PgPool;
use tracing::warn;
use uuid::Uuid;

/// Sample length retained per fingerprint.
const MESSAGE_SAMPLE_LEN: usize = 200;

/// Fingerprint: method + normalized path + first 200 chars of the message.
pub fn error_fingerprint(method: &str, path: &str, message: &str) -> String {
    let normalized = normalize_path(path);
    let sample = message_sample(message);

    let mut hasher = Sha256::new();
    hasher.update(method.as_bytes());
    hasher.update(normalized.as_bytes());
    hasher.update(sample.as_bytes());
    hex::encode(hasher.finalize())
}

/// Collapse identifier path segments so one route yields one fingerprint.
fn normalize_path(path: &str) -> String {
    path.split('/')
        .map(|segment| {
            if segment.parse::<Uuid>().is_ok() {
                ":id"
            } else if !segment.is_empty() && segment.chars().all(|c| c.is_ascii_digit()) {
                ":n"
            } else {
                segment
            }
        })
        .collect::<Vec<_>>()
        .join("/")
}

fn message_sample(message: &str) -> &str {
    let mut cut = message.len().min(MESSAGE_SAMPLE_LEN);
    while !message.is_char_boundary(cut) {
        cut -= 1;
    }
    &message[..cut]
}

/// Record an internal error occurrence.
pub async fn record_error(pool: &PgPool, method: &str, path: &str, message: &str) -> Result<()> {
    let fingerprint = error_fingerprint(method, path, message);

    sqlx::query(
        r#"
        INSERT INTO error_inbox (fingerprint, method, path, occurrences, last_message)
        VALUES ($1, $2, $3, 1, $4)
        ON CONFLICT (fingerprint) DO UPDATE SET
            occurrences = error_inbox.occurrences + 1,
            last_message = EXCLUDED.last_message,
            last_seen = NOW()
        "#,
    )
    .bind(&fingerprint)
    .bind(method)
    .bind(normalize_path(path))
    .bind(message_sample(message))
    .execute(pool)
    .await?;

    Ok(())
}

/// Recording an error must never mask the error being recorded.
pub async fn record_error_best_effort(pool: &PgPool, method: &str, path: &str, message: &str) {
    if let Err(e) = record_error(pool, method, path, message).await {
        warn!(error = %e, "Failed to write error inbox row");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_path_collapses_ids() {
        let path = "/agents/018f3c0a-7e44-7bbb-a1f0-3f5f3a2b0c1d/attempt";
        assert_eq!(normalize_path(path), "/agents/:id/attempt");
        assert_eq!(normalize_path("/sessions/42"), "/sessions/:n");
    }

    #[test]
    fn test_fingerprint_stable_across_ids() {
        let a = error_fingerprint(
            "POST",
            "/agents/018f3c0a-7e44-7bbb-a1f0-3f5f3a2b0c1d/attempt",
            "db timeout",
        );
        let b = error_fingerprint(
            "POST",
            "/agents/018f3c0a-0000-7bbb-a1f0-3f5f3a2b0c1d/attempt",
            "db timeout",
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_uses_message_prefix_only() {
        let long_a = format!("timeout {}", "x".repeat(500));
        let long_b = format!("timeout {}", "x".repeat(900));
        // Same first 200 chars, same fingerprint.
        assert_eq!(
            error_fingerprint("GET", "/ox/live", &long_a),
            error_fingerprint("GET", "/ox/live", &long_b)
        );
    }
}
