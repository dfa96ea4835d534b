//! Per-deployment, per-minute throughput counters.
//!
//! The environment gate compares the current-minute count against the
//! imposed cap before any capacity is touched.

use crate::error::Result;
use chrono::{DateTime, DurationRound, TimeDelta, Utc};
use sqlx::{Postgres, Transaction};

/// Truncate an instant to its minute bucket.
pub fn minute_bucket(at: DateTime<Utc>) -> DateTime<Utc> {
    // TimeDelta::minutes(1) cannot make duration_trunc fail.
    at.duration_trunc(TimeDelta::minutes(1)).unwrap_or(at)
}

/// Actions already admitted for this target in the current minute.
pub async fn current_minute_count(
    tx: &mut Transaction<'_, Postgres>,
    target: &str,
    now: DateTime<Utc>,
) -> Result<i32> {
    let count: Option<i32> = sqlx::query_scalar(
        "SELECT action_count FROM deployment_throughput \
         WHERE deployment_target = $1 AND minute_bucket = $2",
    )
    .bind(target)
    .bind(minute_bucket(now))
    .fetch_optional(&mut **tx)
    .await?;

    Ok(count.unwrap_or(0))
}

/// Count one admitted action against the current minute.
pub async fn increment_minute(
    tx: &mut Transaction<'_, Postgres>,
    target: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO deployment_throughput (deployment_target, minute_bucket, action_count)
        VALUES ($1, $2, 1)
        ON CONFLICT (deployment_target, minute_bucket)
            DO UPDATE SET action_count = deployment_throughput.action_count + 1
        "#,
    )
    .bind(target)
    .bind(minute_bucket(now))
    .execute(&mut **tx)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_minute_bucket_truncates() {
        let at = Utc.with_ymd_and_hms(2025, 6, 1, 12, 34, 56).unwrap();
        let bucket = minute_bucket(at);
        assert_eq!(bucket, Utc.with_ymd_and_hms(2025, 6, 1, 12, 34, 0).unwrap());
    }
}
