//! Pressure decay math.
//!
//! A pressure's intensity halves every `half_life_seconds`. Expiry is fixed
//! at creation to ten half-lives (about 0.1% of the initial intensity
//! remaining), so expired pressures can be excluded by timestamp alone.

use crate::entities::SponsorId;
use crate::value_objects::{HalfLife, Magnitude, PressureType};
use chrono::{DateTime, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Expiry horizon in half-lives.
const EXPIRY_HALF_LIVES: i64 = 10;

/// Credit cost of issuing a pressure: `ceil(10 * |magnitude|)`.
pub fn pressure_credit_cost(magnitude: Magnitude) -> Decimal {
    Decimal::from((10.0 * magnitude.as_f64().abs()).ceil() as i64)
}

/// A credit-backed, time-decaying influence on a deployment or agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pressure {
    pub pressure_id: Uuid,
    pub sponsor_id: SponsorId,
    pub target_deployment: String,
    pub target_agent_id: Option<Uuid>,
    pub pressure_type: PressureType,
    pub magnitude: f64,
    pub half_life_seconds: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub credit_cost: Decimal,
}

impl Pressure {
    /// Build a new pressure; expiry and cost are derived, not supplied.
    pub fn issue(
        sponsor_id: SponsorId,
        target_deployment: impl Into<String>,
        target_agent_id: Option<Uuid>,
        pressure_type: PressureType,
        magnitude: Magnitude,
        half_life: HalfLife,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            pressure_id: Uuid::now_v7(),
            sponsor_id,
            target_deployment: target_deployment.into(),
            target_agent_id,
            pressure_type,
            magnitude: magnitude.as_f64(),
            half_life_seconds: half_life.as_seconds(),
            created_at: now,
            expires_at: now + Duration::seconds(EXPIRY_HALF_LIVES * half_life.as_seconds()),
            cancelled_at: None,
            credit_cost: pressure_credit_cost(magnitude),
        }
    }

    /// Current magnitude at `at`: `magnitude * 0.5^((at - created_at) / half_life)`.
    ///
    /// Cancellation does not stop decay; it only removes the pressure from
    /// braid composition.
    pub fn current_magnitude(&self, at: DateTime<Utc>) -> f64 {
        let elapsed = (at - self.created_at).num_milliseconds() as f64 / 1000.0;
        if elapsed <= 0.0 {
            return self.magnitude;
        }
        self.magnitude * 0.5_f64.powf(elapsed / self.half_life_seconds as f64)
    }

    /// At exactly `created_at + 10 * half_life` the pressure is expired.
    pub fn is_expired(&self, at: DateTime<Utc>) -> bool {
        at >= self.expires_at
    }

    /// Eligible for braid composition: uncancelled and unexpired.
    pub fn is_braidable(&self, at: DateTime<Utc>) -> bool {
        self.cancelled_at.is_none() && !self.is_expired(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value_objects::{HalfLife, Magnitude};
    use rust_decimal_macros::dec;

    fn pressure(magnitude: f64, half_life: i64) -> Pressure {
        Pressure::issue(
            Uuid::now_v7(),
            "world-1",
            None,
            PressureType::Throttle,
            Magnitude::new(magnitude).unwrap(),
            HalfLife::new(half_life).unwrap(),
            Utc::now(),
        )
    }

    #[test]
    fn test_credit_cost_rounds_up() {
        assert_eq!(pressure_credit_cost(Magnitude::new(40.0).unwrap()), dec!(400));
        assert_eq!(pressure_credit_cost(Magnitude::new(-40.0).unwrap()), dec!(400));
        assert_eq!(pressure_credit_cost(Magnitude::new(0.05).unwrap()), dec!(1));
    }

    #[test]
    fn test_decay_halves_per_half_life() {
        let p = pressure(40.0, 600);
        let after_one = p.current_magnitude(p.created_at + Duration::seconds(600));
        assert!((after_one - 20.0).abs() < 0.01, "got {after_one}");

        let after_two = p.current_magnitude(p.created_at + Duration::seconds(1200));
        assert!((after_two - 10.0).abs() < 0.01, "got {after_two}");
    }

    #[test]
    fn test_negative_magnitude_decays_toward_zero() {
        let p = pressure(-80.0, 120);
        let later = p.current_magnitude(p.created_at + Duration::seconds(120));
        assert!((later + 40.0).abs() < 0.01, "got {later}");
    }

    #[test]
    fn test_expiry_at_ten_half_lives() {
        let p = pressure(40.0, 600);
        assert_eq!(p.expires_at, p.created_at + Duration::seconds(6000));
        assert!(!p.is_expired(p.expires_at - Duration::seconds(1)));
        assert!(p.is_expired(p.expires_at));
    }

    #[test]
    fn test_cancelled_pressure_is_not_braidable_but_still_decays() {
        let mut p = pressure(40.0, 600);
        p.cancelled_at = Some(p.created_at + Duration::seconds(10));
        let at = p.created_at + Duration::seconds(600);
        assert!(!p.is_braidable(at));
        assert!((p.current_magnitude(at) - 20.0).abs() < 0.01);
    }
}
