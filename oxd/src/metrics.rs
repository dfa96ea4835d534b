//! Prometheus metrics for the daemon.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry};

/// Daemon-wide counters, registered once at startup.
pub struct Metrics {
    pub registry: Registry,
    pub actions_accepted: IntCounter,
    pub actions_rejected: IntCounterVec,
    pub outbox_published: IntCounter,
    pub outbox_failed: IntCounter,
    pub projections_applied: IntCounter,
    pub projections_dead_lettered: IntCounter,
}

impl Metrics {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new();

        let actions_accepted =
            IntCounter::new("ox_actions_accepted_total", "Accepted action attempts")?;
        let actions_rejected = IntCounterVec::new(
            Opts::new("ox_actions_rejected_total", "Rejected action attempts"),
            &["reason"],
        )?;
        let outbox_published =
            IntCounter::new("ox_outbox_published_total", "Outbox rows published")?;
        let outbox_failed =
            IntCounter::new("ox_outbox_failed_total", "Outbox publish failures")?;
        let projections_applied =
            IntCounter::new("ox_projections_applied_total", "Envelopes materialized")?;
        let projections_dead_lettered = IntCounter::new(
            "ox_projections_dead_lettered_total",
            "Envelopes routed to the dead letter sink",
        )?;

        registry.register(Box::new(actions_accepted.clone()))?;
        registry.register(Box::new(actions_rejected.clone()))?;
        registry.register(Box::new(outbox_published.clone()))?;
        registry.register(Box::new(outbox_failed.clone()))?;
        registry.register(Box::new(projections_applied.clone()))?;
        registry.register(Box::new(projections_dead_lettered.clone()))?;

        Ok(Self {
            registry,
            actions_accepted,
            actions_rejected,
            outbox_published,
            outbox_failed,
            projections_applied,
            projections_dead_lettered,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_register_cleanly() {
        let metrics = Metrics::new().unwrap();
        metrics.actions_accepted.inc();
        metrics.actions_rejected.with_label_values(&["insufficient_capacity"]).inc();
        assert_eq!(metrics.actions_accepted.get(), 1);
    }
}
