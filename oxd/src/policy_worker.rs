//! Policy sweep worker.
//!
//! Runs the sponsor policy sweep on a fixed cadence (floor 60 s). Safe to
//! run on every replica; the run log's (policy, tick, agent) key dedupes.

use crate::error::DaemonResult;
use ox_influence::run_policy_sweep;
use sqlx::PgPool;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

pub struct PolicyWorker {
    pool: PgPool,
    interval_secs: u64,
}

impl PolicyWorker {
    pub fn new(pool: PgPool, interval_secs: u64) -> Self {
        Self {
            pool,
            interval_secs: interval_secs.max(60),
        }
    }

    pub async fn run(self, shutdown: tokio_util::sync::CancellationToken) -> DaemonResult<()> {
        info!(interval_secs = self.interval_secs, "Policy worker started");

        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Policy worker shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match run_policy_sweep(&self.pool).await {
                        Ok(summary) if summary.policies_run > 0 => {
                            debug!(
                                policies = summary.policies_run,
                                applied = summary.applied,
                                skipped = summary.skipped,
                                "Policy sweep tick"
                            );
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "Policy sweep failed (will retry)");
                        }
                    }
                }
            }
        }

        info!("Policy worker stopped");
        Ok(())
    }
}
