//! Physics tick worker.
//!
//! Periodically composes per-deployment braid vectors from active pressures
//! and publishes them on the physics topic. Idempotent per (tick,
//! deployment) across replicas.

use crate::error::DaemonResult;
use ox_influence::run_physics_tick;
use sqlx::PgPool;
use tokio::time::{interval, Duration};
use tracing::{debug, error, info};

pub struct PhysicsWorker {
    pool: PgPool,
    interval_secs: u64,
}

impl PhysicsWorker {
    pub fn new(pool: PgPool, interval_secs: u64) -> Self {
        Self {
            pool,
            interval_secs: interval_secs.max(1),
        }
    }

    pub async fn run(self, shutdown: tokio_util::sync::CancellationToken) -> DaemonResult<()> {
        info!(interval_secs = self.interval_secs, "Physics worker started");

        let mut ticker = interval(Duration::from_secs(self.interval_secs));
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("Physics worker shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    match run_physics_tick(&self.pool, self.interval_secs as i64).await {
                        Ok(computed) if computed > 0 => {
                            debug!(deployments = computed, "Physics tick");
                        }
                        Ok(_) => {}
                        Err(e) => {
                            error!(error = %e, "Physics tick failed (will retry)");
                        }
                    }
                }
            }
        }

        info!("Physics worker stopped");
        Ok(())
    }
}
