//! Daemon: main runtime orchestrator.
//!
//! Ties together:
//! - PostgreSQL store (single `core` pool)
//! - Admission engine with the cognition provider registry
//! - In-process event broker + outbox dispatcher
//! - Projection consumer, policy sweep, physics tick
//! - HTTP API server
//!
//! # Lifecycle
//!
//! 1. Load configuration, connect the store, run migrations
//! 2. Build the broker and subscribe the projection consumer
//! 3. Spawn workers and the API server
//! 4. Wait for SIGINT, cancel the shared token, drain workers

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use ox_cognition::{HttpCognition, ProviderRegistry, StubCognition};
use ox_engine::ActionEngine;
use ox_store::Db;

use crate::api::{create_router, ApiState};
use crate::broker::EventBroker;
use crate::config::{Config, Environment};
use crate::error::{DaemonError, DaemonResult};
use crate::metrics::Metrics;
use crate::outbox_worker::OutboxWorker;
use crate::physics_worker::PhysicsWorker;
use crate::policy_worker::PolicyWorker;
use crate::projection_worker::ProjectionWorker;
use crate::rate_limit::RateLimiter;

// =============================================================================
// Daemon
// =============================================================================

/// The OX substrate daemon.
pub struct Daemon {
    config: Arc<Config>,
    db: Db,
    broker: Arc<EventBroker>,
    engine: Arc<ActionEngine>,
    metrics: Arc<Metrics>,
}

impl Daemon {
    /// Connect the store and wire the components. Fails fast on any
    /// startup error.
    pub async fn connect(config: Config) -> DaemonResult<Self> {
        let database_url = config
            .database_url
            .as_deref()
            .ok_or_else(|| DaemonError::Config("DATABASE_URL is required".to_string()))?;

        let db = Db::connect(database_url).await?;

        ox_db::migrate(db.core())
            .await
            .map_err(|e| DaemonError::Config(format!("migration failed: {e}")))?;

        let registry = build_provider_registry(&config)?;
        let engine = Arc::new(ActionEngine::new(Arc::new(registry), config.engine_config()));
        let metrics =
            Arc::new(Metrics::new().map_err(|e| DaemonError::Config(e.to_string()))?);

        Ok(Self {
            config: Arc::new(config),
            db,
            broker: Arc::new(EventBroker::default()),
            engine,
            metrics,
        })
    }

    /// Run the daemon until SIGINT.
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            "Starting OX daemon"
        );

        let shutdown = CancellationToken::new();
        let pool = self.db.core().clone();

        // The projection consumer subscribes in its constructor, before the
        // outbox dispatcher can publish anything.
        let projection = ProjectionWorker::new(
            pool.clone(),
            &self.broker,
            self.metrics.clone(),
            self.config.workers.dead_letter_attempts,
        );
        let outbox = OutboxWorker::new(
            pool.clone(),
            self.broker.clone(),
            self.metrics.clone(),
            self.config.workers.outbox_interval_secs,
            self.config.workers.outbox_batch,
        );
        let policy = PolicyWorker::new(pool.clone(), self.config.workers.policy_interval_secs);
        let physics = PhysicsWorker::new(pool.clone(), self.config.workers.physics_interval_secs);

        let mut handles = Vec::new();
        handles.push(tokio::spawn(projection.run(shutdown.clone())));
        handles.push(tokio::spawn(outbox.run(shutdown.clone())));
        handles.push(tokio::spawn(policy.run(shutdown.clone())));
        handles.push(tokio::spawn(physics.run(shutdown.clone())));

        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        tokio::signal::ctrl_c()
            .await
            .map_err(|e| DaemonError::Config(format!("signal handler: {e}")))?;
        info!("Received shutdown signal");

        shutdown.cancel();
        for handle in handles {
            match handle.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Worker exited with error"),
                Err(e) => error!(error = %e, "Worker task panicked"),
            }
        }

        info!("OX daemon stopped");
        Ok(())
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            db: self.db.clone(),
            engine: self.engine.clone(),
            config: self.config.clone(),
            metrics: self.metrics.clone(),
            rate_limiter: Arc::new(RateLimiter::new()),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|e| DaemonError::Config(format!("Failed to bind to {addr}: {e}")))?;

        let local_addr = listener
            .local_addr()
            .map_err(|e| DaemonError::Config(format!("Failed to get local address: {e}")))?;

        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }
}

/// Build the provider registry from configuration.
///
/// The stub provider is registered outside production so tests and local
/// runs can exercise the cognition path without a collaborator.
fn build_provider_registry(config: &Config) -> DaemonResult<ProviderRegistry> {
    let mut registry = ProviderRegistry::new();

    if config.environment != Environment::Production {
        registry.register("stub", Arc::new(StubCognition::new(5)));
    }

    if let Some(endpoint) = &config.cognition.http_endpoint {
        let provider = HttpCognition::new(endpoint, "http", config.cognition.http_base_cost)
            .map_err(|e| DaemonError::Config(format!("cognition provider: {e}")))?;
        registry.register("http", Arc::new(provider));
        info!(endpoint, "HTTP cognition provider registered");
    }

    Ok(registry)
}
