//! OX substrate daemon.
//!
//! Runtime orchestrator for the admission engine, influence engine,
//! projections, and HTTP APIs.
//!
//! # Usage
//!
//! ```bash
//! # Start daemon with default configuration
//! oxd
//!
//! # Database lifecycle
//! oxd db migrate
//! oxd db status
//! oxd db init
//!
//! # Start with custom environment
//! OX_ENV=test OX_API_PORT=8081 oxd
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL`: PostgreSQL connection string (required)
//! - `OX_ENV`: Environment (test, development, production)
//! - `OX_API_HOST` / `OX_API_PORT`: API bind address (default 0.0.0.0:8080)
//! - `OX_OUTBOX_INTERVAL_SECS`: outbox dispatch period (default 10)
//! - `OX_POLICY_INTERVAL_SECS`: policy sweep period (default 60, floor 60)
//! - `OX_PHYSICS_INTERVAL_SECS`: physics tick period (default 30)
//! - `OX_COGNITION_HTTP_ENDPOINT`: enables the HTTP cognition provider

use oxd::{Config, Daemon};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(EnvFilter::from_default_env().add_directive("oxd=info".parse()?))
        .init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() > 1 && args[1] == "db" {
        return run_db_command(&args).await;
    }

    let config = Config::from_env()?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        "OX daemon"
    );

    let daemon = Daemon::connect(config).await?;
    daemon.run().await?;

    Ok(())
}

async fn run_db_command(args: &[String]) -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL is required for db commands"))?;
    let pool = sqlx::PgPool::connect(&database_url).await?;

    match args.get(2).map(String::as_str) {
        Some("migrate") => ox_db::migrate(&pool).await,
        Some("status") => ox_db::status(&pool).await,
        Some("init") => {
            ox_db::migrate(&pool).await?;
            let (sponsor_id, agent_id) = ox_db::init_minimal_data(&pool, None, None).await?;
            info!(%sponsor_id, %agent_id, "Seed data ready");
            Ok(())
        }
        other => Err(anyhow::anyhow!(
            "Unknown db command: {:?}. Expected: migrate, status, init",
            other
        )),
    }
}
