//! Daemon configuration.
//!
//! Loads configuration from environment variables with sensible defaults.

use crate::error::{DaemonError, DaemonResult};
use std::env;

// =============================================================================
// Configuration
// =============================================================================

/// Daemon configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// API server configuration
    pub api: ApiConfig,

    /// PostgreSQL connection string
    pub database_url: Option<String>,

    /// Background worker cadences
    pub workers: WorkerConfig,

    /// Admission engine tuning
    pub engine: EngineSettings,

    /// Cognition provider wiring
    pub cognition: CognitionConfig,

    /// Read API rate limits (requests per minute)
    pub rate_limits: RateLimitConfig,

    /// Environment (test, development, production)
    pub environment: Environment,
}

/// API server configuration.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    /// Host to bind to
    pub host: String,
    /// Port to bind to
    pub port: u16,
}

/// Background worker cadences and bounds.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Outbox dispatch period in seconds
    pub outbox_interval_secs: u64,
    /// Outbox rows claimed per tick
    pub outbox_batch: i64,
    /// Policy sweep period in seconds (floor 60)
    pub policy_interval_secs: u64,
    /// Physics tick period in seconds
    pub physics_interval_secs: u64,
    /// Projection attempts before an envelope goes to the dead letter sink
    pub dead_letter_attempts: u32,
}

/// Admission engine settings (mirrors ox_engine::EngineConfig).
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub transaction_budget_ms: u64,
    pub cognition_timeout_ms: u64,
    pub max_cost_multiplier: i64,
}

/// Cognition provider wiring.
#[derive(Debug, Clone)]
pub struct CognitionConfig {
    /// When set, an `http` provider pointed at this endpoint is registered.
    pub http_endpoint: Option<String>,
    /// Base cost for the http provider's estimates.
    pub http_base_cost: i64,
}

/// Per-endpoint read API rate limits.
#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub live_per_minute: u64,
    pub sessions_per_minute: u64,
    pub artifacts_per_minute: u64,
    pub observe_per_minute: u64,
}

/// Environment type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    /// Test environment (stub providers, random port)
    Test,
    /// Development environment
    Development,
    /// Production environment
    Production,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> DaemonResult<Self> {
        // Load .env file if present (ignore errors)
        let _ = dotenvy::dotenv();

        Ok(Self {
            api: ApiConfig {
                host: env::var("OX_API_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: parse_env("OX_API_PORT", 8080)?,
            },
            database_url: env::var("DATABASE_URL").ok(),
            workers: WorkerConfig {
                outbox_interval_secs: parse_env("OX_OUTBOX_INTERVAL_SECS", 10)?,
                outbox_batch: parse_env("OX_OUTBOX_BATCH", 100)?,
                policy_interval_secs: parse_env::<u64>("OX_POLICY_INTERVAL_SECS", 60)?.max(60),
                physics_interval_secs: parse_env("OX_PHYSICS_INTERVAL_SECS", 30)?,
                dead_letter_attempts: parse_env("OX_DEAD_LETTER_ATTEMPTS", 5)?,
            },
            engine: EngineSettings {
                transaction_budget_ms: parse_env("OX_TX_BUDGET_MS", 2_000)?,
                cognition_timeout_ms: parse_env("OX_COGNITION_TIMEOUT_MS", 1_500)?,
                max_cost_multiplier: parse_env("OX_MAX_COST_MULTIPLIER", 2)?,
            },
            cognition: CognitionConfig {
                http_endpoint: env::var("OX_COGNITION_HTTP_ENDPOINT").ok(),
                http_base_cost: parse_env("OX_COGNITION_HTTP_BASE_COST", 1)?,
            },
            rate_limits: RateLimitConfig {
                live_per_minute: parse_env("OX_RATE_LIVE_PER_MIN", 60)?,
                sessions_per_minute: parse_env("OX_RATE_SESSIONS_PER_MIN", 30)?,
                artifacts_per_minute: parse_env("OX_RATE_ARTIFACTS_PER_MIN", 30)?,
                observe_per_minute: parse_env("OX_RATE_OBSERVE_PER_MIN", 30)?,
            },
            environment: load_environment()?,
        })
    }

    /// Create test configuration.
    pub fn test() -> Self {
        Self {
            api: ApiConfig {
                host: "127.0.0.1".to_string(),
                port: 0, // Let OS assign port
            },
            database_url: None,
            workers: WorkerConfig {
                outbox_interval_secs: 1,
                outbox_batch: 100,
                policy_interval_secs: 60,
                physics_interval_secs: 5,
                dead_letter_attempts: 2,
            },
            engine: EngineSettings {
                transaction_budget_ms: 2_000,
                cognition_timeout_ms: 500,
                max_cost_multiplier: 2,
            },
            cognition: CognitionConfig {
                http_endpoint: None,
                http_base_cost: 1,
            },
            rate_limits: RateLimitConfig {
                live_per_minute: 60,
                sessions_per_minute: 30,
                artifacts_per_minute: 30,
                observe_per_minute: 30,
            },
            environment: Environment::Test,
        }
    }

    /// Engine config for ox-engine.
    pub fn engine_config(&self) -> ox_engine::EngineConfig {
        ox_engine::EngineConfig {
            transaction_budget_ms: self.engine.transaction_budget_ms,
            cognition_timeout_ms: self.engine.cognition_timeout_ms,
            max_cost_multiplier: self.engine.max_cost_multiplier,
        }
    }
}

fn load_environment() -> DaemonResult<Environment> {
    let env_str = env::var("OX_ENV").unwrap_or_else(|_| "development".to_string());

    match env_str.to_lowercase().as_str() {
        "test" => Ok(Environment::Test),
        "development" | "dev" => Ok(Environment::Development),
        "production" | "prod" => Ok(Environment::Production),
        other => Err(DaemonError::Config(format!(
            "Invalid OX_ENV: {}. Expected: test, development, production",
            other
        ))),
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> DaemonResult<T> {
    match env::var(key) {
        Ok(val) => val
            .parse::<T>()
            .map_err(|_| DaemonError::Config(format!("Invalid {key} value: {val}"))),
        Err(_) => Ok(default),
    }
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Test => write!(f, "test"),
            Environment::Development => write!(f, "development"),
            Environment::Production => write!(f, "production"),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_test_config() {
        let config = Config::test();

        assert_eq!(config.api.port, 0);
        assert_eq!(config.environment, Environment::Test);
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_policy_interval_floor() {
        // The sweep cadence never drops below the 60 second floor.
        let config = Config::test();
        assert!(config.workers.policy_interval_secs >= 60);
    }

    #[test]
    fn test_environment_display() {
        assert_eq!(Environment::Test.to_string(), "test");
        assert_eq!(Environment::Development.to_string(), "development");
        assert_eq!(Environment::Production.to_string(), "production");
    }
}
