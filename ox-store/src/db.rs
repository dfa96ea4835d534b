//! Pooled connection handles.
//!
//! Logical databases are keyed by a short name; the substrate core uses a
//! single `core` handle, but collaborators (analytics replicas, archival
//! stores) can be registered beside it without widening any signatures.

use crate::error::{Result, StoreError};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::collections::HashMap;
use tracing::info;

/// Registry of named connection pools with a distinguished core handle.
#[derive(Debug, Clone)]
pub struct Db {
    core: PgPool,
    named: HashMap<String, PgPool>,
}

impl Db {
    /// Connect the core pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let core = PgPoolOptions::new()
            .max_connections(16)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("connect core: {e}")))?;

        info!("Core database pool connected");
        Ok(Self { core, named: HashMap::new() })
    }

    /// Register an additional logical database.
    pub async fn register(&mut self, name: &str, database_url: &str) -> Result<()> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(format!("connect {name}: {e}")))?;

        info!(name, "Database pool connected");
        self.named.insert(name.to_string(), pool);
        Ok(())
    }

    /// Wrap an existing pool (tests).
    pub fn from_pool(pool: PgPool) -> Self {
        Self { core: pool, named: HashMap::new() }
    }

    /// The primary transactional store.
    pub fn core(&self) -> &PgPool {
        &self.core
    }

    /// Resolve a named handle.
    pub fn named(&self, name: &str) -> Result<&PgPool> {
        self.named
            .get(name)
            .ok_or_else(|| StoreError::Connection(format!("no pool named {name}")))
    }
}
