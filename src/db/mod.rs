//! Connection pooling and database provisioning.

pub mod ident;

use std::collections::HashMap;
use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::Executor;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::config::DbConfig;
use crate::error::{ServiceError, ServiceResult};
use ident::quote_identifier;

/// Open a bounded pool against one logical database.
pub async fn connect(cfg: &DbConfig, database: &str) -> ServiceResult<PgPool> {
    PgPoolOptions::new()
        .max_connections(cfg.max_connections)
        .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .connect(&cfg.url(database))
        .await
        .map_err(|source| ServiceError::Connectivity {
            database: database.to_string(),
            source,
        })
}

/// One pool per logical database, built on first use and cached for the
/// process lifetime.
pub struct PoolRegistry {
    config: DbConfig,
    pools: Mutex<HashMap<String, PgPool>>,
}

impl PoolRegistry {
    pub fn new(config: DbConfig) -> Self {
        PoolRegistry {
            config,
            pools: Mutex::new(HashMap::new()),
        }
    }

    /// Fetch (or build) the pool for `database`. Pools are cheap clones of a
    /// shared inner handle.
    pub async fn pool(&self, database: &str) -> ServiceResult<PgPool> {
        let mut pools = self.pools.lock().await;
        if let Some(pool) = pools.get(database) {
            return Ok(pool.clone());
        }
        debug!(database, "opening connection pool");
        let pool = connect(&self.config, database).await?;
        pools.insert(database.to_string(), pool.clone());
        Ok(pool)
    }
}

/// Create `name` if it does not exist. Idempotent.
///
/// The existence check runs with the name as a bind parameter; the create
/// uses the quoted identifier. CREATE DATABASE cannot run inside a
/// transaction block, so it executes as a single autocommit statement over
/// the simple query protocol.
pub async fn ensure_database(cfg: &DbConfig, name: &str) -> ServiceResult<()> {
    let quoted = quote_identifier(name)?;

    let pool = PgPoolOptions::new()
        .max_connections(1)
        .acquire_timeout(Duration::from_secs(cfg.connect_timeout_secs))
        .connect(&cfg.url(&cfg.maintenance_database))
        .await
        .map_err(|source| ServiceError::Connectivity {
            database: cfg.maintenance_database.clone(),
            source,
        })?;

    let exists = sqlx::query("SELECT 1 FROM pg_database WHERE datname = $1")
        .bind(name)
        .fetch_optional(&pool)
        .await?;

    if exists.is_none() {
        let stmt = format!("CREATE DATABASE {quoted}");
        pool.execute(stmt.as_str())
            .await
            .map_err(|e| ServiceError::schema(format!("creating database `{name}`: {e}")))?;
        info!(database = name, "created database");
    } else {
        debug!(database = name, "database already exists");
    }

    pool.close().await;
    Ok(())
}
