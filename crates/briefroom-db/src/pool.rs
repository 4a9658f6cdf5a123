//! Database connection pool management.
//!
//! The pool is created once at startup and passed explicitly to the ledger and
//! catalog. A running slice pins one connection for its advisory lock and
//! borrows another for each ledger statement, so the pool is sized in slices.

use std::time::{Duration, Instant};

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{debug, info, warn};

use briefroom_core::{defaults, Error, Result};

/// Acquire timeout when `DB_CONNECT_TIMEOUT_SECS` is unset.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 30;

/// Connections a single run slice can hold at once.
pub const CONNECTIONS_PER_SLICE: u32 = 2;

/// Pool sizing and timeouts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub connect_timeout: Duration,
    pub idle_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: defaults::DB_MAX_CONNECTIONS,
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(600),
        }
    }
}

impl PoolConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read `DB_MAX_CONNECTIONS` and `DB_CONNECT_TIMEOUT_SECS`.
    ///
    /// The pool never drops below what one slice needs, otherwise a slice
    /// would wait on itself for a connection while holding its lock.
    pub fn from_env() -> Self {
        let max_connections = env_parse("DB_MAX_CONNECTIONS").unwrap_or(defaults::DB_MAX_CONNECTIONS);
        let connect_timeout =
            env_parse("DB_CONNECT_TIMEOUT_SECS").unwrap_or(DEFAULT_CONNECT_TIMEOUT_SECS);

        Self::default()
            .max_connections(max_connections)
            .connect_timeout(Duration::from_secs(connect_timeout))
    }

    pub fn max_connections(mut self, n: u32) -> Self {
        self.max_connections = n.max(CONNECTIONS_PER_SLICE);
        self
    }

    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Jobs that can run a slice at the same time without starving each other.
    pub fn concurrent_slices(&self) -> u32 {
        self.max_connections.saturating_sub(1) / CONNECTIONS_PER_SLICE
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.trim().parse().ok())
}

/// Connect with the default configuration.
pub async fn create_pool(database_url: &str) -> Result<PgPool> {
    create_pool_with_config(database_url, PoolConfig::default()).await
}

/// Connect with an explicit configuration.
pub async fn create_pool_with_config(database_url: &str, config: PoolConfig) -> Result<PgPool> {
    let start = Instant::now();

    info!(
        subsystem = "database",
        component = "pool",
        op = "create",
        max_connections = config.max_connections,
        concurrent_slices = config.concurrent_slices(),
        connect_timeout_secs = config.connect_timeout.as_secs(),
        "Creating database connection pool"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(1)
        .acquire_timeout(config.connect_timeout)
        .idle_timeout(config.idle_timeout)
        .connect(database_url)
        .await
        .map_err(Error::Database)?;

    info!(
        subsystem = "database",
        component = "pool",
        op = "established",
        pool_size = pool.size(),
        duration_ms = start.elapsed().as_millis() as u64,
        "Database connection pool established"
    );
    Ok(pool)
}

/// Log pool occupancy. Warns when every connection is checked out, which
/// usually means slices are queueing behind each other's locks.
pub fn log_pool_metrics(pool: &PgPool) {
    let size = pool.size();
    let idle = pool.num_idle();

    debug!(
        subsystem = "database",
        component = "pool",
        op = "metrics",
        pool_size = size,
        pool_idle = idle,
        "Pool occupancy"
    );

    if idle == 0 && size > 0 {
        warn!(
            subsystem = "database",
            component = "pool",
            pool_size = size,
            "No idle connections, run slices may be starved"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pool_config_defaults() {
        let config = PoolConfig::default();
        assert_eq!(config.max_connections, defaults::DB_MAX_CONNECTIONS);
        assert_eq!(config.concurrent_slices(), 2);
    }

    #[test]
    fn test_pool_never_smaller_than_one_slice() {
        let config = PoolConfig::new().max_connections(1);
        assert_eq!(config.max_connections, CONNECTIONS_PER_SLICE);
    }

    #[test]
    fn test_concurrent_slices_reserve_a_spare_connection() {
        let config = PoolConfig::new().max_connections(9);
        assert_eq!(config.concurrent_slices(), 4);
        assert_eq!(PoolConfig::new().max_connections(2).concurrent_slices(), 0);
    }
}
