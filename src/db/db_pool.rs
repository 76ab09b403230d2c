use duckdb::Connection;
use r2d2::{ManageConnection, Pool};
use std::sync::Mutex;
use std::time::Duration;

use crate::config::DatabaseConfig;

pub type DbPool = Pool<DuckDBConnectionManager>;

/// Hands out connections cloned from one base connection.
///
/// Every pooled connection shares a single DuckDB database instance, which
/// also makes in-memory databases usable through the pool.
pub struct DuckDBConnectionManager {
    base: Mutex<Connection>,
}

impl DuckDBConnectionManager {
    pub fn open(connection_string: &str) -> Result<Self, duckdb::Error> {
        Ok(Self {
            base: Mutex::new(Connection::open(connection_string)?),
        })
    }

    pub fn in_memory() -> Result<Self, duckdb::Error> {
        Ok(Self {
            base: Mutex::new(Connection::open_in_memory()?),
        })
    }
}

impl ManageConnection for DuckDBConnectionManager {
    type Connection = Connection;
    type Error = duckdb::Error;

    fn connect(&self) -> Result<Self::Connection, Self::Error> {
        // A poisoned lock only means another clone panicked; the base is intact
        let base = self.base.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        base.try_clone()
    }

    fn is_valid(&self, conn: &mut Self::Connection) -> Result<(), Self::Error> {
        conn.execute_batch("SELECT 1")
    }

    fn has_broken(&self, _conn: &mut Self::Connection) -> bool {
        false
    }
}

pub fn build_pool(config: &DatabaseConfig) -> Result<DbPool, Box<dyn std::error::Error + Send + Sync>> {
    let manager = DuckDBConnectionManager::open(&config.connection_string)?;
    let pool = Pool::builder()
        .max_size(config.pool_size as u32)
        .connection_timeout(Duration::from_secs(config.connection_timeout_secs))
        .build(manager)?;
    Ok(pool)
}

pub fn in_memory_pool(max_size: u32) -> Result<DbPool, Box<dyn std::error::Error + Send + Sync>> {
    let pool = Pool::builder()
        .max_size(max_size)
        .build(DuckDBConnectionManager::in_memory()?)?;
    Ok(pool)
}
