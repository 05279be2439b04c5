//! The durable backing store for the Nola task queue: a single-file SQLite
//! database shared by the file registry and the task queue.

mod error;
mod schema;

use std::str::FromStr;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

pub use error::StoreError;

/// Configuration for opening a [`SqliteStore`].
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Path to the SQLite database file, or `:memory:` for an ephemeral store.
    pub path: String,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Create the database file if it does not exist.
    pub create_if_missing: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: "nola.db".to_string(),
            max_connections: 5,
            create_if_missing: true,
        }
    }
}

impl StoreConfig {
    pub fn in_memory() -> Self {
        Self {
            path: ":memory:".to_string(),
            max_connections: 1,
            create_if_missing: true,
        }
    }
}

/// The SQLite-backed store shared by [`nola_files`] and [`nola_queue`].
///
/// Owns the connection pool, runs schema migration on connect, and checks the
/// `UPDATE ... RETURNING` precondition the queue's atomic claim relies on.
#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens the store at `config.path`, migrating the schema and checking the
    /// `RETURNING` precondition. Fails fast with [`StoreError::VersionTooOld`] if the
    /// linked SQLite is too old, matching the hard precondition in this workspace's
    /// external interface contract.
    pub async fn connect(config: StoreConfig) -> Result<Self, StoreError> {
        let connect_options = if config.path == ":memory:" {
            // Each in-memory store gets its own named shared-cache database so the
            // pool's connections see the same data instead of each opening a
            // fresh, empty in-memory database.
            let name = Uuid::new_v4();
            SqliteConnectOptions::from_str(&format!("sqlite:file:{name}?mode=memory&cache=shared"))
                .map_err(|e| StoreError::StoreUnavailable(e.to_string()))?
        } else {
            SqliteConnectOptions::from_str(&format!("sqlite:{}", config.path))
                .map_err(|e| StoreError::StoreUnavailable(e.to_string()))?
                .create_if_missing(config.create_if_missing)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .connect_with(connect_options)
            .await
            .map_err(|e| StoreError::StoreUnavailable(e.to_string()))?;

        schema::migrate(&pool).await?;
        schema::check_returning_support(&pool).await?;

        info!(path = %config.path, "store opened");
        Ok(Self { pool })
    }

    /// The underlying connection pool, for crates that issue direct queries
    /// (`nola-files`, `nola-queue`, `nola-sweeper`).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
