//! SQLite-backed persistence
//!
//! Single-writer SQLite with WAL journaling and a 5 second busy timeout.
//! Capping the pool at one connection linearises every write, which is
//! what makes the conditional state updates in `systems` atomic
//! transitions rather than best-effort ones.
//!
//! Entities are stored in typed columns (the schema is part of the
//! product surface); migrations are forward-only and tracked in a
//! `schema_version` table.

mod images;
mod mac;
mod migrations;
mod profiles;
mod settings;
mod stats;
mod systems;
mod webhooks;

pub use images::{Image, ImageStatus};
pub use mac::normalize_mac;
pub use profiles::Profile;
pub use settings::{KEY_CONFIRM_REIMAGE, KEY_PASSWORD_HASH, KEY_SESSION_KEY};
pub use stats::{ImageStats, Stats, SystemStats, WebhookStats};
pub use systems::{System, Transition};
pub use webhooks::Webhook;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

/// Database file name under the data directory
pub const DB_FILE: &str = "ember.db";

/// Error type for store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Underlying database error
    #[error("database error: {0}")]
    Database(String),

    /// Malformed MAC address
    #[error("invalid MAC address: {0}")]
    InvalidMac(String),

    /// Row not found where one was required
    #[error("{0} not found")]
    NotFound(&'static str),

    /// Conditional transition matched no row and the machine is not in
    /// the target state either
    #[error("state transition failed: expected {expected}, got {actual}")]
    TransitionConflict { expected: String, actual: String },

    /// Serialization of a stored JSON field failed
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e.to_string())
    }
}

/// Result type for store operations
pub type Result<T> = std::result::Result<T, StoreError>;

/// Handle to the SQLite store. Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct Store {
    pool: SqlitePool,
}

impl Store {
    /// Open (or create) the database under the given data directory and
    /// bring the schema up to date.
    pub async fn open(data_dir: &Path) -> Result<Self> {
        tokio::fs::create_dir_all(data_dir)
            .await
            .map_err(|e| StoreError::Database(format!("create data dir: {}", e)))?;

        let db_path = data_dir.join(DB_FILE);
        let options = SqliteConnectOptions::from_str(&format!("sqlite:{}", db_path.display()))
            .map_err(|e| StoreError::Database(e.to_string()))?
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .create_if_missing(true)
            .busy_timeout(Duration::from_secs(5));

        let store = Self::connect(options).await?;
        info!(path = %db_path.display(), "store opened");
        Ok(store)
    }

    /// Open an in-memory store. With a single pooled connection the
    /// memory database lives as long as the pool does.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| StoreError::Database(e.to_string()))?
            .foreign_keys(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        // Single writer: all writes serialise through the one connection
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let store = Self { pool };
        migrations::migrate(&store.pool).await?;
        Ok(store)
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
