//! SQLite-backed message store.
//!
//! One append-only table of received messages (id, content, send timestamp,
//! client IP). The store is opened once at startup and shared by every
//! connection handler; a single-connection pool keeps all inserts on one
//! SQLite connection, matching the engine's single-writer discipline, so
//! concurrent callers never collide on id assignment.

use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use tracing::info;

/// Message table schema. Ids are assigned by SQLite and never reused.
const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS messages (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    contenido TEXT NOT NULL,
    fecha_envio TEXT NOT NULL,
    ip_cliente TEXT NOT NULL
)";

/// Shared handle to the message store.
///
/// Cloning is cheap (the pool is reference-counted); handlers may append
/// concurrently without external synchronization.
#[derive(Clone)]
pub struct MessageStore {
    pool: SqlitePool,
}

impl MessageStore {
    /// Open (creating if absent) the store at `path` and ensure the schema
    /// exists. Failure here is fatal to the server.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(StoreError::Init)?;

        let store = MessageStore { pool };
        store.ensure_schema().await?;

        info!(path = %path.display(), "Message store ready");
        Ok(store)
    }

    /// Open a throwaway in-memory store.
    #[cfg(test)]
    pub async fn open_in_memory() -> Result<Self, StoreError> {
        // A single connection, or each pooled connection would see its own
        // private in-memory database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(StoreError::Init)?;

        let store = MessageStore { pool };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), StoreError> {
        sqlx::query(SCHEMA)
            .execute(&self.pool)
            .await
            .map_err(StoreError::Init)?;
        Ok(())
    }

    /// Insert one message row and return the assigned id.
    ///
    /// Callers treat failure as best-effort: the error is logged and the
    /// connection carries on, the acknowledgment is still sent.
    pub async fn append(
        &self,
        contenido: &str,
        fecha_envio: &str,
        ip_cliente: &str,
    ) -> Result<i64, StoreError> {
        let result =
            sqlx::query("INSERT INTO messages (contenido, fecha_envio, ip_cliente) VALUES (?, ?, ?)")
                .bind(contenido)
                .bind(fecha_envio)
                .bind(ip_cliente)
                .execute(&self.pool)
                .await
                .map_err(StoreError::Write)?;

        Ok(result.last_insert_rowid())
    }

    /// Number of stored messages.
    #[cfg(test)]
    pub async fn count(&self) -> Result<i64, StoreError> {
        sqlx::query_scalar("SELECT COUNT(*) FROM messages")
            .fetch_one(&self.pool)
            .await
            .map_err(StoreError::Write)
    }

    /// All stored rows in id order, as (id, contenido, fecha_envio, ip_cliente).
    #[cfg(test)]
    pub async fn messages(&self) -> Result<Vec<(i64, String, String, String)>, StoreError> {
        sqlx::query_as("SELECT id, contenido, fecha_envio, ip_cliente FROM messages ORDER BY id")
            .fetch_all(&self.pool)
            .await
            .map_err(StoreError::Write)
    }
}

/// Message store errors
#[derive(Debug)]
pub enum StoreError {
    /// Opening the database or applying the schema failed (startup-fatal)
    Init(sqlx::Error),
    /// Inserting a row failed (per-message, logged and swallowed by callers)
    Write(sqlx::Error),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::Init(e) => write!(f, "Failed to initialize message store: {}", e),
            StoreError::Write(e) => write!(f, "Failed to store message: {}", e),
        }
    }
}

impl std::error::Error for StoreError {}
