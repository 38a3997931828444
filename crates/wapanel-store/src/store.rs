//! SQLite-backed key-value store.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use tracing::info;
use wapanel_core::{
    config::{shellexpand, StoreConfig},
    error::PanelError,
    traits::StateStore,
};

/// Persistent client state backed by SQLite.
#[derive(Clone)]
pub struct SqliteStateStore {
    pool: SqlitePool,
}

impl SqliteStateStore {
    /// Open (or create) the database, running migrations on first use.
    pub async fn new(config: &StoreConfig) -> Result<Self, PanelError> {
        let db_path = shellexpand(&config.db_path);

        // Ensure parent directory exists.
        if let Some(parent) = std::path::Path::new(&db_path).parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| PanelError::Store(format!("failed to create data dir: {e}")))?;
        }

        let opts = SqliteConnectOptions::from_str(&format!("sqlite:{db_path}"))
            .map_err(|e| PanelError::Store(format!("invalid db path: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await
            .map_err(|e| PanelError::Store(format!("failed to connect to sqlite: {e}")))?;

        Self::run_migrations(&pool).await?;

        info!("State store initialized at {db_path}");

        Ok(Self { pool })
    }

    /// Single-connection in-memory database.
    pub async fn in_memory() -> Result<Self, PanelError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| PanelError::Store(format!("invalid db path: {e}")))?
            .create_if_missing(true);
        // Every pooled connection would get its own empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| PanelError::Store(format!("failed to open in-memory sqlite: {e}")))?;
        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Run SQL migrations, tracking which have already been applied.
    async fn run_migrations(pool: &SqlitePool) -> Result<(), PanelError> {
        sqlx::raw_sql(
            "CREATE TABLE IF NOT EXISTS _migrations (
                name TEXT PRIMARY KEY,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );",
        )
        .execute(pool)
        .await
        .map_err(|e| PanelError::Store(format!("failed to create migrations table: {e}")))?;

        let migrations: &[(&str, &str)] = &[("001_kv", include_str!("../migrations/001_kv.sql"))];

        for (name, sql) in migrations {
            let applied: Option<(String,)> =
                sqlx::query_as("SELECT name FROM _migrations WHERE name = ?")
                    .bind(name)
                    .fetch_optional(pool)
                    .await
                    .map_err(|e| {
                        PanelError::Store(format!("failed to check migration {name}: {e}"))
                    })?;

            if applied.is_some() {
                continue;
            }

            sqlx::raw_sql(sql)
                .execute(pool)
                .await
                .map_err(|e| PanelError::Store(format!("migration {name} failed: {e}")))?;

            sqlx::query("INSERT INTO _migrations (name) VALUES (?)")
                .bind(name)
                .execute(pool)
                .await
                .map_err(|e| {
                    PanelError::Store(format!("failed to record migration {name}: {e}"))
                })?;
        }
        Ok(())
    }

    /// When a key was last written.
    pub async fn updated_at(&self, key: &str) -> Result<Option<DateTime<Utc>>, PanelError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT updated_at FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PanelError::Store(format!("query failed: {e}")))?;

        Ok(row.and_then(|(ts,)| {
            DateTime::parse_from_rfc3339(&ts)
                .ok()
                .map(|dt| dt.with_timezone(&Utc))
        }))
    }

    /// All stored keys, sorted.
    pub async fn keys(&self) -> Result<Vec<String>, PanelError> {
        let rows: Vec<(String,)> = sqlx::query_as("SELECT key FROM kv ORDER BY key")
            .fetch_all(&self.pool)
            .await
            .map_err(|e| PanelError::Store(format!("query failed: {e}")))?;
        Ok(rows.into_iter().map(|(k,)| k).collect())
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn get(&self, key: &str) -> Result<Option<String>, PanelError> {
        let row: Option<(String,)> = sqlx::query_as("SELECT value FROM kv WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| PanelError::Store(format!("query failed: {e}")))?;
        Ok(row.map(|(v,)| v))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), PanelError> {
        sqlx::query(
            "INSERT INTO kv (key, value, updated_at) VALUES (?, ?, ?) \
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        )
        .bind(key)
        .bind(value)
        .bind(Utc::now().to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(|e| PanelError::Store(format!("upsert failed: {e}")))?;
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), PanelError> {
        sqlx::query("DELETE FROM kv WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await
            .map_err(|e| PanelError::Store(format!("delete failed: {e}")))?;
        Ok(())
    }
}
