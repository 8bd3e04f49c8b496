//! SQLite-backed local key/value store.
//!
//! Holds the small amount of state a station keeps across restarts: its
//! device id and the supplier context for material scans. Session state is
//! never persisted here; the server is authoritative for that.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde::de::DeserializeOwned;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};

use stocktake_core::DeviceId;
use stocktake_scanning::SupplierContext;

const SUPPLIER_KEY: &str = "supplier_context";
const DEVICE_ID_KEY: &str = "device_id";

#[derive(Debug, Clone)]
pub struct LocalStore {
    pool: SqlitePool,
}

impl LocalStore {
    /// Open (creating if needed) the database at `path`.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create store directory at {:?}", parent))?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);

        let pool = SqlitePoolOptions::new()
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open SQLite store at {:?}", path))?;

        Self::with_pool(pool).await
    }

    /// Open the store at the platform data directory.
    pub async fn open_default() -> anyhow::Result<Self> {
        let path = default_store_path()?;
        Self::open(&path).await
    }

    /// Throwaway store for tests and ephemeral stations.
    pub async fn in_memory() -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .context("invalid in-memory SQLite URL")?;

        // A second connection would see a different, empty database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .context("failed to open in-memory SQLite store")?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv (
                key       TEXT PRIMARY KEY,
                data      TEXT NOT NULL,
                stored_at TEXT NOT NULL
            )
            "#,
        )
        .execute(&pool)
        .await
        .context("failed to create kv table")?;

        Ok(Self { pool })
    }

    pub async fn put<T>(&self, key: &str, value: &T) -> anyhow::Result<()>
    where
        T: Serialize,
    {
        let data = serde_json::to_string(value)
            .with_context(|| format!("failed to serialize value for key {key}"))?;
        let stored_at = Utc::now().to_rfc3339();

        sqlx::query(
            r#"
            INSERT INTO kv (key, data, stored_at)
            VALUES (?1, ?2, ?3)
            ON CONFLICT(key)
            DO UPDATE SET
                data      = excluded.data,
                stored_at = excluded.stored_at
            "#,
        )
        .bind(key)
        .bind(&data)
        .bind(&stored_at)
        .execute(&self.pool)
        .await
        .with_context(|| format!("failed to store key {key}"))?;

        Ok(())
    }

    pub async fn get<T>(&self, key: &str) -> anyhow::Result<Option<T>>
    where
        T: DeserializeOwned,
    {
        let row = sqlx::query(
            r#"
            SELECT data
            FROM kv
            WHERE key = ?1
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("failed to read key {key}"))?;

        let row = match row {
            Some(row) => row,
            None => return Ok(None),
        };

        let data: String = row.try_get("data")?;
        let value = serde_json::from_str(&data)
            .with_context(|| format!("failed to deserialize value for key {key}"))?;

        Ok(Some(value))
    }

    /// When `key` was last written.
    pub async fn stored_at(&self, key: &str) -> anyhow::Result<Option<DateTime<Utc>>> {
        let row = sqlx::query("SELECT stored_at FROM kv WHERE key = ?1")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .with_context(|| format!("failed to read key {key}"))?;

        let Some(row) = row else {
            return Ok(None);
        };

        let raw: String = row.try_get("stored_at")?;
        let at = DateTime::parse_from_rfc3339(&raw)
            .map(|dt| dt.with_timezone(&Utc))
            .context("invalid stored_at timestamp in store")?;
        Ok(Some(at))
    }

    pub async fn remove(&self, key: &str) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM kv WHERE key = ?1")
            .bind(key)
            .execute(&self.pool)
            .await
            .with_context(|| format!("failed to remove key {key}"))?;
        Ok(())
    }

    pub async fn save_supplier(&self, context: &SupplierContext) -> anyhow::Result<()> {
        self.put(SUPPLIER_KEY, context).await
    }

    pub async fn load_supplier(&self) -> anyhow::Result<Option<SupplierContext>> {
        self.get(SUPPLIER_KEY).await
    }

    pub async fn clear_supplier(&self) -> anyhow::Result<()> {
        self.remove(SUPPLIER_KEY).await
    }

    /// The station's device id, minted and persisted on first use.
    pub async fn device_id(&self) -> anyhow::Result<DeviceId> {
        if let Some(id) = self.get::<DeviceId>(DEVICE_ID_KEY).await? {
            return Ok(id);
        }

        let id = DeviceId::new();
        self.put(DEVICE_ID_KEY, &id).await?;
        tracing::info!(device_id = %id, "minted new device id");
        Ok(id)
    }
}

/// `{data_dir}/stocktake/station.db`, falling back to `~/.local/share`.
pub fn default_store_path() -> anyhow::Result<PathBuf> {
    let base = dirs::data_dir()
        .or_else(|| {
            dirs::home_dir().map(|mut h| {
                h.push(".local");
                h.push("share");
                h
            })
        })
        .context(
            "failed to resolve app data directory (tried data_dir() and home_dir()/.local/share)",
        )?;

    let mut path = base;
    path.push("stocktake");
    path.push("station.db");
    Ok(path)
}
