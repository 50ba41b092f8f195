//! SQLite credential store (feature-gated).

use std::{path::Path, time::Duration};

use async_trait::async_trait;
use sqlx::{
    Row, SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow},
};
use wa_bridge_core::{CredentialStore, DeviceId, DeviceRecord, StoreError};

const CREATE_DEVICES_TABLE_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS devices (
        id TEXT PRIMARY KEY NOT NULL,
        jid TEXT,
        push_name TEXT,
        identity_key BLOB NOT NULL,
        created_at INTEGER NOT NULL
    );
";

/// SQLite store implementation.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open (creating if missing) the database at `path`.
    ///
    /// # Errors
    /// Returns `Open` if the database cannot be opened or migrated.
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .foreign_keys(true)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| StoreError::Open(e.to_string()))?;

        sqlx::raw_sql(CREATE_DEVICES_TABLE_SQL)
            .execute(&pool)
            .await
            .map_err(|e| StoreError::Open(format!("failed to initialize schema: {e}")))?;

        tracing::debug!(path = %path.display(), "Opened credential store");
        Ok(Self { pool })
    }

    fn row_to_device(row: &SqliteRow) -> Result<DeviceRecord, StoreError> {
        let id: String = row.try_get("id").map_err(internal)?;
        let id = DeviceId::parse_str(&id)
            .map_err(|e| StoreError::Internal(format!("invalid device id: {e}")))?;

        Ok(DeviceRecord {
            id,
            jid: row.try_get("jid").map_err(internal)?,
            push_name: row.try_get("push_name").map_err(internal)?,
            identity_key: row.try_get("identity_key").map_err(internal)?,
            created_at: row.try_get("created_at").map_err(internal)?,
        })
    }
}

#[allow(clippy::needless_pass_by_value)]
fn internal(e: sqlx::Error) -> StoreError {
    StoreError::Internal(e.to_string())
}

#[async_trait]
impl CredentialStore for SqliteStore {
    async fn devices(&self) -> Result<Vec<DeviceRecord>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, jid, push_name, identity_key, created_at
             FROM devices ORDER BY created_at, rowid",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(internal)?;

        rows.iter().map(Self::row_to_device).collect()
    }

    async fn save_device(&self, device: &DeviceRecord) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO devices (id, jid, push_name, identity_key, created_at)
             VALUES ($1, $2, $3, $4, $5)
             ON CONFLICT(id) DO UPDATE SET
                 jid = excluded.jid,
                 push_name = excluded.push_name,
                 identity_key = excluded.identity_key",
        )
        .bind(device.id.to_string())
        .bind(&device.jid)
        .bind(&device.push_name)
        .bind(&device.identity_key)
        .bind(device.created_at)
        .execute(&self.pool)
        .await
        .map_err(internal)?;

        Ok(())
    }

    async fn delete_device(&self, id: DeviceId) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM devices WHERE id = $1")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .map_err(internal)?;

        Ok(())
    }

    async fn close(&self) {
        self.pool.close().await;
    }
}
