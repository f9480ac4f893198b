//! SQLite device directory.

use super::{now_millis, Device, DeviceDirectory, ADMIN_OWNER};
use crate::error::DirectoryError;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;

/// SQLite-based device directory.
///
/// Uses WAL mode for concurrent reads/writes.
#[derive(Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    /// Open (or create) the directory database at `path`.
    pub async fn new(path: &Path) -> Result<Self, DirectoryError> {
        let path_str = path.to_str().ok_or_else(|| DirectoryError::InvalidPath {
            path: path.to_path_buf(),
        })?;
        let options = SqliteConnectOptions::from_str(path_str)
            .map_err(DirectoryError::Database)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(DirectoryError::Database)?;

        let directory = Self { pool };
        directory.run_migrations().await?;
        Ok(directory)
    }

    /// Create an in-memory directory (for testing).
    pub async fn in_memory() -> Result<Self, DirectoryError> {
        let options = SqliteConnectOptions::from_str(":memory:")
            .map_err(DirectoryError::Database)?
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(DirectoryError::Database)?;

        let directory = Self { pool };
        directory.run_migrations().await?;
        Ok(directory)
    }

    async fn run_migrations(&self) -> Result<(), DirectoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS devices (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                owner INTEGER NOT NULL,
                device_id TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                last_online INTEGER NOT NULL DEFAULT 0,
                last_connect INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| DirectoryError::Migration(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_devices_owner ON devices(owner)")
            .execute(&self.pool)
            .await
            .map_err(|e| DirectoryError::Migration(e.to_string()))?;

        Ok(())
    }

    async fn touch(&self, column: Touch, device_id: &str) -> Result<bool, DirectoryError> {
        let sql = match column {
            Touch::Online => "UPDATE devices SET last_online = ?1 WHERE device_id = ?2",
            Touch::Connect => "UPDATE devices SET last_connect = ?1 WHERE device_id = ?2",
        };
        let result = sqlx::query(sql)
            .bind(now_millis())
            .bind(device_id)
            .execute(&self.pool)
            .await
            .map_err(DirectoryError::Database)?;
        Ok(result.rows_affected() > 0)
    }
}

#[derive(Clone, Copy)]
enum Touch {
    Online,
    Connect,
}

#[async_trait]
impl DeviceDirectory for SqliteDirectory {
    async fn get_device_by_id(&self, id: i64) -> Result<Option<Device>, DirectoryError> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT id, owner, device_id, name, last_online, last_connect
            FROM devices WHERE id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DirectoryError::Database)?;

        Ok(row.map(Device::from))
    }

    async fn get_device_by_device_id(
        &self,
        device_id: &str,
    ) -> Result<Option<Device>, DirectoryError> {
        let row = sqlx::query_as::<_, DeviceRow>(
            r#"
            SELECT id, owner, device_id, name, last_online, last_connect
            FROM devices WHERE device_id = ?1
            "#,
        )
        .bind(device_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(DirectoryError::Database)?;

        Ok(row.map(Device::from))
    }

    async fn update_last_online(&self, device_id: &str) -> Result<bool, DirectoryError> {
        self.touch(Touch::Online, device_id).await
    }

    async fn update_last_connect(&self, device_id: &str) -> Result<bool, DirectoryError> {
        self.touch(Touch::Connect, device_id).await
    }

    async fn list_devices(
        &self,
        owner: i64,
        page: u32,
        page_size: u32,
    ) -> Result<Vec<Device>, DirectoryError> {
        let offset = i64::from(page.max(1) - 1) * i64::from(page_size);
        let rows = if owner == ADMIN_OWNER {
            sqlx::query_as::<_, DeviceRow>(
                r#"
                SELECT id, owner, device_id, name, last_online, last_connect
                FROM devices
                ORDER BY id DESC
                LIMIT ?1 OFFSET ?2
                "#,
            )
            .bind(i64::from(page_size))
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        } else {
            sqlx::query_as::<_, DeviceRow>(
                r#"
                SELECT id, owner, device_id, name, last_online, last_connect
                FROM devices
                WHERE owner = ?1
                ORDER BY id DESC
                LIMIT ?2 OFFSET ?3
                "#,
            )
            .bind(owner)
            .bind(i64::from(page_size))
            .bind(offset)
            .fetch_all(&self.pool)
            .await
        }
        .map_err(DirectoryError::Database)?;

        Ok(rows.into_iter().map(Device::from).collect())
    }

    async fn add_device(
        &self,
        owner: i64,
        name: &str,
        device_id: &str,
    ) -> Result<Device, DirectoryError> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO devices (owner, device_id, name)
            VALUES (?1, ?2, ?3)
            RETURNING id
            "#,
        )
        .bind(owner)
        .bind(device_id)
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .map_err(DirectoryError::Database)?;

        Ok(Device {
            id,
            owner,
            device_id: device_id.to_string(),
            name: name.to_string(),
            last_online: 0,
            last_connect: 0,
        })
    }
}

/// Database row for a device.
#[derive(sqlx::FromRow)]
struct DeviceRow {
    id: i64,
    owner: i64,
    device_id: String,
    name: String,
    last_online: i64,
    last_connect: i64,
}

impl From<DeviceRow> for Device {
    fn from(row: DeviceRow) -> Self {
        Self {
            id: row.id,
            owner: row.owner,
            device_id: row.device_id,
            name: row.name,
            last_online: row.last_online,
            last_connect: row.last_connect,
        }
    }
}
