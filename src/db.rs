use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::Mutex;
use thiserror::Error;

use crate::types::{ItemStatus, StoredReceipt};

const SCHEMA_VERSION: i64 = 1;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Could not encode stored data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Could not create database folder: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database lock poisoned")]
    Lock,

    #[error("Stored row {id} is corrupt: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Persistence for uploaded receipts and their images.
pub trait ReceiptStore: Send + Sync {
    /// Insert or replace the item with the same id.
    fn put(&self, item: &StoredReceipt) -> Result<(), StoreError>;
    fn get(&self, id: &str) -> Result<Option<StoredReceipt>, StoreError>;
    /// Removes the item and its image. Returns false when nothing matched.
    fn delete(&self, id: &str) -> Result<bool, StoreError>;
    /// Newest first.
    fn list(&self) -> Result<Vec<StoredReceipt>, StoreError>;
    fn put_image(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError>;
    fn get_image(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError>;
}

pub struct Db {
    conn: Mutex<Connection>,
}

impl Db {
    pub fn open(db_path: &Path) -> Result<Self, StoreError> {
        if let Some(parent) = db_path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let conn = Connection::open(db_path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(
            "
            CREATE TABLE IF NOT EXISTS schema_version (
                version INTEGER PRIMARY KEY,
                applied_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            INSERT INTO schema_version (version) SELECT 0 WHERE NOT EXISTS (SELECT 1 FROM schema_version LIMIT 1);
            ",
        )?;

        let current_version: i64 = conn
            .query_row("SELECT MAX(version) FROM schema_version", [], |r| r.get(0))?;
        if current_version < 1 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS items (
                    id TEXT PRIMARY KEY,
                    created_at TEXT NOT NULL,
                    file_name TEXT NOT NULL,
                    media_type TEXT NOT NULL,
                    size INTEGER NOT NULL,
                    status TEXT NOT NULL,
                    error_message TEXT,
                    details TEXT NOT NULL DEFAULT '[]',
                    receipt TEXT
                );
                CREATE TABLE IF NOT EXISTS images (
                    id TEXT PRIMARY KEY,
                    bytes BLOB NOT NULL
                );
                CREATE INDEX IF NOT EXISTS idx_items_created_at ON items(created_at);
                ",
            )?;
            conn.execute("UPDATE schema_version SET version = ?1", params![SCHEMA_VERSION])?;
        }

        Ok(Db {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn.lock().map_err(|_| StoreError::Lock)
    }
}

/// Columns exactly as stored, decoded outside the rusqlite row closure.
struct ItemRow {
    id: String,
    created_at: String,
    file_name: String,
    media_type: String,
    size: i64,
    status: String,
    error_message: Option<String>,
    details: String,
    receipt: Option<String>,
}

const ITEM_COLUMNS: &str =
    "id, created_at, file_name, media_type, size, status, error_message, details, receipt";

fn read_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<ItemRow> {
    Ok(ItemRow {
        id: row.get(0)?,
        created_at: row.get(1)?,
        file_name: row.get(2)?,
        media_type: row.get(3)?,
        size: row.get(4)?,
        status: row.get(5)?,
        error_message: row.get(6)?,
        details: row.get(7)?,
        receipt: row.get(8)?,
    })
}

impl ItemRow {
    fn decode(self) -> Result<StoredReceipt, StoreError> {
        let corrupt = |reason: String| StoreError::Corrupt {
            id: self.id.clone(),
            reason,
        };
        let created_at = DateTime::parse_from_rfc3339(&self.created_at)
            .map_err(|e| corrupt(format!("created_at: {}", e)))?
            .with_timezone(&Utc);
        let status = ItemStatus::parse(&self.status)
            .ok_or_else(|| corrupt(format!("unknown status '{}'", self.status)))?;
        let details = serde_json::from_str(&self.details)?;
        let receipt = match self.receipt.as_deref() {
            Some(json) => Some(serde_json::from_str(json)?),
            None => None,
        };
        Ok(StoredReceipt {
            id: self.id,
            created_at,
            file_name: self.file_name,
            media_type: self.media_type,
            size: self.size.max(0) as u64,
            status,
            error: self.error_message,
            details,
            receipt,
        })
    }
}

fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

impl ReceiptStore for Db {
    fn put(&self, item: &StoredReceipt) -> Result<(), StoreError> {
        let details = serde_json::to_string(&item.details)?;
        let receipt = item.receipt.as_ref().map(serde_json::to_string).transpose()?;
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO items (id, created_at, file_name, media_type, size, status, error_message, details, receipt)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(id) DO UPDATE SET
                created_at = excluded.created_at,
                file_name = excluded.file_name,
                media_type = excluded.media_type,
                size = excluded.size,
                status = excluded.status,
                error_message = excluded.error_message,
                details = excluded.details,
                receipt = excluded.receipt",
            params![
                item.id,
                format_timestamp(&item.created_at),
                item.file_name,
                item.media_type,
                item.size as i64,
                item.status.as_str(),
                item.error,
                details,
                receipt,
            ],
        )?;
        tracing::debug!(receipt_id = %item.id, status = item.status.as_str(), "stored receipt");
        Ok(())
    }

    fn get(&self, id: &str) -> Result<Option<StoredReceipt>, StoreError> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                &format!("SELECT {} FROM items WHERE id = ?1", ITEM_COLUMNS),
                params![id],
                read_row,
            )
            .optional()?;
        row.map(ItemRow::decode).transpose()
    }

    fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let mut conn = self.lock()?;
        let tx = conn.transaction()?;
        let removed = tx.execute("DELETE FROM items WHERE id = ?1", params![id])?;
        tx.execute("DELETE FROM images WHERE id = ?1", params![id])?;
        tx.commit()?;
        tracing::debug!(receipt_id = %id, removed, "deleted receipt");
        Ok(removed > 0)
    }

    fn list(&self) -> Result<Vec<StoredReceipt>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM items ORDER BY created_at DESC, rowid DESC",
            ITEM_COLUMNS
        ))?;
        let rows = stmt
            .query_map([], read_row)?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter().map(ItemRow::decode).collect()
    }

    fn put_image(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO images (id, bytes) VALUES (?1, ?2)
             ON CONFLICT(id) DO UPDATE SET bytes = excluded.bytes",
            params![id, bytes],
        )?;
        Ok(())
    }

    fn get_image(&self, id: &str) -> Result<Option<Vec<u8>>, StoreError> {
        let conn = self.lock()?;
        Ok(conn
            .query_row("SELECT bytes FROM images WHERE id = ?1", params![id], |r| r.get(0))
            .optional()?)
    }
}
