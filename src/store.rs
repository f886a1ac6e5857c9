// 告警确认持久化 (SQLite)

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::error::{StorageError, StorageResult};

/// 已确认的告警
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AlertRecord {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: String,
    pub title: String,
    pub description: Option<String>,
    pub priority: Option<String>,
    /// 写入时由数据库填充
    #[serde(default)]
    pub acknowledged_at: Option<String>,
}

impl AlertRecord {
    pub fn new(id: impl Into<String>, alert_type: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            alert_type: alert_type.into(),
            title: title.into(),
            description: None,
            priority: None,
            acknowledged_at: None,
        }
    }
}

/// 持久化接口: 以 id 为键的幂等写入
pub trait AlertStore: Send + Sync {
    fn upsert(&self, record: &AlertRecord) -> StorageResult<()>;

    /// 最新的在前
    fn list(&self, limit: usize) -> StorageResult<Vec<AlertRecord>>;
}

pub struct SqliteAlertStore {
    conn: Mutex<Connection>,
}

impl SqliteAlertStore {
    /// 打开数据库并建表
    pub fn open(path: &Path) -> StorageResult<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.init_schema()?;
        info!("🗄️ 告警数据库: {}", path.display());
        Ok(store)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let store = Self {
            conn: Mutex::new(Connection::open_in_memory()?),
        };
        store.init_schema()?;
        Ok(store)
    }

    pub fn init_schema(&self) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                title TEXT NOT NULL,
                description TEXT,
                priority TEXT,
                acknowledged_at TIMESTAMP DEFAULT CURRENT_TIMESTAMP
            )",
            [],
        )?;
        Ok(())
    }

    pub fn get(&self, id: &str) -> StorageResult<Option<AlertRecord>> {
        let conn = self.conn()?;
        let record = conn
            .query_row(
                "SELECT id, type, title, description, priority, acknowledged_at FROM alerts WHERE id = ?1",
                params![id],
                row_to_record,
            )
            .optional()?;
        Ok(record)
    }

    pub fn count(&self) -> StorageResult<usize> {
        let conn = self.conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM alerts", [], |row| row.get(0))?;
        Ok(count.max(0) as usize)
    }

    fn conn(&self) -> StorageResult<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|_| {
            error!("❌ 数据库连接锁已毒化: 持有锁的线程发生 panic");
            StorageError::Poisoned
        })
    }
}

impl AlertStore for SqliteAlertStore {
    fn upsert(&self, record: &AlertRecord) -> StorageResult<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT OR REPLACE INTO alerts (id, type, title, description, priority)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                record.id,
                record.alert_type,
                record.title,
                record.description,
                record.priority,
            ],
        )?;
        Ok(())
    }

    fn list(&self, limit: usize) -> StorageResult<Vec<AlertRecord>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, type, title, description, priority, acknowledged_at FROM alerts
             ORDER BY acknowledged_at DESC, rowid DESC LIMIT ?1",
        )?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = stmt.query_map(params![limit], row_to_record)?;

        let mut records = Vec::new();
        for record in rows {
            records.push(record?);
        }
        Ok(records)
    }
}

fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<AlertRecord> {
    Ok(AlertRecord {
        id: row.get(0)?,
        alert_type: row.get(1)?,
        title: row.get(2)?,
        description: row.get(3)?,
        priority: row.get(4)?,
        acknowledged_at: row.get(5)?,
    })
}
