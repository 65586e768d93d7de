use crate::app::ports::LoadLedgerPort;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::sync::Mutex;

/// Durable record of completed loads, in a small SQLite file.
pub struct SqliteLoadLedger {
    conn: Mutex<Connection>,
}

impl SqliteLoadLedger {
    pub fn open<P: AsRef<Path>>(db_path: P) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;
            CREATE TABLE IF NOT EXISTS completed_loads (
                load_key    TEXT PRIMARY KEY,
                filename    TEXT NOT NULL,
                table_name  TEXT NOT NULL,
                row_count   INTEGER NOT NULL,
                loaded_at   TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow::anyhow!("load ledger lock poisoned"))
    }
}

impl LoadLedgerPort for SqliteLoadLedger {
    fn is_loaded(&self, load_key: &str) -> anyhow::Result<bool> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare("SELECT 1 FROM completed_loads WHERE load_key = ?1")?;
        let mut rows = stmt.query(params![load_key])?;
        let found = rows.next()?.is_some();
        Ok(found)
    }

    fn record_load(&self, load_key: &str, filename: &str, table: &str, rows: usize) -> anyhow::Result<()> {
        self.conn()?.execute(
            "INSERT INTO completed_loads (load_key, filename, table_name, row_count, loaded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(load_key) DO UPDATE SET filename=excluded.filename, loaded_at=excluded.loaded_at",
            params![load_key, filename, table, rows as i64, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_recorded_loads_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ledger").join("loads.db");

        {
            let ledger = SqliteLoadLedger::open(&path).unwrap();
            assert!(!ledger.is_loaded("key-1").unwrap());
            ledger.record_load("key-1", "orders.json", "orders", 3).unwrap();
            ledger.record_load("key-1", "orders.json", "orders", 3).unwrap();
        }

        let reopened = SqliteLoadLedger::open(&path).unwrap();
        assert!(reopened.is_loaded("key-1").unwrap());
        assert!(!reopened.is_loaded("key-2").unwrap());
    }
}
