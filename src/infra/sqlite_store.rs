use crate::app::ports::TableStorePort;
use crate::error::{EtlError, Result};
use crate::pipeline::processing::schema::SchemaMapping;
use crate::types::Row;
use async_trait::async_trait;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::debug;

/// Table store backed by a local SQLite database file.
#[derive(Clone)]
pub struct SqliteTableStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteTableStore {
    pub fn open<P: AsRef<Path>>(db_path: P, busy_timeout: Duration) -> Result<Self> {
        if let Some(parent) = db_path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path.as_ref())
            .map_err(|e| EtlError::StoreConnection(e.to_string()))?;
        conn.busy_timeout(busy_timeout)?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().map_err(|e| EtlError::StoreConnection(e.to_string()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|_| EtlError::Store("sqlite connection lock poisoned".to_string()))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| EtlError::Aborted(format!("sqlite task failed: {}", e)))?
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn to_sql_value(value: &Value) -> SqlValue {
    match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match n.as_i64() {
            Some(i) => SqlValue::Integer(i),
            None => n.as_f64().map(SqlValue::Real).unwrap_or(SqlValue::Null),
        },
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    }
}

/// No NOT NULL constraints: the table outlives the batch that created it.
fn create_table_sql(table: &str, schema: &SchemaMapping) -> String {
    let columns: Vec<String> = schema
        .with_audit_columns()
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql()))
        .collect();
    format!("CREATE TABLE {} ({})", quote_ident(table), columns.join(", "))
}

#[async_trait]
impl TableStorePort for SqliteTableStore {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let table = table.to_string();
        self.with_conn(move |conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = ?1",
                params![table],
                |row| row.get(0),
            )?;
            Ok(count > 0)
        })
        .await
    }

    async fn create_table(&self, table: &str, schema: &SchemaMapping) -> Result<()> {
        let sql = create_table_sql(table, schema);
        debug!("{}", sql);
        self.with_conn(move |conn| {
            conn.execute_batch(&sql)?;
            Ok(())
        })
        .await
    }

    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<usize> {
        let Some(first) = rows.first() else {
            return Ok(0);
        };
        let columns: Vec<String> = first.keys().cloned().collect();
        let sql = format!(
            "INSERT INTO {} ({}) VALUES ({})",
            quote_ident(table),
            columns.iter().map(|c| quote_ident(c)).collect::<Vec<_>>().join(", "),
            (1..=columns.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(", ")
        );
        let values: Vec<Vec<SqlValue>> = rows
            .iter()
            .map(|row| {
                columns
                    .iter()
                    .map(|c| row.get(c).map(to_sql_value).unwrap_or(SqlValue::Null))
                    .collect()
            })
            .collect();

        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare(&sql)?;
                for row in &values {
                    stmt.execute(params_from_iter(row.iter()))?;
                }
            }
            tx.commit()?;
            Ok(values.len())
        })
        .await
    }

    async fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>> {
        let pragma = format!("PRAGMA table_info({})", quote_ident(table));
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(&pragma)?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(1))?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            Ok(if names.is_empty() { None } else { Some(names) })
        })
        .await
    }

    fn backend_name(&self) -> &'static str {
        "sqlite"
    }
}
