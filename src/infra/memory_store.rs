use crate::app::ports::{LoadLedgerPort, TableStorePort};
use crate::error::{EtlError, Result};
use crate::pipeline::processing::schema::SchemaMapping;
use crate::types::Row;
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tracing::debug;

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: SchemaMapping,
    rows: Vec<Row>,
}

/// Table store kept in process memory, for tests and dry runs.
pub struct InMemoryTableStore {
    tables: Arc<Mutex<HashMap<String, MemoryTable>>>,
    available: AtomicBool,
}

impl Default for InMemoryTableStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryTableStore {
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(HashMap::new())),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate the store going away (`false`) or coming back.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::SeqCst);
    }

    pub fn schema(&self, table: &str) -> Option<SchemaMapping> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.get(table).map(|t| t.schema.clone()))
    }

    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.tables
            .lock()
            .ok()
            .and_then(|t| t.get(table).map(|t| t.rows.clone()))
            .unwrap_or_default()
    }

    fn check_available(&self) -> Result<()> {
        if self.available.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EtlError::StoreConnection("in-memory store marked unavailable".to_string()))
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, MemoryTable>>> {
        self.tables
            .lock()
            .map_err(|_| EtlError::Store("in-memory store lock poisoned".to_string()))
    }
}

#[async_trait]
impl TableStorePort for InMemoryTableStore {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        self.check_available()?;
        Ok(self.lock()?.contains_key(table))
    }

    async fn create_table(&self, table: &str, schema: &SchemaMapping) -> Result<()> {
        self.check_available()?;
        let mut tables = self.lock()?;
        if tables.contains_key(table) {
            return Err(EtlError::Store(format!("table {} already exists", table)));
        }
        tables.insert(
            table.to_string(),
            MemoryTable {
                schema: schema.with_audit_columns(),
                rows: Vec::new(),
            },
        );
        debug!("Created in-memory table {}", table);
        Ok(())
    }

    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<usize> {
        self.check_available()?;
        let mut tables = self.lock()?;
        let target = tables
            .get_mut(table)
            .ok_or_else(|| EtlError::Store(format!("table {} does not exist", table)))?;

        let known: HashSet<&str> = target.schema.names().collect();
        for row in rows {
            if let Some(unknown) = row.keys().find(|k| !known.contains(k.as_str())) {
                return Err(EtlError::Store(format!("table {} has no column {}", table, unknown)));
            }
        }
        target.rows.extend(rows.iter().cloned());
        Ok(rows.len())
    }

    async fn table_columns(&self, table: &str) -> Result<Option<Vec<String>>> {
        self.check_available()?;
        Ok(self
            .lock()?
            .get(table)
            .map(|t| t.schema.names().map(String::from).collect()))
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

/// Load ledger that forgets everything when the process exits.
#[derive(Debug, Default)]
pub struct InMemoryLoadLedger {
    keys: Mutex<HashSet<String>>,
}

impl LoadLedgerPort for InMemoryLoadLedger {
    fn is_loaded(&self, load_key: &str) -> anyhow::Result<bool> {
        let keys = self
            .keys
            .lock()
            .map_err(|_| anyhow::anyhow!("ledger lock poisoned"))?;
        Ok(keys.contains(load_key))
    }

    fn record_load(&self, load_key: &str, _filename: &str, _table: &str, _rows: usize) -> anyhow::Result<()> {
        self.keys
            .lock()
            .map_err(|_| anyhow::anyhow!("ledger lock poisoned"))?
            .insert(load_key.to_string());
        Ok(())
    }
}
