use async_trait::async_trait;

use crate::error::Result;
use crate::pipeline::processing::schema::SchemaMapping;
use crate::types::Row;

/// The external table store the loading stage writes to.
#[async_trait]
pub trait TableStorePort: Send + Sync {
    async fn table_exists(&self, table: &str) -> Result<bool>;

    /// Create `table` with `schema` plus the `load_status` and
    /// `load_timestamp` audit columns.
    async fn create_table(&self, table: &str, schema: &SchemaMapping) -> Result<()>;

    /// Insert rows and return how many were written. Implementations bound
    /// their own time (busy timeout, HTTP client timeout); callers await the
    /// call to completion.
    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<usize>;

    /// Column names of an existing table, when the store can report them.
    async fn table_columns(&self, _table: &str) -> Result<Option<Vec<String>>> {
        Ok(None)
    }

    fn backend_name(&self) -> &'static str;
}

/// Remembers which (source, table) loads already completed so a
/// re-delivered file is not inserted twice.
pub trait LoadLedgerPort: Send + Sync {
    fn is_loaded(&self, load_key: &str) -> anyhow::Result<bool>;

    fn record_load(&self, load_key: &str, filename: &str, table: &str, rows: usize) -> anyhow::Result<()>;
}
