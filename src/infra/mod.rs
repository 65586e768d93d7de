pub mod load_ledger;
pub mod memory_store;
pub mod sqlite_store;
pub mod supabase_store;

use std::sync::Arc;
use std::time::Duration;

use crate::app::ports::{LoadLedgerPort, TableStorePort};
use crate::config::{StoreBackend, StoreConfig};
use crate::error::{EtlError, Result};
use load_ledger::SqliteLoadLedger;
use memory_store::{InMemoryLoadLedger, InMemoryTableStore};
use sqlite_store::SqliteTableStore;
use supabase_store::SupabaseTableStore;

/// Open the table store named by the configuration.
pub fn build_table_store(config: &StoreConfig) -> Result<Arc<dyn TableStorePort>> {
    let timeout = Duration::from_secs(config.timeout_secs.max(1));
    let store: Arc<dyn TableStorePort> = match config.backend {
        StoreBackend::Sqlite => Arc::new(SqliteTableStore::open(&config.sqlite_path, timeout)?),
        StoreBackend::Supabase => {
            let (Some(url), Some(key)) = (&config.supabase_url, &config.supabase_key) else {
                return Err(EtlError::Config(
                    "Supabase backend requires SUPABASE_URL and SUPABASE_KEY".into(),
                ));
            };
            Arc::new(SupabaseTableStore::new(url, key, timeout)?)
        }
        StoreBackend::Memory => Arc::new(InMemoryTableStore::new()),
    };
    tracing::info!("Using {} table store", store.backend_name());
    Ok(store)
}

/// The memory backend keeps its ledger in memory too; every other backend
/// records completed loads in a local SQLite file.
pub fn build_load_ledger(config: &StoreConfig) -> Result<Arc<dyn LoadLedgerPort>> {
    match config.backend {
        StoreBackend::Memory => Ok(Arc::new(InMemoryLoadLedger::default())),
        _ => {
            let ledger = SqliteLoadLedger::open(&config.ledger_path).map_err(|e| {
                EtlError::Config(format!(
                    "Failed to open load ledger '{}': {}",
                    config.ledger_path.display(),
                    e
                ))
            })?;
            Ok(Arc::new(ledger))
        }
    }
}
