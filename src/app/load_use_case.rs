use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::app::overrides::TableOverrides;
use crate::app::ports::{LoadLedgerPort, TableStorePort};
use crate::constants;
use crate::error::{EtlError, Result};
use crate::idempotency::{compute_load_key, content_checksum};
use crate::metrics::StageMetrics;
use crate::pipeline::archive::Archiver;
use crate::pipeline::payload::PayloadReader;
use crate::pipeline::processing::schema::{make_columns_safe, safe_identifier, ColumnType, SchemaInferrer};
use crate::pipeline::runner::{FileProcessor, PipelineItem};
use crate::pipeline::stage_log::StageLogEntry;
use crate::types::{RecordSet, Stage};

/// Enriched payload in: rows into the table store, file into the archive.
pub struct LoadUseCase {
    store: Arc<dyn TableStorePort>,
    ledger: Arc<dyn LoadLedgerPort>,
    archiver: Archiver,
    overrides: TableOverrides,
    reader: PayloadReader,
    store_timeout: Duration,
}

impl LoadUseCase {
    pub fn new(
        store: Arc<dyn TableStorePort>,
        ledger: Arc<dyn LoadLedgerPort>,
        archiver: Archiver,
        overrides: TableOverrides,
        reader: PayloadReader,
        store_timeout: Duration,
    ) -> Self {
        Self {
            store,
            ledger,
            archiver,
            overrides,
            reader,
            store_timeout,
        }
    }

    async fn with_timeout<T>(&self, what: &str, call: impl Future<Output = Result<T>>) -> Result<T> {
        match tokio::time::timeout(self.store_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(EtlError::StoreConnection(format!(
                "{} timed out after {}s on {}",
                what,
                self.store_timeout.as_secs(),
                self.store.backend_name()
            ))),
        }
    }

    /// `target_table` on the first row, then an override, then the file stem.
    fn resolve_table_name(&self, stem: &str, records: &RecordSet) -> String {
        let from_data = records
            .rows()
            .first()
            .and_then(|row| row.get(constants::TARGET_TABLE_FIELD))
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty());
        let from_override = self.overrides.for_stem(stem).and_then(|o| o.table_name.as_deref());
        safe_identifier(from_data.or(from_override).unwrap_or(stem))
    }
}

#[async_trait]
impl FileProcessor for LoadUseCase {
    fn stage(&self) -> Stage {
        Stage::Loading
    }

    async fn process(&self, item: &PipelineItem) -> Result<StageLogEntry> {
        let payload = self.reader.read(&item.path)?;
        let mut records = payload.record_set();
        let stem = payload.source_stem();
        let table = self.resolve_table_name(&stem, &records);
        records.drop_column(constants::TARGET_TABLE_FIELD);

        let checksum = match payload.metadata.source_checksum.clone() {
            Some(sum) => sum,
            None => content_checksum(&std::fs::read(&item.path)?),
        };
        let load_key = compute_load_key(&checksum, &table);

        let already_loaded = self
            .ledger
            .is_loaded(&load_key)
            .map_err(|e| EtlError::Store(format!("load ledger: {}", e)))?;
        if already_loaded {
            warn!("{} was already loaded into {}; archiving without insert", item.filename(), table);
            StageMetrics::record_duplicate_load_skipped();
            let archived = self.archiver.archive(&item.path)?;
            return Ok(StageLogEntry::success(item.filename())
                .with_status("skipped: already loaded")
                .with("table_name", &table)
                .with("row_count", 0)
                .with("archived_path", archived.display()));
        }

        let mut forced_types: Vec<(String, ColumnType)> = Vec::new();
        if let Some(entry) = self.overrides.for_stem(&stem) {
            for (original, field) in &entry.fields {
                if records.has_column(original) {
                    records.rename_column(original, &field.name);
                }
                if let Some(type_name) = &field.column_type {
                    forced_types.push((safe_identifier(&field.name), ColumnType::parse(type_name)?));
                }
            }
        }
        make_columns_safe(&mut records);

        let mut schema = SchemaInferrer.infer(&records);
        for (column, column_type) in forced_types {
            schema.set_type(&column, column_type);
        }

        if !self.with_timeout("table_exists", self.store.table_exists(&table)).await? {
            info!("Creating table {} with {} columns", table, schema.len());
            self.with_timeout("create_table", self.store.create_table(&table, &schema))
                .await?;
        } else if let Some(existing) = self
            .with_timeout("table_columns", self.store.table_columns(&table))
            .await?
        {
            let missing: Vec<&str> = schema
                .names()
                .filter(|c| !existing.iter().any(|e| e.as_str() == *c))
                .collect();
            if !missing.is_empty() {
                // Existing tables are never altered
                warn!(
                    "Table {} lacks columns {:?} present in {}; the insert may fail",
                    table,
                    missing,
                    item.filename()
                );
            }
        }

        let loaded_at = Value::String(Utc::now().naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string());
        let rows: Vec<_> = records
            .dense_rows()
            .into_iter()
            .map(|mut row| {
                row.insert(
                    constants::LOAD_STATUS_COLUMN.to_string(),
                    Value::String(constants::LOAD_STATUS_LOADED.to_string()),
                );
                row.insert(constants::LOAD_TIMESTAMP_COLUMN.to_string(), loaded_at.clone());
                row
            })
            .collect();

        // Never cut short: an abandoned insert can still commit behind our back
        let inserted = self.store.insert_rows(&table, &rows).await?;
        StageMetrics::record_rows_loaded(inserted);

        // A crash between the insert and this write replays the file on restart
        if let Err(e) = self.ledger.record_load(&load_key, &item.filename(), &table, inserted) {
            warn!("Loaded {} but could not record it in the ledger: {}", item.filename(), e);
        }

        let archived = self.archiver.archive(&item.path)?;
        info!("Loaded {} rows from {} into {}", inserted, item.filename(), table);

        Ok(StageLogEntry::success(item.filename())
            .with("table_name", &table)
            .with("row_count", inserted)
            .with("archived_path", archived.display()))
    }

    fn failure_entry(&self, item: &PipelineItem, error: &EtlError) -> StageLogEntry {
        StageLogEntry::error(item.filename(), error)
            .with("table_name", "")
            .with("row_count", 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::memory_store::{InMemoryLoadLedger, InMemoryTableStore};
    use crate::pipeline::payload::Payload;
    use crate::pipeline::processing::schema::SchemaMapping;
    use crate::types::{Row, SourceFormat};
    use serde_json::json;
    use std::fs;
    use std::path::Path;
    use tempfile::tempdir;

    fn enriched_file(dir: &Path, stem: &str, rows: Value, checksum: &str) -> std::path::PathBuf {
        let records = RecordSet::from_rows(
            rows.as_array()
                .unwrap()
                .iter()
                .map(|r| r.as_object().cloned().unwrap())
                .collect(),
        );
        Payload::from_records(&records, format!("{}.csv", stem), SourceFormat::Csv, Some(checksum.into()))
            .write_atomic(dir, stem)
            .unwrap()
    }

    fn use_case(dir: &Path, store: Arc<InMemoryTableStore>, overrides: TableOverrides) -> LoadUseCase {
        LoadUseCase::new(
            store,
            Arc::new(InMemoryLoadLedger::default()),
            Archiver::new(dir.join("archived")),
            overrides,
            PayloadReader::default(),
            Duration::from_secs(5),
        )
    }

    #[tokio::test]
    async fn test_reserved_column_names_are_renamed_and_rows_stamped() {
        let dir = tempdir().unwrap();
        let input = enriched_file(
            &dir.path().join("enriched"),
            "orders",
            json!([{"select": "a", "order": 1}, {"select": "b", "order": 2}]),
            "c1",
        );
        let store = Arc::new(InMemoryTableStore::default());
        let uc = use_case(dir.path(), store.clone(), TableOverrides::default());

        let entry = uc.process(&PipelineItem::new(input.clone(), Stage::Loading, 1)).await.unwrap();

        assert_eq!(entry.field("table_name"), Some("orders"));
        assert_eq!(entry.field("row_count"), Some("2"));
        assert!(!input.exists());
        assert!(dir.path().join("archived").join("orders.json").exists());

        let schema = store.schema("orders").unwrap();
        let names: Vec<&str> = schema.names().collect();
        assert_eq!(names, vec!["select_field", "order_field", "load_status", "load_timestamp"]);
        let rows = store.rows("orders");
        assert_eq!(rows[1]["select_field"], json!("b"));
        assert_eq!(rows[0]["load_status"], json!("loaded"));
        assert!(rows[0]["load_timestamp"].is_string());
    }

    #[tokio::test]
    async fn test_target_table_and_overrides_pick_the_table() {
        let dir = tempdir().unwrap();
        let enriched = dir.path().join("enriched");
        let overrides = TableOverrides::from_yaml_str(
            "cust_2024:\n  table_name: customers\n  fields:\n    cust_no: {name: customer_id, type: TEXT}\n",
        )
        .unwrap();
        let store = Arc::new(InMemoryTableStore::default());
        let uc = use_case(dir.path(), store.clone(), overrides);

        let routed = enriched_file(&enriched, "misc", json!([{"target_table": "Audit Log", "v": 1}]), "c2");
        uc.process(&PipelineItem::new(routed, Stage::Loading, 1)).await.unwrap();
        assert_eq!(store.rows("audit_log").len(), 1);
        assert!(!store.rows("audit_log")[0].contains_key("target_table"));

        let overridden = enriched_file(&enriched, "cust_2024", json!([{"cust_no": 7}]), "c3");
        uc.process(&PipelineItem::new(overridden, Stage::Loading, 1)).await.unwrap();
        let schema = store.schema("customers").unwrap();
        assert_eq!(schema.get("customer_id").unwrap().column_type, ColumnType::Text);
    }

    #[tokio::test]
    async fn test_redelivered_file_is_not_inserted_twice() {
        let dir = tempdir().unwrap();
        let enriched = dir.path().join("enriched");
        let store = Arc::new(InMemoryTableStore::default());
        let uc = use_case(dir.path(), store.clone(), TableOverrides::default());

        for _ in 0..2 {
            let input = enriched_file(&enriched, "events", json!([{"id": 1}, {"id": 2}]), "same");
            uc.process(&PipelineItem::new(input, Stage::Loading, 1)).await.unwrap();
        }

        assert_eq!(store.rows("events").len(), 2);
        assert_eq!(fs::read_dir(dir.path().join("archived")).unwrap().count(), 2);
    }

    /// Inserts that take longer than the load's store timeout.
    struct SlowInsertStore {
        inner: Arc<InMemoryTableStore>,
        delay: Duration,
    }

    #[async_trait]
    impl TableStorePort for SlowInsertStore {
        async fn table_exists(&self, table: &str) -> Result<bool> {
            self.inner.table_exists(table).await
        }

        async fn create_table(&self, table: &str, schema: &SchemaMapping) -> Result<()> {
            self.inner.create_table(table, schema).await
        }

        async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<usize> {
            tokio::time::sleep(self.delay).await;
            self.inner.insert_rows(table, rows).await
        }

        fn backend_name(&self) -> &'static str {
            "slow"
        }
    }

    #[tokio::test]
    async fn test_slow_insert_completes_once_and_redelivery_is_skipped() {
        let dir = tempdir().unwrap();
        let enriched = dir.path().join("enriched");
        let inner = Arc::new(InMemoryTableStore::default());
        let uc = LoadUseCase::new(
            Arc::new(SlowInsertStore {
                inner: inner.clone(),
                delay: Duration::from_millis(300),
            }),
            Arc::new(InMemoryLoadLedger::default()),
            Archiver::new(dir.path().join("archived")),
            TableOverrides::default(),
            PayloadReader::default(),
            Duration::from_millis(50),
        );

        let first = enriched_file(&enriched, "events", json!([{"id": 1}]), "slow-sum");
        let entry = uc.process(&PipelineItem::new(first, Stage::Loading, 1)).await.unwrap();
        assert_eq!(entry.field("row_count"), Some("1"));

        let again = enriched_file(&enriched, "events", json!([{"id": 1}]), "slow-sum");
        let entry = uc.process(&PipelineItem::new(again, Stage::Loading, 2)).await.unwrap();
        assert_eq!(entry.status, "skipped: already loaded");
        assert_eq!(inner.rows("events").len(), 1);
    }

    #[tokio::test]
    async fn test_unreachable_store_leaves_file_in_place() {
        let dir = tempdir().unwrap();
        let input = enriched_file(&dir.path().join("enriched"), "orders", json!([{"id": 1}]), "c4");
        let store = Arc::new(InMemoryTableStore::default());
        store.set_available(false);
        let uc = use_case(dir.path(), store.clone(), TableOverrides::default());

        let item = PipelineItem::new(input.clone(), Stage::Loading, 1);
        let err = uc.process(&item).await.unwrap_err();

        assert!(err.is_retryable());
        assert!(input.exists());
        assert!(uc.failure_entry(&item, &err).status.starts_with("error: Store connection failed"));
    }
}
