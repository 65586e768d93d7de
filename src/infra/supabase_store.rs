use crate::app::ports::TableStorePort;
use crate::error::{EtlError, Result};
use crate::pipeline::processing::schema::SchemaMapping;
use crate::types::Row;
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde_json::json;
use std::time::Duration;
use tracing::debug;

const INSERT_CHUNK_ROWS: usize = 500;

/// Table store on a Supabase project, through its PostgREST API.
///
/// Tables are created through an `execute_sql(sql text)` RPC function that
/// must exist in the target project.
pub struct SupabaseTableStore {
    client: Client,
    base_url: String,
    key: String,
}

impl SupabaseTableStore {
    pub fn new(url: &str, key: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| EtlError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: url.trim_end_matches('/').to_string(),
            key: key.to_string(),
        })
    }

    fn authed(&self, req: RequestBuilder) -> RequestBuilder {
        req.header("Authorization", format!("Bearer {}", self.key))
            .header("apikey", self.key.clone())
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{}", self.base_url, table)
    }
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Columns stay nullable: a later batch for the same table may lack values
/// the first one had.
fn create_table_sql(table: &str, schema: &SchemaMapping) -> String {
    let columns: Vec<String> = schema
        .with_audit_columns()
        .columns()
        .iter()
        .map(|c| format!("{} {}", quote_ident(&c.name), c.column_type.sql()))
        .collect();
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote_ident(table),
        columns.join(", ")
    )
}

async fn check_status(resp: reqwest::Response, what: &str) -> Result<()> {
    let status = resp.status();
    if status.is_success() {
        return Ok(());
    }
    let body = resp.text().await.unwrap_or_default();
    let message = format!("Supabase {} failed: {} - {}", what, status, body);
    if status.is_server_error() || status == StatusCode::UNAUTHORIZED {
        Err(EtlError::StoreConnection(message))
    } else {
        Err(EtlError::Store(message))
    }
}

#[async_trait]
impl TableStorePort for SupabaseTableStore {
    async fn table_exists(&self, table: &str) -> Result<bool> {
        let resp = self
            .authed(self.client.get(self.table_url(table)))
            .query(&[("select", "*"), ("limit", "1")])
            .send()
            .await?;
        match resp.status() {
            s if s.is_success() => Ok(true),
            StatusCode::NOT_FOUND => Ok(false),
            _ => check_status(resp, "table lookup").await.map(|_| false),
        }
    }

    async fn create_table(&self, table: &str, schema: &SchemaMapping) -> Result<()> {
        let sql = create_table_sql(table, schema);
        debug!("{}", sql);
        let resp = self
            .authed(self.client.post(format!("{}/rest/v1/rpc/execute_sql", self.base_url)))
            .json(&json!({ "sql": sql }))
            .send()
            .await?;
        check_status(resp, "create table").await
    }

    async fn insert_rows(&self, table: &str, rows: &[Row]) -> Result<usize> {
        for chunk in rows.chunks(INSERT_CHUNK_ROWS) {
            let resp = self
                .authed(self.client.post(self.table_url(table)))
                .header("Prefer", "return=minimal")
                .json(chunk)
                .send()
                .await?;
            check_status(resp, "insert").await?;
        }
        Ok(rows.len())
    }

    fn backend_name(&self) -> &'static str {
        "supabase"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::schema::SchemaInferrer;
    use crate::types::RecordSet;

    #[test]
    fn test_create_statement_is_idempotent_ddl() {
        let records = RecordSet::from_rows(vec![json!({"price": 1.25, "sku": "a1"})
            .as_object()
            .cloned()
            .unwrap()]);
        let sql = create_table_sql("items", &SchemaInferrer.infer(&records));
        assert_eq!(
            sql,
            "CREATE TABLE IF NOT EXISTS \"items\" (\"price\" FLOAT, \
             \"sku\" VARCHAR(2), \"load_status\" VARCHAR(50), \"load_timestamp\" TIMESTAMP)"
        );
    }

    #[test]
    fn test_base_url_is_trimmed() {
        let store = SupabaseTableStore::new("https://x.supabase.co/", "k", Duration::from_secs(1)).unwrap();
        assert_eq!(store.table_url("t"), "https://x.supabase.co/rest/v1/t");
    }
}
