use crate::constants;
use crate::error::{EtlError, Result};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Process configuration, read from `config/etl.toml` when present and then
/// overridden by environment variables.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub data_root: PathBuf,
    pub logs_dir: PathBuf,
    pub tags_path: PathBuf,
    pub overrides_path: PathBuf,
    /// Address for the Prometheus exporter; metrics are only recorded in-process when unset.
    pub metrics_addr: Option<String>,
    pub watcher: WatcherConfig,
    pub extraction: ExtractionConfig,
    pub store: StoreConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WatcherConfig {
    pub poll_interval_ms: u64,
    pub queue_depth: usize,
    /// Number of waiting input files above which a backlog warning is logged.
    pub backlog_alert: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub max_flatten_depth: usize,
    pub retain_outer_key: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    Sqlite,
    Supabase,
    Memory,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub backend: StoreBackend,
    pub sqlite_path: PathBuf,
    pub ledger_path: PathBuf,
    pub supabase_url: Option<String>,
    pub supabase_key: Option<String>,
    pub timeout_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            logs_dir: PathBuf::from("logs"),
            tags_path: PathBuf::from(constants::DEFAULT_TAGS_PATH),
            overrides_path: PathBuf::from(constants::DEFAULT_OVERRIDES_PATH),
            metrics_addr: None,
            watcher: WatcherConfig::default(),
            extraction: ExtractionConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl Default for WatcherConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            queue_depth: 64,
            backlog_alert: 500,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_flatten_depth: 8,
            retain_outer_key: false,
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::Sqlite,
            sqlite_path: PathBuf::from("data/warehouse.db"),
            ledger_path: PathBuf::from("data/load_ledger.db"),
            supabase_url: None,
            supabase_key: None,
            timeout_secs: 30,
        }
    }
}

impl Config {
    /// Load configuration from `path`, or from the default location when it
    /// exists, falling back to built-in defaults. Environment overrides are
    /// applied last.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new(constants::DEFAULT_CONFIG_PATH);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            EtlError::Config(format!(
                "Failed to read config file '{}': {}",
                path.display(),
                e
            ))
        })?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Apply `ETL_*` and Supabase environment overrides through `lookup`.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = non_empty("ETL_DATA_ROOT") {
            self.data_root = PathBuf::from(v);
        }
        if let Some(v) = non_empty("ETL_LOGS_DIR") {
            self.logs_dir = PathBuf::from(v);
        }
        if let Some(v) = non_empty("ETL_TAGS_PATH") {
            self.tags_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("ETL_OVERRIDES_PATH") {
            self.overrides_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("ETL_METRICS_ADDR") {
            self.metrics_addr = Some(v);
        }
        if let Some(v) = non_empty("ETL_STORE_BACKEND") {
            match v.to_lowercase().as_str() {
                "sqlite" => self.store.backend = StoreBackend::Sqlite,
                "supabase" => self.store.backend = StoreBackend::Supabase,
                "memory" => self.store.backend = StoreBackend::Memory,
                other => tracing::warn!("Ignoring unknown ETL_STORE_BACKEND '{}'", other),
            }
        }
        if let Some(v) = non_empty("ETL_SQLITE_PATH") {
            self.store.sqlite_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("ETL_LEDGER_PATH") {
            self.store.ledger_path = PathBuf::from(v);
        }
        if let Some(v) = non_empty("SUPABASE_URL") {
            self.store.supabase_url = Some(v);
        }
        if let Some(v) = non_empty("SUPABASE_KEY") {
            self.store.supabase_key = Some(v);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.watcher.queue_depth == 0 {
            return Err(EtlError::Config("watcher.queue_depth must be at least 1".into()));
        }
        if self.watcher.poll_interval_ms == 0 {
            return Err(EtlError::Config("watcher.poll_interval_ms must be positive".into()));
        }
        if self.extraction.max_flatten_depth == 0 {
            return Err(EtlError::Config(
                "extraction.max_flatten_depth must be at least 1".into(),
            ));
        }
        if self.store.backend == StoreBackend::Supabase
            && (self.store.supabase_url.is_none() || self.store.supabase_key.is_none())
        {
            return Err(EtlError::Config(
                "Supabase backend requires SUPABASE_URL and SUPABASE_KEY".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config: Config = toml::from_str(
            r#"
            data_root = "/srv/etl"

            [watcher]
            queue_depth = 4
            "#,
        )
        .unwrap();

        assert_eq!(config.data_root, PathBuf::from("/srv/etl"));
        assert_eq!(config.watcher.queue_depth, 4);
        assert_eq!(config.watcher.poll_interval_ms, 1000);
        assert_eq!(config.extraction.max_flatten_depth, 8);
        assert_eq!(config.store.backend, StoreBackend::Sqlite);
    }

    #[test]
    fn test_env_overrides_win() {
        let env: HashMap<&str, &str> = [
            ("ETL_DATA_ROOT", "/tmp/pipeline"),
            ("ETL_STORE_BACKEND", "memory"),
            ("SUPABASE_URL", "  "),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_env_overrides(|k| env.get(k).map(|v| v.to_string()));

        assert_eq!(config.data_root, PathBuf::from("/tmp/pipeline"));
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.store.supabase_url.is_none());
    }

    #[test]
    fn test_supabase_requires_credentials() {
        let mut config = Config::default();
        config.store.backend = StoreBackend::Supabase;
        assert!(config.validate().is_err());

        config.store.supabase_url = Some("https://example.supabase.co".into());
        config.store.supabase_key = Some("service-key".into());
        assert!(config.validate().is_ok());
    }
}
