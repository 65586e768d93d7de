use crate::constants;
use crate::error::{EtlError, Result};
use crate::types::Stage;
use chrono::{SecondsFormat, Utc};
use std::collections::BTreeMap;
use std::fmt::Display;
use std::fs::{self, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// One line of a stage's audit log. `timestamp`, `filename` and `status`
/// are filled in by the logger; every other column comes from `fields`.
#[derive(Debug, Clone, PartialEq)]
pub struct StageLogEntry {
    pub filename: String,
    pub status: String,
    pub fields: BTreeMap<&'static str, String>,
}

impl StageLogEntry {
    pub fn success(filename: impl Into<String>) -> Self {
        Self {
            filename: filename.into(),
            status: "success".to_string(),
            fields: BTreeMap::new(),
        }
    }

    pub fn error(filename: impl Into<String>, cause: &dyn Display) -> Self {
        Self {
            filename: filename.into(),
            status: format!("error: {}", cause),
            fields: BTreeMap::new(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = status.into();
        self
    }

    pub fn with(mut self, column: &'static str, value: impl ToString) -> Self {
        self.fields.insert(column, value.to_string());
        self
    }

    pub fn field(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    pub fn is_success(&self) -> bool {
        !self.status.starts_with("error")
    }
}

/// Append-only CSV audit log for one stage. The header is written once,
/// when the file is first created or found empty.
#[derive(Debug)]
pub struct StageLogger {
    path: PathBuf,
    header: Vec<&'static str>,
    lock: Mutex<()>,
}

impl StageLogger {
    pub fn new(path: impl Into<PathBuf>, header: &[&'static str]) -> Self {
        Self {
            path: path.into(),
            header: header.to_vec(),
            lock: Mutex::new(()),
        }
    }

    pub fn for_stage(logs_dir: &Path, stage: Stage) -> Self {
        let (file, header) = match stage {
            Stage::Extraction => (constants::EXTRACTION_LOG, constants::EXTRACTION_LOG_HEADER),
            Stage::Transformation => (constants::TRANSFORMATION_LOG, constants::TRANSFORMATION_LOG_HEADER),
            Stage::Loading => (constants::LOADING_LOG, constants::LOADING_LOG_HEADER),
        };
        Self::new(logs_dir.join(file), header)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn log(&self, entry: &StageLogEntry) -> Result<()> {
        let _guard = self
            .lock
            .lock()
            .map_err(|_| EtlError::Aborted("stage log lock poisoned".to_string()))?;

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let needs_header = fs::metadata(&self.path).map(|m| m.len() == 0).unwrap_or(true);
        let file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        let mut writer = csv::Writer::from_writer(file);

        if needs_header {
            writer.write_record(&self.header)?;
        }

        let timestamp = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);
        let row: Vec<&str> = self
            .header
            .iter()
            .map(|column| match *column {
                "timestamp" => timestamp.as_str(),
                "filename" => entry.filename.as_str(),
                "status" => entry.status.as_str(),
                other => entry.field(other).unwrap_or(""),
            })
            .collect();
        writer.write_record(&row)?;
        writer.flush()?;
        Ok(())
    }
}
