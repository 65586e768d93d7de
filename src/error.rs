use thiserror::Error;

/// Errors raised while moving a file through one pipeline stage.
///
/// Every variant is caught at the stage runner boundary and written to the
/// stage log; none of them stop the watch loop. Type conflicts found during
/// schema inference are resolved to TEXT and never surface here.
#[derive(Error, Debug)]
pub enum EtlError {
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    #[error("Unsupported JSON structure in {path}: {detail}")]
    UnsupportedStructure { path: String, detail: String },

    #[error("Failed to parse {path}: {reason}")]
    ParseFailure { path: String, reason: String },

    #[error("Column '{column}' skipped by {pass}: {reason}")]
    ColumnTransformFailure {
        pass: String,
        column: String,
        reason: String,
    },

    #[error("Store connection failed: {0}")]
    StoreConnection(String),

    #[error("Store operation failed: {0}")]
    Store(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Processing aborted: {0}")]
    Aborted(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("YAML deserialization failed: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl EtlError {
    pub fn parse_failure(path: impl Into<String>, reason: impl ToString) -> Self {
        EtlError::ParseFailure {
            path: path.into(),
            reason: reason.to_string(),
        }
    }

    pub fn unsupported_structure(path: impl Into<String>, detail: impl Into<String>) -> Self {
        EtlError::UnsupportedStructure {
            path: path.into(),
            detail: detail.into(),
        }
    }

    /// True for failures that leave the file in place for another attempt
    /// once the store is reachable again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, EtlError::StoreConnection(_))
    }
}

impl From<rusqlite::Error> for EtlError {
    fn from(e: rusqlite::Error) -> Self {
        EtlError::Store(e.to_string())
    }
}

impl From<reqwest::Error> for EtlError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() || e.is_connect() {
            EtlError::StoreConnection(e.to_string())
        } else {
            EtlError::Store(e.to_string())
        }
    }
}

pub type Result<T> = std::result::Result<T, EtlError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_text_names_the_cause() {
        let err = EtlError::UnsupportedFormat(".xlsx".to_string());
        assert_eq!(err.to_string(), "Unsupported file format: .xlsx");

        let err = EtlError::parse_failure("raw/a.csv", "unterminated quote");
        assert_eq!(err.to_string(), "Failed to parse raw/a.csv: unterminated quote");
    }

    #[test]
    fn test_only_connection_errors_are_retryable() {
        assert!(EtlError::StoreConnection("refused".into()).is_retryable());
        assert!(!EtlError::Store("bad column".into()).is_retryable());
        assert!(!EtlError::UnsupportedFormat(".txt".into()).is_retryable());
    }
}
