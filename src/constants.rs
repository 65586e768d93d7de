/// Directory and file name constants shared by every stage.
/// These define the on-disk contract between the extraction, transformation
/// and loading processes.

// Stage directories under the data root
pub const RAW_DIR: &str = "raw";
pub const PROCESSED_DIR: &str = "processed";
pub const ENRICHED_DIR: &str = "enriched";
pub const ARCHIVED_DIR: &str = "archived";

// Rule and override files
pub const DEFAULT_CONFIG_PATH: &str = "config/etl.toml";
pub const DEFAULT_TAGS_PATH: &str = "config/tags.yaml";
pub const DEFAULT_OVERRIDES_PATH: &str = "config/table_overrides.yaml";

// Stage audit logs
pub const EXTRACTION_LOG: &str = "extraction_log.csv";
pub const TRANSFORMATION_LOG: &str = "transformation_log.csv";
pub const LOADING_LOG: &str = "loading_log.csv";

pub const EXTRACTION_LOG_HEADER: &[&str] = &[
    "timestamp",
    "filename",
    "source_format",
    "row_count",
    "column_count",
    "status",
    "output_path",
];

pub const TRANSFORMATION_LOG_HEADER: &[&str] = &[
    "timestamp",
    "filename",
    "source_format",
    "row_count",
    "column_count",
    "applied_tags",
    "applied_transformations",
    "status",
    "output_path",
];

pub const LOADING_LOG_HEADER: &[&str] = &[
    "timestamp",
    "filename",
    "table_name",
    "row_count",
    "status",
    "archived_path",
];

// Audit columns appended to every created table
pub const LOAD_STATUS_COLUMN: &str = "load_status";
pub const LOAD_TIMESTAMP_COLUMN: &str = "load_timestamp";
pub const LOAD_STATUS_LOADED: &str = "loaded";

/// Row field that, when present on the first record, names the target table.
pub const TARGET_TABLE_FIELD: &str = "target_table";

/// Column used to keep the outer key of a JSON object-of-objects document.
pub const OUTER_KEY_COLUMN: &str = "_key";

// Extensions a stage runner will pick up
pub const SUPPORTED_EXTENSIONS: &[&str] = &["csv", "json"];

/// VARCHAR columns longer than this become TEXT.
pub const MAX_VARCHAR_LENGTH: usize = 255;

/// PostgreSQL reserved words that cannot be used as bare column names.
pub const RESERVED_WORDS: &[&str] = &[
    "all", "analyse", "analyze", "and", "any", "array", "as", "asc", "asymmetric", "both",
    "case", "cast", "check", "collate", "column", "constraint", "create", "current_catalog",
    "current_date", "current_role", "current_time", "current_timestamp", "current_user",
    "default", "deferrable", "desc", "distinct", "do", "else", "end", "except", "false",
    "fetch", "for", "foreign", "from", "grant", "group", "having", "in", "initially",
    "intersect", "into", "lateral", "leading", "limit", "localtime", "localtimestamp", "not",
    "null", "offset", "on", "only", "or", "order", "placing", "primary", "references",
    "returning", "select", "session_user", "some", "symmetric", "table", "then", "to",
    "trailing", "true", "union", "unique", "user", "using", "variadic", "when", "where",
    "window", "with",
];

pub fn is_reserved_word(name: &str) -> bool {
    let lower = name.to_lowercase();
    RESERVED_WORDS.contains(&lower.as_str())
}

/// True when a file extension (without the dot) is one a stage consumes.
pub fn is_supported_extension(ext: &str) -> bool {
    SUPPORTED_EXTENSIONS
        .iter()
        .any(|s| s.eq_ignore_ascii_case(ext))
}
