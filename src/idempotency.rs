use sha2::{Digest, Sha256};

/// Hex SHA-256 of a file's raw bytes. Extraction stamps this on the payload
/// metadata as `source_checksum` so later stages can recognise a redelivered
/// source file even after it was re-extracted under a new timestamp.
pub fn content_checksum(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Key under which a successful load is recorded in the load ledger.
pub fn compute_load_key(source_checksum: &str, table_name: &str) -> String {
    // Simple canonical string; can be evolved later
    let mut s = String::new();
    s.push_str(source_checksum);
    s.push('|');
    s.push_str(table_name);

    let mut hasher = Sha256::new();
    hasher.update(s.as_bytes());
    hex::encode(hasher.finalize())
}
