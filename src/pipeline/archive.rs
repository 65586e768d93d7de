use crate::error::Result;
use chrono::Local;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Moves a file, falling back to copy-then-remove when a rename is not
/// possible (e.g. across filesystems).
pub fn move_file(from: &Path, to: &Path) -> Result<()> {
    match fs::rename(from, to) {
        Ok(()) => Ok(()),
        Err(rename_err) => {
            debug!("rename {} failed ({}); copying instead", from.display(), rename_err);
            if !from.exists() {
                return Err(rename_err.into());
            }
            fs::copy(from, to)?;
            fs::remove_file(from)?;
            Ok(())
        }
    }
}

/// Moves loaded input files into the archive directory without ever
/// overwriting an earlier archive.
#[derive(Debug, Clone)]
pub struct Archiver {
    archive_dir: PathBuf,
}

impl Archiver {
    pub fn new(archive_dir: impl Into<PathBuf>) -> Self {
        Self {
            archive_dir: archive_dir.into(),
        }
    }

    pub fn archive(&self, path: &Path) -> Result<PathBuf> {
        fs::create_dir_all(&self.archive_dir)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "unnamed".to_string());
        let destination = unique_destination(&self.archive_dir, &file_name);
        move_file(path, &destination)?;
        info!("Archived {} to {}", path.display(), destination.display());
        Ok(destination)
    }
}

/// `dir/<file_name>`, or `dir/<stem>_<YYYYmmddHHMMSS>[_n].<ext>` when that
/// name is taken.
pub fn unique_destination(dir: &Path, file_name: &str) -> PathBuf {
    let plain = dir.join(file_name);
    if !plain.exists() {
        return plain;
    }

    let as_path = Path::new(file_name);
    let stem = as_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| file_name.to_string());
    let ext = as_path
        .extension()
        .map(|e| format!(".{}", e.to_string_lossy()))
        .unwrap_or_default();
    let stamp = Local::now().format("%Y%m%d%H%M%S");

    let stamped = dir.join(format!("{}_{}{}", stem, stamp, ext));
    if !stamped.exists() {
        return stamped;
    }
    let mut n = 1;
    loop {
        let candidate = dir.join(format!("{}_{}_{}{}", stem, stamp, n, ext));
        if !candidate.exists() {
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_archive_never_overwrites() {
        let dir = tempdir().unwrap();
        let archive_dir = dir.path().join("archived");
        let archiver = Archiver::new(&archive_dir);

        let mut archived = Vec::new();
        for content in ["one", "two", "three"] {
            let input = dir.path().join("orders.json");
            fs::write(&input, content).unwrap();
            archived.push(archiver.archive(&input).unwrap());
            assert!(!input.exists());
        }

        assert_eq!(archived[0], archive_dir.join("orders.json"));
        assert_ne!(archived[1], archived[0]);
        assert_ne!(archived[2], archived[1]);
        let name = archived[1].file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("orders_") && name.ends_with(".json"), "{}", name);

        let contents: Vec<String> = archived.iter().map(|p| fs::read_to_string(p).unwrap()).collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
    }

    #[test]
    fn test_missing_source_is_an_error() {
        let dir = tempdir().unwrap();
        let archiver = Archiver::new(dir.path().join("archived"));
        assert!(archiver.archive(&dir.path().join("gone.json")).is_err());
    }
}
