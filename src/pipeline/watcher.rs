use crate::constants;
use crate::error::Result;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

/// A file the watcher handed out, with how many times it has been handed out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Discovered {
    pub path: PathBuf,
    pub attempt: u32,
}

#[derive(Debug, Clone)]
enum FileState {
    /// Handed out and not yet finished.
    Pending,
    /// Failed; held back until its modification time changes.
    Parked(Option<SystemTime>),
}

#[derive(Debug, Clone)]
struct Tracked {
    state: FileState,
    attempts: u32,
}

/// Result of one directory scan.
#[derive(Debug, Clone, Default)]
pub struct Scan {
    pub discovered: Vec<Discovered>,
    /// Qualifying files currently sitting in the directory.
    pub waiting: usize,
}

/// Polls one directory for qualifying files and remembers which ones are
/// in flight or parked after a failure.
#[derive(Debug)]
pub struct DirectoryWatcher {
    dir: PathBuf,
    tracked: HashMap<PathBuf, Tracked>,
}

impl DirectoryWatcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            tracked: HashMap::new(),
        }
    }

    /// List the directory and return files that should be processed now,
    /// in lexical order.
    pub fn scan(&mut self) -> Result<Scan> {
        let files = qualifying_files(&self.dir)?;

        // Forget anything that has left the directory
        self.tracked.retain(|path, _| files.contains(path));

        let mut discovered = Vec::new();
        for path in &files {
            match self.tracked.get_mut(path) {
                None => {
                    self.tracked.insert(
                        path.clone(),
                        Tracked {
                            state: FileState::Pending,
                            attempts: 1,
                        },
                    );
                    discovered.push(Discovered {
                        path: path.clone(),
                        attempt: 1,
                    });
                }
                Some(Tracked {
                    state: FileState::Pending,
                    ..
                }) => {}
                Some(tracked) => {
                    let parked_at = match &tracked.state {
                        FileState::Parked(mtime) => *mtime,
                        FileState::Pending => continue,
                    };
                    if modified(path) != parked_at {
                        tracked.attempts += 1;
                        tracked.state = FileState::Pending;
                        discovered.push(Discovered {
                            path: path.clone(),
                            attempt: tracked.attempts,
                        });
                    }
                }
            }
        }

        Ok(Scan {
            discovered,
            waiting: files.len(),
        })
    }

    /// Record the outcome of processing `path`.
    pub fn finish(&mut self, path: &Path, succeeded: bool) {
        if succeeded {
            self.tracked.remove(path);
        } else if let Some(tracked) = self.tracked.get_mut(path) {
            tracked.state = FileState::Parked(modified(path));
        }
    }

    pub fn is_parked(&self, path: &Path) -> bool {
        matches!(
            self.tracked.get(path),
            Some(Tracked {
                state: FileState::Parked(_),
                ..
            })
        )
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Regular, non-hidden files with a supported extension, sorted by path.
/// A missing directory is created.
pub fn qualifying_files(dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)?;
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_file() && is_qualifying(&path) {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

pub fn is_qualifying(path: &Path) -> bool {
    let hidden = path
        .file_name()
        .and_then(|n| n.to_str())
        .map(|n| n.starts_with('.'))
        .unwrap_or(true);
    let supported = path
        .extension()
        .and_then(|e| e.to_str())
        .map(constants::is_supported_extension)
        .unwrap_or(false);
    !hidden && supported
}
