use crate::config::WatcherConfig;
use crate::error::{EtlError, Result};
use crate::metrics::StageMetrics;
use crate::pipeline::payload::file_name_of;
use crate::pipeline::stage_log::{StageLogEntry, StageLogger};
use crate::pipeline::watcher::{DirectoryWatcher, Discovered};
use crate::types::Stage;
use async_trait::async_trait;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A file queued for one stage.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineItem {
    pub id: Uuid,
    pub path: PathBuf,
    pub stage: Stage,
    /// 1 on first sight, incremented each time a parked file is retried.
    pub attempt: u32,
}

impl PipelineItem {
    pub fn new(path: PathBuf, stage: Stage, attempt: u32) -> Self {
        Self {
            id: Uuid::new_v4(),
            path,
            stage,
            attempt,
        }
    }

    pub fn filename(&self) -> String {
        file_name_of(&self.path)
    }
}

/// The per-file work of one stage.
#[async_trait]
pub trait FileProcessor: Send + Sync {
    fn stage(&self) -> Stage;

    /// Process one file. On success the input has left the stage's
    /// directory and the returned entry is written to the stage log.
    async fn process(&self, item: &PipelineItem) -> Result<StageLogEntry>;

    /// Log entry written when `process` fails.
    fn failure_entry(&self, item: &PipelineItem, error: &EtlError) -> StageLogEntry {
        StageLogEntry::error(item.filename(), error)
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RunSummary {
    pub processed: usize,
    pub failed: usize,
}

/// Drives one stage: replays the input directory at startup, then watches
/// it and feeds files one at a time to the processor.
pub struct StageRunner {
    input_dir: PathBuf,
    processor: Arc<dyn FileProcessor>,
    logger: Arc<StageLogger>,
    config: WatcherConfig,
    watcher: Arc<Mutex<DirectoryWatcher>>,
}

impl StageRunner {
    pub fn new(
        input_dir: impl Into<PathBuf>,
        processor: Arc<dyn FileProcessor>,
        logger: Arc<StageLogger>,
        config: WatcherConfig,
    ) -> Self {
        let input_dir = input_dir.into();
        Self {
            watcher: Arc::new(Mutex::new(DirectoryWatcher::new(&input_dir))),
            input_dir,
            processor,
            logger,
            config,
        }
    }

    pub fn stage(&self) -> Stage {
        self.processor.stage()
    }

    pub fn input_dir(&self) -> &Path {
        &self.input_dir
    }

    /// Process whatever is in the input directory right now and return.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let mut summary = RunSummary::default();
        for found in scan(&self.watcher, self.stage(), self.config.backlog_alert)? {
            let item = PipelineItem::new(found.path, self.stage(), found.attempt);
            self.record(&mut summary, &item).await;
        }
        info!(
            "{} pass complete: {} processed, {} failed",
            self.stage(),
            summary.processed,
            summary.failed
        );
        Ok(summary)
    }

    /// Replay existing files, then keep watching until `shutdown` flips to
    /// true (or its sender is dropped). The file in progress is finished first.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) -> Result<RunSummary> {
        let stage = self.stage();
        let (tx, mut rx) = mpsc::channel::<PipelineItem>(self.config.queue_depth.max(1));

        info!("{} stage watching {}", stage, self.input_dir.display());

        let watcher = Arc::clone(&self.watcher);
        let poll = Duration::from_millis(self.config.poll_interval_ms.max(10));
        let backlog_alert = self.config.backlog_alert;
        let mut watcher_shutdown = shutdown.clone();
        let feeder = tokio::spawn(async move {
            loop {
                match scan(&watcher, stage, backlog_alert) {
                    Ok(found) => {
                        for f in found {
                            let item = PipelineItem::new(f.path, stage, f.attempt);
                            // A full queue holds the watcher here
                            if tx.send(item).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => error!("{} watcher scan failed: {}", stage, e),
                }
                tokio::select! {
                    _ = tokio::time::sleep(poll) => {}
                    changed = watcher_shutdown.changed() => {
                        if changed.is_err() || *watcher_shutdown.borrow() {
                            return;
                        }
                    }
                }
            }
        });

        let mut summary = RunSummary::default();
        if !*shutdown.borrow() {
            loop {
                tokio::select! {
                    item = rx.recv() => match item {
                        Some(item) => self.record(&mut summary, &item).await,
                        None => break,
                    },
                    changed = shutdown.changed() => {
                        if changed.is_err() || *shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
        }

        feeder.abort();
        info!(
            "{} stage stopped: {} processed, {} failed",
            stage, summary.processed, summary.failed
        );
        Ok(summary)
    }

    async fn record(&self, summary: &mut RunSummary, item: &PipelineItem) {
        if self.handle(item).await {
            summary.processed += 1;
        } else {
            summary.failed += 1;
        }
    }

    /// Process one item; every failure ends up in the stage log and never
    /// escapes. Returns whether the file succeeded.
    async fn handle(&self, item: &PipelineItem) -> bool {
        let started = Instant::now();
        debug!(
            "{} processing {} (attempt {}, id {})",
            item.stage,
            item.path.display(),
            item.attempt,
            item.id
        );

        // Run on its own task so a panic in a processor fails only this file
        let processor = Arc::clone(&self.processor);
        let task_item = item.clone();
        let outcome = match tokio::spawn(async move { processor.process(&task_item).await }).await {
            Ok(result) => result,
            Err(join_error) => Err(EtlError::Aborted(join_error.to_string())),
        };

        let elapsed = started.elapsed().as_secs_f64();
        let (entry, succeeded) = match outcome {
            Ok(entry) => {
                info!("{} processed {} in {:.3}s", item.stage, item.filename(), elapsed);
                StageMetrics::record_file_processed(item.stage, elapsed);
                (entry, true)
            }
            Err(e) => {
                if e.is_retryable() {
                    warn!("{} could not process {}: {}; file left in place", item.stage, item.filename(), e);
                } else {
                    error!("{} failed on {}: {}", item.stage, item.filename(), e);
                }
                StageMetrics::record_file_failed(item.stage, elapsed);
                (self.processor.failure_entry(item, &e), false)
            }
        };

        if let Err(e) = self.logger.log(&entry) {
            error!(
                "Failed to write {} stage log {}: {}",
                item.stage,
                self.logger.path().display(),
                e
            );
        }

        match self.watcher.lock() {
            Ok(mut watcher) => watcher.finish(&item.path, succeeded),
            Err(_) => error!("{} watcher state lock poisoned", item.stage),
        }
        succeeded
    }
}

fn scan(watcher: &Mutex<DirectoryWatcher>, stage: Stage, backlog_alert: usize) -> Result<Vec<Discovered>> {
    let scan = watcher
        .lock()
        .map_err(|_| EtlError::Aborted("watcher state lock poisoned".to_string()))?
        .scan()?;

    StageMetrics::record_backlog(stage, scan.waiting);
    if scan.waiting > backlog_alert {
        warn!(
            "{} backlog: {} files waiting (alert threshold {})",
            stage, scan.waiting, backlog_alert
        );
    }
    Ok(scan.discovered)
}
