//! Upload pipeline
//!
//! Design principles:
//! - One dedicated worker thread owns all network I/O
//! - Producers enqueue with a short bounded wait and never block on uploads
//! - A failed upload leaves the artifact on disk; nothing is re-enqueued
//! - Shutdown drains with a deadline, then a sentinel ends the worker loop

use crate::daily_log::has_data;
use crate::remote::{RemoteError, RemoteStore};
use chrono::{Local, NaiveDateTime};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::mpsc::{self, Receiver, Sender, SyncSender, TrySendError};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info, warn};

// ============================================================================
// Constants
// ============================================================================

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);
pub const DEFAULT_QUEUE_CAPACITY: usize = 16;
pub const DEFAULT_ENQUEUE_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(30);

/// Sleep between full-queue checks while an enqueue waits.
const ENQUEUE_POLL: Duration = Duration::from_millis(10);
const DRAIN_POLL: Duration = Duration::from_millis(50);

// ============================================================================
// Tasks and outcomes
// ============================================================================

/// A sealed artifact waiting for delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTask {
    pub file_path: PathBuf,
    pub enqueued_at: NaiveDateTime,
}

impl UploadTask {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
            enqueued_at: Local::now().naive_local(),
        }
    }
}

/// Terminal state of one task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    /// In the remote folder, uploaded now or found already there.
    Delivered {
        remote_id: Option<String>,
        attempts: u32,
    },
    /// No records beyond the header; the local file was deleted.
    SkippedEmpty,
    /// Every attempt failed (or uploads are disabled); the file stays on disk.
    Exhausted { attempts: u32 },
    /// The file vanished before the worker got to it.
    Missing,
    /// Still queued when the shutdown drain deadline passed; left on disk.
    Deferred,
}

/// Outcome of a task, as reported by the worker.
#[derive(Debug, Clone)]
pub struct UploadReport {
    pub task: UploadTask,
    pub outcome: UploadOutcome,
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Upload queue full, dropping {0} (file stays on disk)")]
    Full(PathBuf),

    #[error("Upload pipeline is shut down, not accepting {0}")]
    Closed(PathBuf),
}

// ============================================================================
// Delivery
// ============================================================================

/// Retry count and linear backoff base.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: DEFAULT_MAX_RETRIES,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// Wait after failed attempt number `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt)
    }
}

/// Delivers one artifact to the remote folder with retries.
pub struct Uploader {
    store: Option<Arc<dyn RemoteStore>>,
    folder_id: String,
    policy: RetryPolicy,
}

impl Uploader {
    /// `store: None` is degraded mode; every delivery ends exhausted.
    pub fn new(
        store: Option<Arc<dyn RemoteStore>>,
        folder_id: impl Into<String>,
        policy: RetryPolicy,
    ) -> Self {
        Self {
            store,
            folder_id: folder_id.into(),
            policy,
        }
    }

    pub fn is_degraded(&self) -> bool {
        self.store.is_none()
    }

    pub fn deliver(&self, path: &Path) -> UploadOutcome {
        self.deliver_with(path, thread::sleep)
    }

    /// Same as [`Uploader::deliver`], with the backoff wait supplied by the caller.
    pub fn deliver_with<S>(&self, path: &Path, mut sleep: S) -> UploadOutcome
    where
        S: FnMut(Duration),
    {
        if !path.exists() {
            warn!("File not found for upload: {}", path.display());
            return UploadOutcome::Missing;
        }

        if !has_data(path) {
            info!("File {} has no scan data, skipping upload", path.display());
            match fs::remove_file(path) {
                Ok(()) => info!("Deleted empty file: {}", path.display()),
                Err(err) => warn!("Could not delete empty file {}: {}", path.display(), err),
            }
            return UploadOutcome::SkippedEmpty;
        }

        let Some(store) = self.store.as_deref() else {
            error!(
                "Remote store not available, leaving {} on disk",
                path.display()
            );
            return UploadOutcome::Exhausted { attempts: 0 };
        };

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let max = self.policy.max_retries.max(1);

        for attempt in 1..=max {
            match self.attempt(store, path, &file_name) {
                Ok(remote_id) => {
                    return UploadOutcome::Delivered {
                        remote_id,
                        attempts: attempt,
                    }
                }
                Err(err) if err.is_transient() => {
                    warn!("Upload attempt {} of {} failed: {}", attempt, file_name, err);
                    if attempt < max {
                        let wait = self.policy.backoff(attempt);
                        debug!("Retrying {} in {:?}", file_name, wait);
                        sleep(wait);
                    }
                }
                Err(err) => {
                    error!("Unexpected error during upload of {}: {}", file_name, err);
                    return UploadOutcome::Exhausted { attempts: attempt };
                }
            }
        }

        error!(
            "Failed to upload {} after all retries, file left on disk",
            path.display()
        );
        UploadOutcome::Exhausted { attempts: max }
    }

    fn attempt(
        &self,
        store: &dyn RemoteStore,
        path: &Path,
        file_name: &str,
    ) -> Result<Option<String>, RemoteError> {
        let items = store.list_folder_items(&self.folder_id)?;
        if let Some(existing) = items.iter().find(|item| item.name == file_name) {
            info!("File {} already exists remotely, skipping upload", file_name);
            return Ok(Some(existing.id.clone()));
        }

        match store.upload(&self.folder_id, path, file_name) {
            Ok(item) => {
                info!(
                    "Successfully uploaded {} as file ID {}",
                    path.display(),
                    item.id
                );
                Ok(Some(item.id))
            }
            Err(RemoteError::AlreadyExists(reason)) => {
                info!("File {} appeared remotely during upload: {}", file_name, reason);
                Ok(None)
            }
            Err(err) => Err(err),
        }
    }
}

// ============================================================================
// Pipeline
// ============================================================================

#[derive(Debug, Clone, Copy)]
pub struct PipelineConfig {
    pub queue_capacity: usize,
    pub enqueue_timeout: Duration,
    pub drain_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            enqueue_timeout: DEFAULT_ENQUEUE_TIMEOUT,
            drain_timeout: DEFAULT_DRAIN_TIMEOUT,
        }
    }
}

/// Handle to the upload worker thread.
///
/// `None` on the channel is the shutdown sentinel.
pub struct UploadPipeline {
    tx: SyncSender<Option<UploadTask>>,
    accepting: Arc<AtomicBool>,
    abandon: Arc<AtomicBool>,
    pending: Arc<AtomicUsize>,
    config: PipelineConfig,
    worker: Option<JoinHandle<()>>,
}

impl UploadPipeline {
    pub fn start(uploader: Arc<Uploader>, config: PipelineConfig) -> std::io::Result<Self> {
        Self::spawn(uploader, config, None)
    }

    /// Start a pipeline that also reports every terminal outcome.
    pub fn start_with_reports(
        uploader: Arc<Uploader>,
        config: PipelineConfig,
    ) -> std::io::Result<(Self, Receiver<UploadReport>)> {
        let (report_tx, report_rx) = mpsc::channel();
        let pipeline = Self::spawn(uploader, config, Some(report_tx))?;
        Ok((pipeline, report_rx))
    }

    fn spawn(
        uploader: Arc<Uploader>,
        config: PipelineConfig,
        reports: Option<Sender<UploadReport>>,
    ) -> std::io::Result<Self> {
        let (tx, rx) = mpsc::sync_channel(config.queue_capacity.max(1));
        let pending = Arc::new(AtomicUsize::new(0));
        let abandon = Arc::new(AtomicBool::new(false));

        let worker = {
            let pending = Arc::clone(&pending);
            let abandon = Arc::clone(&abandon);
            thread::Builder::new()
                .name("upload-worker".to_string())
                .spawn(move || run_worker(uploader, rx, pending, abandon, reports))?
        };

        Ok(Self {
            tx,
            accepting: Arc::new(AtomicBool::new(true)),
            abandon,
            pending,
            config,
            worker: Some(worker),
        })
    }

    /// Tasks accepted but not yet finished.
    pub fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Queue a task, waiting at most the configured enqueue timeout for room.
    pub fn enqueue(&self, task: UploadTask) -> Result<(), QueueError> {
        let path = task.file_path.clone();
        if !self.accepting.load(Ordering::SeqCst) {
            return Err(QueueError::Closed(path));
        }

        let deadline = Instant::now() + self.config.enqueue_timeout;
        let mut message = Some(task);
        self.pending.fetch_add(1, Ordering::SeqCst);
        loop {
            match self.tx.try_send(message) {
                Ok(()) => {
                    info!("Queued {} for upload", path.display());
                    return Ok(());
                }
                Err(TrySendError::Full(returned)) => {
                    if Instant::now() >= deadline {
                        self.pending.fetch_sub(1, Ordering::SeqCst);
                        return Err(QueueError::Full(path));
                    }
                    message = returned;
                    thread::sleep(ENQUEUE_POLL);
                }
                Err(TrySendError::Disconnected(_)) => {
                    self.pending.fetch_sub(1, Ordering::SeqCst);
                    return Err(QueueError::Closed(path));
                }
            }
        }
    }

    /// Stop accepting, drain with a deadline, then stop the worker.
    ///
    /// An upload in flight is allowed to finish its own retry loop. Tasks still
    /// queued after the deadline are skipped and stay on disk.
    pub fn shutdown(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        self.accepting.store(false, Ordering::SeqCst);

        let deadline = Instant::now() + self.config.drain_timeout;
        while self.pending() > 0 && Instant::now() < deadline {
            thread::sleep(DRAIN_POLL);
        }
        let left = self.pending();
        if left > 0 {
            warn!(
                "Upload queue not drained after {:?}, {} task(s) left on disk",
                self.config.drain_timeout, left
            );
            self.abandon.store(true, Ordering::SeqCst);
        }

        if self.tx.send(None).is_err() {
            debug!("Upload worker already stopped");
        }
        if worker.join().is_err() {
            error!("Upload worker panicked");
        }
        info!("Upload pipeline stopped");
    }
}

impl Drop for UploadPipeline {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(
    uploader: Arc<Uploader>,
    rx: Receiver<Option<UploadTask>>,
    pending: Arc<AtomicUsize>,
    abandon: Arc<AtomicBool>,
    reports: Option<Sender<UploadReport>>,
) {
    debug!("Upload worker started");
    while let Ok(message) = rx.recv() {
        let Some(task) = message else {
            break;
        };

        let outcome = if abandon.load(Ordering::SeqCst) {
            info!(
                "Shutting down, leaving {} on disk",
                task.file_path.display()
            );
            UploadOutcome::Deferred
        } else {
            uploader.deliver(&task.file_path)
        };
        debug!("Upload of {} finished: {:?}", task.file_path.display(), outcome);

        if let Some(reports) = &reports {
            let _ = reports.send(UploadReport {
                task,
                outcome,
            });
        }
        pending.fetch_sub(1, Ordering::SeqCst);
    }
    debug!("Upload worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_linearly() {
        let policy = RetryPolicy {
            max_retries: 3,
            retry_delay: Duration::from_secs(5),
        };
        assert_eq!(policy.backoff(1), Duration::from_secs(5));
        assert_eq!(policy.backoff(2), Duration::from_secs(10));
        assert_eq!(policy.backoff(3), Duration::from_secs(15));
    }

    #[test]
    fn missing_file_is_not_retried() {
        let tmp = tempfile::tempdir().unwrap();
        let uploader = Uploader::new(None, "0", RetryPolicy::default());
        let mut slept = Vec::new();
        let outcome = uploader.deliver_with(&tmp.path().join("gone.csv"), |d| slept.push(d));
        assert_eq!(outcome, UploadOutcome::Missing);
        assert!(slept.is_empty());
    }

    #[test]
    fn degraded_mode_exhausts_without_attempts() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("scanned_barcodes_2024-06-01.csv");
        fs::write(
            &path,
            "Barcode,Timestamp,Status\nABC,2024-06-01 10:00:00,SUCCESS\n",
        )
        .unwrap();

        let uploader = Uploader::new(None, "0", RetryPolicy::default());
        assert!(uploader.is_degraded());
        assert_eq!(
            uploader.deliver_with(&path, |_| {}),
            UploadOutcome::Exhausted { attempts: 0 }
        );
        assert!(path.exists());
    }

    #[test]
    fn enqueue_after_shutdown_is_rejected() {
        let uploader = Arc::new(Uploader::new(None, "0", RetryPolicy::default()));
        let mut pipeline = UploadPipeline::start(uploader, PipelineConfig::default()).unwrap();
        pipeline.shutdown();
        let err = pipeline.enqueue(UploadTask::new("x.csv")).unwrap_err();
        assert!(matches!(err, QueueError::Closed(_)));
    }
}
