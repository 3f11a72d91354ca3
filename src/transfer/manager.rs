// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Transfer processing loop.
//!
//! One background task per manager drains the queue sequentially: settle
//! check, compress into the staging directory, upload, clean up. Every state
//! change is written to the queue file, from a blocking task, before the next
//! step begins. Upload byte counts are kept in memory and written at most
//! once per [`PROGRESS_SAVE_INTERVAL`]. A failed attempt is written and
//! published as `failed` before it is queued again; retries back off
//! exponentially until the attempt budget is spent, after which a record
//! stays failed until an operator retries it.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::backend::{upload_file, Credentials, TransferBackend};
use super::compress::{RegionCompressor, COMPRESSED_SUFFIX};
use super::error::{TransferError, TransferResult};
use super::queue::{QueueSnapshot, TransferQueue};
use super::record::{TransferRecord, TransferStatus};
use super::region::RegionCoord;
use super::retry::RetryPolicy;
use super::summary::TransferSummary;

/// Staging directory for compressed files, inside the data directory.
pub const STAGING_DIR: &str = "transfer-staging";

/// World name used when the queue has none.
pub const DEFAULT_WORLD: &str = "world";

/// Placeholder in the remote path template.
pub const WORLD_PLACEHOLDER: &str = "{world}";

/// Gap between the two size checks of the settle test.
pub const DEFAULT_SETTLE_INTERVAL: Duration = Duration::from_millis(500);

/// Minimum gap between queue writes caused by upload progress alone.
pub const PROGRESS_SAVE_INTERVAL: Duration = Duration::from_secs(1);

/// Longest single sleep while waiting out a backoff, so cancellation is seen.
const BACKOFF_POLL: Duration = Duration::from_millis(250);

/// Everything the processing loop needs besides the backend.
#[derive(Debug, Clone)]
pub struct TransferOptions {
    /// Holds the queue file and staging directory.
    pub data_dir: PathBuf,
    /// Directory containing world folders.
    pub world_root: PathBuf,
    /// Remote directory template; `{world}` is replaced by the world name.
    pub remote_path: String,
    pub credentials: Credentials,
    pub retry: RetryPolicy,
    pub compression_level: i32,
    /// Start processing as soon as regions are queued.
    pub auto_transfer: bool,
    pub settle_interval: Duration,
}

impl TransferOptions {
    /// Remote path of a region's compressed file.
    pub fn remote_path_for(&self, world: &str, region: &RegionCoord) -> String {
        let mut base = self.remote_path.replace(WORLD_PLACEHOLDER, world);
        if !base.ends_with('/') {
            base.push('/');
        }
        format!("{}{}{}", base, region.relative_path(), COMPRESSED_SUFFIX)
    }

    /// Local path of a region file.
    pub fn source_path_for(&self, world: &str, region: &RegionCoord) -> PathBuf {
        self.world_root.join(world).join(region.relative_path_buf())
    }

    pub fn staging_dir(&self) -> PathBuf {
        self.data_dir.join(STAGING_DIR)
    }
}

enum NextRecord {
    Ready(TransferRecord),
    Wait(Duration),
    Idle,
}

struct ManagerShared {
    options: TransferOptions,
    backend: Arc<dyn TransferBackend>,
    compressor: RegionCompressor,
    queue: Mutex<TransferQueue>,
    running: AtomicBool,
    cancelled: AtomicBool,
    task: Mutex<Option<JoinHandle<()>>>,
    progress_tx: broadcast::Sender<TransferSummary>,
    last_error: Mutex<Option<String>>,
}

/// Owns the transfer queue and its processing task.
#[derive(Clone)]
pub struct TransferManager {
    shared: Arc<ManagerShared>,
}

impl TransferManager {
    /// Create a manager, loading any queue left from a previous run.
    pub fn new(options: TransferOptions, backend: Arc<dyn TransferBackend>) -> TransferResult<Self> {
        let queue = TransferQueue::load(&options.data_dir)?;
        let (progress_tx, _) = broadcast::channel(64);
        Ok(Self {
            shared: Arc::new(ManagerShared {
                compressor: RegionCompressor::new(options.compression_level),
                options,
                backend,
                queue: Mutex::new(queue),
                running: AtomicBool::new(false),
                cancelled: AtomicBool::new(false),
                task: Mutex::new(None),
                progress_tx,
                last_error: Mutex::new(None),
            }),
        })
    }

    pub fn options(&self) -> &TransferOptions {
        &self.shared.options
    }

    /// Receive a summary after every processed record and when a run ends.
    pub fn subscribe(&self) -> broadcast::Receiver<TransferSummary> {
        self.shared.progress_tx.subscribe()
    }

    fn queue(&self) -> MutexGuard<'_, TransferQueue> {
        self.shared
            .queue
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Queue the regions of a finished generation run and start processing
    /// if auto-transfer is on. Returns how many regions were new.
    pub fn on_generation_complete(
        &self,
        world: &str,
        regions: impl IntoIterator<Item = RegionCoord>,
    ) -> TransferResult<usize> {
        let added = {
            let mut queue = self.queue();
            queue.set_world_name(world)?;
            queue.add_regions(regions)?
        };
        info!(world = %world, added, "Queued regions for transfer");

        if self.shared.options.auto_transfer {
            self.start();
        } else {
            info!("Auto-transfer disabled; start transfers manually");
        }
        Ok(added)
    }

    /// Start the processing task. Returns false if one is already running.
    pub fn start(&self) -> bool {
        if self.shared.running.swap(true, Ordering::SeqCst) {
            warn!("Transfer already in progress");
            return false;
        }
        self.shared.cancelled.store(false, Ordering::SeqCst);
        *self.last_error_slot() = None;
        info!("Starting region transfers");

        let manager = self.clone();
        let handle = tokio::spawn(async move { manager.run().await });
        *self.shared.task.lock().unwrap_or_else(|p| p.into_inner()) = Some(handle);
        true
    }

    /// Ask the processing task to stop after the current record.
    pub fn cancel(&self) {
        if self.shared.running.load(Ordering::SeqCst) {
            self.shared.cancelled.store(true, Ordering::SeqCst);
            info!("Cancelling transfers");
        }
    }

    /// Wait for the current processing task, if any, to finish.
    pub async fn wait(&self) {
        let handle = self.shared.task.lock().unwrap_or_else(|p| p.into_inner()).take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!("Transfer task failed: {}", e);
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    /// Retry failed records that still have attempts left.
    pub fn retry_failed(&self) -> TransferResult<usize> {
        let count = self.queue().retry_failed(self.shared.options.retry.max_attempts)?;
        if count > 0 {
            info!(count, "Retrying failed transfers");
            if !self.is_running() {
                self.start();
            }
        }
        Ok(count)
    }

    /// Reset all failed records, including exhausted ones, and process them.
    pub fn rearm_failed(&self) -> TransferResult<usize> {
        let count = self.queue().rearm_failed()?;
        if count > 0 {
            info!(count, "Reset failed transfers");
            if !self.is_running() {
                self.start();
            }
        }
        Ok(count)
    }

    pub fn status(&self) -> TransferSummary {
        self.queue().summary()
    }

    /// Why the last run stopped early, if it could not reach the
    /// destination. Cleared when a new run starts.
    pub fn last_error(&self) -> Option<String> {
        self.last_error_slot().clone()
    }

    fn last_error_slot(&self) -> MutexGuard<'_, Option<String>> {
        self.shared
            .last_error
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn world_name(&self) -> Option<String> {
        self.queue().world_name().map(str::to_string)
    }

    /// Snapshot of all records.
    pub fn records(&self) -> Vec<TransferRecord> {
        self.queue().records().cloned().collect()
    }

    /// Remove completed and failed records. Refused while running.
    pub fn clear_completed(&self) -> TransferResult<usize> {
        if self.is_running() {
            return Err(TransferError::Unavailable(
                "cannot clear while transfers are running".to_string(),
            ));
        }
        self.queue().clear_completed()
    }

    /// Remove every record. Refused while running.
    pub fn clear_all(&self) -> TransferResult<()> {
        if self.is_running() {
            return Err(TransferError::Unavailable(
                "cannot clear while transfers are running".to_string(),
            ));
        }
        self.queue().clear()
    }

    fn report_progress(&self) {
        // No subscribers is fine
        let _ = self.shared.progress_tx.send(self.status());
    }

    /// Replace a record and write the queue file off the runtime.
    async fn store(&self, record: TransferRecord) {
        let snapshot = {
            let mut queue = self.queue();
            queue.set(record);
            queue.snapshot()
        };
        match snapshot {
            Ok(snapshot) => {
                if let Err(e) = tokio::task::spawn_blocking(move || write_snapshot(snapshot)).await {
                    warn!("Transfer queue writer failed: {}", e);
                }
            }
            Err(e) => warn!("Failed to persist transfer queue: {}", e),
        }
    }

    fn current(&self, region: &RegionCoord) -> Option<TransferRecord> {
        self.queue().get(region).cloned()
    }

    fn next_record(&self) -> NextRecord {
        let policy = self.shared.options.retry;
        let now = Utc::now().timestamp_millis();
        let queue = self.queue();

        let mut shortest: Option<Duration> = None;
        for record in queue.pending() {
            let wait = policy.remaining_wait(record.attempt_count(), record.last_attempt_time(), now);
            if wait.is_zero() {
                return NextRecord::Ready(record.clone());
            }
            shortest = Some(shortest.map_or(wait, |s| s.min(wait)));
        }
        match shortest {
            Some(wait) => NextRecord::Wait(wait),
            None => NextRecord::Idle,
        }
    }

    async fn run(self) {
        let options = &self.shared.options;
        let staging = options.staging_dir();

        match self.shared.backend.connect(&options.credentials).await {
            Ok(()) => {
                debug!(backend = self.shared.backend.name(), "Transfer backend connected");
                self.drain(&staging).await;
                self.shared.backend.disconnect().await;
            }
            Err(e) => {
                let pending = self.status().pending;
                warn!(
                    backend = self.shared.backend.name(),
                    pending,
                    "Transfer destination unreachable; {} region(s) left pending: {}",
                    pending,
                    e
                );
                *self.last_error_slot() = Some(format!("destination unreachable: {}", e));
            }
        }

        cleanup_staging(&staging);
        self.shared.running.store(false, Ordering::SeqCst);

        let summary = self.status();
        if self.shared.cancelled.load(Ordering::SeqCst) {
            info!(remaining = summary.pending, "Transfers cancelled");
        } else if summary.is_complete() {
            info!(completed = summary.completed, "All transfers complete");
            if summary.failed > 0 {
                warn!(failed = summary.failed, "Some transfers failed; retry them to try again");
            }
        }
        self.report_progress();
    }

    async fn drain(&self, staging: &Path) {
        while !self.shared.cancelled.load(Ordering::SeqCst) {
            match self.next_record() {
                NextRecord::Ready(record) => {
                    self.process(record, staging).await;
                    self.report_progress();
                }
                NextRecord::Wait(wait) => tokio::time::sleep(wait.min(BACKOFF_POLL)).await,
                NextRecord::Idle => break,
            }
        }
    }

    async fn process(&self, record: TransferRecord, staging: &Path) {
        let options = &self.shared.options;
        let region = record.region();
        let world = self.world_name().unwrap_or_else(|| DEFAULT_WORLD.to_string());
        let source = options.source_path_for(&world, &region);

        if !source.exists() {
            warn!(region = %region, path = %source.display(), "Region file not found");
            self.handle_failure(record, TransferError::FileNotFound.to_string()).await;
            return;
        }
        if !is_settled(&source, options.settle_interval).await {
            warn!(region = %region, "Region file may be in use");
            self.handle_failure(record, TransferError::FileInUse.to_string()).await;
            return;
        }

        let record = match record.compressing() {
            Ok(next) => next,
            Err(e) => {
                error!(region = %region, "{}", e);
                return;
            }
        };
        self.store(record.clone()).await;

        let compressor = self.shared.compressor;
        let staging_dir = staging.to_path_buf();
        let src = source.clone();
        let compressed = tokio::task::spawn_blocking(move || compressor.compress(&src, &staging_dir))
            .await
            .map_err(|e| TransferError::Compression(e.to_string()))
            .and_then(|r| r);
        let compressed = match compressed {
            Ok(path) => path,
            Err(e) => {
                self.handle_failure(record, e.to_string()).await;
                return;
            }
        };

        let size = match tokio::fs::metadata(&compressed).await {
            Ok(meta) => meta.len(),
            Err(e) => {
                self.handle_failure(record, e.to_string()).await;
                return;
            }
        };
        let record = match record.uploading(size) {
            Ok(next) => next,
            Err(e) => {
                error!(region = %region, "{}", e);
                return;
            }
        };
        self.store(record.clone()).await;

        let remote = options.remote_path_for(&world, &region);
        let last_save = Mutex::new(Instant::now());
        let progress = |sent: u64, _total: u64| {
            let snapshot = {
                let mut queue = self.queue();
                let Some(next) = queue.get(&region).and_then(|current| current.with_progress(sent).ok()) else {
                    return;
                };
                queue.set(next);
                let mut last = last_save.lock().unwrap_or_else(|p| p.into_inner());
                if last.elapsed() < PROGRESS_SAVE_INTERVAL {
                    return;
                }
                *last = Instant::now();
                queue.snapshot()
            };
            match snapshot {
                Ok(snapshot) => {
                    tokio::task::spawn_blocking(move || write_snapshot(snapshot));
                }
                Err(e) => warn!("Failed to persist transfer queue: {}", e),
            }
        };
        let outcome = upload_file(self.shared.backend.as_ref(), &compressed, &remote, &progress).await;

        if let Err(e) = tokio::fs::remove_file(&compressed).await {
            debug!("Failed to remove staged file {}: {}", compressed.display(), e);
        }

        let record = self.current(&region).unwrap_or(record);
        if outcome.success {
            match record.completed() {
                Ok(done) => {
                    self.store(done).await;
                    info!(region = %region, "Transferred {} - {}", region, outcome.summary());
                }
                Err(e) => error!(region = %region, "{}", e),
            }
        } else {
            let reason = outcome.error.unwrap_or_else(|| "upload failed".to_string());
            self.handle_failure(record, reason).await;
        }
    }

    async fn handle_failure(&self, record: TransferRecord, reason: String) {
        let policy = self.shared.options.retry;
        let region = record.region();

        let failed = match record.failed(reason.as_str()) {
            Ok(failed) => failed,
            Err(e) => {
                error!(region = %region, "{}", e);
                return;
            }
        };
        let attempts = failed.attempt_count();
        self.store(failed.clone()).await;
        self.report_progress();

        if !policy.should_retry(attempts) {
            error!(
                region = %region,
                attempts,
                "Transfer failed after {} attempts: {}",
                policy.max_attempts,
                reason
            );
            return;
        }

        let delay = policy.delay_after(attempts);
        warn!(
            region = %region,
            attempt = attempts + 1,
            max = policy.max_attempts,
            "Transfer failed: {}. Retrying in {}ms",
            reason,
            delay.as_millis()
        );
        // Backoff is measured from the failed record's lastAttemptTime,
        // which the pending record keeps.
        match failed.retry(policy.max_attempts) {
            Ok(pending) => self.store(pending).await,
            Err(e) => error!(region = %region, "{}", e),
        }
    }
}

fn write_snapshot(snapshot: QueueSnapshot) {
    if let Err(e) = snapshot.write() {
        warn!("Failed to persist transfer queue: {}", e);
    }
}

/// Two size checks separated by `interval` agree.
async fn is_settled(path: &Path, interval: Duration) -> bool {
    let Ok(first) = tokio::fs::metadata(path).await else {
        return false;
    };
    tokio::time::sleep(interval).await;
    let Ok(second) = tokio::fs::metadata(path).await else {
        return false;
    };
    first.len() == second.len()
}

fn cleanup_staging(staging: &Path) {
    let Ok(entries) = std::fs::read_dir(staging) else {
        return;
    };
    for entry in entries.flatten() {
        let _ = std::fs::remove_file(entry.path());
    }
}

impl std::fmt::Debug for TransferManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransferManager")
            .field("backend", &self.shared.backend.name())
            .field("running", &self.is_running())
            .finish_non_exhaustive()
    }
}

/// Status counts of a record set, keyed for display.
pub fn status_counts(records: &[TransferRecord]) -> Vec<(TransferStatus, usize)> {
    [
        TransferStatus::Pending,
        TransferStatus::Compressing,
        TransferStatus::Uploading,
        TransferStatus::Completed,
        TransferStatus::Failed,
    ]
    .into_iter()
    .map(|status| (status, records.iter().filter(|r| r.status() == status).count()))
    .collect()
}
