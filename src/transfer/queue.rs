// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Durable transfer queue.
//!
//! The queue is a map from region to [`TransferRecord`] plus the world name
//! of the current batch. It is written to `transfer-queue.json` in the data
//! directory after every mutation, so a crash loses at most the transition in
//! progress. On load, records caught mid-transfer are reset to pending.
//!
//! Callers on an async runtime take a [`QueueSnapshot`] under their lock and
//! write it from a blocking task. Snapshots carry a revision and an older
//! snapshot never replaces a newer file.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::error::{TransferError, TransferResult};
use super::record::{TransferRecord, TransferStatus};
use super::region::{Dimension, RegionCoord};
use super::summary::TransferSummary;

/// Queue file name inside the data directory.
pub const QUEUE_FILE: &str = "transfer-queue.json";

#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueueFile {
    #[serde(default)]
    world_name: Option<String>,
    #[serde(default)]
    states: Vec<RecordEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RecordEntry {
    x: i32,
    z: i32,
    #[serde(default)]
    dimension: Dimension,
    status: TransferStatus,
    #[serde(default)]
    attempt_count: u32,
    #[serde(default)]
    bytes_transferred: u64,
    #[serde(default)]
    total_bytes: u64,
    #[serde(default)]
    error_message: Option<String>,
    #[serde(default)]
    last_attempt_time: i64,
}

impl From<&TransferRecord> for RecordEntry {
    fn from(record: &TransferRecord) -> Self {
        let region = record.region();
        Self {
            x: region.x,
            z: region.z,
            dimension: region.dimension,
            status: record.status(),
            attempt_count: record.attempt_count(),
            bytes_transferred: record.bytes_transferred(),
            total_bytes: record.total_bytes(),
            error_message: record.error_message().map(str::to_string),
            last_attempt_time: record.last_attempt_time(),
        }
    }
}

impl From<RecordEntry> for TransferRecord {
    fn from(entry: RecordEntry) -> Self {
        TransferRecord::from_parts(
            RegionCoord::new(entry.x, entry.z, entry.dimension),
            entry.status,
            entry.attempt_count,
            entry.bytes_transferred,
            entry.total_bytes,
            entry.error_message,
            entry.last_attempt_time,
        )
    }
}

/// Serialized queue contents at one revision, ready to be written.
#[derive(Debug)]
pub struct QueueSnapshot {
    path: PathBuf,
    json: String,
    revision: u64,
    written: Arc<Mutex<u64>>,
}

impl QueueSnapshot {
    pub fn revision(&self) -> u64 {
        self.revision
    }

    /// Write the queue file unless a newer revision is already on disk.
    /// Returns whether the file was written.
    pub fn write(self) -> TransferResult<bool> {
        let mut written = self.written.lock().unwrap_or_else(|p| p.into_inner());
        if self.revision <= *written {
            return Ok(false);
        }
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, &self.json)?;
        fs::rename(&tmp, &self.path)?;
        *written = self.revision;
        debug!(revision = self.revision, "Saved transfer queue");
        Ok(true)
    }
}

/// Persistent map of region transfers.
#[derive(Debug)]
pub struct TransferQueue {
    path: PathBuf,
    world_name: Option<String>,
    records: BTreeMap<RegionCoord, TransferRecord>,
    revision: u64,
    written: Arc<Mutex<u64>>,
}

impl TransferQueue {
    /// An empty queue stored under `data_dir`. Nothing is read or written.
    pub fn new(data_dir: impl AsRef<Path>) -> Self {
        Self {
            path: data_dir.as_ref().join(QUEUE_FILE),
            world_name: None,
            records: BTreeMap::new(),
            revision: 0,
            written: Arc::new(Mutex::new(0)),
        }
    }

    /// Load the queue stored under `data_dir`, or an empty one if none exists.
    pub fn load(data_dir: impl AsRef<Path>) -> TransferResult<Self> {
        let mut queue = Self::new(data_dir);
        if !queue.path.exists() {
            return Ok(queue);
        }

        let content = fs::read_to_string(&queue.path)?;
        let file: QueueFile = serde_json::from_str(&content)
            .map_err(|e| TransferError::Persistence(format!("parsing {}: {}", queue.path.display(), e)))?;

        queue.world_name = file.world_name;
        for entry in file.states {
            let record = TransferRecord::from(entry).restored();
            queue.records.insert(record.region(), record);
        }
        info!(
            path = %queue.path.display(),
            records = queue.records.len(),
            "Loaded transfer queue"
        );
        Ok(queue)
    }

    /// Serialize the current contents as the next revision.
    pub fn snapshot(&mut self) -> TransferResult<QueueSnapshot> {
        let file = QueueFile {
            world_name: self.world_name.clone(),
            states: self.records.values().map(RecordEntry::from).collect(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| TransferError::Persistence(e.to_string()))?;
        self.revision += 1;
        Ok(QueueSnapshot {
            path: self.path.clone(),
            json,
            revision: self.revision,
            written: Arc::clone(&self.written),
        })
    }

    /// Rewrite the queue file now.
    pub fn save(&mut self) -> TransferResult<()> {
        self.snapshot()?.write().map(|_| ())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn world_name(&self) -> Option<&str> {
        self.world_name.as_deref()
    }

    pub fn set_world_name(&mut self, world: impl Into<String>) -> TransferResult<()> {
        self.world_name = Some(world.into());
        self.save()
    }

    /// Queue a region as pending unless it is already present.
    pub fn add_region(&mut self, region: RegionCoord) -> TransferResult<bool> {
        let added = self.insert_pending(region);
        if added {
            self.save()?;
        }
        Ok(added)
    }

    /// Queue several regions, returning how many were new.
    pub fn add_regions(&mut self, regions: impl IntoIterator<Item = RegionCoord>) -> TransferResult<usize> {
        let added = regions
            .into_iter()
            .filter(|region| self.insert_pending(*region))
            .count();
        self.save()?;
        Ok(added)
    }

    fn insert_pending(&mut self, region: RegionCoord) -> bool {
        if self.records.contains_key(&region) {
            return false;
        }
        self.records.insert(region, TransferRecord::pending(region));
        true
    }

    pub fn get(&self, region: &RegionCoord) -> Option<&TransferRecord> {
        self.records.get(region)
    }

    /// Replace the record for its region.
    pub fn update(&mut self, record: TransferRecord) -> TransferResult<()> {
        self.set(record);
        self.save()
    }

    /// Replace the record for its region without writing the file.
    pub fn set(&mut self, record: TransferRecord) {
        self.records.insert(record.region(), record);
    }

    /// First pending record in coordinate order.
    pub fn next_pending(&self) -> Option<&TransferRecord> {
        self.records
            .values()
            .find(|r| r.status() == TransferStatus::Pending)
    }

    pub fn pending(&self) -> impl Iterator<Item = &TransferRecord> {
        self.records
            .values()
            .filter(|r| r.status() == TransferStatus::Pending)
    }

    pub fn by_status(&self, status: TransferStatus) -> Vec<RegionCoord> {
        self.records
            .values()
            .filter(|r| r.status() == status)
            .map(TransferRecord::region)
            .collect()
    }

    /// Move failed records with attempts left back to pending.
    pub fn retry_failed(&mut self, max_attempts: u32) -> TransferResult<usize> {
        let retried: Vec<TransferRecord> = self
            .records
            .values()
            .filter(|r| r.can_retry(max_attempts))
            .map(|r| r.retry(max_attempts))
            .collect::<TransferResult<_>>()?;
        let count = retried.len();
        for record in retried {
            self.records.insert(record.region(), record);
        }
        if count > 0 {
            self.save()?;
        }
        Ok(count)
    }

    /// Reset every failed record, including exhausted ones, to pending with
    /// a fresh attempt budget.
    pub fn rearm_failed(&mut self) -> TransferResult<usize> {
        let rearmed: Vec<TransferRecord> = self
            .records
            .values()
            .filter(|r| r.status() == TransferStatus::Failed)
            .map(TransferRecord::rearm)
            .collect::<TransferResult<_>>()?;
        let count = rearmed.len();
        for record in rearmed {
            self.records.insert(record.region(), record);
        }
        if count > 0 {
            self.save()?;
        }
        Ok(count)
    }

    pub fn summary(&self) -> TransferSummary {
        TransferSummary::from_records(self.records.values())
    }

    /// Drop completed and failed records.
    pub fn clear_completed(&mut self) -> TransferResult<usize> {
        let before = self.records.len();
        self.records.retain(|_, r| !r.status().is_terminal());
        let removed = before - self.records.len();
        self.save()?;
        Ok(removed)
    }

    /// Drop everything, including the world name.
    pub fn clear(&mut self) -> TransferResult<()> {
        self.records.clear();
        self.world_name = None;
        self.save()
    }

    pub fn records(&self) -> impl Iterator<Item = &TransferRecord> {
        self.records.values()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let queue = TransferQueue::load(dir.path()).unwrap();
        assert!(queue.is_empty());
        assert_eq!(queue.world_name(), None);
    }

    #[test]
    fn test_add_is_idempotent() {
        let dir = tempdir().unwrap();
        let mut queue = TransferQueue::new(dir.path());
        let regions = [RegionCoord::overworld(0, 0), RegionCoord::overworld(0, 1)];
        assert_eq!(queue.add_regions(regions).unwrap(), 2);
        assert_eq!(queue.add_regions(regions).unwrap(), 0);
        assert!(!queue.add_region(RegionCoord::overworld(0, 0)).unwrap());
        assert_eq!(queue.len(), 2);
    }

    #[test]
    fn test_every_mutation_persists() {
        let dir = tempdir().unwrap();
        let mut queue = TransferQueue::new(dir.path());
        queue.add_region(RegionCoord::overworld(3, 4)).unwrap();
        assert!(queue.path().exists());

        let record = queue.get(&RegionCoord::overworld(3, 4)).unwrap().failed("x").unwrap();
        queue.update(record).unwrap();

        let reloaded = TransferQueue::load(dir.path()).unwrap();
        let record = reloaded.get(&RegionCoord::overworld(3, 4)).unwrap();
        assert_eq!(record.status(), TransferStatus::Failed);
        assert_eq!(record.attempt_count(), 1);
    }

    #[test]
    fn test_older_snapshot_never_replaces_newer_file() {
        let dir = tempdir().unwrap();
        let mut queue = TransferQueue::new(dir.path());
        let region = RegionCoord::overworld(0, 0);
        queue.add_region(region).unwrap();

        let pending = queue.snapshot().unwrap();
        let failed = queue.get(&region).unwrap().failed("x").unwrap();
        queue.set(failed);
        let newer = queue.snapshot().unwrap();
        assert!(newer.revision() > pending.revision());

        assert!(newer.write().unwrap());
        assert!(!pending.write().unwrap());

        let reloaded = TransferQueue::load(dir.path()).unwrap();
        assert_eq!(reloaded.get(&region).unwrap().status(), TransferStatus::Failed);
    }

    #[test]
    fn test_set_does_not_write() {
        let dir = tempdir().unwrap();
        let mut queue = TransferQueue::new(dir.path());
        queue.set(TransferRecord::pending(RegionCoord::overworld(1, 1)));
        assert!(!queue.path().exists());
        queue.save().unwrap();
        assert_eq!(TransferQueue::load(dir.path()).unwrap().len(), 1);
    }

    #[test]
    fn test_round_trip_normalizes_in_flight() {
        let dir = tempdir().unwrap();
        let mut queue = TransferQueue::new(dir.path());
        queue.set_world_name("world").unwrap();

        let done = RegionCoord::overworld(0, 0);
        let failed = RegionCoord::nether(-1, 2);
        let uploading = RegionCoord::end(5, -5);
        let waiting = RegionCoord::overworld(9, 9);
        queue.add_regions([done, failed, uploading, waiting]).unwrap();

        let r = queue.get(&done).unwrap().compressing().unwrap().uploading(10).unwrap().completed().unwrap();
        queue.update(r).unwrap();
        let r = queue.get(&failed).unwrap().compressing().unwrap().failed("File in use").unwrap();
        queue.update(r).unwrap();
        let r = queue.get(&uploading).unwrap().compressing().unwrap().uploading(99).unwrap().with_progress(50).unwrap();
        queue.update(r).unwrap();

        let reloaded = TransferQueue::load(dir.path()).unwrap();
        assert_eq!(reloaded.world_name(), Some("world"));
        assert_eq!(reloaded.len(), 4);
        for original in queue.records() {
            let loaded = reloaded.get(&original.region()).unwrap();
            if original.status().is_in_flight() {
                assert_eq!(loaded.status(), TransferStatus::Pending);
                assert_eq!(loaded.attempt_count(), original.attempt_count());
                assert_eq!(loaded.bytes_transferred(), 0);
            } else {
                assert_eq!(loaded, original);
            }
        }
    }

    #[test]
    fn test_file_shape() {
        let dir = tempdir().unwrap();
        let mut queue = TransferQueue::new(dir.path());
        queue.set_world_name("world").unwrap();
        queue.add_region(RegionCoord::nether(1, 2)).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(queue.path()).unwrap()).unwrap();
        assert_eq!(raw["worldName"], "world");
        let state = &raw["states"][0];
        assert_eq!(state["x"], 1);
        assert_eq!(state["z"], 2);
        assert_eq!(state["dimension"], "nether");
        assert_eq!(state["status"], "pending");
        assert_eq!(state["attemptCount"], 0);
        assert!(state.get("bytesTransferred").is_some());
        assert!(state.get("totalBytes").is_some());
        assert!(state.get("errorMessage").is_some());
        assert!(state.get("lastAttemptTime").is_some());
    }

    #[test]
    fn test_retry_and_rearm() {
        let dir = tempdir().unwrap();
        let mut queue = TransferQueue::new(dir.path());
        let a = RegionCoord::overworld(0, 0);
        let b = RegionCoord::overworld(1, 0);
        queue.add_regions([a, b]).unwrap();

        let r = queue.get(&a).unwrap().failed("x").unwrap();
        queue.update(r).unwrap();
        let mut r = queue.get(&b).unwrap().failed("x").unwrap();
        r = r.retry(3).unwrap().failed("x").unwrap();
        r = r.retry(3).unwrap().failed("x").unwrap();
        queue.update(r).unwrap();

        assert_eq!(queue.retry_failed(3).unwrap(), 1);
        assert_eq!(queue.get(&a).unwrap().status(), TransferStatus::Pending);
        assert_eq!(queue.get(&b).unwrap().status(), TransferStatus::Failed);

        assert_eq!(queue.rearm_failed().unwrap(), 1);
        assert_eq!(queue.get(&b).unwrap().attempt_count(), 0);
        assert_eq!(queue.by_status(TransferStatus::Pending).len(), 2);
    }

    #[test]
    fn test_clear_completed_keeps_open_work() {
        let dir = tempdir().unwrap();
        let mut queue = TransferQueue::new(dir.path());
        let a = RegionCoord::overworld(0, 0);
        let b = RegionCoord::overworld(1, 0);
        let c = RegionCoord::overworld(2, 0);
        queue.add_regions([a, b, c]).unwrap();
        let r = queue.get(&a).unwrap().compressing().unwrap().uploading(1).unwrap().completed().unwrap();
        queue.update(r).unwrap();
        let r = queue.get(&b).unwrap().failed("x").unwrap();
        queue.update(r).unwrap();

        assert_eq!(queue.clear_completed().unwrap(), 2);
        assert_eq!(queue.len(), 1);
        assert!(queue.get(&c).is_some());

        queue.clear().unwrap();
        assert!(TransferQueue::load(dir.path()).unwrap().is_empty());
    }

    #[test]
    fn test_next_pending_is_deterministic() {
        let dir = tempdir().unwrap();
        let mut queue = TransferQueue::new(dir.path());
        queue
            .add_regions([RegionCoord::overworld(5, 0), RegionCoord::overworld(-2, 7)])
            .unwrap();
        assert_eq!(queue.next_pending().unwrap().region(), RegionCoord::overworld(-2, 7));
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(QUEUE_FILE), "{not json").unwrap();
        assert!(matches!(
            TransferQueue::load(dir.path()),
            Err(TransferError::Persistence(_))
        ));
    }
}
