//! File index: filename → replication state
//!
//! Each record moves through a small state machine:
//!
//! ```text
//! (none) --store--> StoreInProgress --R acks--> StoreComplete
//! StoreComplete --remove--> RemoveInProgress --all acks--> (deleted)
//! ```
//!
//! Every transition happens under the map's per-key lock, so concurrent
//! acknowledgments for one file see each other's effects and quorum fires once.

use crate::common::{Error, Result};
use crate::controller::registry::NodeId;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum FileStatus {
    StoreInProgress,
    StoreComplete,
    RemoveInProgress,
}

impl std::fmt::Display for FileStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FileStatus::StoreInProgress => write!(f, "store in progress"),
            FileStatus::StoreComplete => write!(f, "store complete"),
            FileStatus::RemoveInProgress => write!(f, "remove in progress"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct FileRecord {
    pub status: FileStatus,
    /// Nodes that acknowledged holding the file
    pub replicas: BTreeSet<NodeId>,
    /// Size announced by the storing client
    pub size: u64,
    pub created_at: Instant,
    /// Set once the remove acknowledgment window has elapsed
    pub remove_timed_out: bool,
}

impl FileRecord {
    fn new(size: u64) -> Self {
        Self {
            status: FileStatus::StoreInProgress,
            replicas: BTreeSet::new(),
            size,
            created_at: Instant::now(),
            remove_timed_out: false,
        }
    }
}

/// Result of applying a store acknowledgment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AckOutcome {
    /// Recorded; quorum not reached yet
    Pending { acks: usize },
    /// This ack brought the file to quorum
    Completed,
    /// File was already complete; ack recorded, nothing fires
    AlreadyComplete,
    /// No store in progress for this name
    Ignored,
}

#[derive(Default)]
pub struct FileIndex {
    files: DashMap<String, FileRecord>,
}

impl FileIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn get(&self, name: &str) -> Option<FileRecord> {
        self.files.get(name).map(|r| r.clone())
    }

    pub fn status(&self, name: &str) -> Option<FileStatus> {
        self.files.get(name).map(|r| r.status)
    }

    /// Rejects names that are complete, being removed, or have a store in
    /// flight younger than `in_flight`.
    pub fn check_storable(&self, name: &str, in_flight: Duration) -> Result<()> {
        match self.files.get(name) {
            Some(record) if blocks_store(&record, in_flight) => {
                Err(Error::FileAlreadyExists(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    /// Create a fresh `StoreInProgress` record, replacing a stale one.
    pub fn begin_store(&self, name: &str, size: u64, in_flight: Duration) -> Result<()> {
        match self.files.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                if blocks_store(entry.get(), in_flight) {
                    return Err(Error::FileAlreadyExists(name.to_string()));
                }
                tracing::debug!("Replacing stale in-progress store of {}", name);
                entry.insert(FileRecord::new(size));
            }
            Entry::Vacant(entry) => {
                entry.insert(FileRecord::new(size));
            }
        }
        Ok(())
    }

    /// Add `node` to the replica set; reports whether quorum `replicas` was
    /// reached by this call.
    pub fn record_store_ack(&self, name: &str, node: NodeId, replicas: usize) -> AckOutcome {
        let Some(mut record) = self.files.get_mut(name) else {
            return AckOutcome::Ignored;
        };

        match record.status {
            FileStatus::RemoveInProgress => AckOutcome::Ignored,
            FileStatus::StoreComplete => {
                record.replicas.insert(node);
                AckOutcome::AlreadyComplete
            }
            FileStatus::StoreInProgress => {
                record.replicas.insert(node);
                if record.replicas.len() >= replicas {
                    record.status = FileStatus::StoreComplete;
                    AckOutcome::Completed
                } else {
                    AckOutcome::Pending {
                        acks: record.replicas.len(),
                    }
                }
            }
        }
    }

    /// Move a complete file to `RemoveInProgress`, returning its replicas.
    pub fn begin_remove(&self, name: &str) -> Result<BTreeSet<NodeId>> {
        match self.files.get_mut(name) {
            Some(mut record) if record.status == FileStatus::StoreComplete => {
                record.status = FileStatus::RemoveInProgress;
                record.remove_timed_out = false;
                Ok(record.replicas.clone())
            }
            _ => Err(Error::FileDoesNotExist(name.to_string())),
        }
    }

    /// Delete a record whose removal has been fully acknowledged.
    pub fn finish_remove(&self, name: &str) -> bool {
        self.files
            .remove_if(name, |_, r| r.status == FileStatus::RemoveInProgress)
            .is_some()
    }

    pub fn mark_remove_timed_out(&self, name: &str) {
        if let Some(mut record) = self.files.get_mut(name) {
            if record.status == FileStatus::RemoveInProgress {
                record.remove_timed_out = true;
            }
        }
    }

    /// Drop a timed-out remove that nothing holds anymore.
    pub fn drop_abandoned_remove(&self, name: &str) -> bool {
        self.files
            .remove_if(name, |_, r| {
                r.status == FileStatus::RemoveInProgress && r.remove_timed_out
            })
            .is_some()
    }

    /// Names of every `StoreComplete` file, sorted.
    pub fn complete_files(&self) -> Vec<String> {
        let mut names: Vec<String> = self
            .files
            .iter()
            .filter(|r| r.status == FileStatus::StoreComplete)
            .map(|r| r.key().clone())
            .collect();
        names.sort();
        names
    }

    /// Point-in-time status of every record.
    pub fn statuses(&self) -> BTreeMap<String, FileStatus> {
        self.files
            .iter()
            .map(|r| (r.key().clone(), r.status))
            .collect()
    }

    /// Names of removes whose acknowledgment window has passed.
    pub fn timed_out_removes(&self) -> Vec<String> {
        self.files
            .iter()
            .filter(|r| r.status == FileStatus::RemoveInProgress && r.remove_timed_out)
            .map(|r| r.key().clone())
            .collect()
    }

    /// Forget replicas on nodes that are no longer registered. Returns how
    /// many references were dropped.
    pub fn prune_replicas(&self, live: &HashSet<NodeId>) -> usize {
        let mut pruned = 0;
        for mut record in self.files.iter_mut() {
            if record.status != FileStatus::StoreComplete {
                continue;
            }
            let before = record.replicas.len();
            record.replicas.retain(|n| live.contains(n));
            pruned += before - record.replicas.len();
        }
        pruned
    }

    pub fn add_replicas(&self, name: &str, nodes: &[NodeId]) {
        if let Some(mut record) = self.files.get_mut(name) {
            if record.status == FileStatus::StoreComplete {
                record.replicas.extend(nodes.iter().copied());
            }
        }
    }

    pub fn drop_replica(&self, name: &str, node: NodeId) {
        if let Some(mut record) = self.files.get_mut(name) {
            record.replicas.remove(&node);
        }
    }
}

fn blocks_store(record: &FileRecord, in_flight: Duration) -> bool {
    match record.status {
        FileStatus::StoreComplete | FileStatus::RemoveInProgress => true,
        FileStatus::StoreInProgress => record.created_at.elapsed() < in_flight,
    }
}
