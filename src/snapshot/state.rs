use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ORIGINAL, SnapshotId};
use crate::error::{PathContext, RamdiskError, RamdiskResult};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotRecord {
    pub id: SnapshotId,
    #[serde(default)]
    pub parent: SnapshotId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    pub created: DateTime<Utc>,
}

/// Persisted snapshot bookkeeping of one ramdisk.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotState {
    /// Last id handed out; ids are never reused.
    pub counter: SnapshotId,
    #[serde(default)]
    pub snapshots: BTreeMap<SnapshotId, SnapshotRecord>,
    #[serde(default)]
    pub applied_snapshot: SnapshotId,
}

impl SnapshotState {
    pub fn load(path: &Path) -> RamdiskResult<Self> {
        let bytes = fs::read(path).path_context("failed to read snapshot state", path)?;
        serde_json::from_slice(&bytes)
            .map_err(|source| RamdiskError::State { path: path.to_path_buf(), source })
    }

    /// Write the state through a sibling temp file and a rename.
    pub fn save(&self, path: &Path) -> RamdiskResult<()> {
        let bytes = serde_json::to_vec_pretty(self)
            .map_err(|source| RamdiskError::State { path: path.to_path_buf(), source })?;

        let tmp = path.with_extension("tmp");
        let mut file = fs::File::create(&tmp).path_context("failed to create", &tmp)?;
        file.write_all(&bytes).path_context("failed to write", &tmp)?;
        file.sync_all().path_context("failed to sync", &tmp)?;
        drop(file);

        fs::rename(&tmp, path).path_context("failed to replace snapshot state", path)
    }

    pub fn get(&self, id: SnapshotId) -> Option<&SnapshotRecord> {
        self.snapshots.get(&id)
    }

    pub fn contains(&self, id: SnapshotId) -> bool {
        self.snapshots.contains_key(&id)
    }

    /// Allocate the next id and build its record on top of the applied snapshot.
    /// The record is not inserted.
    pub fn allocate(&mut self, label: Option<String>, created: DateTime<Utc>) -> SnapshotRecord {
        self.counter += 1;
        SnapshotRecord { id: self.counter, parent: self.applied_snapshot, label, created }
    }

    pub fn insert(&mut self, record: SnapshotRecord) {
        self.snapshots.insert(record.id, record);
    }

    pub fn remove(&mut self, id: SnapshotId) -> Option<SnapshotRecord> {
        self.snapshots.remove(&id)
    }

    /// Ancestors of `id`, nearest first, excluding `id` and the original (0).
    pub fn ancestors(&self, id: SnapshotId) -> RamdiskResult<Vec<SnapshotId>> {
        if id == ORIGINAL {
            return Ok(Vec::new());
        }

        let mut current = self.get(id).ok_or(RamdiskError::SnapshotNotFound(id))?;
        let mut visited = BTreeSet::from([id]);
        let mut chain = Vec::new();

        while current.parent != ORIGINAL {
            let (child, parent) = (current.id, current.parent);
            if !visited.insert(parent) {
                return Err(RamdiskError::Consistency(format!(
                    "snapshot {id} reaches snapshot {parent} twice through its parents"
                )));
            }
            current = self.get(parent).ok_or_else(|| {
                RamdiskError::Consistency(format!("snapshot {child} names missing parent {parent}"))
            })?;
            chain.push(parent);
        }

        Ok(chain)
    }

    /// Layers needed to mount `id`: its ancestors oldest first, then `id` itself.
    pub fn lineage(&self, id: SnapshotId) -> RamdiskResult<Vec<SnapshotId>> {
        if id == ORIGINAL {
            return Ok(Vec::new());
        }
        let mut chain = self.ancestors(id)?;
        chain.reverse();
        chain.push(id);
        Ok(chain)
    }

    /// Snapshots built directly on `id`, ascending.
    pub fn dependents(&self, id: SnapshotId) -> Vec<SnapshotId> {
        self.snapshots
            .values()
            .filter(|record| record.parent == id)
            .map(|record| record.id)
            .collect()
    }

    /// A snapshot can go when it exists, is not applied and nothing builds on it.
    pub fn check_deletable(&self, id: SnapshotId) -> RamdiskResult<()> {
        if !self.contains(id) {
            return Err(RamdiskError::SnapshotNotFound(id));
        }
        if self.applied_snapshot == id {
            return Err(RamdiskError::SnapshotApplied(id));
        }
        let dependents = self.dependents(id);
        if !dependents.is_empty() {
            return Err(RamdiskError::SnapshotHasDependents { id, dependents });
        }
        Ok(())
    }
}
