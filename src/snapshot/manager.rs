use std::fs::{self, DirBuilder};
use std::os::unix::fs::DirBuilderExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};

use super::{SnapshotDetails, SnapshotId, SnapshotListing, SnapshotState};
use crate::device::{Compression, Device};
use crate::error::{PathContext, RamdiskError, RamdiskResult, RecoveryLocation};
use crate::layout::Layout;
use crate::ramdisk::mount_head;
use crate::util::remove_all_in;

pub struct SnapshotManager {
    layout: Layout,
    device: Arc<dyn Device>,
}

impl SnapshotManager {
    pub fn new(layout: Layout, device: Arc<dyn Device>) -> Self {
        Self { layout, device }
    }

    pub fn state(&self) -> RamdiskResult<SnapshotState> {
        SnapshotState::load(&self.layout.snapshot_state())
    }

    /// Layers of the live stack, oldest first: the applied lineage, then the diff.
    pub fn layer_stack(&self, state: &SnapshotState) -> RamdiskResult<Vec<PathBuf>> {
        let mut layers: Vec<PathBuf> = state
            .lineage(state.applied_snapshot)?
            .into_iter()
            .map(|id| self.layout.snapshot_mount_point(id))
            .collect();
        layers.push(self.layout.diff());
        Ok(layers)
    }

    /// Capture the current diff as a new snapshot on top of the applied one.
    pub fn create(
        &self,
        label: Option<String>,
        compression: Compression,
    ) -> RamdiskResult<SnapshotId> {
        self.layout.ensure_active()?;

        let state_path = self.layout.snapshot_state();
        let mut state = SnapshotState::load(&state_path)?;
        let record = state.allocate(label, Utc::now());
        let (id, parent) = (record.id, record.parent);
        let archive = self.layout.snapshot_archive(id);

        if let Err(err) = self.device.compress_directory(&self.layout.diff(), &archive, compression)
        {
            discard_archive(&archive);
            return Err(err.step(format!("failed to compress snapshot {id}")));
        }

        state.insert(record);
        if let Err(err) = state.save(&state_path) {
            discard_archive(&archive);
            return Err(err);
        }

        info!(id, parent, %compression, "created snapshot");
        Ok(id)
    }

    pub fn delete(&self, id: SnapshotId) -> RamdiskResult<()> {
        self.layout.ensure_active()?;

        let state_path = self.layout.snapshot_state();
        let mut state = SnapshotState::load(&state_path)?;
        state.check_deletable(id)?;

        let archive = self.layout.snapshot_archive(id);
        match fs::remove_file(&archive) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                warn!(id, archive = %archive.display(), "snapshot archive already gone");
            }
            Err(err) => return Err(RamdiskError::io("failed to remove", &archive, err)),
        }

        state.remove(id);
        state.save(&state_path)?;
        info!(id, "deleted snapshot");
        Ok(())
    }

    /// Rebuild the live stack on top of snapshot `id`, dropping the current diff.
    pub fn apply(&self, id: SnapshotId) -> RamdiskResult<()> {
        self.layout.ensure_active()?;

        let mut state = self.state()?;
        if id != super::ORIGINAL && !state.contains(id) {
            return Err(RamdiskError::SnapshotNotFound(id));
        }
        let lineage = state.lineage(id)?;

        self.remount(&lineage).map_err(|err| {
            err.with_recovery(
                format!("applying snapshot {id} failed"),
                vec![
                    RecoveryLocation::new("original data", self.layout.orig()),
                    RecoveryLocation::new("ramdisk diff", self.layout.diff()),
                    RecoveryLocation::new("snapshots", self.layout.snapshots()),
                ],
            )
        })?;

        state.applied_snapshot = id;
        state.save(&self.layout.snapshot_state())?;
        info!(id, layers = lineage.len(), "applied snapshot");
        Ok(())
    }

    fn remount(&self, lineage: &[SnapshotId]) -> RamdiskResult<()> {
        let layout = &self.layout;
        let device = self.device.as_ref();

        device.unmount(layout.target()).map_err(|err| err.step("failed to unmount overlay"))?;
        device.unmount(&layout.head()).map_err(|err| err.step("failed to unmount HEAD"))?;
        self.unmount_all()?;
        remove_all_in(&layout.diff()).map_err(|err| err.step("failed to clear diff"))?;

        let mut layers = Vec::with_capacity(lineage.len());
        for &id in lineage {
            let mount_point = layout.snapshot_mount_point(id);
            DirBuilder::new()
                .mode(0o700)
                .create(&mount_point)
                .path_context("failed to create", &mount_point)?;
            device
                .mount_archive(&layout.snapshot_archive(id), &mount_point)
                .map_err(|err| err.step(format!("failed to mount snapshot {id}")))?;
            layers.push(mount_point);
        }

        mount_head(device, layout, &layers).map_err(|err| err.step("failed to mount HEAD"))?;
        device
            .mount_overlay(layout.target(), &layout.diff(), &layout.workdir(), &layout.head())
            .map_err(|err| err.step("failed to mount overlay"))
    }

    /// Unmount every mounted snapshot archive and remove its mount point.
    pub fn unmount_all(&self) -> RamdiskResult<()> {
        let mounts = self.layout.snapshot_mounts();
        for entry in fs::read_dir(&mounts).path_context("failed to read", &mounts)? {
            let mount_point = entry.path_context("failed to read", &mounts)?.path();
            debug!(mount_point = %mount_point.display(), "unmounting snapshot");
            self.device.unmount_archive(&mount_point)?;
            fs::remove_dir(&mount_point).path_context("failed to remove", &mount_point)?;
        }
        Ok(())
    }

    pub fn list(&self) -> RamdiskResult<Vec<SnapshotListing>> {
        self.layout.ensure_active()?;
        let state = self.state()?;
        Ok(state
            .snapshots
            .values()
            .map(|record| SnapshotListing {
                record: record.clone(),
                applied: record.id == state.applied_snapshot,
            })
            .collect())
    }

    pub fn show(&self, id: SnapshotId) -> RamdiskResult<SnapshotDetails> {
        self.layout.ensure_active()?;
        let state = self.state()?;
        let record = state.get(id).ok_or(RamdiskError::SnapshotNotFound(id))?.clone();

        let archive = self.layout.snapshot_archive(id);
        let archive_size = fs::metadata(&archive).path_context("failed to stat", &archive)?.len();

        Ok(SnapshotDetails {
            applied: state.applied_snapshot == id,
            dependencies: state.ancestors(id)?,
            dependents: state.dependents(id),
            archive_size,
            record,
        })
    }
}

fn discard_archive(archive: &Path) {
    if let Err(err) = fs::remove_file(archive)
        && err.kind() != std::io::ErrorKind::NotFound
    {
        warn!(archive = %archive.display(), error = %err, "failed to remove snapshot archive");
    }
}
