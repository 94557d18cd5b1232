use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};

use nix::unistd::{Gid, Uid, chown};
use tracing::debug;

use super::{Change, ChangeSink, ChangeStatus, Flow, lstat_optional};
use crate::device::Device;
use crate::error::{PathContext, RamdiskResult};
use crate::util::remove_all;

/// Applies resolved changes onto the original directory.
///
/// Added and modified entries are copied from the layer that won, deleted
/// ones are removed. A directory that exists only in the winning layer is
/// copied whole and its subtree is not visited again; one that merges with
/// older layers is created empty and filled entry by entry.
pub struct MergeApplier<'a> {
    device: &'a dyn Device,
    original: PathBuf,
    applied: Vec<Change>,
}

impl<'a> MergeApplier<'a> {
    pub fn new(device: &'a dyn Device, original: impl Into<PathBuf>) -> Self {
        Self { device, original: original.into(), applied: Vec::new() }
    }

    pub fn applied(&self) -> &[Change] {
        &self.applied
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.applied
    }

    fn replace(&self, change: &Change, target: &Path) -> RamdiskResult<Flow> {
        match lstat_optional(target)? {
            Some(existing) if existing.is_dir() && change.is_dir => {
                let mode = fs::symlink_metadata(&change.layer_path)
                    .path_context("failed to stat", &change.layer_path)?
                    .permissions();
                fs::set_permissions(target, mode)
                    .path_context("failed to set permissions on", target)?;
                return Ok(Flow::Descend);
            }
            // cp would follow a symlink left at the destination
            Some(_) => remove_all(target)?,
            None => {}
        }

        if !change.is_dir {
            self.device.copy_tree(&change.layer_path, target)?;
            return Ok(Flow::Descend);
        }
        if change.merged {
            create_dir_like(&change.layer_path, target)?;
            return Ok(Flow::Descend);
        }

        self.device.copy_tree(&change.layer_path, target)?;
        self.device.clear_opaque_marker(target)?;
        Ok(Flow::SkipSubtree)
    }
}

/// Create `target` with the mode and owner of the layer directory `from`.
fn create_dir_like(from: &Path, target: &Path) -> RamdiskResult<()> {
    let meta = fs::symlink_metadata(from).path_context("failed to stat", from)?;
    fs::create_dir(target).path_context("failed to create directory", target)?;
    fs::set_permissions(target, meta.permissions())
        .path_context("failed to set permissions on", target)?;
    chown(target, Some(Uid::from_raw(meta.uid())), Some(Gid::from_raw(meta.gid())))
        .path_context("failed to chown", target)
}

impl ChangeSink for MergeApplier<'_> {
    fn record(&mut self, change: Change) -> RamdiskResult<Flow> {
        let target = self.original.join(&change.relative);
        debug!(change = %change, merged = change.merged, "merging");

        let flow = match change.status {
            ChangeStatus::Deleted => {
                remove_all(&target)?;
                Flow::Descend
            }
            ChangeStatus::Added | ChangeStatus::Modified => self.replace(&change, &target)?,
        };

        self.applied.push(change);
        Ok(flow)
    }
}
