//! On-disk layout of a ramdisk instance.
//!
//! Every path used by the lifecycle and snapshot operations is derived
//! from the target directory. The staging root sits next to the target
//! unless an explicit staging root path is configured:
//!
//! ```text
//! <parent>/.ramlayer.<name>/      or the configured path
//!   orig/                     original directory (or a symlink to it)
//!   head/                     read-only lower layer of the live overlay
//!   staging/                  tmpfs mount point
//!     diff/                   overlay upper directory
//!     work/                   overlay work directory
//!     snapshots/
//!       state                 snapshot metadata (JSON)
//!       snap-<id>.squash      compressed snapshot archives
//!       mounts/snap-<id>.mount
//! ```

use std::fs::{self, Metadata};
use std::io;
use std::path::{Path, PathBuf};

use crate::error::{PathContext, RamdiskError, RamdiskResult};
use crate::snapshot::SnapshotId;

pub const ROOT_PREFIX: &str = ".ramlayer.";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    target: PathBuf,
    root: PathBuf,
}

impl Layout {
    /// Resolve the layout for `target`.
    ///
    /// The staging root is `<parent>/.ramlayer.<name>` unless `staging_root`
    /// is given, in which case that path is the staging root itself.
    pub fn resolve(target: impl Into<PathBuf>, staging_root: Option<&Path>) -> Self {
        let target = target.into();
        let root = match staging_root {
            Some(root) => root.to_path_buf(),
            None => {
                let name = target.file_name().map(|n| n.to_string_lossy()).unwrap_or_default();
                let parent = target.parent().unwrap_or(target.as_path());
                parent.join(format!("{ROOT_PREFIX}{name}"))
            }
        };
        Self { target, root }
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn orig(&self) -> PathBuf {
        self.root.join("orig")
    }

    pub fn head(&self) -> PathBuf {
        self.root.join("head")
    }

    /// Mount point of the tmpfs holding everything below.
    pub fn ramdisk(&self) -> PathBuf {
        self.root.join("staging")
    }

    pub fn diff(&self) -> PathBuf {
        self.ramdisk().join("diff")
    }

    pub fn workdir(&self) -> PathBuf {
        self.ramdisk().join("work")
    }

    pub fn snapshots(&self) -> PathBuf {
        self.ramdisk().join("snapshots")
    }

    pub fn snapshot_state(&self) -> PathBuf {
        self.snapshots().join("state")
    }

    pub fn snapshot_mounts(&self) -> PathBuf {
        self.snapshots().join("mounts")
    }

    pub fn snapshot_archive(&self, id: SnapshotId) -> PathBuf {
        self.snapshots().join(archive_name(id))
    }

    pub fn snapshot_mount_point(&self, id: SnapshotId) -> PathBuf {
        self.snapshot_mounts().join(mount_point_name(id))
    }

    /// Directories created inside the staging root once the tmpfs is mounted.
    pub fn staging_dirs(&self) -> Vec<PathBuf> {
        vec![self.head(), self.diff(), self.workdir(), self.snapshots(), self.snapshot_mounts()]
    }

    /// Fails unless both the target and the staging root are directories.
    pub fn ensure_active(&self) -> RamdiskResult<()> {
        ensure_directory(&self.target)?;
        ensure_directory(&self.root)?;
        Ok(())
    }
}

pub fn archive_name(id: SnapshotId) -> String {
    format!("snap-{id}.squash")
}

pub fn mount_point_name(id: SnapshotId) -> String {
    format!("snap-{id}.mount")
}

/// Metadata of `path`, which must be an existing directory.
pub fn ensure_directory(path: &Path) -> RamdiskResult<Metadata> {
    match fs::metadata(path) {
        Ok(meta) if meta.is_dir() => Ok(meta),
        Ok(_) => Err(RamdiskError::NotDirectory(path.to_path_buf())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => {
            Err(RamdiskError::PathNotFound(path.to_path_buf()))
        }
        Err(err) => Err(err).path_context("failed to stat", path),
    }
}

/// Fails with `AlreadyExists` when anything, even a dangling symlink, is at `path`.
pub fn ensure_absent(path: &Path) -> RamdiskResult<()> {
    match fs::symlink_metadata(path) {
        Ok(_) => Err(RamdiskError::AlreadyExists(path.to_path_buf())),
        Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(err) => Err(err).path_context("failed to stat", path),
    }
}
