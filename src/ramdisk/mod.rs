//! Lifecycle of a ramdisk: create, status, merge, discard and resize.

mod head;

use std::fs::{self, DirBuilder, Permissions};
use std::os::unix::fs::{DirBuilderExt, MetadataExt, PermissionsExt, symlink};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use nix::unistd::{Gid, Uid, chown, getegid, geteuid};
use tracing::info;

use crate::device::Device;
use crate::error::{PathContext, RamdiskResult, RecoveryLocation};
use crate::layout::{Layout, ensure_absent, ensure_directory};
use crate::quota::Quota;
use crate::resolve::{Change, MergeApplier, Resolver, StatusReport};
use crate::snapshot::{SnapshotManager, SnapshotState};
use crate::transaction::Transaction;

pub(crate) use head::mount_head;

/// Where the overlay shows up and what happens to the source directory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Placement {
    /// Move the source aside and mount the overlay in its place.
    #[default]
    Relocate,
    /// Like `Relocate`, but the source must not exist and is created empty.
    Blank,
    /// Leave the source where it is and mount the overlay at another path.
    MountAt(PathBuf),
}

#[derive(Debug, Clone, Default)]
pub struct CreateOptions {
    pub quota: Quota,
    pub placement: Placement,
    pub staging_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardOptions {
    /// Skip every unmount, for instances whose mounts are already gone.
    pub skip_unmount: bool,
}

/// Mode and ownership the overlay mount point inherits.
#[derive(Debug, Clone, Copy)]
struct DirAttrs {
    mode: u32,
    uid: u32,
    gid: u32,
}

impl DirAttrs {
    fn of(meta: &fs::Metadata) -> Self {
        Self { mode: meta.mode() & 0o7777, uid: meta.uid(), gid: meta.gid() }
    }

    fn for_current_user(mode: u32) -> Self {
        Self { mode, uid: geteuid().as_raw(), gid: getegid().as_raw() }
    }
}

pub struct Ramdisk {
    layout: Layout,
    device: Arc<dyn Device>,
}

impl Ramdisk {
    /// Handle on an existing ramdisk mounted at `target`. Nothing is checked yet.
    pub fn open(device: Arc<dyn Device>, target: &Path, staging_root: Option<&Path>) -> Self {
        Self { layout: Layout::resolve(target, staging_root), device }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn snapshots(&self) -> SnapshotManager {
        SnapshotManager::new(self.layout.clone(), Arc::clone(&self.device))
    }

    /// Turn `source` into a ramdisk. Every step is undone if a later one fails.
    pub fn create(
        device: Arc<dyn Device>,
        source: &Path,
        options: &CreateOptions,
    ) -> RamdiskResult<Self> {
        let target = match &options.placement {
            Placement::MountAt(dir) => dir.clone(),
            Placement::Relocate | Placement::Blank => source.to_path_buf(),
        };
        let layout = Layout::resolve(&target, options.staging_root.as_deref());

        let attrs = match &options.placement {
            Placement::Blank => {
                ensure_absent(source)?;
                DirAttrs::for_current_user(0o755)
            }
            Placement::Relocate => DirAttrs::of(&ensure_directory(source)?),
            Placement::MountAt(dir) => {
                let attrs = DirAttrs::of(&ensure_directory(source)?);
                ensure_absent(dir)?;
                attrs
            }
        };
        ensure_absent(layout.root())?;

        let ramdisk = Self { layout, device };
        ramdisk.assemble(source, &options.placement, &options.quota, attrs)?;
        info!(
            target = %ramdisk.layout.target().display(),
            root = %ramdisk.layout.root().display(),
            quota = %options.quota,
            "created ramdisk"
        );
        Ok(ramdisk)
    }

    fn assemble(
        &self,
        source: &Path,
        placement: &Placement,
        quota: &Quota,
        attrs: DirAttrs,
    ) -> RamdiskResult<()> {
        let device = self.device.as_ref();
        let layout = &self.layout;
        let target = layout.target();
        let (root, ramdisk, head, orig) =
            (layout.root(), layout.ramdisk(), layout.head(), layout.orig());
        let (diff, work, state) = (layout.diff(), layout.workdir(), layout.snapshot_state());
        let staging_dirs = layout.staging_dirs();

        let mut tx = Transaction::new();
        if *placement == Placement::Blank {
            tx = tx.step(
                "failed to create target directory",
                || make_dir(source, 0o755),
                || remove_dir(source),
            );
        }

        tx = tx
            .step("failed to create staging root", || make_dir(root, 0o755), || remove_dir(root))
            .step(
                "failed to create ramdisk mount point",
                || make_dir(&ramdisk, 0o700),
                || remove_dir(&ramdisk),
            )
            .step(
                "failed to mount ramdisk",
                || device.mount_tmpfs(&ramdisk, quota),
                || device.unmount(&ramdisk),
            );
        for dir in &staging_dirs {
            tx = tx.step(
                "failed to create staging directory",
                move || make_dir(dir, 0o700),
                move || remove_dir(dir),
            );
        }
        tx = tx.step(
            "failed to initialise snapshot state",
            || SnapshotState::default().save(&state),
            || fs::remove_file(&state).path_context("failed to remove", &state),
        );

        tx = match placement {
            Placement::MountAt(_) => tx.step(
                "failed to link original directory",
                || symlink(source, &orig).path_context("failed to create symlink", &orig),
                || fs::remove_file(&orig).path_context("failed to remove", &orig),
            ),
            Placement::Relocate | Placement::Blank => tx.step(
                "failed to move original directory",
                || rename(target, &orig),
                || rename(&orig, target),
            ),
        };

        tx.step(
            "failed to create overlay mount point",
            || make_dir(target, attrs.mode & 0o777),
            || remove_dir(target),
        )
        .step(
            "failed to mount HEAD",
            || mount_head(device, layout, &[]),
            || device.unmount(&head),
        )
        .step(
            "failed to mount overlay",
            || device.mount_overlay(target, &diff, &work, &head),
            || device.unmount(target),
        )
        .step_final("failed to set mode of overlay mount point", || {
            fs::set_permissions(target, Permissions::from_mode(attrs.mode))
                .path_context("failed to chmod", target)
        })
        .step_final("failed to set owner of overlay mount point", || {
            chown(target, Some(Uid::from_raw(attrs.uid)), Some(Gid::from_raw(attrs.gid)))
                .path_context("failed to chown", target)
        })
        .run()
    }

    /// Changes of the live stack relative to the original directory.
    pub fn status(&self) -> RamdiskResult<StatusReport> {
        self.layout.ensure_active()?;

        let snapshots = self.snapshots();
        let state = snapshots.state()?;
        let mut report = StatusReport::new();
        Resolver::new(snapshots.layer_stack(&state)?, self.layout.orig()).run(&mut report)?;
        Ok(report)
    }

    /// Write every change back to the original directory and tear the ramdisk down.
    pub fn merge(&self) -> RamdiskResult<Vec<Change>> {
        self.layout.ensure_active()?;

        let snapshots = self.snapshots();
        let state = snapshots.state()?;
        let layers = snapshots.layer_stack(&state)?;
        let orig = self.layout.orig();

        self.device
            .unmount(self.layout.target())
            .map_err(|err| err.step("failed to unmount overlay"))?;

        let mut applier = MergeApplier::new(self.device.as_ref(), &orig);
        remove_dir(self.layout.target())
            .and_then(|()| Resolver::new(layers, &orig).run(&mut applier))
            .map_err(|err| {
                err.with_recovery(
                    "merge failed, the original data may have been modified",
                    vec![
                        RecoveryLocation::new("original data", &orig),
                        RecoveryLocation::new("ramdisk diff", self.layout.diff()),
                        RecoveryLocation::new("snapshots", self.layout.snapshots()),
                    ],
                )
            })?;

        self.teardown(false).map_err(|err| {
            err.with_recovery(
                "teardown after merge failed",
                vec![RecoveryLocation::new("original data", &orig)],
            )
        })?;

        let changes = applier.into_changes();
        info!(target = %self.layout.target().display(), changes = changes.len(), "merged ramdisk");
        Ok(changes)
    }

    /// Drop every change and restore the original directory.
    pub fn discard(&self, options: DiscardOptions) -> RamdiskResult<()> {
        self.layout.ensure_active()?;

        let result = if options.skip_unmount {
            Ok(())
        } else {
            self.device
                .unmount(self.layout.target())
                .map_err(|err| err.step("failed to unmount overlay"))
        };

        result
            .and_then(|()| remove_dir(self.layout.target()))
            .and_then(|()| self.teardown(options.skip_unmount))
            .map_err(|err| {
                err.with_recovery(
                    "discard failed",
                    vec![RecoveryLocation::new("original data", self.layout.orig())],
                )
            })?;

        info!(target = %self.layout.target().display(), "discarded ramdisk");
        Ok(())
    }

    pub fn set_quota(&self, quota: &Quota) -> RamdiskResult<()> {
        self.layout.ensure_active()?;
        self.device.resize_tmpfs(&self.layout.ramdisk(), quota)?;
        info!(target = %self.layout.target().display(), %quota, "resized ramdisk");
        Ok(())
    }

    /// Everything after the overlay itself is gone: HEAD, snapshot mounts,
    /// the tmpfs, then the original directory goes back in place.
    fn teardown(&self, skip_unmount: bool) -> RamdiskResult<()> {
        let layout = &self.layout;

        if !skip_unmount {
            self.device.unmount(&layout.head()).map_err(|err| err.step("failed to unmount HEAD"))?;
            self.snapshots().unmount_all()?;
            self.device
                .unmount(&layout.ramdisk())
                .map_err(|err| err.step("failed to unmount ramdisk"))?;
        }
        remove_dir(&layout.head())?;
        remove_dir(&layout.ramdisk())?;

        let orig = layout.orig();
        let meta = fs::symlink_metadata(&orig).path_context("failed to stat", &orig)?;
        if meta.file_type().is_symlink() {
            fs::remove_file(&orig).path_context("failed to remove", &orig)?;
        } else {
            rename(&orig, layout.target())?;
        }

        remove_dir(layout.root())
    }
}

fn make_dir(path: &Path, mode: u32) -> RamdiskResult<()> {
    DirBuilder::new().mode(mode).create(path).path_context("failed to create", path)
}

fn remove_dir(path: &Path) -> RamdiskResult<()> {
    fs::remove_dir(path).path_context("failed to remove", path)
}

fn rename(from: &Path, to: &Path) -> RamdiskResult<()> {
    fs::rename(from, to).path_context(&format!("failed to move {} to", from.display()), to)
}
