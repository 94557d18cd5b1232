//! Recording stand-in for the kernel and external tools.
//!
//! Mounts are only recorded, except where their effect on the directory
//! tree matters to the code under test: unmounting the tmpfs empties it,
//! and snapshot archives are plain directory copies that get "mounted" by
//! copying them into the mount point.

#![allow(dead_code)]

use std::fs;
use std::os::unix::fs::{FileTypeExt, MetadataExt, symlink};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use ramlayer::device::{Compression, Device};
use ramlayer::error::{RamdiskError, RamdiskResult};
use ramlayer::quota::Quota;
use ramlayer::util::remove_all_in;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    MountTmpfs(PathBuf, String),
    ResizeTmpfs(PathBuf, String),
    Bind { from: PathBuf, to: PathBuf, read_only: bool },
    Overlay { into: PathBuf, upper: PathBuf, work: PathBuf, lower: PathBuf },
    OverlayReadonly { into: PathBuf, lowers: Vec<PathBuf> },
    Unmount(PathBuf),
    Compress { source: PathBuf, archive: PathBuf, compression: Compression },
    MountArchive { archive: PathBuf, mount_point: PathBuf },
    UnmountArchive(PathBuf),
    CopyTree { from: PathBuf, to: PathBuf },
    ClearOpaque(PathBuf),
}

#[derive(Default)]
pub struct FakeDevice {
    calls: Mutex<Vec<Call>>,
    tmpfs: Mutex<Vec<PathBuf>>,
    fail_on: Mutex<Option<&'static str>>,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every call of the named primitive fail from now on.
    pub fn fail_on(&self, primitive: &'static str) {
        *self.fail_on.lock().unwrap() = Some(primitive);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn take_calls(&self) -> Vec<Call> {
        std::mem::take(&mut *self.calls.lock().unwrap())
    }

    fn record(&self, primitive: &'static str, call: Call) -> RamdiskResult<()> {
        if *self.fail_on.lock().unwrap() == Some(primitive) {
            return Err(RamdiskError::External {
                command: primitive.to_string(),
                reason: "injected failure".to_string(),
            });
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

/// Where the fake keeps the tree an archive stands for.
pub fn archive_tree(archive: &Path) -> PathBuf {
    archive.with_extension("tree")
}

impl Device for FakeDevice {
    fn mount_tmpfs(&self, target: &Path, size: &Quota) -> RamdiskResult<()> {
        self.record("mount_tmpfs", Call::MountTmpfs(target.to_path_buf(), size.to_string()))?;
        self.tmpfs.lock().unwrap().push(target.to_path_buf());
        Ok(())
    }

    fn resize_tmpfs(&self, target: &Path, size: &Quota) -> RamdiskResult<()> {
        self.record("resize_tmpfs", Call::ResizeTmpfs(target.to_path_buf(), size.to_string()))
    }

    fn bind_mount(&self, from: &Path, to: &Path, read_only: bool) -> RamdiskResult<()> {
        self.record(
            "bind_mount",
            Call::Bind { from: from.to_path_buf(), to: to.to_path_buf(), read_only },
        )
    }

    fn mount_overlay(
        &self,
        into: &Path,
        upper: &Path,
        work: &Path,
        lower: &Path,
    ) -> RamdiskResult<()> {
        self.record(
            "mount_overlay",
            Call::Overlay {
                into: into.to_path_buf(),
                upper: upper.to_path_buf(),
                work: work.to_path_buf(),
                lower: lower.to_path_buf(),
            },
        )
    }

    fn mount_overlay_readonly(&self, into: &Path, lowers: &[PathBuf]) -> RamdiskResult<()> {
        self.record(
            "mount_overlay_readonly",
            Call::OverlayReadonly { into: into.to_path_buf(), lowers: lowers.to_vec() },
        )
    }

    fn unmount(&self, target: &Path) -> RamdiskResult<()> {
        self.record("unmount", Call::Unmount(target.to_path_buf()))?;
        let mut tmpfs = self.tmpfs.lock().unwrap();
        if let Some(pos) = tmpfs.iter().position(|t| t == target) {
            tmpfs.remove(pos);
            remove_all_in(target)?;
        }
        Ok(())
    }

    fn compress_directory(
        &self,
        source: &Path,
        archive: &Path,
        compression: Compression,
    ) -> RamdiskResult<()> {
        self.record(
            "compress_directory",
            Call::Compress {
                source: source.to_path_buf(),
                archive: archive.to_path_buf(),
                compression,
            },
        )?;
        copy_recursive(source, &archive_tree(archive))?;
        fs::write(archive, format!("squashfs image of {}", source.display()))
            .map_err(|err| RamdiskError::io("failed to write", archive, err))
    }

    fn mount_archive(&self, archive: &Path, mount_point: &Path) -> RamdiskResult<()> {
        self.record(
            "mount_archive",
            Call::MountArchive {
                archive: archive.to_path_buf(),
                mount_point: mount_point.to_path_buf(),
            },
        )?;
        copy_recursive(&archive_tree(archive), mount_point)
    }

    fn unmount_archive(&self, mount_point: &Path) -> RamdiskResult<()> {
        self.record("unmount_archive", Call::UnmountArchive(mount_point.to_path_buf()))?;
        remove_all_in(mount_point)
    }

    fn copy_tree(&self, from: &Path, to: &Path) -> RamdiskResult<()> {
        let call = Call::CopyTree { from: from.to_path_buf(), to: to.to_path_buf() };
        self.record("copy_tree", call)?;
        copy_recursive(from, to)
    }

    fn clear_opaque_marker(&self, path: &Path) -> RamdiskResult<()> {
        self.record("clear_opaque_marker", Call::ClearOpaque(path.to_path_buf()))
    }
}

fn io(path: &Path) -> impl FnOnce(std::io::Error) -> RamdiskError + '_ {
    move |err| RamdiskError::io("fake copy failed at", path, err)
}

fn copy_recursive(from: &Path, to: &Path) -> RamdiskResult<()> {
    let meta = fs::symlink_metadata(from).map_err(io(from))?;
    if meta.file_type().is_symlink() {
        let link = fs::read_link(from).map_err(io(from))?;
        return symlink(link, to).map_err(io(to));
    }
    if meta.file_type().is_char_device() {
        use nix::sys::stat::{Mode, SFlag, mknod};
        return mknod(to, SFlag::S_IFCHR, Mode::from_bits_truncate(meta.mode()), meta.rdev())
            .map_err(|err| RamdiskError::nix("fake copy failed at", to, err));
    }
    if !meta.is_dir() {
        fs::copy(from, to).map_err(io(to))?;
        return Ok(());
    }

    if !to.exists() {
        fs::create_dir(to).map_err(io(to))?;
    }
    fs::set_permissions(to, meta.permissions()).map_err(io(to))?;
    for entry in fs::read_dir(from).map_err(io(from))? {
        let entry = entry.map_err(io(from))?;
        copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
    }
    Ok(())
}

/// A directory with a couple of files and a subdirectory, mode 0750.
pub fn sample_tree(parent: &Path) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let root = parent.join("data");
    fs::create_dir_all(root.join("b")).unwrap();
    fs::write(root.join("a.txt"), b"alpha").unwrap();
    fs::write(root.join("b/c.txt"), b"charlie").unwrap();
    fs::set_permissions(root.join("b"), fs::Permissions::from_mode(0o755)).unwrap();
    fs::set_permissions(&root, fs::Permissions::from_mode(0o750)).unwrap();
    root
}

/// Create an overlay whiteout at `path`; false when the process may not create device nodes.
pub fn whiteout(path: &Path) -> bool {
    use nix::sys::stat::{Mode, SFlag, mknod};
    mknod(path, SFlag::S_IFCHR, Mode::empty(), 0).is_ok()
}

pub fn sorted_lines<T: ToString>(items: &[T]) -> Vec<String> {
    let mut lines: Vec<String> = items.iter().map(ToString::to_string).collect();
    lines.sort();
    lines
}
