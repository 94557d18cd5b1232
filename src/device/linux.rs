use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::Command;

use nix::errno::Errno;
use nix::mount::{MsFlags, mount, umount};
use tracing::{debug, warn};

use super::{Compression, Device, OPAQUE_XATTR, is_opaque};
use crate::error::{PathContext, RamdiskError, RamdiskResult};
use crate::quota::Quota;

const NONE: Option<&'static str> = None;

/// [`Device`] backed by mount(2) and the squashfs and coreutils tools.
#[derive(Debug, Default, Clone, Copy)]
pub struct LinuxDevice;

impl LinuxDevice {
    pub fn new() -> Self {
        Self
    }
}

impl Device for LinuxDevice {
    fn mount_tmpfs(&self, target: &Path, size: &Quota) -> RamdiskResult<()> {
        debug!(target = %target.display(), %size, "mounting tmpfs");
        let options = format!("size={size}");
        mount(Some("tmpfs"), target, Some("tmpfs"), MsFlags::empty(), Some(options.as_str()))
            .path_context("failed to mount tmpfs on", target)
    }

    fn resize_tmpfs(&self, target: &Path, size: &Quota) -> RamdiskResult<()> {
        debug!(target = %target.display(), %size, "resizing tmpfs");
        let options = format!("size={size}");
        mount(NONE, target, NONE, MsFlags::MS_REMOUNT, Some(options.as_str()))
            .path_context("failed to resize tmpfs on", target)
    }

    fn bind_mount(&self, from: &Path, to: &Path, read_only: bool) -> RamdiskResult<()> {
        debug!(from = %from.display(), to = %to.display(), read_only, "bind mounting");
        mount(Some(from), to, NONE, MsFlags::MS_BIND, NONE)
            .path_context("failed to bind mount onto", to)?;

        if !read_only {
            return Ok(());
        }

        // the read-only flag only sticks on a remount of an existing bind
        let flags = MsFlags::MS_REMOUNT | MsFlags::MS_BIND | MsFlags::MS_RDONLY;
        if let Err(err) = mount(NONE, to, NONE, flags, NONE) {
            if let Err(undo) = umount(to) {
                warn!(to = %to.display(), error = %undo, "failed to drop writable bind mount");
            }
            return Err(RamdiskError::nix("failed to remount read-only", to, err));
        }
        Ok(())
    }

    fn mount_overlay(
        &self,
        into: &Path,
        upper: &Path,
        work: &Path,
        lower: &Path,
    ) -> RamdiskResult<()> {
        let options = overlay_options(&[lower.to_path_buf()], Some((upper, work)));
        debug!(into = %into.display(), %options, "mounting overlay");
        mount(Some("overlay"), into, Some("overlay"), MsFlags::empty(), Some(options.as_str()))
            .path_context("failed to mount overlay on", into)
    }

    fn mount_overlay_readonly(&self, into: &Path, lowers: &[PathBuf]) -> RamdiskResult<()> {
        let options = overlay_options(lowers, None);
        debug!(into = %into.display(), %options, "mounting read-only overlay");
        mount(Some("overlay"), into, Some("overlay"), MsFlags::MS_RDONLY, Some(options.as_str()))
            .path_context("failed to mount read-only overlay on", into)
    }

    fn unmount(&self, target: &Path) -> RamdiskResult<()> {
        debug!(target = %target.display(), "unmounting");
        umount(target).path_context("failed to unmount", target)
    }

    fn compress_directory(
        &self,
        source: &Path,
        archive: &Path,
        compression: Compression,
    ) -> RamdiskResult<()> {
        run(Command::new("mksquashfs").arg(source).arg(archive).args([
            "-comp",
            compression.as_str(),
            "-no-progress",
        ]))
    }

    fn mount_archive(&self, archive: &Path, mount_point: &Path) -> RamdiskResult<()> {
        run(Command::new("mount")
            .args(["-t", "squashfs", "-o", "loop,ro"])
            .arg(archive)
            .arg(mount_point))
    }

    fn unmount_archive(&self, mount_point: &Path) -> RamdiskResult<()> {
        // the mount helper also releases the loop device
        run(Command::new("umount").arg(mount_point))
    }

    fn copy_tree(&self, from: &Path, to: &Path) -> RamdiskResult<()> {
        run(Command::new("cp")
            .args(["--no-target-directory", "--recursive", "--no-dereference", "--preserve=all"])
            .arg(from)
            .arg(to))
    }

    fn clear_opaque_marker(&self, path: &Path) -> RamdiskResult<()> {
        if !is_opaque(path).path_context("failed to read opaque marker on", path)? {
            return Ok(());
        }

        debug!(path = %path.display(), "clearing opaque marker");
        match xattr::remove(path, OPAQUE_XATTR) {
            Ok(()) => Ok(()),
            Err(err) if err.raw_os_error() == Some(Errno::ENODATA as i32) => Ok(()),
            Err(err) => Err(RamdiskError::io("failed to clear opaque marker on", path, err)),
        }
    }
}

/// Option string for an overlay mount. `lowers` is ordered oldest first,
/// overlayfs wants the topmost layer leftmost.
fn overlay_options(lowers: &[PathBuf], upper: Option<(&Path, &Path)>) -> String {
    let lowerdir =
        lowers.iter().rev().map(|dir| escape_layer(dir.as_os_str())).collect::<Vec<_>>().join(":");

    match upper {
        Some((upper, work)) => format!(
            "lowerdir={lowerdir},upperdir={},workdir={}",
            escape_layer(upper.as_os_str()),
            escape_layer(work.as_os_str())
        ),
        None => format!("lowerdir={lowerdir}"),
    }
}

fn escape_layer(path: &OsStr) -> String {
    path.to_string_lossy().replace('\\', "\\\\").replace(':', "\\:")
}

fn run(command: &mut Command) -> RamdiskResult<()> {
    let rendered = render(command);
    debug!(command = %rendered, "running");

    let output = command
        .output()
        .map_err(|err| RamdiskError::io("failed to run", command.get_program(), err))?;

    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let reason = if stderr.is_empty() { output.status.to_string() } else { stderr };
    Err(RamdiskError::External { command: rendered, reason })
}

fn render(command: &Command) -> String {
    std::iter::once(command.get_program())
        .chain(command.get_args())
        .map(|part| part.to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join(" ")
}
