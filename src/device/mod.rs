//! Kernel and tool primitives a ramdisk is assembled from.
//!
//! Every operation that changes mount state or shells out to an external
//! tool goes through [`Device`], so the lifecycle code can be exercised
//! against a mock or a recording fake.

mod linux;
mod whiteout;

use std::fmt;
use std::path::{Path, PathBuf};

#[cfg(any(test, feature = "mockall"))]
use mockall::automock;
use serde::{Deserialize, Serialize};

use crate::error::RamdiskResult;
use crate::quota::Quota;

pub use linux::LinuxDevice;
pub use whiteout::{OPAQUE_XATTR, is_opaque, is_whiteout};

#[cfg_attr(any(test, feature = "mockall"), automock)]
pub trait Device: Send + Sync {
    /// Mount a fresh tmpfs limited to `size` at `target`.
    fn mount_tmpfs(&self, target: &Path, size: &Quota) -> RamdiskResult<()>;

    /// Change the size limit of the tmpfs mounted at `target`.
    fn resize_tmpfs(&self, target: &Path, size: &Quota) -> RamdiskResult<()>;

    /// Bind `from` onto `to`. A read-only bind either succeeds fully or leaves nothing mounted.
    fn bind_mount(&self, from: &Path, to: &Path, read_only: bool) -> RamdiskResult<()>;

    /// Writable overlay of `upper` over `lower` at `into`.
    fn mount_overlay(&self, into: &Path, upper: &Path, work: &Path, lower: &Path)
    -> RamdiskResult<()>;

    /// Read-only overlay of `lowers` at `into`; `lowers` is ordered oldest first.
    fn mount_overlay_readonly(&self, into: &Path, lowers: &[PathBuf]) -> RamdiskResult<()>;

    fn unmount(&self, target: &Path) -> RamdiskResult<()>;

    /// Pack the tree at `source` into a compressed archive.
    fn compress_directory(
        &self,
        source: &Path,
        archive: &Path,
        compression: Compression,
    ) -> RamdiskResult<()>;

    fn mount_archive(&self, archive: &Path, mount_point: &Path) -> RamdiskResult<()>;

    fn unmount_archive(&self, mount_point: &Path) -> RamdiskResult<()>;

    /// Recursive copy preserving mode, ownership, timestamps and links. Never follows symlinks.
    fn copy_tree(&self, from: &Path, to: &Path) -> RamdiskResult<()>;

    /// Remove the overlay opaque marker from a directory, if it carries one.
    fn clear_opaque_marker(&self, path: &Path) -> RamdiskResult<()>;
}

/// Compression used for snapshot archives.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    Gzip,
    Lzo,
    #[default]
    Xz,
}

impl Compression {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Gzip => "gzip",
            Self::Lzo => "lzo",
            Self::Xz => "xz",
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
