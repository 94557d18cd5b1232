use std::fs::Metadata;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::Path;

use nix::errno::Errno;

/// Extended attribute overlayfs sets on a directory that hides its lower counterparts.
pub const OPAQUE_XATTR: &str = "trusted.overlay.opaque";

/// An overlay whiteout is a character device with device number 0/0.
pub fn is_whiteout(meta: &Metadata) -> bool {
    meta.file_type().is_char_device() && meta.rdev() == 0
}

/// Whether the directory at `path` carries the overlay opaque marker.
///
/// Filesystems without extended attributes never have one.
pub fn is_opaque(path: &Path) -> io::Result<bool> {
    match xattr::get(path, OPAQUE_XATTR) {
        Ok(value) => Ok(value.is_some_and(|value| value == b"y")),
        Err(err) if err.raw_os_error() == Some(Errno::EOPNOTSUPP as i32) => Ok(false),
        Err(err) => Err(err),
    }
}
