//! Layer resolution: what a stack of overlay layers changes relative to the
//! original directory.
//!
//! Layers are given oldest first and walked newest first. An entry only
//! counts in the newest layer containing its relative path. Directories
//! merge the way overlayfs merges them: an older directory under a newer
//! plain directory still contributes its children. A newer non-directory,
//! whiteout or opaque directory hides the older entry and its subtree.
//! Each surviving entry is classified against the original directory and
//! handed to a [`ChangeSink`], which decides whether to descend further.

mod merge;
mod status;

use std::fmt;
use std::fs::{self, Metadata};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::device::{is_opaque, is_whiteout};
use crate::error::{PathContext, RamdiskResult};
use crate::walk::LayerWalker;

pub use merge::MergeApplier;
pub use status::StatusReport;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeStatus {
    Added,
    Modified,
    Deleted,
}

impl ChangeStatus {
    /// Single-letter code; lowercase when the entry is a directory.
    pub fn code(self, is_dir: bool) -> char {
        let code = match self {
            Self::Added => b'A',
            Self::Modified => b'M',
            Self::Deleted => b'D',
        };
        if is_dir { (code ^ 0x20) as char } else { code as char }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Change {
    pub status: ChangeStatus,
    pub is_dir: bool,
    /// Path relative to the layer roots.
    pub relative: PathBuf,
    /// Absolute path of the entry in the layer that won.
    pub layer_path: PathBuf,
    /// Directory whose contents combine with the same directory in older layers,
    /// so the winning copy holds only part of them.
    pub merged: bool,
}

impl Change {
    pub fn code(&self) -> char {
        self.status.code(self.is_dir)
    }
}

impl fmt::Display for Change {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.code(), self.relative.display())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Descend,
    SkipSubtree,
}

pub trait ChangeSink {
    fn record(&mut self, change: Change) -> RamdiskResult<Flow>;
}

/// Classify a layer entry against the original entry at the same relative path.
///
/// Returns `None` when the entry does not change anything visible.
pub fn classify(entry: &Metadata, original: Option<&Metadata>) -> Option<ChangeStatus> {
    match original {
        None if is_whiteout(entry) => None,
        None => Some(ChangeStatus::Added),
        Some(_) if is_whiteout(entry) => Some(ChangeStatus::Deleted),
        Some(original) if entry.is_dir() && original.is_dir() => {
            if permission_bits(entry) == permission_bits(original) {
                None
            } else {
                Some(ChangeStatus::Modified)
            }
        }
        Some(_) => Some(ChangeStatus::Modified),
    }
}

fn permission_bits(meta: &Metadata) -> u32 {
    meta.permissions().mode() & 0o7777
}

/// `lstat` that maps a missing entry, or a non-directory path component, to `None`.
pub(crate) fn lstat_optional(path: &Path) -> RamdiskResult<Option<Metadata>> {
    match fs::symlink_metadata(path) {
        Ok(meta) => Ok(Some(meta)),
        Err(err)
            if matches!(err.kind(), io::ErrorKind::NotFound | io::ErrorKind::NotADirectory) =>
        {
            Ok(None)
        }
        Err(err) => Err(err).path_context("failed to stat", path),
    }
}

/// How newer layers affect an entry of an older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Shadowing {
    Visible,
    /// Directory under newer plain directories: its children still count.
    Merged,
    Hidden,
}

fn opaque(path: &Path) -> RamdiskResult<bool> {
    is_opaque(path).path_context("failed to read opaque marker on", path)
}

#[derive(Debug, Clone)]
pub struct Resolver {
    layers: Vec<PathBuf>,
    original: PathBuf,
}

impl Resolver {
    /// `layers` is ordered oldest first; the last one is normally the live diff.
    pub fn new(layers: Vec<PathBuf>, original: impl Into<PathBuf>) -> Self {
        Self { layers, original: original.into() }
    }

    pub fn run(&self, sink: &mut dyn ChangeSink) -> RamdiskResult<()> {
        for (index, layer) in self.layers.iter().enumerate().rev() {
            debug!(layer = %layer.display(), "resolving layer");
            let mut walker = LayerWalker::new(layer)?;

            while let Some(entry) = walker.next() {
                let entry = entry?;
                let relative = entry.relative_path();

                match self.shadowing(index, relative, entry.is_dir())? {
                    Shadowing::Visible => {}
                    Shadowing::Merged => continue,
                    Shadowing::Hidden => {
                        if entry.is_dir() {
                            walker.skip_subtree();
                        }
                        continue;
                    }
                }

                let original = lstat_optional(&self.original.join(relative))?;
                let Some(status) = classify(entry.metadata(), original.as_ref()) else {
                    continue;
                };

                let merged = entry.is_dir()
                    && !opaque(entry.path())?
                    && self.older_has_directory(index, relative)?;
                let change = Change {
                    status,
                    is_dir: entry.is_dir(),
                    relative: relative.to_path_buf(),
                    layer_path: entry.path().to_path_buf(),
                    merged,
                };
                if sink.record(change)? == Flow::SkipSubtree {
                    walker.skip_subtree();
                }
            }
        }
        Ok(())
    }

    fn shadowing(&self, index: usize, relative: &Path, is_dir: bool) -> RamdiskResult<Shadowing> {
        let mut shadowing = Shadowing::Visible;
        for newer in &self.layers[index + 1..] {
            let path = newer.join(relative);
            let Some(meta) = lstat_optional(&path)? else {
                continue;
            };
            if !is_dir || !meta.is_dir() || opaque(&path)? {
                return Ok(Shadowing::Hidden);
            }
            shadowing = Shadowing::Merged;
        }
        Ok(shadowing)
    }

    fn older_has_directory(&self, index: usize, relative: &Path) -> RamdiskResult<bool> {
        for older in &self.layers[..index] {
            if lstat_optional(&older.join(relative))?.is_some_and(|meta| meta.is_dir()) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}
