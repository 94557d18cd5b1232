//! Depth-first traversal of a single layer directory.
//!
//! [`LayerWalker`] yields every entry below a layer root (the root itself
//! is not yielded) together with its `lstat` metadata and its path relative
//! to the root. After a directory is yielded the walker descends into it on
//! the following call to `next`, unless [`LayerWalker::skip_subtree`] was
//! called in between. Sibling order is whatever the directory stream gives.

use std::fs::{self, Metadata, ReadDir};
use std::iter::FusedIterator;
use std::path::{Path, PathBuf};

use crate::error::{PathContext, RamdiskError, RamdiskResult};

#[derive(Debug)]
pub struct LayerEntry {
    relative: PathBuf,
    path: PathBuf,
    metadata: Metadata,
}

impl LayerEntry {
    pub fn relative_path(&self) -> &Path {
        &self.relative
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn metadata(&self) -> &Metadata {
        &self.metadata
    }

    pub fn is_dir(&self) -> bool {
        self.metadata.is_dir()
    }
}

struct Frame {
    dir: PathBuf,
    relative: PathBuf,
    entries: ReadDir,
}

pub struct LayerWalker {
    stack: Vec<Frame>,
    // directory yielded last, entered on the next call unless skipped
    pending: Option<(PathBuf, PathBuf)>,
}

impl LayerWalker {
    pub fn new(root: impl Into<PathBuf>) -> RamdiskResult<Self> {
        let root = root.into();
        let entries = fs::read_dir(&root).path_context("failed to read layer", &root)?;
        let frame = Frame { dir: root, relative: PathBuf::new(), entries };
        Ok(Self { stack: vec![frame], pending: None })
    }

    /// Do not descend into the directory returned by the last call to `next`.
    pub fn skip_subtree(&mut self) {
        self.pending = None;
    }

    fn fail(&mut self, err: RamdiskError) -> Option<RamdiskResult<LayerEntry>> {
        self.stack.clear();
        self.pending = None;
        Some(Err(err))
    }
}

impl Iterator for LayerWalker {
    type Item = RamdiskResult<LayerEntry>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some((dir, relative)) = self.pending.take() {
            match fs::read_dir(&dir) {
                Ok(entries) => self.stack.push(Frame { dir, relative, entries }),
                Err(err) => {
                    return self.fail(RamdiskError::io("failed to read directory", &dir, err));
                }
            }
        }

        loop {
            let frame = self.stack.last_mut()?;
            let entry = match frame.entries.next() {
                None => {
                    self.stack.pop();
                    continue;
                }
                Some(Ok(entry)) => entry,
                Some(Err(err)) => {
                    let dir = frame.dir.clone();
                    return self.fail(RamdiskError::io("failed to read directory", &dir, err));
                }
            };

            let relative = frame.relative.join(entry.file_name());
            let path = entry.path();
            let metadata = match entry.metadata() {
                Ok(metadata) => metadata,
                Err(err) => return self.fail(RamdiskError::io("failed to stat", &path, err)),
            };

            if metadata.is_dir() {
                self.pending = Some((path.clone(), relative.clone()));
            }
            return Some(Ok(LayerEntry { relative, path, metadata }));
        }
    }
}

impl FusedIterator for LayerWalker {}
