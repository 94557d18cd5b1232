use std::path::PathBuf;

use super::{Change, ChangeSink, ChangeStatus, Flow};
use crate::error::RamdiskResult;

/// Collects the changes of a resolution run for reporting.
///
/// An added directory is reported once; its contents are implied, including
/// those older layers contribute.
#[derive(Debug, Default)]
pub struct StatusReport {
    changes: Vec<Change>,
    added_dirs: Vec<PathBuf>,
}

impl StatusReport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn changes(&self) -> &[Change] {
        &self.changes
    }

    pub fn into_changes(self) -> Vec<Change> {
        self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }
}

impl ChangeSink for StatusReport {
    fn record(&mut self, change: Change) -> RamdiskResult<Flow> {
        if self.added_dirs.iter().any(|dir| change.relative.starts_with(dir)) {
            return Ok(Flow::SkipSubtree);
        }
        if change.is_dir && change.status == ChangeStatus::Added {
            self.added_dirs.push(change.relative.clone());
            self.changes.push(change);
            return Ok(Flow::SkipSubtree);
        }
        self.changes.push(change);
        Ok(Flow::Descend)
    }
}
