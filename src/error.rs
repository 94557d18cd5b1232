use std::io;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::snapshot::SnapshotId;

pub type RamdiskResult<T> = Result<T, RamdiskError>;

/// Coarse classification of a [`RamdiskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    AlreadyExists,
    Conflict,
    Consistency,
    Io,
}

/// A labelled path an operator can use to recover data by hand.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecoveryLocation {
    pub label: &'static str,
    pub path: PathBuf,
}

impl RecoveryLocation {
    pub fn new(label: &'static str, path: impl Into<PathBuf>) -> Self {
        Self { label, path: path.into() }
    }
}

#[derive(Error, Debug)]
pub enum RamdiskError {
    #[error("{} does not exist", .0.display())]
    PathNotFound(PathBuf),

    #[error("snapshot {0} does not exist")]
    SnapshotNotFound(SnapshotId),

    #[error("{} already exists", .0.display())]
    AlreadyExists(PathBuf),

    #[error("{} is not a directory", .0.display())]
    NotDirectory(PathBuf),

    #[error("invalid quota {0:?}: expected an integer followed by one of K, M, G, T")]
    InvalidQuota(String),

    #[error("snapshot {0} is currently applied")]
    SnapshotApplied(SnapshotId),

    #[error("snapshot {id} has dependent snapshots: {}", join_ids(.dependents))]
    SnapshotHasDependents { id: SnapshotId, dependents: Vec<SnapshotId> },

    #[error("inconsistent snapshot lineage: {0}")]
    Consistency(String),

    #[error("{context} {}: {source}", .path.display())]
    Io {
        context: String,
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{context} {}: {source}", .path.display())]
    Nix {
        context: String,
        path: PathBuf,
        #[source]
        source: nix::Error,
    },

    #[error("`{command}` failed: {reason}")]
    External { command: String, reason: String },

    #[error("malformed snapshot state {}: {source}", .path.display())]
    State {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{step}: {source}")]
    Step {
        step: String,
        #[source]
        source: Box<RamdiskError>,
    },

    #[error("{summary}: {source}{}", render_recovery(.recovery))]
    Recovery {
        summary: String,
        #[source]
        source: Box<RamdiskError>,
        recovery: Vec<RecoveryLocation>,
    },
}

impl RamdiskError {
    pub fn io(context: impl Into<String>, path: impl AsRef<Path>, source: io::Error) -> Self {
        Self::Io { context: context.into(), path: path.as_ref().to_path_buf(), source }
    }

    pub fn nix(context: impl Into<String>, path: impl AsRef<Path>, source: nix::Error) -> Self {
        Self::Nix { context: context.into(), path: path.as_ref().to_path_buf(), source }
    }

    /// Prefix the error with the description of the step that produced it.
    pub fn step(self, step: impl Into<String>) -> Self {
        Self::Step { step: step.into(), source: Box::new(self) }
    }

    /// Attach the locations an operator needs to recover from a partial teardown.
    pub fn with_recovery(
        self,
        summary: impl Into<String>,
        recovery: Vec<RecoveryLocation>,
    ) -> Self {
        Self::Recovery { summary: summary.into(), source: Box::new(self), recovery }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::PathNotFound(_) | Self::SnapshotNotFound(_) => ErrorKind::NotFound,
            Self::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Self::NotDirectory(_)
            | Self::InvalidQuota(_)
            | Self::SnapshotApplied(_)
            | Self::SnapshotHasDependents { .. } => ErrorKind::Conflict,
            Self::Consistency(_) => ErrorKind::Consistency,
            Self::Io { .. } | Self::Nix { .. } | Self::External { .. } | Self::State { .. } => {
                ErrorKind::Io
            }
            Self::Step { source, .. } | Self::Recovery { source, .. } => source.kind(),
        }
    }

    /// Recovery locations carried by this error, if any.
    pub fn recovery(&self) -> &[RecoveryLocation] {
        match self {
            Self::Recovery { recovery, .. } => recovery,
            Self::Step { source, .. } => source.recovery(),
            _ => &[],
        }
    }
}

/// Attach a context message and the path involved to low-level results.
pub(crate) trait PathContext<T> {
    fn path_context(self, context: &str, path: &Path) -> RamdiskResult<T>;
}

impl<T> PathContext<T> for io::Result<T> {
    fn path_context(self, context: &str, path: &Path) -> RamdiskResult<T> {
        self.map_err(|err| RamdiskError::io(context, path, err))
    }
}

impl<T> PathContext<T> for nix::Result<T> {
    fn path_context(self, context: &str, path: &Path) -> RamdiskResult<T> {
        self.map_err(|err| RamdiskError::nix(context, path, err))
    }
}

fn join_ids(ids: &[SnapshotId]) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(", ")
}

fn render_recovery(recovery: &[RecoveryLocation]) -> String {
    if recovery.is_empty() {
        return String::new();
    }

    let width = recovery.iter().map(|loc| loc.label.len()).max().unwrap_or(0) + 1;
    let mut out = String::from("\n  recovery:");
    for loc in recovery {
        out.push_str(&format!(
            "\n    {:<width$} {}",
            format!("{}:", loc.label),
            loc.path.display(),
            width = width
        ));
    }
    out
}
