//! Compressed, read-only snapshots of the live diff.
//!
//! Each snapshot records the snapshot that was applied when it was taken as
//! its parent, so applying one means stacking its whole ancestor chain under
//! the live overlay. Id 0 stands for the original directory itself.

mod manager;
mod report;
mod state;

pub type SnapshotId = u64;

/// Pseudo-snapshot naming the original directory with nothing stacked on it.
pub const ORIGINAL: SnapshotId = 0;

pub use manager::SnapshotManager;
pub use report::{SnapshotDetails, SnapshotListing, SnapshotTable};
pub use state::{SnapshotRecord, SnapshotState};
