//! ramlayer puts a tmpfs-backed overlay over an existing directory.
//!
//! Writes land in memory and the original stays untouched until the
//! changes are merged back or thrown away. The live diff can be captured in
//! compressed read-only snapshots, and any snapshot can later be reapplied.

pub mod cli;
pub mod config;
pub mod device;
pub mod error;
pub mod layout;
pub mod quota;
pub mod ramdisk;
pub mod resolve;
pub mod snapshot;
pub mod transaction;
pub mod util;
pub mod walk;

pub use device::{Compression, Device, LinuxDevice};
pub use error::{ErrorKind, RamdiskError, RamdiskResult};
pub use layout::Layout;
pub use quota::Quota;
pub use ramdisk::{CreateOptions, DiscardOptions, Placement, Ramdisk};
pub use resolve::{Change, ChangeStatus};
pub use snapshot::{SnapshotId, SnapshotManager};
