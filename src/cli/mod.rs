//! Command line front end.

use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{Args, Parser, Subcommand};

use crate::config::Config;
use crate::device::{Compression, Device, LinuxDevice};
use crate::error::RamdiskError;
use crate::quota::Quota;
use crate::ramdisk::{CreateOptions, DiscardOptions, Placement, Ramdisk};
use crate::snapshot::{SnapshotId, SnapshotTable};

#[derive(Debug, Parser)]
#[command(name = "ramlayer", version, about = "Put a tmpfs-backed overlay over a directory")]
pub struct Cli {
    /// Staging root to use in place of `.ramlayer.NAME` next to the target.
    #[arg(long, global = true, value_name = "DIR", env = "RAMLAYER_STAGING_ROOT")]
    pub staging_root: Option<PathBuf>,

    /// Log every mount and step.
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Turn a directory into a ramdisk.
    Create(CreateArgs),
    /// List changes made on the ramdisk.
    Status(PathArg),
    /// Throw away all changes and restore the directory.
    Discard {
        #[command(flatten)]
        path: PathArg,
        /// Do not unmount anything, e.g. after a reboot.
        #[arg(long)]
        no_unmount: bool,
    },
    /// Write all changes back to the directory and remove the ramdisk.
    Merge(PathArg),
    /// Change the size limit of the ramdisk.
    SetQuota {
        #[command(flatten)]
        path: PathArg,
        #[arg(short, long)]
        quota: Quota,
    },
    /// Manage snapshots of the ramdisk.
    #[command(subcommand)]
    Snapshot(SnapshotCommand),
}

#[derive(Debug, Args)]
pub struct PathArg {
    pub path: PathBuf,
}

#[derive(Debug, Args)]
pub struct CreateArgs {
    pub path: PathBuf,

    /// Size limit such as 512M or 2G.
    #[arg(short, long)]
    pub quota: Option<Quota>,

    /// Keep the directory in place and mount the overlay here instead.
    #[arg(long, value_name = "DIR", conflicts_with = "new")]
    pub mount_at: Option<PathBuf>,

    /// Create the directory, which must not exist yet.
    #[arg(long)]
    pub new: bool,
}

#[derive(Debug, Subcommand)]
pub enum SnapshotCommand {
    /// Snapshot the current changes.
    New {
        #[command(flatten)]
        path: PathArg,
        #[arg(short, long)]
        label: Option<String>,
        #[arg(short, long, value_enum)]
        compression: Option<Compression>,
    },
    Delete {
        #[command(flatten)]
        path: PathArg,
        #[arg(short, long)]
        id: SnapshotId,
    },
    /// Restart the ramdisk from a snapshot; 0 is the original directory.
    Apply {
        #[command(flatten)]
        path: PathArg,
        #[arg(short, long)]
        id: SnapshotId,
    },
    List(PathArg),
    Show {
        #[command(flatten)]
        path: PathArg,
        #[arg(short, long)]
        id: SnapshotId,
    },
}

/// Run `cli` against the real kernel and tools.
pub fn run(cli: Cli, config: &Config) -> anyhow::Result<()> {
    let device: Arc<dyn Device> = Arc::new(LinuxDevice::new());
    let mut stdout = io::stdout().lock();
    execute(cli, config, device, &mut stdout)
}

pub fn execute(
    cli: Cli,
    config: &Config,
    device: Arc<dyn Device>,
    out: &mut dyn Write,
) -> anyhow::Result<()> {
    let staging_root = match cli.staging_root.or_else(|| config.layout.staging_root.clone()) {
        Some(dir) => Some(absolute(&dir)?),
        None => None,
    };
    let open = |path: &Path| -> anyhow::Result<Ramdisk> {
        let path = checked_path(path, staging_root.as_deref())?;
        Ok(Ramdisk::open(Arc::clone(&device), &path, staging_root.as_deref()))
    };

    match cli.command {
        Command::Create(args) => {
            let source = checked_path(&args.path, staging_root.as_deref())?;
            let placement = match (args.new, args.mount_at) {
                (true, _) => Placement::Blank,
                (false, Some(dir)) => {
                    Placement::MountAt(checked_path(&dir, staging_root.as_deref())?)
                }
                (false, None) => Placement::Relocate,
            };
            let options = CreateOptions {
                quota: args.quota.unwrap_or_else(|| config.ramdisk.default_quota.clone()),
                placement,
                staging_root: staging_root.clone(),
            };
            Ramdisk::create(Arc::clone(&device), &source, &options)
                .with_context(|| format!("cannot create ramdisk at {}", source.display()))?;
        }
        Command::Status(arg) => {
            let report = open(&arg.path)?.status()?;
            for change in report.changes() {
                writeln!(out, "{change}")?;
            }
        }
        Command::Discard { path, no_unmount } => {
            open(&path.path)?.discard(DiscardOptions { skip_unmount: no_unmount })?;
        }
        Command::Merge(arg) => {
            for change in open(&arg.path)?.merge()? {
                writeln!(out, "{change}")?;
            }
        }
        Command::SetQuota { path, quota } => {
            open(&path.path)?.set_quota(&quota)?;
        }
        Command::Snapshot(command) => match command {
            SnapshotCommand::New { path, label, compression } => {
                let compression = compression.unwrap_or(config.snapshot.compression);
                let id = open(&path.path)?.snapshots().create(label, compression)?;
                writeln!(out, "{id}")?;
            }
            SnapshotCommand::Delete { path, id } => open(&path.path)?.snapshots().delete(id)?,
            SnapshotCommand::Apply { path, id } => open(&path.path)?.snapshots().apply(id)?,
            SnapshotCommand::List(arg) => {
                let listings = open(&arg.path)?.snapshots().list()?;
                write!(out, "{}", SnapshotTable(&listings))?;
            }
            SnapshotCommand::Show { path, id } => {
                let details = open(&path.path)?.snapshots().show(id)?;
                write!(out, "{details}")?;
            }
        },
    }

    Ok(())
}

/// Absolute form of a user supplied path. A path naming the staging root
/// itself is refused.
fn checked_path(path: &Path, staging_root: Option<&Path>) -> anyhow::Result<PathBuf> {
    let path = absolute(path)?;
    if staging_root == Some(path.as_path()) {
        return Err(RamdiskError::AlreadyExists(path).into());
    }
    Ok(path)
}

fn absolute(path: &Path) -> anyhow::Result<PathBuf> {
    let path = std::path::absolute(path)
        .with_context(|| format!("cannot resolve {}", path.display()))?;
    // components() drops trailing separators
    Ok(path.components().collect())
}
