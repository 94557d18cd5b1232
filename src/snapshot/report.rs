use std::fmt;

use chrono::{DateTime, Utc};

use super::{SnapshotId, SnapshotRecord};
use crate::util::human_bytes;

const NONE: &str = "<none>";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotListing {
    pub record: SnapshotRecord,
    pub applied: bool,
}

/// Table rendering of [`SnapshotListing`]s, one row per snapshot.
#[derive(Debug, Clone)]
pub struct SnapshotTable<'a>(pub &'a [SnapshotListing]);

impl fmt::Display for SnapshotTable<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let header = ["ID", "ACTIVE", "CREATED", "LABEL"];
        let rows: Vec<[String; 4]> = self
            .0
            .iter()
            .map(|listing| {
                [
                    listing.record.id.to_string(),
                    if listing.applied { "*".to_string() } else { String::new() },
                    timestamp(&listing.record.created),
                    coalesce(listing.record.label.as_deref()).to_string(),
                ]
            })
            .collect();

        let mut widths = header.map(str::len);
        for row in &rows {
            for (width, cell) in widths.iter_mut().zip(row) {
                *width = (*width).max(cell.len());
            }
        }

        write_row(f, &header, &widths)?;
        for row in &rows {
            write_row(f, row, &widths)?;
        }
        Ok(())
    }
}

fn write_row<S: AsRef<str>>(
    f: &mut fmt::Formatter<'_>,
    cells: &[S],
    widths: &[usize],
) -> fmt::Result {
    let last = cells.len() - 1;
    for (i, (cell, width)) in cells.iter().zip(widths).enumerate() {
        if i == last {
            writeln!(f, "{}", cell.as_ref())?;
        } else {
            write!(f, "{:<width$}  ", cell.as_ref(), width = width)?;
        }
    }
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotDetails {
    pub record: SnapshotRecord,
    pub applied: bool,
    /// Ancestors, nearest first.
    pub dependencies: Vec<SnapshotId>,
    pub dependents: Vec<SnapshotId>,
    pub archive_size: u64,
}

impl fmt::Display for SnapshotDetails {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let dependencies = join(&self.dependencies, "->");
        let dependents = join(&self.dependents, ", ");

        writeln!(f, "Snapshot ID:          {}", self.record.id)?;
        writeln!(f, "Is active:            {}", if self.applied { "yes" } else { "no" })?;
        writeln!(f, "Created:              {}", timestamp(&self.record.created))?;
        writeln!(f, "Label:                {}", coalesce(self.record.label.as_deref()))?;
        writeln!(f, "Dependencies:         {}", coalesce(Some(&dependencies)))?;
        writeln!(f, "Reverse dependencies: {}", coalesce(Some(&dependents)))?;
        writeln!(f, "Compressed size:      {}", human_bytes(self.archive_size))
    }
}

fn timestamp(created: &DateTime<Utc>) -> String {
    created.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn coalesce(value: Option<&str>) -> &str {
    match value {
        Some(value) if !value.is_empty() => value,
        _ => NONE,
    }
}

fn join(ids: &[SnapshotId], separator: &str) -> String {
    ids.iter().map(|id| id.to_string()).collect::<Vec<_>>().join(separator)
}
