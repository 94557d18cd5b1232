use std::fs;
use std::path::Path;

use crate::error::{PathContext, RamdiskResult};
use crate::resolve::lstat_optional;

/// Remove whatever is at `path`, recursively for directories. Missing paths are fine.
pub fn remove_all(path: &Path) -> RamdiskResult<()> {
    match lstat_optional(path)? {
        Some(meta) if meta.is_dir() => {
            fs::remove_dir_all(path).path_context("failed to remove directory", path)
        }
        Some(_) => fs::remove_file(path).path_context("failed to remove", path),
        None => Ok(()),
    }
}

/// Empty a directory, keeping the directory itself.
pub fn remove_all_in(dir: &Path) -> RamdiskResult<()> {
    for entry in fs::read_dir(dir).path_context("failed to read directory", dir)? {
        let entry = entry.path_context("failed to read directory", dir)?;
        remove_all(&entry.path())?;
    }
    Ok(())
}

/// `1023 bytes`, `1.5 KiB`, `3.0 GiB`, ...
pub fn human_bytes(size: u64) -> String {
    const UNIT: u64 = 1024;
    if size < UNIT {
        return format!("{size} bytes");
    }

    let mut div = UNIT;
    let mut exp = 0;
    let mut n = size / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['K', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {prefix}iB", size as f64 / div as f64)
}
