use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::device::Compression;
use crate::quota::Quota;

pub const SYSTEM_CONFIG: &str = "/etc/ramlayer/config";
pub const CONFIG_ENV: &str = "RAMLAYER_CONFIG";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub layout: LayoutConfig,
    pub ramdisk: RamdiskConfig,
    pub snapshot: SnapshotConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LayoutConfig {
    /// Staging root to use in place of `.ramlayer.NAME` next to the target.
    pub staging_root: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RamdiskConfig {
    pub default_quota: Quota,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SnapshotConfig {
    pub compression: Compression,
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let explicit = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        Self::load_from(Path::new(SYSTEM_CONFIG), explicit.as_deref())
    }

    /// Layer the system file, an explicit file and `RAMLAYER_*` variables, later wins.
    pub fn load_from(system: &Path, explicit: Option<&Path>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder()
            .add_source(config::File::with_name(&system.to_string_lossy()).required(false));

        if let Some(path) = explicit {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix("RAMLAYER").prefix_separator("_").separator("__"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }
}
