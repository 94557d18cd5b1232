//! Size limit for the tmpfs backing a ramdisk.
//!
//! A quota is written the way `tmpfs(5)` expects its `size=` option: an
//! integer followed by a binary unit suffix, e.g. `100M` or `2G`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::RamdiskError;

const UNITS: [char; 4] = ['K', 'M', 'G', 'T'];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Quota(String);

impl Default for Quota {
    fn default() -> Self {
        Self("100M".to_string())
    }
}

impl FromStr for Quota {
    type Err = RamdiskError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || RamdiskError::InvalidQuota(s.to_string());

        let unit = s.chars().last().ok_or_else(invalid)?;
        if !UNITS.contains(&unit) {
            return Err(invalid());
        }

        let digits = &s[..s.len() - 1];
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(invalid());
        }

        Ok(Self(s.to_string()))
    }
}

impl TryFrom<String> for Quota {
    type Error = RamdiskError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Quota> for String {
    fn from(quota: Quota) -> Self {
        quota.0
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
