// Licensed under the Apache-2.0 license

use crate::error::BootctlError;
use bootctl_layout::{CACHE_NAME, MISC_NAME};
use serde::Deserialize;

/// Names of the partitions boot control addresses.
///
/// ```toml
/// misc_partition = "misc"
/// cache_partition = "cache"
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BootctlConfig {
    /// Partition holding the boot command.
    pub misc_partition: String,
    /// Partition update images are staged on.
    pub cache_partition: String,
}

impl Default for BootctlConfig {
    fn default() -> Self {
        Self {
            misc_partition: MISC_NAME.to_string(),
            cache_partition: CACHE_NAME.to_string(),
        }
    }
}

impl BootctlConfig {
    pub fn from_toml(text: &str) -> Result<Self, BootctlError> {
        Ok(toml::from_str(text)?)
    }
}
