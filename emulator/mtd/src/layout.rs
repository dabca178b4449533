// Licensed under the Apache-2.0 license

use crate::EmulatorError;
use serde::{Deserialize, Serialize};

/// Erase block size of the default layout.
pub const DEFAULT_ERASE_BLOCK_SIZE: usize = 128 * 1024;
/// Page size of the default layout.
pub const DEFAULT_PAGE_SIZE: usize = 2048;

/// Geometry and partitioning of an emulated device.
///
/// Partitions are laid out back to back in the order given. A layout can be
/// loaded from TOML:
///
/// ```toml
/// erase_block_size = 131072
/// page_size = 2048
///
/// [[partitions]]
/// name = "misc"
/// blocks = 4
///
/// [[partitions]]
/// name = "cache"
/// blocks = 64
/// bad_blocks = [3]
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlashLayout {
    pub erase_block_size: usize,
    pub page_size: usize,
    pub partitions: Vec<PartitionLayout>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionLayout {
    pub name: String,
    /// Size of the partition in erase blocks.
    pub blocks: usize,
    /// Factory bad blocks, as block indices within the partition.
    #[serde(default)]
    pub bad_blocks: Vec<usize>,
}

impl Default for FlashLayout {
    fn default() -> Self {
        Self {
            erase_block_size: DEFAULT_ERASE_BLOCK_SIZE,
            page_size: DEFAULT_PAGE_SIZE,
            partitions: vec![
                PartitionLayout::new("misc", 4),
                PartitionLayout::new("cache", 64),
            ],
        }
    }
}

impl PartitionLayout {
    pub fn new(name: &str, blocks: usize) -> Self {
        Self {
            name: name.to_string(),
            blocks,
            bad_blocks: Vec::new(),
        }
    }

    pub fn with_bad_blocks(mut self, bad_blocks: &[usize]) -> Self {
        self.bad_blocks = bad_blocks.to_vec();
        self
    }
}

impl FlashLayout {
    pub fn from_toml(text: &str) -> Result<Self, EmulatorError> {
        let layout: FlashLayout = toml::from_str(text)?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<(), EmulatorError> {
        if self.page_size == 0 || self.erase_block_size == 0 {
            return Err(EmulatorError::Layout(
                "page and erase block sizes must be non-zero".into(),
            ));
        }
        if self.erase_block_size % self.page_size != 0 {
            return Err(EmulatorError::Layout(format!(
                "erase block size {} is not a multiple of page size {}",
                self.erase_block_size, self.page_size
            )));
        }
        for (i, partition) in self.partitions.iter().enumerate() {
            if partition.blocks == 0 {
                return Err(EmulatorError::Layout(format!(
                    "partition {} has no blocks",
                    partition.name
                )));
            }
            if self.partitions[..i].iter().any(|p| p.name == partition.name) {
                return Err(EmulatorError::Layout(format!(
                    "partition {} defined twice",
                    partition.name
                )));
            }
            if let Some(block) = partition
                .bad_blocks
                .iter()
                .find(|&&block| block >= partition.blocks)
            {
                return Err(EmulatorError::Layout(format!(
                    "bad block {} outside partition {} ({} blocks)",
                    block, partition.name, partition.blocks
                )));
            }
        }
        Ok(())
    }

    /// Total size of the device in bytes.
    pub fn capacity(&self) -> usize {
        self.partitions
            .iter()
            .map(|p| p.blocks * self.erase_block_size)
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_layout_is_valid() {
        let layout = FlashLayout::default();
        layout.validate().unwrap();
        assert_eq!(layout.capacity(), 68 * DEFAULT_ERASE_BLOCK_SIZE);
    }

    #[test]
    fn test_layout_from_toml() {
        let layout = FlashLayout::from_toml(
            r#"
            erase_block_size = 4096
            page_size = 512

            [[partitions]]
            name = "misc"
            blocks = 1

            [[partitions]]
            name = "cache"
            blocks = 16
            bad_blocks = [2, 5]
            "#,
        )
        .unwrap();
        assert_eq!(layout.erase_block_size, 4096);
        assert_eq!(layout.partitions[0], PartitionLayout::new("misc", 1));
        assert_eq!(layout.partitions[1].bad_blocks, vec![2, 5]);
        assert_eq!(layout.capacity(), 17 * 4096);
    }

    #[test]
    fn test_invalid_layouts_rejected() {
        let mut layout = FlashLayout {
            erase_block_size: 4096,
            page_size: 1000,
            partitions: vec![PartitionLayout::new("misc", 1)],
        };
        assert!(matches!(layout.validate(), Err(EmulatorError::Layout(_))));

        layout.page_size = 512;
        layout.partitions.push(PartitionLayout::new("misc", 2));
        assert!(matches!(layout.validate(), Err(EmulatorError::Layout(_))));

        layout.partitions[1] = PartitionLayout::new("cache", 2).with_bad_blocks(&[2]);
        assert!(matches!(layout.validate(), Err(EmulatorError::Layout(_))));
    }

    #[test]
    fn test_malformed_toml_rejected() {
        assert!(matches!(
            FlashLayout::from_toml("erase_block_size = \"big\""),
            Err(EmulatorError::Toml(_))
        ));
    }
}
