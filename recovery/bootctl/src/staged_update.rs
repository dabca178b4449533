// Licensed under the Apache-2.0 license

use crate::error::BootctlError;
use bootctl_layout::{LogBlockHeader, Section, UpdateHeader};
use zerocopy::FromBytes;

/// An update as the bootloader finds it on the cache partition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StagedUpdate<'a> {
    pub header: UpdateHeader,
    pub image: &'a [u8],
    pub busy_bitmap: &'a [u8],
    pub fail_bitmap: &'a [u8],
    /// Log tail handed over by the recovery that staged the update.
    pub log: Option<&'a [u8]>,
}

impl<'a> StagedUpdate<'a> {
    /// Parses the raw contents of the cache partition.
    ///
    /// Returns `None` when no update is staged, which is also what an
    /// interrupted write leaves behind.
    pub fn parse(raw: &'a [u8], erase_block_size: usize) -> Result<Option<Self>, BootctlError> {
        let Ok((header, _)) = UpdateHeader::read_from_prefix(raw) else {
            return Ok(None);
        };
        if !header.has_magic() {
            return Ok(None);
        }
        if !header.verify() {
            return Err(BootctlError::CorruptUpdate(format!(
                "unsupported header version {:#x}, size {}",
                header.version.get(),
                header.size.get()
            )));
        }

        Ok(Some(Self {
            header,
            image: section(raw, &header, Section::Image)?,
            busy_bitmap: section(raw, &header, Section::BusyBitmap)?,
            fail_bitmap: section(raw, &header, Section::FailBitmap)?,
            log: find_log(raw, erase_block_size, header.image_offset.get() as usize),
        }))
    }
}

fn section<'a>(
    raw: &'a [u8],
    header: &UpdateHeader,
    section: Section,
) -> Result<&'a [u8], BootctlError> {
    let (offset, length) = header.section(section);
    let start = offset as usize;
    start
        .checked_add(length as usize)
        .and_then(|end| raw.get(start..end))
        .ok_or_else(|| {
            BootctlError::CorruptUpdate(format!(
                "{section} at {offset:#x} with {length} bytes runs past the partition end"
            ))
        })
}

/// The log lives in the first block after the header that carries the log magic.
fn find_log(raw: &[u8], block_size: usize, image_offset: usize) -> Option<&[u8]> {
    if block_size == 0 {
        return None;
    }
    let end = image_offset.min(raw.len());
    (block_size..end)
        .step_by(block_size)
        .find_map(|start| LogBlockHeader::decode(&raw[start..(start + block_size).min(end)]))
}
