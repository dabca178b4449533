// Licensed under the Apache-2.0 license

//! On-media layouts shared by the recovery writer and the boot stages that
//! consume what it writes.
//!
//! Nothing here touches storage. The types are plain `#[repr(C)]` records that
//! can be viewed as bytes with `zerocopy`, plus the bookkeeping used while an
//! update header is still being assembled.

#![no_std]

mod bootloader_message;
mod log_block;
mod update_header;

pub use bootloader_message::{BootloaderMessage, COMMAND_SIZE, RECOVERY_SIZE, STATUS_SIZE};
pub use log_block::{
    LogBlockHeader, LOG_LENGTH_SIZE, LOG_MAGIC, LOG_MAGIC_SIZE, LOG_PREAMBLE_SIZE,
};
pub use update_header::{
    bitmap_length, PendingSection, Section, SectionOffset, UpdateHeader, UpdateHeaderBuilder,
    UPDATE_HEADER_SIZE, UPDATE_MAGIC, UPDATE_MAGIC_SIZE, UPDATE_VERSION,
};

use thiserror::Error;

/// Logical name of the partition holding the boot command.
pub const MISC_NAME: &str = "misc";

/// Logical name of the partition used to stage update images.
pub const CACHE_NAME: &str = "cache";

/// Number of pages of the misc partition that are read and rewritten.
pub const MISC_PAGES: usize = 3;

/// Page of the misc region holding the [`BootloaderMessage`].
pub const MISC_COMMAND_PAGE: usize = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum LayoutError {
    #[error("{field} field holds at most {capacity} bytes, got {len}")]
    FieldTooLong {
        field: &'static str,
        capacity: usize,
        len: usize,
    },
    #[error("{section} offset {value:#x} does not fit the header")]
    OffsetOverflow { section: Section, value: u64 },
    #[error("{section} length {value:#x} does not fit the header")]
    LengthOverflow { section: Section, value: u64 },
    #[error("{section} offset was never resolved")]
    UnresolvedSection { section: Section },
    #[error("bitmap geometry {width}x{height}x{bpp} overflows")]
    BitmapOverflow { width: u32, height: u32, bpp: u32 },
}
