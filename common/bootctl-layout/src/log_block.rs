// Licensed under the Apache-2.0 license

use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const LOG_MAGIC_SIZE: usize = 8;
pub const LOG_MAGIC: [u8; LOG_MAGIC_SIZE] = *b"LOGmagic";
pub const LOG_LENGTH_SIZE: usize = core::mem::size_of::<u32>();
pub const LOG_PREAMBLE_SIZE: usize = core::mem::size_of::<LogBlockHeader>();

/// Preamble of the erase block that carries a captured log to the next boot.
///
/// `length` bytes of log follow immediately; the rest of the block is padding.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct LogBlockHeader {
    pub magic: [u8; LOG_MAGIC_SIZE],
    pub length: U32<LittleEndian>,
}

impl LogBlockHeader {
    /// Largest log tail that fits a block of `block_size` bytes.
    pub const fn capacity(block_size: usize) -> usize {
        block_size.saturating_sub(LOG_PREAMBLE_SIZE)
    }

    /// Writes the preamble for `length` bytes of log into the start of `block`.
    ///
    /// Returns the part of the block the log bytes go into.
    pub fn encode(block: &mut [u8], length: usize) -> Option<&mut [u8]> {
        if block.len() < LOG_PREAMBLE_SIZE || length > Self::capacity(block.len()) {
            return None;
        }
        let header = LogBlockHeader {
            magic: LOG_MAGIC,
            length: U32::new(u32::try_from(length).ok()?),
        };
        let (preamble, rest) = block.split_at_mut(LOG_PREAMBLE_SIZE);
        preamble.copy_from_slice(header.as_bytes());
        Some(&mut rest[..length])
    }

    /// Returns the log bytes stored in `block`, if it holds a log.
    pub fn decode(block: &[u8]) -> Option<&[u8]> {
        let (header, rest) = LogBlockHeader::read_from_prefix(block).ok()?;
        if header.magic != LOG_MAGIC {
            return None;
        }
        rest.get(..header.length.get() as usize)
    }
}
