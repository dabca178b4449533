// Licensed under the Apache-2.0 license

//! Generic interface for raw, erase-block addressed storage.
//!
//! Storage is split into named partitions. Reads and writes go through
//! sessions: a write session streams data sequentially, lets the caller force
//! the stream onto the next erase block, and reports where data really landed
//! once the driver has skipped any bad blocks. Drivers for the physical media
//! implement these traits; the boot control code only ever talks to them.

#![no_std]

use core::result::Result;
use thiserror::Error;

/// Geometry of a partition, in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionInfo {
    pub total_size: u64,
    pub erase_block_size: usize,
    pub page_size: usize,
}

/// Access to the partitions of a raw storage device.
pub trait RawFlash {
    /// Handle to a partition found by name.
    type Partition;

    type ReadSession<'a>: ReadSession
    where
        Self: 'a;

    type WriteSession<'a>: WriteSession
    where
        Self: 'a;

    /// Looks up a partition by its logical name.
    fn find_partition(&self, name: &str) -> Option<Self::Partition>;

    /// Returns the size and block geometry of `partition`.
    fn partition_info(&self, partition: &Self::Partition) -> Result<PartitionInfo, FlashDrvError>;

    /// Opens `partition` for sequential reading from its first good block.
    fn open_read(&self, partition: &Self::Partition)
        -> Result<Self::ReadSession<'_>, FlashDrvError>;

    /// Opens `partition` for sequential writing from its first block.
    fn open_write(
        &self,
        partition: &Self::Partition,
    ) -> Result<Self::WriteSession<'_>, FlashDrvError>;
}

pub trait ReadSession {
    /// Reads up to `buffer.len()` bytes, returning how many were read.
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, FlashDrvError>;

    fn close(self);
}

pub trait WriteSession {
    /// Appends `data` to the stream, returning how many bytes were accepted.
    ///
    /// Data may be buffered until a full erase block is available.
    fn write(&mut self, data: &[u8]) -> Result<usize, FlashDrvError>;

    /// Pads any partially written block and returns the position the next
    /// byte would be written to. Calling it with nothing pending writes
    /// nothing and returns the same position again.
    fn advance_to_next_erase_block(&mut self) -> Result<u64, FlashDrvError>;

    /// Translates a position returned by
    /// [`advance_to_next_erase_block`](Self::advance_to_next_erase_block) into
    /// the offset data written from there actually occupies.
    fn resolve_write_start(&self, position: u64) -> u64;

    /// Flushes pending data and releases the session. Media may only commit
    /// its final state here, so a failure must be treated as a failed write.
    fn close(self) -> Result<(), FlashDrvError>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[repr(usize)]
pub enum FlashDrvError {
    // Reserved value, for when "no error" / "success" should be
    // encoded in the same numeric representation as FlashDrvError
    //
    // Ok(()) = 0,
    /// Generic failure condition
    #[error("I/O error")]
    FAIL = 1,
    /// Underlying system is busy; retry
    #[error("device or resource busy")]
    BUSY = 2,
    /// An invalid parameter was passed
    #[error("invalid argument")]
    INVAL = 6,
    /// Parameter passed was too large
    #[error("request exceeds partition size")]
    SIZE = 7,
    /// Device is not available
    #[error("no such device")]
    NODEVICE = 11,
    /// No good erase block left before the end of the partition
    #[error("no space left on device")]
    NOSPACE = 14,
    /// Erase block is marked bad
    #[error("bad erase block")]
    BADBLOCK = 15,
}

impl From<FlashDrvError> for usize {
    fn from(err: FlashDrvError) -> usize {
        err as usize
    }
}

impl TryFrom<usize> for FlashDrvError {
    type Error = ();

    fn try_from(code: usize) -> Result<Self, Self::Error> {
        match code {
            1 => Ok(FlashDrvError::FAIL),
            2 => Ok(FlashDrvError::BUSY),
            6 => Ok(FlashDrvError::INVAL),
            7 => Ok(FlashDrvError::SIZE),
            11 => Ok(FlashDrvError::NODEVICE),
            14 => Ok(FlashDrvError::NOSPACE),
            15 => Ok(FlashDrvError::BADBLOCK),
            _ => Err(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes_round_trip() {
        for err in [
            FlashDrvError::FAIL,
            FlashDrvError::BUSY,
            FlashDrvError::INVAL,
            FlashDrvError::SIZE,
            FlashDrvError::NODEVICE,
            FlashDrvError::NOSPACE,
            FlashDrvError::BADBLOCK,
        ] {
            assert_eq!(FlashDrvError::try_from(usize::from(err)), Ok(err));
        }
        assert_eq!(FlashDrvError::try_from(0), Err(()));
    }
}
