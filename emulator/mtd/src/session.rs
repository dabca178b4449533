// Licensed under the Apache-2.0 license

use crate::device::{EmulatedMtd, EmulatedPartition};
use log::debug;
use mtd_hil::{FlashDrvError, ReadSession, WriteSession};

/// Sequential reader over one partition that steps over bad blocks.
pub struct EmulatedReadSession<'a> {
    mtd: &'a EmulatedMtd,
    partition: EmulatedPartition,
    pos: usize,
}

impl<'a> EmulatedReadSession<'a> {
    pub(crate) fn new(mtd: &'a EmulatedMtd, partition: EmulatedPartition) -> Self {
        Self {
            mtd,
            partition,
            pos: 0,
        }
    }
}

impl ReadSession for EmulatedReadSession<'_> {
    fn read(&mut self, buffer: &mut [u8]) -> Result<usize, FlashDrvError> {
        let block_size = self.mtd.erase_block_size();
        let mut done = 0;
        while done < buffer.len() && self.pos < self.partition.size {
            let block_start = self.pos - self.pos % block_size;
            if self.mtd.is_bad(&self.partition, block_start) {
                debug!("mtd: skipping bad block at 0x{:08x}", block_start);
                self.pos = block_start + block_size;
                continue;
            }
            let len = (block_start + block_size - self.pos).min(buffer.len() - done);
            self.mtd
                .read_at(&self.partition, self.pos, &mut buffer[done..done + len]);
            done += len;
            self.pos += len;
        }
        Ok(done)
    }

    fn close(self) {}
}

/// Sequential writer over one partition.
///
/// Data is collected until a whole erase block is available and then
/// programmed into the next good block. Blocks found bad on the way are
/// remembered so that positions handed out earlier can be resolved to where
/// the data really went.
pub struct EmulatedWriteSession<'a> {
    mtd: &'a EmulatedMtd,
    partition: EmulatedPartition,
    /// Partition offset of the next block to program.
    pos: usize,
    pending: Vec<u8>,
    /// Offsets of bad blocks skipped by this session, ascending.
    bad_blocks: Vec<usize>,
}

impl<'a> EmulatedWriteSession<'a> {
    pub(crate) fn new(mtd: &'a EmulatedMtd, partition: EmulatedPartition) -> Self {
        Self {
            mtd,
            partition,
            pos: 0,
            pending: Vec::with_capacity(mtd.erase_block_size()),
            bad_blocks: Vec::new(),
        }
    }

    fn write_block(&mut self, block: &[u8]) -> Result<(), FlashDrvError> {
        let block_size = self.mtd.erase_block_size();
        loop {
            if self.pos + block_size > self.partition.size {
                debug!("mtd: ran out of space at 0x{:08x}", self.pos);
                return Err(FlashDrvError::NOSPACE);
            }
            if self.mtd.is_bad(&self.partition, self.pos) {
                debug!("mtd: not writing bad block at 0x{:08x}", self.pos);
                self.bad_blocks.push(self.pos);
                self.pos += block_size;
                continue;
            }
            match self.mtd.program_block(&self.partition, self.pos, block) {
                Ok(()) => {
                    self.pos += block_size;
                    return Ok(());
                }
                Err(FlashDrvError::BADBLOCK) => {
                    self.bad_blocks.push(self.pos);
                    self.pos += block_size;
                }
                Err(e) => return Err(e),
            }
        }
    }

    fn flush_pending(&mut self) -> Result<(), FlashDrvError> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let mut block = core::mem::take(&mut self.pending);
        block.resize(self.mtd.erase_block_size(), 0);
        self.write_block(&block)
    }
}

impl WriteSession for EmulatedWriteSession<'_> {
    fn write(&mut self, data: &[u8]) -> Result<usize, FlashDrvError> {
        let block_size = self.mtd.erase_block_size();
        let mut written = 0;
        while written < data.len() {
            let len = (block_size - self.pending.len()).min(data.len() - written);
            self.pending.extend_from_slice(&data[written..written + len]);
            written += len;
            if self.pending.len() == block_size {
                let block = core::mem::take(&mut self.pending);
                self.write_block(&block)?;
                self.pending = block;
                self.pending.clear();
            }
        }
        Ok(written)
    }

    fn advance_to_next_erase_block(&mut self) -> Result<u64, FlashDrvError> {
        self.flush_pending()?;
        Ok(self.pos as u64)
    }

    fn resolve_write_start(&self, position: u64) -> u64 {
        let block_size = self.mtd.erase_block_size() as u64;
        let mut position = position;
        for &bad in &self.bad_blocks {
            let bad = bad as u64;
            if bad == position {
                position += block_size;
            } else if bad > position {
                break;
            }
        }
        position
    }

    fn close(mut self) -> Result<(), FlashDrvError> {
        self.mtd.record_write_close()?;
        self.flush_pending()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::FaultPlan;
    use crate::layout::{FlashLayout, PartitionLayout};
    use mtd_hil::RawFlash;

    const BLOCK: usize = 512;

    fn mtd_with_bad_blocks(bad_blocks: &[usize]) -> EmulatedMtd {
        EmulatedMtd::new(FlashLayout {
            erase_block_size: BLOCK,
            page_size: 128,
            partitions: vec![PartitionLayout::new("cache", 8).with_bad_blocks(bad_blocks)],
        })
        .unwrap()
    }

    #[test]
    fn test_partial_block_held_until_boundary() {
        let mtd = mtd_with_bad_blocks(&[]);
        let cache = mtd.find_partition("cache").unwrap();
        let mut session = mtd.open_write(&cache).unwrap();

        assert_eq!(session.write(b"abc"), Ok(3));
        assert_eq!(mtd.stats().programs, 0);
        assert_eq!(mtd.partition_image("cache").unwrap()[0], 0xff);

        assert_eq!(session.advance_to_next_erase_block(), Ok(BLOCK as u64));
        // Nothing pending, so the boundary does not move.
        assert_eq!(session.advance_to_next_erase_block(), Ok(BLOCK as u64));
        assert_eq!(mtd.stats().programs, 1);
        session.close().unwrap();

        let image = mtd.partition_image("cache").unwrap();
        assert_eq!(&image[..3], b"abc");
        assert!(image[3..BLOCK].iter().all(|&b| b == 0));
        assert!(image[BLOCK..].iter().all(|&b| b == 0xff));
    }

    #[test]
    fn test_bad_blocks_skipped_and_resolved() {
        let mtd = mtd_with_bad_blocks(&[1]);
        let cache = mtd.find_partition("cache").unwrap();
        let mut session = mtd.open_write(&cache).unwrap();

        session.write(&[0x11; 10]).unwrap();
        let start = session.advance_to_next_erase_block().unwrap();
        assert_eq!(start, BLOCK as u64);
        session.write(&[0x22; BLOCK + 1]).unwrap();
        let end = session.advance_to_next_erase_block().unwrap();
        assert_eq!(end, 4 * BLOCK as u64);

        assert_eq!(session.resolve_write_start(start), 2 * BLOCK as u64);
        assert_eq!(session.resolve_write_start(end), end);
        assert_eq!(session.resolve_write_start(0), 0);
        session.close().unwrap();

        let image = mtd.partition_image("cache").unwrap();
        assert!(image[BLOCK..2 * BLOCK].iter().all(|&b| b == 0xff));
        assert_eq!(image[2 * BLOCK], 0x22);
        assert_eq!(image[3 * BLOCK], 0x22);
        assert_eq!(image[3 * BLOCK + 1], 0);
    }

    #[test]
    fn test_consecutive_bad_blocks_resolved() {
        let mtd = mtd_with_bad_blocks(&[2, 3]);
        let cache = mtd.find_partition("cache").unwrap();
        let mut session = mtd.open_write(&cache).unwrap();
        session.write(&[1; 2 * BLOCK]).unwrap();
        let start = session.advance_to_next_erase_block().unwrap();
        session.write(&[2; 4]).unwrap();
        session.advance_to_next_erase_block().unwrap();
        assert_eq!(session.resolve_write_start(start), 4 * BLOCK as u64);
    }

    #[test]
    fn test_grown_bad_block_retried_on_next_block() {
        let mtd = mtd_with_bad_blocks(&[]);
        mtd.set_faults(FaultPlan {
            grow_bad_block_at_program: Some(0),
            ..Default::default()
        });
        let cache = mtd.find_partition("cache").unwrap();
        let mut session = mtd.open_write(&cache).unwrap();
        session.write(&[7; BLOCK]).unwrap();
        assert_eq!(session.resolve_write_start(0), BLOCK as u64);
        session.close().unwrap();

        assert!(mtd.is_bad_block("cache", 0));
        assert_eq!(mtd.partition_image("cache").unwrap()[BLOCK], 7);
        assert_eq!(mtd.stats().programs, 2);
    }

    #[test]
    fn test_power_cut_leaves_media_untouched() {
        let mtd = mtd_with_bad_blocks(&[]);
        mtd.set_faults(FaultPlan {
            power_cut_at_program: Some(1),
            ..Default::default()
        });
        let cache = mtd.find_partition("cache").unwrap();
        let mut session = mtd.open_write(&cache).unwrap();
        assert_eq!(session.write(&[3; BLOCK]), Ok(BLOCK));
        assert_eq!(session.write(&[4; BLOCK]), Err(FlashDrvError::FAIL));

        let image = mtd.partition_image("cache").unwrap();
        assert_eq!(image[0], 3);
        assert_eq!(image[BLOCK], 0xff);
    }

    #[test]
    fn test_write_past_end_fails() {
        let mtd = mtd_with_bad_blocks(&[7]);
        let cache = mtd.find_partition("cache").unwrap();
        let mut session = mtd.open_write(&cache).unwrap();
        assert_eq!(session.write(&[0; 7 * BLOCK]), Ok(7 * BLOCK));
        session.write(&[0; 1]).unwrap();
        assert_eq!(
            session.advance_to_next_erase_block(),
            Err(FlashDrvError::NOSPACE)
        );
    }

    #[test]
    fn test_failed_close_drops_pending_data() {
        let mtd = mtd_with_bad_blocks(&[]);
        mtd.set_faults(FaultPlan {
            fail_write_close: Some(0),
            ..Default::default()
        });
        let cache = mtd.find_partition("cache").unwrap();
        let mut session = mtd.open_write(&cache).unwrap();
        session.write(b"lost").unwrap();
        assert_eq!(session.close(), Err(FlashDrvError::FAIL));
        assert_eq!(mtd.partition_image("cache").unwrap()[0], 0xff);

        let mut session = mtd.open_write(&cache).unwrap();
        session.write(b"kept").unwrap();
        session.close().unwrap();
        assert_eq!(&mtd.partition_image("cache").unwrap()[..4], b"kept");
    }

    #[test]
    fn test_read_skips_bad_blocks() {
        let mtd = mtd_with_bad_blocks(&[0]);
        mtd.load_partition("cache", 0, &[9; BLOCK]).unwrap();
        mtd.load_partition("cache", BLOCK, &[5; 4]).unwrap();
        let cache = mtd.find_partition("cache").unwrap();

        let mut session = mtd.open_read(&cache).unwrap();
        let mut buffer = [0u8; 6];
        assert_eq!(session.read(&mut buffer), Ok(6));
        assert_eq!(buffer, [5, 5, 5, 5, 0xff, 0xff]);
        session.close();
    }

    #[test]
    fn test_read_stops_at_partition_end() {
        let mtd = mtd_with_bad_blocks(&[7]);
        let cache = mtd.find_partition("cache").unwrap();
        let mut session = mtd.open_read(&cache).unwrap();
        let mut buffer = vec![0u8; 8 * BLOCK];
        assert_eq!(session.read(&mut buffer), Ok(7 * BLOCK));
    }
}
