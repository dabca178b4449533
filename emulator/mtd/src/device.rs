// Licensed under the Apache-2.0 license

use crate::layout::FlashLayout;
use crate::session::{EmulatedReadSession, EmulatedWriteSession};
use crate::EmulatorError;
use log::{debug, warn};
use mtd_hil::{FlashDrvError, PartitionInfo, RawFlash};
use std::cell::{Cell, RefCell};
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

/// Value of every byte of an erased block.
pub(crate) const ERASED: u8 = 0xff;

/// Handle to one partition of an [`EmulatedMtd`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmulatedPartition {
    pub(crate) index: usize,
    pub(crate) offset: usize,
    pub(crate) size: usize,
}

/// Failures to inject, keyed by the zero-based count of the matching
/// operation since the device was created.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FaultPlan {
    /// Fail `partition_info` for every partition.
    pub fail_partition_info: bool,
    /// Fail the n-th `open_read`.
    pub fail_read_open: Option<usize>,
    /// Fail the n-th `open_write`.
    pub fail_write_open: Option<usize>,
    /// Fail the n-th write session close, dropping any data it still buffers.
    pub fail_write_close: Option<usize>,
    /// Lose power before the n-th block program: it and every later one fail
    /// without touching media.
    pub power_cut_at_program: Option<usize>,
    /// The n-th block program fails and the block turns bad.
    pub grow_bad_block_at_program: Option<usize>,
}

/// Operation counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MtdStats {
    pub read_opens: usize,
    pub write_opens: usize,
    pub write_closes: usize,
    /// Block programs attempted, including failed ones.
    pub programs: usize,
}

/// An emulated raw flash device.
///
/// Media is held in memory and initialised to the erased value. Blocks are
/// programmed whole, after an implicit erase, which is how NAND behind an
/// MTD driver is written. Bad blocks are tracked per device and are skipped
/// by both read and write sessions.
pub struct EmulatedMtd {
    layout: FlashLayout,
    partitions: Vec<EmulatedPartition>,
    media: RefCell<Vec<u8>>,
    bad_blocks: RefCell<BTreeSet<usize>>,
    faults: RefCell<FaultPlan>,
    stats: Cell<MtdStats>,
}

impl EmulatedMtd {
    pub fn new(layout: FlashLayout) -> Result<Self, EmulatorError> {
        layout.validate()?;

        let mut partitions = Vec::with_capacity(layout.partitions.len());
        let mut bad_blocks = BTreeSet::new();
        let mut offset = 0;
        for (index, partition) in layout.partitions.iter().enumerate() {
            let size = partition.blocks * layout.erase_block_size;
            bad_blocks.extend(
                partition
                    .bad_blocks
                    .iter()
                    .map(|block| offset + block * layout.erase_block_size),
            );
            partitions.push(EmulatedPartition {
                index,
                offset,
                size,
            });
            offset += size;
        }

        Ok(Self {
            media: RefCell::new(vec![ERASED; layout.capacity()]),
            layout,
            partitions,
            bad_blocks: RefCell::new(bad_blocks),
            faults: RefCell::new(FaultPlan::default()),
            stats: Cell::new(MtdStats::default()),
        })
    }

    /// Creates a device whose media is loaded from `path`.
    ///
    /// A missing file gives an erased device; a short file is treated as
    /// erased past its end.
    pub fn open_image(path: &Path, layout: FlashLayout) -> Result<Self, EmulatorError> {
        let mtd = Self::new(layout)?;
        let mut contents = Vec::new();
        match File::open(path) {
            Ok(mut file) => {
                file.read_to_end(&mut contents)
                    .map_err(|source| EmulatorError::Image {
                        path: path.to_path_buf(),
                        source,
                    })?;
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(source) => {
                return Err(EmulatorError::Image {
                    path: path.to_path_buf(),
                    source,
                })
            }
        }

        let capacity = mtd.layout.capacity();
        if contents.len() > capacity {
            return Err(EmulatorError::ImageSize {
                path: path.to_path_buf(),
                expected: capacity as u64,
                actual: contents.len() as u64,
            });
        }
        mtd.media.borrow_mut()[..contents.len()].copy_from_slice(&contents);
        Ok(mtd)
    }

    /// Writes the whole media to `path`.
    pub fn persist(&self, path: &Path) -> Result<(), EmulatorError> {
        let to_error = |source| EmulatorError::Image {
            path: path.to_path_buf(),
            source,
        };
        let mut file = File::create(path).map_err(to_error)?;
        file.write_all(&self.media.borrow()).map_err(to_error)?;
        file.sync_all().map_err(to_error)
    }

    pub fn layout(&self) -> &FlashLayout {
        &self.layout
    }

    pub fn erase_block_size(&self) -> usize {
        self.layout.erase_block_size
    }

    pub fn set_faults(&self, faults: FaultPlan) {
        *self.faults.borrow_mut() = faults;
    }

    pub fn stats(&self) -> MtdStats {
        self.stats.get()
    }

    /// Physical contents of a partition, bad blocks included.
    pub fn partition_image(&self, name: &str) -> Option<Vec<u8>> {
        let partition = self.find_partition(name)?;
        let media = self.media.borrow();
        Some(media[partition.offset..partition.offset + partition.size].to_vec())
    }

    /// Overwrites part of a partition directly, bypassing sessions.
    pub fn load_partition(
        &self,
        name: &str,
        offset: usize,
        data: &[u8],
    ) -> Result<(), FlashDrvError> {
        let partition = self.find_partition(name).ok_or(FlashDrvError::NODEVICE)?;
        if offset + data.len() > partition.size {
            return Err(FlashDrvError::SIZE);
        }
        let start = partition.offset + offset;
        self.media.borrow_mut()[start..start + data.len()].copy_from_slice(data);
        Ok(())
    }

    /// Marks block `block` of partition `name` bad.
    pub fn mark_bad_block(&self, name: &str, block: usize) -> Result<(), FlashDrvError> {
        let partition = self.find_partition(name).ok_or(FlashDrvError::NODEVICE)?;
        let offset = block * self.layout.erase_block_size;
        if offset >= partition.size {
            return Err(FlashDrvError::SIZE);
        }
        self.bad_blocks.borrow_mut().insert(partition.offset + offset);
        Ok(())
    }

    pub fn is_bad_block(&self, name: &str, block: usize) -> bool {
        self.find_partition(name).is_some_and(|partition| {
            self.is_bad(&partition, block * self.layout.erase_block_size)
        })
    }

    pub(crate) fn is_bad(&self, partition: &EmulatedPartition, offset: usize) -> bool {
        self.bad_blocks.borrow().contains(&(partition.offset + offset))
    }

    pub(crate) fn read_at(&self, partition: &EmulatedPartition, offset: usize, buffer: &mut [u8]) {
        let start = partition.offset + offset;
        buffer.copy_from_slice(&self.media.borrow()[start..start + buffer.len()]);
    }

    /// Erases and programs the block at `offset` of `partition`.
    pub(crate) fn program_block(
        &self,
        partition: &EmulatedPartition,
        offset: usize,
        block: &[u8],
    ) -> Result<(), FlashDrvError> {
        debug_assert_eq!(block.len(), self.layout.erase_block_size);
        let mut stats = self.stats.get();
        let attempt = stats.programs;
        stats.programs += 1;
        self.stats.set(stats);

        let faults = self.faults.borrow();
        if faults.power_cut_at_program.is_some_and(|cut| attempt >= cut) {
            debug!("mtd: power lost before programming block at 0x{:08x}", offset);
            return Err(FlashDrvError::FAIL);
        }

        let start = partition.offset + offset;
        let mut media = self.media.borrow_mut();
        let dest = &mut media[start..start + block.len()];
        dest.fill(ERASED);
        if faults.grow_bad_block_at_program == Some(attempt) {
            warn!("mtd: write failed, marking block at 0x{:08x} bad", offset);
            self.bad_blocks.borrow_mut().insert(start);
            return Err(FlashDrvError::BADBLOCK);
        }
        dest.copy_from_slice(block);
        Ok(())
    }

    pub(crate) fn record_write_close(&self) -> Result<(), FlashDrvError> {
        let mut stats = self.stats.get();
        let close = stats.write_closes;
        stats.write_closes += 1;
        self.stats.set(stats);
        if self.faults.borrow().fail_write_close == Some(close) {
            return Err(FlashDrvError::FAIL);
        }
        Ok(())
    }
}

impl RawFlash for EmulatedMtd {
    type Partition = EmulatedPartition;
    type ReadSession<'a> = EmulatedReadSession<'a>;
    type WriteSession<'a> = EmulatedWriteSession<'a>;

    fn find_partition(&self, name: &str) -> Option<EmulatedPartition> {
        self.layout
            .partitions
            .iter()
            .position(|p| p.name == name)
            .map(|index| self.partitions[index])
    }

    fn partition_info(
        &self,
        partition: &EmulatedPartition,
    ) -> Result<PartitionInfo, FlashDrvError> {
        if self.faults.borrow().fail_partition_info {
            return Err(FlashDrvError::NODEVICE);
        }
        Ok(PartitionInfo {
            total_size: partition.size as u64,
            erase_block_size: self.layout.erase_block_size,
            page_size: self.layout.page_size,
        })
    }

    fn open_read(
        &self,
        partition: &EmulatedPartition,
    ) -> Result<EmulatedReadSession<'_>, FlashDrvError> {
        let mut stats = self.stats.get();
        let open = stats.read_opens;
        stats.read_opens += 1;
        self.stats.set(stats);
        if self.faults.borrow().fail_read_open == Some(open) {
            return Err(FlashDrvError::BUSY);
        }
        Ok(EmulatedReadSession::new(self, *partition))
    }

    fn open_write(
        &self,
        partition: &EmulatedPartition,
    ) -> Result<EmulatedWriteSession<'_>, FlashDrvError> {
        let mut stats = self.stats.get();
        let open = stats.write_opens;
        stats.write_opens += 1;
        self.stats.set(stats);
        if self.faults.borrow().fail_write_open == Some(open) {
            return Err(FlashDrvError::BUSY);
        }
        debug!(
            "mtd: opened partition {} for writing",
            self.layout.partitions[partition.index].name
        );
        Ok(EmulatedWriteSession::new(self, *partition))
    }
}
