// Licensed under the Apache-2.0 license

use crate::config::BootctlConfig;
use crate::dump::dump_data;
use crate::error::{logged, BootctlError, IoFailure};
use crate::partition::locate;
use bootctl_layout::{BootloaderMessage, MISC_COMMAND_PAGE, MISC_PAGES};
use log::{debug, info};
use mtd_hil::{RawFlash, ReadSession, WriteSession};
use zerocopy::{FromBytes, IntoBytes};

const MESSAGE_SIZE: usize = core::mem::size_of::<BootloaderMessage>();

/// The boot command record on the misc partition.
///
/// The record sits in page [`MISC_COMMAND_PAGE`] of a [`MISC_PAGES`] page
/// region. The whole region is read before every update and written back in
/// one session, so the neighbouring pages survive byte for byte.
pub struct BootCommandStore<'a, F: RawFlash> {
    flash: &'a F,
    partition_name: &'a str,
}

impl<'a, F: RawFlash> BootCommandStore<'a, F> {
    pub fn new(flash: &'a F, config: &'a BootctlConfig) -> Self {
        Self {
            flash,
            partition_name: &config.misc_partition,
        }
    }

    /// Reads the current boot command.
    pub fn get(&self) -> Result<BootloaderMessage, BootctlError> {
        let (partition, page_size) = self.locate()?;
        let data = self.read_region(&partition, page_size)?;
        dump_data("get_bootloader_message", &data);

        let offset = page_size * MISC_COMMAND_PAGE;
        let (message, _) = BootloaderMessage::read_from_prefix(&data[offset..])
            .map_err(|_| self.short("read", offset + MESSAGE_SIZE, data.len()))?;
        Ok(message)
    }

    /// Replaces the boot command, preserving the rest of the region.
    pub fn set(&self, message: &BootloaderMessage) -> Result<(), BootctlError> {
        let (partition, page_size) = self.locate()?;
        let mut data = self.read_region(&partition, page_size)?;

        let offset = page_size * MISC_COMMAND_PAGE;
        data[offset..offset + MESSAGE_SIZE].copy_from_slice(message.as_bytes());
        dump_data("set_bootloader_message", &data);

        let mut session = self
            .flash
            .open_write(&partition)
            .map_err(|err| logged(self.io("open", err.into())))?;
        match session.write(&data) {
            Ok(written) if written == data.len() => {}
            result => {
                if let Err(err) = session.close() {
                    debug!("{}: close after failure failed too: {err}", self.partition_name);
                }
                let failure = match result {
                    Ok(written) => IoFailure::Short {
                        expected: data.len(),
                        actual: written,
                    },
                    Err(err) => err.into(),
                };
                return Err(logged(self.io("write", failure)));
            }
        }
        session
            .close()
            .map_err(|err| logged(self.io("finish", err.into())))?;

        info!(
            "Set boot command \"{}\"",
            String::from_utf8_lossy(message.command())
        );
        Ok(())
    }

    /// Finds the partition and checks its pages can hold the record.
    fn locate(&self) -> Result<(F::Partition, usize), BootctlError> {
        let (partition, info) = locate(self.flash, self.partition_name)?;
        if info.page_size < MESSAGE_SIZE {
            return Err(logged(BootctlError::InvalidRequest(format!(
                "{} page size {} can't hold a {MESSAGE_SIZE} byte boot message",
                self.partition_name, info.page_size
            ))));
        }
        Ok((partition, info.page_size))
    }

    /// Reads the whole region. A short read is an error, never a partial result.
    fn read_region(
        &self,
        partition: &F::Partition,
        page_size: usize,
    ) -> Result<Vec<u8>, BootctlError> {
        let mut session = self
            .flash
            .open_read(partition)
            .map_err(|err| logged(self.io("open", err.into())))?;
        let mut data = vec![0u8; page_size * MISC_PAGES];
        let result = session.read(&mut data);
        session.close();
        match result {
            Ok(read) if read == data.len() => Ok(data),
            Ok(read) => Err(logged(self.short("read", data.len(), read))),
            Err(err) => Err(logged(self.io("read", err.into()))),
        }
    }

    fn io(&self, action: &'static str, source: IoFailure) -> BootctlError {
        BootctlError::Io {
            partition: self.partition_name.to_string(),
            action,
            source,
        }
    }

    fn short(&self, action: &'static str, expected: usize, actual: usize) -> BootctlError {
        self.io(action, IoFailure::Short { expected, actual })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use emulator_mtd::{EmulatedMtd, FaultPlan, FlashLayout, PartitionLayout};
    use mtd_hil::FlashDrvError;

    const BLOCK: usize = 4096;
    const PAGE: usize = 2048;

    fn flash() -> EmulatedMtd {
        EmulatedMtd::new(FlashLayout {
            erase_block_size: BLOCK,
            page_size: PAGE,
            partitions: vec![PartitionLayout::new("misc", 2)],
        })
        .unwrap()
    }

    #[test]
    fn test_erased_partition_reads_idle() {
        let flash = flash();
        let config = BootctlConfig::default();
        let message = BootCommandStore::new(&flash, &config).get().unwrap();
        assert!(message.is_idle());
        assert!(message.command().is_empty());
    }

    #[test]
    fn test_set_writes_only_middle_page() {
        let flash = flash();
        let config = BootctlConfig::default();
        let store = BootCommandStore::new(&flash, &config);
        let message =
            BootloaderMessage::with_command("boot-recovery", "recovery\n--wipe_data").unwrap();
        store.set(&message).unwrap();

        let raw = flash.partition_image("misc").unwrap();
        assert!(raw[..PAGE].iter().all(|&b| b == 0xff));
        assert_eq!(&raw[PAGE..PAGE + MESSAGE_SIZE], message.as_bytes());
        assert!(raw[PAGE + MESSAGE_SIZE..3 * PAGE].iter().all(|&b| b == 0xff));
        assert_eq!(store.get().unwrap(), message);
    }

    #[test]
    fn test_missing_partition() {
        let flash = flash();
        let config = BootctlConfig {
            misc_partition: "para".into(),
            ..Default::default()
        };
        let err = BootCommandStore::new(&flash, &config).get().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_geometry_failure_is_not_found() {
        let flash = flash();
        flash.set_faults(FaultPlan {
            fail_partition_info: true,
            ..Default::default()
        });
        let config = BootctlConfig::default();
        let err = BootCommandStore::new(&flash, &config).get().unwrap_err();
        assert!(matches!(
            err,
            BootctlError::NotFound {
                source: Some(FlashDrvError::NODEVICE),
                ..
            }
        ));
    }

    #[test]
    fn test_small_page_rejected_before_io() {
        let flash = EmulatedMtd::new(FlashLayout {
            erase_block_size: 2048,
            page_size: 512,
            partitions: vec![PartitionLayout::new("misc", 1)],
        })
        .unwrap();
        let config = BootctlConfig::default();
        let store = BootCommandStore::new(&flash, &config);
        let err = store.set(&BootloaderMessage::default()).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidRequest);
        assert_eq!(flash.stats().read_opens, 0);
        assert_eq!(flash.stats().write_opens, 0);
    }
}
