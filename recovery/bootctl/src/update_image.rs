// Licensed under the Apache-2.0 license

use crate::config::BootctlConfig;
use crate::error::{logged, BootctlError, IoFailure};
use crate::log_capture::log_block;
use crate::partition::locate;
use bootctl_layout::{bitmap_length, Section, UpdateHeader, UpdateHeaderBuilder};
use log::{debug, info, warn};
use mtd_hil::{RawFlash, WriteSession};
use std::path::Path;
use zerocopy::IntoBytes;

/// Progress of an [`UpdateImageWriter`].
///
/// States only move forward. A failed write leaves the writer in the last
/// state it reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateState {
    /// Nothing has touched the media yet.
    Idle,
    /// The header block has been zeroed; no update is staged.
    Invalidated,
    ImageWritten,
    BusyBitmapWritten,
    FailBitmapWritten,
    /// Every section is on media behind the still zeroed header.
    SessionClosed,
    /// The valid header is on media.
    HeaderCommitted,
}

/// Geometry and contents of the two progress bitmaps shown while updating.
#[derive(Debug, Clone, Copy, Default)]
pub struct Bitmaps<'a> {
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub busy: Option<&'a [u8]>,
    pub fail: Option<&'a [u8]>,
}

#[derive(Debug, Clone, Copy)]
pub struct UpdateRequest<'a> {
    pub image: &'a [u8],
    pub bitmaps: Bitmaps<'a>,
    /// File whose tail is handed to the next boot.
    pub log_source: Option<&'a Path>,
}

impl<'a> UpdateRequest<'a> {
    pub fn new(image: &'a [u8]) -> Self {
        Self {
            image,
            bitmaps: Bitmaps::default(),
            log_source: None,
        }
    }

    pub fn with_bitmaps(mut self, bitmaps: Bitmaps<'a>) -> Self {
        self.bitmaps = bitmaps;
        self
    }

    pub fn with_log(mut self, log_source: &'a Path) -> Self {
        self.log_source = Some(log_source);
        self
    }

    /// Rejects requests whose sections can't be described by a header.
    fn validate(&self) -> Result<(), BootctlError> {
        if u32::try_from(self.image.len()).is_err() {
            return Err(BootctlError::InvalidRequest(format!(
                "image of {} bytes is too large",
                self.image.len()
            )));
        }
        let bitmaps = &self.bitmaps;
        let expected = bitmap_length(bitmaps.width, bitmaps.height, bitmaps.bpp)? as usize;
        for (name, bitmap) in [("busy", bitmaps.busy), ("fail", bitmaps.fail)] {
            match bitmap {
                Some(bitmap) if bitmap.len() != expected => {
                    return Err(BootctlError::InvalidRequest(format!(
                        "{name} bitmap is {} bytes, {}x{} at {} bpp needs {expected}",
                        bitmap.len(),
                        bitmaps.width,
                        bitmaps.height,
                        bitmaps.bpp
                    )))
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// What became of the log requested alongside an update.
#[derive(Debug)]
pub enum LogOutcome {
    NotRequested,
    Captured { bytes: usize },
    /// The update was committed without the log.
    Failed(BootctlError),
}

#[derive(Debug)]
pub struct UpdateOutcome {
    pub header: UpdateHeader,
    pub log: LogOutcome,
}

/// Where the staged sections ended up.
struct Staged {
    header: UpdateHeaderBuilder,
    image_start: u64,
}

/// Stages an update image on the cache partition.
///
/// The header block is zeroed before anything else is written and the valid
/// header is only written, in a second session, once every section it points
/// at is on media. Losing power anywhere in between leaves no update staged.
///
/// On media, each section starts on an erase block boundary:
///
/// ```text
/// +--------+------------+-------+-------------+-------------+
/// | header | log block? | image | busy bitmap | fail bitmap |
/// +--------+------------+-------+-------------+-------------+
/// ```
///
/// If the commit fails once the valid header may be on media, the header
/// block is zeroed again in a fresh session before the error is returned.
///
/// A writer is good for a single update.
pub struct UpdateImageWriter<'a, F: RawFlash> {
    flash: &'a F,
    partition_name: &'a str,
    state: UpdateState,
}

impl<'a, F: RawFlash> UpdateImageWriter<'a, F> {
    pub fn new(flash: &'a F, config: &'a BootctlConfig) -> Self {
        Self {
            flash,
            partition_name: &config.cache_partition,
            state: UpdateState::Idle,
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn write(&mut self, request: &UpdateRequest<'_>) -> Result<UpdateOutcome, BootctlError> {
        if self.state != UpdateState::Idle {
            return Err(logged(BootctlError::WriterSpent(self.state)));
        }
        request.validate().map_err(logged)?;
        let (partition, info) = locate(self.flash, self.partition_name)?;

        let mut session = self.open(&partition, "open")?;
        let staged = match self.stage_payload(&mut session, request) {
            Ok(staged) => staged,
            Err(err) => {
                self.abandon(session);
                return Err(logged(err));
            }
        };
        session
            .close()
            .map_err(|err| logged(self.io("finish writing", err.into())))?;
        self.enter(UpdateState::SessionClosed);

        let header = staged.header.build().map_err(|err| logged(err.into()))?;

        let mut session = self.open(&partition, "reopen")?;
        let committed = match self.commit_header(
            &mut session,
            &header,
            staged.image_start,
            request.log_source,
            info.erase_block_size,
        ) {
            Ok(log) => session
                .close()
                .map(|()| log)
                .map_err(|err| self.io("finish header of", err.into())),
            Err(err) => {
                self.abandon(session);
                Err(err)
            }
        };
        let log = match committed {
            Ok(log) => log,
            Err(err) => {
                let err = logged(err);
                self.invalidate(&partition);
                return Err(err);
            }
        };
        self.enter(UpdateState::HeaderCommitted);

        info!(
            "Staged {} byte update on {} at {:#x}",
            header.image_length.get(),
            self.partition_name,
            header.image_offset.get()
        );
        Ok(UpdateOutcome { header, log })
    }

    /// First session: invalidate, then lay down every section.
    fn stage_payload<S: WriteSession>(
        &mut self,
        session: &mut S,
        request: &UpdateRequest<'_>,
    ) -> Result<Staged, BootctlError> {
        self.write_data(session, UpdateHeader::zeroed().as_bytes(), "write header to")?;
        self.enter(UpdateState::Invalidated);

        let bitmaps = &request.bitmaps;
        let mut header = UpdateHeaderBuilder::new(bitmaps.width, bitmaps.height, bitmaps.bpp);

        if request.log_source.is_some() {
            // Claim the block after the header; it is filled in on commit.
            self.advance(session)?;
            self.write_data(session, &[0], "write log block to")?;
        }

        let image_start = self.advance(session)?;
        self.check_header_placed(session)?;
        header.set_length(Section::Image, request.image.len())?;
        self.write_data(session, request.image, "write update to")?;
        let busy_start = self.advance(session)?;
        self.resolve(session, &mut header, Section::Image, image_start)?;
        self.enter(UpdateState::ImageWritten);

        let fail_start =
            self.write_bitmap(session, &mut header, Section::BusyBitmap, bitmaps.busy, busy_start)?;
        self.enter(UpdateState::BusyBitmapWritten);

        self.write_bitmap(session, &mut header, Section::FailBitmap, bitmaps.fail, fail_start)?;
        self.enter(UpdateState::FailBitmapWritten);

        Ok(Staged {
            header,
            image_start,
        })
    }

    /// Writes one bitmap from `start` and returns where the next section starts.
    fn write_bitmap<S: WriteSession>(
        &self,
        session: &mut S,
        header: &mut UpdateHeaderBuilder,
        section: Section,
        bitmap: Option<&[u8]>,
        start: u64,
    ) -> Result<u64, BootctlError> {
        let data = bitmap.unwrap_or_default();
        header.set_length(section, data.len())?;
        self.write_data(session, data, "write bitmap to")?;
        let next = self.advance(session)?;
        self.resolve(session, header, section, start)?;
        Ok(next)
    }

    /// Second session: the valid header, then the log into its reserved block.
    fn commit_header<S: WriteSession>(
        &self,
        session: &mut S,
        header: &UpdateHeader,
        image_start: u64,
        log_source: Option<&Path>,
        erase_block_size: usize,
    ) -> Result<LogOutcome, BootctlError> {
        self.write_data(session, header.as_bytes(), "rewrite header to")?;
        self.advance(session)?;
        self.check_header_placed(session)?;

        let log = match log_source {
            Some(path) => self.store_log(session, path, erase_block_size),
            None => LogOutcome::NotRequested,
        };

        // Anything but exactly one block of log shifts every offset in the header.
        let boundary = self.advance(session)?;
        if boundary != image_start {
            return Err(BootctlError::Misaligned {
                partition: self.partition_name.to_string(),
                expected: image_start,
                actual: boundary,
            });
        }
        Ok(log)
    }

    fn store_log<S: WriteSession>(
        &self,
        session: &mut S,
        path: &Path,
        block_size: usize,
    ) -> LogOutcome {
        let (block, captured) = log_block(path, block_size);
        let stored = self.write_data(session, &block, "store log in");
        match (captured, stored) {
            (Ok(bytes), Ok(())) => {
                info!("read {bytes} bytes from log");
                LogOutcome::Captured { bytes }
            }
            (Err(err), _) | (_, Err(err)) => {
                warn!("{err}");
                LogOutcome::Failed(err)
            }
        }
    }

    /// Zeroes the header block again after a failed commit.
    ///
    /// Only the header is rewritten. Failing here leaves nothing more to try,
    /// so it is logged and the commit error stands.
    fn invalidate(&self, partition: &F::Partition) {
        let mut session = match self.flash.open_write(partition) {
            Ok(session) => session,
            Err(err) => {
                warn!("can't reopen {} to invalidate it: {err}", self.partition_name);
                return;
            }
        };
        let zeroed = self
            .write_data(&mut session, UpdateHeader::zeroed().as_bytes(), "invalidate header of")
            .and_then(|()| self.advance(&mut session));
        match zeroed {
            Ok(_) => match session.close() {
                Ok(()) => info!("Invalidated header of {}", self.partition_name),
                Err(err) => warn!("can't finish invalidating {}: {err}", self.partition_name),
            },
            Err(err) => {
                warn!("{err}");
                self.abandon(session);
            }
        }
    }

    /// Closes a session that already failed.
    fn abandon<S: WriteSession>(&self, session: S) {
        if let Err(err) = session.close() {
            debug!("{}: close after failure failed too: {err}", self.partition_name);
        }
    }

    /// The header is only found in the first block of the partition.
    fn check_header_placed<S: WriteSession>(&self, session: &S) -> Result<(), BootctlError> {
        match session.resolve_write_start(0) {
            0 => Ok(()),
            offset => Err(BootctlError::HeaderMoved {
                partition: self.partition_name.to_string(),
                offset,
            }),
        }
    }

    fn resolve<S: WriteSession>(
        &self,
        session: &S,
        header: &mut UpdateHeaderBuilder,
        section: Section,
        start: u64,
    ) -> Result<(), BootctlError> {
        let offset = session.resolve_write_start(start);
        debug!("{} {section} at {offset:#x}", self.partition_name);
        Ok(header.resolve(section, offset)?)
    }

    fn open(
        &self,
        partition: &F::Partition,
        action: &'static str,
    ) -> Result<F::WriteSession<'a>, BootctlError> {
        self.flash
            .open_write(partition)
            .map_err(|err| logged(self.io(action, err.into())))
    }

    fn write_data<S: WriteSession>(
        &self,
        session: &mut S,
        data: &[u8],
        action: &'static str,
    ) -> Result<(), BootctlError> {
        match session.write(data) {
            Ok(written) if written == data.len() => Ok(()),
            Ok(written) => Err(self.io(
                action,
                IoFailure::Short {
                    expected: data.len(),
                    actual: written,
                },
            )),
            Err(err) => Err(self.io(action, err.into())),
        }
    }

    fn advance<S: WriteSession>(&self, session: &mut S) -> Result<u64, BootctlError> {
        session
            .advance_to_next_erase_block()
            .map_err(|err| self.io("pad", err.into()))
    }

    fn enter(&mut self, state: UpdateState) {
        debug!("{}: {:?} -> {:?}", self.partition_name, self.state, state);
        self.state = state;
    }

    fn io(&self, action: &'static str, source: IoFailure) -> BootctlError {
        BootctlError::Io {
            partition: self.partition_name.to_string(),
            action,
            source,
        }
    }
}
