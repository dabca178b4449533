// Licensed under the Apache-2.0 license

use crate::error::BootctlError;
use bootctl_layout::LogBlockHeader;
use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom};
use std::path::Path;

/// Reads at most `max` bytes from the end of `source`.
///
/// A source shorter than `max` is read from its start.
pub fn read_log_tail<R: Read + Seek>(source: &mut R, max: usize) -> io::Result<Vec<u8>> {
    let back = i64::try_from(max).unwrap_or(i64::MAX);
    if source.seek(SeekFrom::End(-back)).is_err() {
        source.seek(SeekFrom::Start(0))?;
    }
    let mut tail = Vec::with_capacity(max);
    source.take(max as u64).read_to_end(&mut tail)?;
    Ok(tail)
}

/// Builds the erase block carrying the tail of the log at `path`.
///
/// The block is produced even when the log can't be read, holding an empty
/// log, so that it still fills the block reserved for it.
pub(crate) fn log_block(
    path: &Path,
    block_size: usize,
) -> (Vec<u8>, Result<usize, BootctlError>) {
    let capacity = LogBlockHeader::capacity(block_size);
    let tail = File::open(path).and_then(|mut file| read_log_tail(&mut file, capacity));
    let (tail, result) = match tail {
        Ok(tail) => {
            let len = tail.len();
            (tail, Ok(len))
        }
        Err(source) => (
            Vec::new(),
            Err(BootctlError::LogCapture {
                path: path.to_path_buf(),
                source,
            }),
        ),
    };

    let mut block = vec![0u8; block_size];
    if let Some(body) = LogBlockHeader::encode(&mut block, tail.len()) {
        body.copy_from_slice(&tail);
    }
    (block, result)
}
