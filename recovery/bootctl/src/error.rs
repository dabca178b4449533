// Licensed under the Apache-2.0 license

use crate::update_image::UpdateState;
use bootctl_layout::{LayoutError, Section};
use log::error;
use mtd_hil::FlashDrvError;
use std::path::PathBuf;
use thiserror::Error;

/// Why a transfer on an open session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum IoFailure {
    #[error(transparent)]
    Driver(#[from] FlashDrvError),
    #[error("short transfer of {actual} bytes, expected {expected}")]
    Short { expected: usize, actual: usize },
}

#[derive(Debug, Error)]
pub enum BootctlError {
    #[error("can't find {partition}")]
    NotFound {
        partition: String,
        #[source]
        source: Option<FlashDrvError>,
    },
    #[error("can't {action} {partition}: {source}")]
    Io {
        partition: String,
        action: &'static str,
        #[source]
        source: IoFailure,
    },
    #[error(
        "misalignment rewriting {partition}: image starts at {expected:#x}, \
         next block after the header and log is {actual:#x}"
    )]
    Misaligned {
        partition: String,
        expected: u64,
        actual: u64,
    },
    /// The first block went bad, so the header was written further on.
    #[error("header of {partition} landed at {offset:#x} instead of the first block")]
    HeaderMoved { partition: String, offset: u64 },
    #[error("{section} offset was never resolved")]
    UnresolvedOffset { section: Section },
    #[error("can't capture log from {}: {source}", path.display())]
    LogCapture {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("update writer already left the idle state ({0:?})")]
    WriterSpent(UpdateState),
    #[error("staged update is corrupt: {0}")]
    CorruptUpdate(String),
    #[error("invalid configuration: {0}")]
    Config(#[from] toml::de::Error),
}

/// Coarse classification callers can match on without caring about detail.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    NotFound,
    Io,
    Alignment,
    LogCapture,
    InvalidRequest,
    Corrupt,
}

impl BootctlError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            BootctlError::NotFound { .. } => ErrorKind::NotFound,
            BootctlError::Io { .. } => ErrorKind::Io,
            BootctlError::Misaligned { .. }
            | BootctlError::HeaderMoved { .. }
            | BootctlError::UnresolvedOffset { .. } => ErrorKind::Alignment,
            BootctlError::LogCapture { .. } => ErrorKind::LogCapture,
            BootctlError::InvalidRequest(_)
            | BootctlError::WriterSpent(_)
            | BootctlError::Config(_) => ErrorKind::InvalidRequest,
            BootctlError::CorruptUpdate(_) => ErrorKind::Corrupt,
        }
    }
}

impl From<LayoutError> for BootctlError {
    fn from(err: LayoutError) -> Self {
        match err {
            LayoutError::UnresolvedSection { section } => {
                BootctlError::UnresolvedOffset { section }
            }
            other => BootctlError::InvalidRequest(other.to_string()),
        }
    }
}

/// Reports a fatal error before handing it back to the caller.
pub(crate) fn logged(err: BootctlError) -> BootctlError {
    error!("{err}");
    err
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_partition_and_cause() {
        let err = BootctlError::Io {
            partition: "cache".into(),
            action: "write header to",
            source: FlashDrvError::NOSPACE.into(),
        };
        let text = err.to_string();
        assert!(text.starts_with("can't write header to cache: "), "{text}");
        assert_eq!(err.kind(), ErrorKind::Io);

        let err = BootctlError::Io {
            partition: "misc".into(),
            action: "read",
            source: IoFailure::Short {
                expected: 6144,
                actual: 2048,
            },
        };
        assert_eq!(
            err.to_string(),
            "can't read misc: short transfer of 2048 bytes, expected 6144"
        );
    }

    #[test]
    fn test_layout_errors_map_to_kinds() {
        let unresolved: BootctlError = LayoutError::UnresolvedSection {
            section: Section::FailBitmap,
        }
        .into();
        assert_eq!(unresolved.kind(), ErrorKind::Alignment);

        let too_long: BootctlError = LayoutError::FieldTooLong {
            field: "command",
            capacity: 32,
            len: 40,
        }
        .into();
        assert_eq!(too_long.kind(), ErrorKind::InvalidRequest);
    }

    #[test]
    fn test_misaligned_names_both_offsets() {
        let err = BootctlError::Misaligned {
            partition: "cache".into(),
            expected: 0x1000,
            actual: 0x1800,
        };
        assert_eq!(
            err.to_string(),
            "misalignment rewriting cache: image starts at 0x1000, \
             next block after the header and log is 0x1800"
        );
        assert_eq!(err.kind(), ErrorKind::Alignment);

        let err = BootctlError::HeaderMoved {
            partition: "cache".into(),
            offset: 0x800,
        };
        assert_eq!(err.kind(), ErrorKind::Alignment);
    }
}
