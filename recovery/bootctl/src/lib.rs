// Licensed under the Apache-2.0 license

//! Boot control records kept on raw flash.
//!
//! Two records live directly on erase-block storage, with no filesystem in
//! between:
//!
//! * the boot command, a [`BootloaderMessage`] in the middle page of the
//!   misc partition, rewritten with a read-modify-write of the whole region
//!   ([`BootCommandStore`]);
//! * a staged update on the cache partition: header, optional captured log,
//!   image and two bitmaps ([`UpdateImageWriter`]).
//!
//! The update is written so that losing power at any point leaves either the
//! previous state or no valid update at all. The header block is zeroed
//! before anything else is touched and only rewritten with a valid header once
//! every section it points at is on media.

mod boot_command;
mod config;
mod dump;
mod error;
mod log_capture;
mod partition;
mod staged_update;
mod update_image;

pub use boot_command::BootCommandStore;
pub use bootctl_layout::{BootloaderMessage, UpdateHeader};
pub use config::BootctlConfig;
pub use error::{BootctlError, ErrorKind, IoFailure};
pub use log_capture::read_log_tail;
pub use staged_update::StagedUpdate;
pub use update_image::{
    Bitmaps, LogOutcome, UpdateImageWriter, UpdateOutcome, UpdateRequest, UpdateState,
};
