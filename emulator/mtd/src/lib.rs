/*++

Licensed under the Apache-2.0 license.

File Name:

    lib.rs

Abstract:

    Emulated raw flash (MTD style) storage for exercising boot control code
    on the host.

--*/

mod device;
mod layout;
mod session;

pub use device::{EmulatedMtd, EmulatedPartition, FaultPlan, MtdStats};
pub use layout::{FlashLayout, PartitionLayout};
pub use session::{EmulatedReadSession, EmulatedWriteSession};

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum EmulatorError {
    #[error("invalid flash layout: {0}")]
    Layout(String),
    #[error("invalid flash layout file: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("flash image {path}: {source}")]
    Image {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("flash image {path} is {actual} bytes, larger than the {expected} byte device")]
    ImageSize {
        path: PathBuf,
        expected: u64,
        actual: u64,
    },
}
