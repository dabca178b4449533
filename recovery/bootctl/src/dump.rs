// Licensed under the Apache-2.0 license

use log::{log_enabled, trace, Level};

const BYTES_PER_ROW: usize = 24;

/// Hex dump of a raw region at trace level.
pub(crate) fn dump_data(label: &str, data: &[u8]) {
    if !log_enabled!(Level::Trace) {
        return;
    }
    trace!("--- {label} ---");
    for (row, chunk) in data.chunks(BYTES_PER_ROW).enumerate() {
        trace!("{:05x}: {}", row * BYTES_PER_ROW, hex::encode(chunk));
    }
}
