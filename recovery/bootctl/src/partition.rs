// Licensed under the Apache-2.0 license

use crate::error::{logged, BootctlError};
use mtd_hil::{PartitionInfo, RawFlash};

/// Looks up a partition by name together with its geometry.
///
/// A partition whose geometry can't be queried is as good as missing.
pub(crate) fn locate<F: RawFlash>(
    flash: &F,
    name: &str,
) -> Result<(F::Partition, PartitionInfo), BootctlError> {
    let not_found = |source| {
        logged(BootctlError::NotFound {
            partition: name.to_string(),
            source,
        })
    };
    let partition = flash.find_partition(name).ok_or_else(|| not_found(None))?;
    let info = flash
        .partition_info(&partition)
        .map_err(|err| not_found(Some(err)))?;
    Ok((partition, info))
}
