// Licensed under the Apache-2.0 license

use crate::LayoutError;
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const COMMAND_SIZE: usize = 32;
pub const STATUS_SIZE: usize = 32;
pub const RECOVERY_SIZE: usize = 1024;

/// Value of a byte that has been erased and never programmed.
const ERASED: u8 = 0xff;

/// The boot command record read by the bootloader from the misc partition.
///
/// The layout is consumed verbatim by firmware: three fixed-length text
/// fields, each NUL terminated when shorter than the field.
///
/// * `command` - what the bootloader should do on the next boot
///   (e.g. `boot-recovery`), empty for a normal boot.
/// * `status` - result reported back by the bootloader after handling a
///   command (e.g. `OKAY`).
/// * `recovery` - newline separated arguments for the recovery stage; the
///   first line is conventionally `recovery`.
#[repr(C)]
#[derive(Clone, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct BootloaderMessage {
    pub command: [u8; COMMAND_SIZE],
    pub status: [u8; STATUS_SIZE],
    pub recovery: [u8; RECOVERY_SIZE],
}

impl Default for BootloaderMessage {
    fn default() -> Self {
        Self {
            command: [0; COMMAND_SIZE],
            status: [0; STATUS_SIZE],
            recovery: [0; RECOVERY_SIZE],
        }
    }
}

impl BootloaderMessage {
    /// Builds a message carrying `command` and the given recovery arguments.
    pub fn with_command(command: &str, recovery: &str) -> Result<Self, LayoutError> {
        let mut msg = Self::default();
        msg.set_command(command)?;
        msg.set_recovery(recovery)?;
        Ok(msg)
    }

    pub fn set_command(&mut self, command: &str) -> Result<(), LayoutError> {
        fill_field("command", &mut self.command, command)
    }

    pub fn set_status(&mut self, status: &str) -> Result<(), LayoutError> {
        fill_field("status", &mut self.status, status)
    }

    pub fn set_recovery(&mut self, recovery: &str) -> Result<(), LayoutError> {
        fill_field("recovery", &mut self.recovery, recovery)
    }

    pub fn command(&self) -> &[u8] {
        field_text(&self.command)
    }

    pub fn status(&self) -> &[u8] {
        field_text(&self.status)
    }

    pub fn recovery(&self) -> &[u8] {
        field_text(&self.recovery)
    }

    /// Arguments handed to recovery: every line of `recovery` after the first.
    pub fn recovery_args(&self) -> impl Iterator<Item = &[u8]> {
        self.recovery()
            .split(|&b| b == b'\n')
            .skip(1)
            .filter(|line| !line.is_empty())
    }

    /// True when no command is pending, including a never-programmed record.
    pub fn is_idle(&self) -> bool {
        self.command().is_empty()
    }
}

fn fill_field(field: &'static str, dest: &mut [u8], value: &str) -> Result<(), LayoutError> {
    let bytes = value.as_bytes();
    // A value filling the whole field is stored without a terminator.
    if bytes.len() > dest.len() {
        return Err(LayoutError::FieldTooLong {
            field,
            capacity: dest.len(),
            len: bytes.len(),
        });
    }
    dest.fill(0);
    dest[..bytes.len()].copy_from_slice(bytes);
    Ok(())
}

fn field_text(field: &[u8]) -> &[u8] {
    if field.first() == Some(&ERASED) {
        return &[];
    }
    let end = field.iter().position(|&b| b == 0).unwrap_or(field.len());
    &field[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_matches_firmware() {
        assert_eq!(core::mem::size_of::<BootloaderMessage>(), 1088);
        assert_eq!(core::mem::offset_of!(BootloaderMessage, status), 32);
        assert_eq!(core::mem::offset_of!(BootloaderMessage, recovery), 64);
    }

    #[test]
    fn test_fields_are_nul_terminated() {
        let msg =
            BootloaderMessage::with_command("boot-recovery", "recovery\n--wipe_data\n").unwrap();
        assert_eq!(msg.command(), b"boot-recovery");
        assert_eq!(msg.command[13], 0);
        assert_eq!(msg.status(), b"");
        let args: [&[u8]; 1] = [b"--wipe_data"];
        assert!(msg.recovery_args().eq(args));
    }

    #[test]
    fn test_erased_record_is_idle() {
        let msg = BootloaderMessage::read_from_bytes(&[0xffu8; 1088]).unwrap();
        assert!(msg.is_idle());
        assert_eq!(msg.recovery(), b"");
    }

    #[test]
    fn test_overlong_field_rejected() {
        let mut msg = BootloaderMessage::default();
        let err = msg
            .set_command("boot-recovery-with-a-very-long-suffix")
            .unwrap_err();
        assert_eq!(
            err,
            LayoutError::FieldTooLong {
                field: "command",
                capacity: COMMAND_SIZE,
                len: 37,
            }
        );
        assert!(msg.is_idle());
    }
}
