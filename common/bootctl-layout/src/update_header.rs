// Licensed under the Apache-2.0 license

use core::fmt;

use crate::LayoutError;
use zerocopy::byteorder::{LittleEndian, U32};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

pub const UPDATE_MAGIC_SIZE: usize = 16;
pub const UPDATE_MAGIC: [u8; UPDATE_MAGIC_SIZE] = *b"MSM-RADIO-UPDATE";
pub const UPDATE_VERSION: u32 = 0x0001_0000;
pub const UPDATE_HEADER_SIZE: usize = core::mem::size_of::<UpdateHeader>();

type Le32 = U32<LittleEndian>;

/// Header written at byte 0 of the update partition.
///
/// Offsets are in bytes from the start of the header, lengths are in bytes.
/// The header only carries [`UPDATE_MAGIC`] once every section it describes
/// has been written; until then the block holding it is all zeroes.
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, Immutable, KnownLayout)]
pub struct UpdateHeader {
    pub magic: [u8; UPDATE_MAGIC_SIZE],
    pub version: Le32,
    pub size: Le32,

    pub image_offset: Le32,
    pub image_length: Le32,

    pub bitmap_width: Le32,
    pub bitmap_height: Le32,
    pub bitmap_bpp: Le32,

    pub busy_bitmap_offset: Le32,
    pub busy_bitmap_length: Le32,

    pub fail_bitmap_offset: Le32,
    pub fail_bitmap_length: Le32,
}

impl UpdateHeader {
    /// The invalid header used to retire whatever update was staged before.
    pub const fn zeroed() -> Self {
        Self {
            magic: [0; UPDATE_MAGIC_SIZE],
            version: Le32::ZERO,
            size: Le32::ZERO,
            image_offset: Le32::ZERO,
            image_length: Le32::ZERO,
            bitmap_width: Le32::ZERO,
            bitmap_height: Le32::ZERO,
            bitmap_bpp: Le32::ZERO,
            busy_bitmap_offset: Le32::ZERO,
            busy_bitmap_length: Le32::ZERO,
            fail_bitmap_offset: Le32::ZERO,
            fail_bitmap_length: Le32::ZERO,
        }
    }

    pub fn has_magic(&self) -> bool {
        self.magic == UPDATE_MAGIC
    }

    /// Checks the fields a consumer must trust before following any offset.
    pub fn verify(&self) -> bool {
        self.has_magic()
            && self.version.get() == UPDATE_VERSION
            && self.size.get() as usize == UPDATE_HEADER_SIZE
    }

    /// Byte range `(offset, length)` of `section` as declared by the header.
    pub fn section(&self, section: Section) -> (u32, u32) {
        match section {
            Section::Image => (self.image_offset.get(), self.image_length.get()),
            Section::BusyBitmap => (self.busy_bitmap_offset.get(), self.busy_bitmap_length.get()),
            Section::FailBitmap => (self.fail_bitmap_offset.get(), self.fail_bitmap_length.get()),
        }
    }
}

/// Payload sections described by an [`UpdateHeader`], in on-media order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    Image,
    BusyBitmap,
    FailBitmap,
}

impl Section {
    pub const ALL: [Section; 3] = [Section::Image, Section::BusyBitmap, Section::FailBitmap];
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Section::Image => "image",
            Section::BusyBitmap => "busy bitmap",
            Section::FailBitmap => "fail bitmap",
        })
    }
}

/// Where a section starts on media.
///
/// The storage layer may pad or skip blocks, so the real start of a section
/// is only known after its data has been written.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SectionOffset {
    #[default]
    Unresolved,
    Resolved(u32),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PendingSection {
    pub offset: SectionOffset,
    pub length: u32,
}

/// Size in bytes of one raw bitmap of the given geometry.
pub fn bitmap_length(width: u32, height: u32, bpp: u32) -> Result<u32, LayoutError> {
    bpp.div_ceil(8)
        .checked_mul(width)
        .and_then(|row| row.checked_mul(height))
        .ok_or(LayoutError::BitmapOverflow { width, height, bpp })
}

/// In-memory header that is filled in while an update is being written.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdateHeaderBuilder {
    bitmap_width: u32,
    bitmap_height: u32,
    bitmap_bpp: u32,
    sections: [PendingSection; 3],
}

impl UpdateHeaderBuilder {
    pub fn new(bitmap_width: u32, bitmap_height: u32, bitmap_bpp: u32) -> Self {
        Self {
            bitmap_width,
            bitmap_height,
            bitmap_bpp,
            sections: Default::default(),
        }
    }

    pub fn section(&self, section: Section) -> PendingSection {
        self.sections[section as usize]
    }

    pub fn set_length(&mut self, section: Section, length: usize) -> Result<(), LayoutError> {
        let length = u32::try_from(length).map_err(|_| LayoutError::LengthOverflow {
            section,
            value: length as u64,
        })?;
        self.sections[section as usize].length = length;
        Ok(())
    }

    pub fn resolve(&mut self, section: Section, offset: u64) -> Result<(), LayoutError> {
        let offset = u32::try_from(offset).map_err(|_| LayoutError::OffsetOverflow {
            section,
            value: offset,
        })?;
        self.sections[section as usize].offset = SectionOffset::Resolved(offset);
        Ok(())
    }

    /// Produces the valid header. Fails if any section was never resolved.
    pub fn build(&self) -> Result<UpdateHeader, LayoutError> {
        let mut placed = [(0u32, 0u32); 3];
        for section in Section::ALL {
            let pending = self.section(section);
            match pending.offset {
                SectionOffset::Resolved(offset) => {
                    placed[section as usize] = (offset, pending.length)
                }
                SectionOffset::Unresolved => {
                    return Err(LayoutError::UnresolvedSection { section })
                }
            }
        }
        let [image, busy, fail] = placed;

        Ok(UpdateHeader {
            magic: UPDATE_MAGIC,
            version: UPDATE_VERSION.into(),
            size: (UPDATE_HEADER_SIZE as u32).into(),
            image_offset: image.0.into(),
            image_length: image.1.into(),
            bitmap_width: self.bitmap_width.into(),
            bitmap_height: self.bitmap_height.into(),
            bitmap_bpp: self.bitmap_bpp.into(),
            busy_bitmap_offset: busy.0.into(),
            busy_bitmap_length: busy.1.into(),
            fail_bitmap_offset: fail.0.into(),
            fail_bitmap_length: fail.1.into(),
        })
    }
}
