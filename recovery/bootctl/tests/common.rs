// Licensed under the Apache-2.0 license
#![allow(dead_code)]

use emulator_mtd::{EmulatedMtd, FlashLayout, PartitionLayout};
use log::LevelFilter;
use recovery_bootctl::{
    BootctlConfig, Bitmaps, StagedUpdate, UpdateImageWriter, UpdateOutcome, UpdateRequest,
};
use simple_logger::SimpleLogger;

pub const BLOCK: usize = 2048;
pub const PAGE: usize = 2048;
pub const MISC_BLOCKS: usize = 4;
pub const CACHE_BLOCKS: usize = 24;

pub fn setup() {
    let _ = SimpleLogger::new().with_level(LevelFilter::Debug).init();
}

pub fn layout(cache_bad_blocks: &[usize]) -> FlashLayout {
    FlashLayout {
        erase_block_size: BLOCK,
        page_size: PAGE,
        partitions: vec![
            PartitionLayout::new("misc", MISC_BLOCKS),
            PartitionLayout::new("cache", CACHE_BLOCKS).with_bad_blocks(cache_bad_blocks),
        ],
    }
}

pub fn flash() -> EmulatedMtd {
    setup();
    EmulatedMtd::new(layout(&[])).unwrap()
}

/// An update together with everything the writer needs to stage it.
pub struct Payload {
    pub image: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub busy: Option<Vec<u8>>,
    pub fail: Option<Vec<u8>>,
}

impl Payload {
    pub fn new(image: Vec<u8>) -> Self {
        Self {
            image,
            width: 0,
            height: 0,
            bpp: 0,
            busy: None,
            fail: None,
        }
    }

    /// A payload with both bitmaps, filled with `seed` derived bytes.
    pub fn with_bitmaps(image_len: usize, width: u32, height: u32, bpp: u32, seed: u8) -> Self {
        let len = (bpp.div_ceil(8) * width * height) as usize;
        Self {
            image: pattern(image_len, seed),
            width,
            height,
            bpp,
            busy: Some(pattern(len, seed.wrapping_add(1))),
            fail: Some(pattern(len, seed.wrapping_add(2))),
        }
    }

    pub fn request(&self) -> UpdateRequest<'_> {
        UpdateRequest::new(&self.image).with_bitmaps(Bitmaps {
            width: self.width,
            height: self.height,
            bpp: self.bpp,
            busy: self.busy.as_deref(),
            fail: self.fail.as_deref(),
        })
    }

    /// True when `staged` holds exactly this payload.
    pub fn matches(&self, staged: &StagedUpdate<'_>) -> bool {
        staged.image == self.image.as_slice()
            && staged.busy_bitmap == self.busy.as_deref().unwrap_or_default()
            && staged.fail_bitmap == self.fail.as_deref().unwrap_or_default()
    }
}

pub fn pattern(len: usize, seed: u8) -> Vec<u8> {
    (0..len)
        .map(|i| (i as u8).wrapping_mul(31).wrapping_add(seed))
        .collect()
}

pub fn write_update(flash: &EmulatedMtd, request: &UpdateRequest<'_>) -> UpdateOutcome {
    let config = BootctlConfig::default();
    UpdateImageWriter::new(flash, &config).write(request).unwrap()
}

pub fn cache_image(flash: &EmulatedMtd) -> Vec<u8> {
    flash.partition_image("cache").unwrap()
}
