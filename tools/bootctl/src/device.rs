// Licensed under the Apache-2.0 license

use anyhow::{Context, Result};
use bootctl_layout::BootloaderMessage;
use emulator_mtd::{EmulatedMtd, FlashLayout};
use log::warn;
use recovery_bootctl::{
    Bitmaps, BootCommandStore, BootctlConfig, LogOutcome, StagedUpdate, UpdateImageWriter,
    UpdateRequest,
};
use std::fs;
use std::path::{Path, PathBuf};

/// Bytes of the image shown by `show-update`.
const PREVIEW_LEN: usize = 16;

pub struct UpdateArgs<'a> {
    pub payload: &'a Path,
    pub width: u32,
    pub height: u32,
    pub bpp: u32,
    pub busy: Option<&'a Path>,
    pub fail: Option<&'a Path>,
    pub log: Option<&'a Path>,
}

/// An emulated flash device backed by an image file.
pub struct Device {
    flash: EmulatedMtd,
    config: BootctlConfig,
    image: PathBuf,
}

impl Device {
    pub fn open(image: &Path, layout: Option<&Path>, config: Option<&Path>) -> Result<Self> {
        let layout = match layout {
            Some(path) => FlashLayout::from_toml(&read_text(path)?)
                .with_context(|| format!("loading layout {}", path.display()))?,
            None => FlashLayout::default(),
        };
        let config = match config {
            Some(path) => BootctlConfig::from_toml(&read_text(path)?)
                .with_context(|| format!("loading config {}", path.display()))?,
            None => BootctlConfig::default(),
        };
        let flash = EmulatedMtd::open_image(image, layout)?;
        Ok(Self {
            flash,
            config,
            image: image.to_path_buf(),
        })
    }

    pub fn boot_command(&self) -> Result<BootloaderMessage> {
        Ok(BootCommandStore::new(&self.flash, &self.config).get()?)
    }

    pub fn get_command(&self) -> Result<()> {
        let message = self.boot_command()?;
        println!("command:  {}", String::from_utf8_lossy(message.command()));
        println!("status:   {}", String::from_utf8_lossy(message.status()));
        for line in message.recovery().split(|&b| b == b'\n') {
            println!("recovery: {}", String::from_utf8_lossy(line));
        }
        Ok(())
    }

    pub fn set_command(&self, command: &str, status: &str, recovery: &str) -> Result<()> {
        let mut message = BootloaderMessage::with_command(command, recovery)?;
        message.set_status(status)?;
        BootCommandStore::new(&self.flash, &self.config).set(&message)?;
        self.persist()
    }

    pub fn write_update(&self, args: &UpdateArgs<'_>) -> Result<()> {
        let image = read_file(args.payload)?;
        let busy = args.busy.map(read_file).transpose()?;
        let fail = args.fail.map(read_file).transpose()?;

        let mut request = UpdateRequest::new(&image).with_bitmaps(Bitmaps {
            width: args.width,
            height: args.height,
            bpp: args.bpp,
            busy: busy.as_deref(),
            fail: fail.as_deref(),
        });
        if let Some(log) = args.log {
            request = request.with_log(log);
        }

        let outcome = UpdateImageWriter::new(&self.flash, &self.config).write(&request);
        // Whatever reached the media, an invalidated header included, goes to the file.
        self.persist()?;
        let outcome = outcome?;

        match outcome.log {
            LogOutcome::Captured { bytes } => println!("captured {bytes} bytes of log"),
            LogOutcome::Failed(err) => warn!("update staged without log: {err}"),
            LogOutcome::NotRequested => {}
        }
        println!(
            "staged {} byte image at {:#x}",
            outcome.header.image_length.get(),
            outcome.header.image_offset.get()
        );
        Ok(())
    }

    /// Human readable description of the staged update, if there is one.
    pub fn staged_summary(&self) -> Result<Option<String>> {
        let name = &self.config.cache_partition;
        let raw = self
            .flash
            .partition_image(name)
            .with_context(|| format!("no partition named {name}"))?;
        let Some(update) = StagedUpdate::parse(&raw, self.flash.erase_block_size())? else {
            return Ok(None);
        };

        let header = &update.header;
        let mut summary = format!(
            "image:       {} bytes at {:#x} ({}..)\n",
            header.image_length.get(),
            header.image_offset.get(),
            hex::encode(&update.image[..update.image.len().min(PREVIEW_LEN)])
        );
        summary += &format!(
            "bitmaps:     {}x{} at {} bpp\n",
            header.bitmap_width.get(),
            header.bitmap_height.get(),
            header.bitmap_bpp.get()
        );
        summary += &format!(
            "busy bitmap: {} bytes at {:#x}\n",
            header.busy_bitmap_length.get(),
            header.busy_bitmap_offset.get()
        );
        summary += &format!(
            "fail bitmap: {} bytes at {:#x}\n",
            header.fail_bitmap_length.get(),
            header.fail_bitmap_offset.get()
        );
        if let Some(log) = update.log {
            summary += &format!("log:         {} bytes\n", log.len());
            summary.push_str(&String::from_utf8_lossy(log));
        }
        Ok(Some(summary))
    }

    pub fn show_update(&self) -> Result<()> {
        match self.staged_summary()? {
            Some(summary) => print!("{summary}"),
            None => println!("no update staged on {}", self.config.cache_partition),
        }
        Ok(())
    }

    fn persist(&self) -> Result<()> {
        self.flash.persist(&self.image)?;
        Ok(())
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn read_text(path: &Path) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))
}
