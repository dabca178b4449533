// Licensed under the Apache-2.0 license

use clap::{Parser, Subcommand};
use log::LevelFilter;
use simple_logger::SimpleLogger;
use std::path::PathBuf;

mod device;

use device::{Device, UpdateArgs};

/// Boot control over an emulated raw flash image.
#[derive(Parser)]
#[command(version, about, long_about = None)]
struct Bootctl {
    /// Flash image file, created erased if missing
    #[arg(long, default_value = "flash.bin")]
    image: PathBuf,

    /// TOML flash layout; the built-in misc and cache layout if not given
    #[arg(long)]
    layout: Option<PathBuf>,

    /// TOML file naming the boot control partitions
    #[arg(long)]
    config: Option<PathBuf>,

    /// Log more; twice for hex dumps
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the boot command
    GetCommand,

    /// Replace the boot command
    SetCommand {
        #[arg(long)]
        command: String,

        #[arg(long, default_value = "")]
        status: String,

        /// Recovery arguments, one line each
        #[arg(long, default_value = "")]
        recovery: String,
    },

    /// Stage an update image on the cache partition
    WriteUpdate {
        /// Image to stage
        #[arg(long)]
        payload: PathBuf,

        #[arg(long, default_value_t = 0)]
        width: u32,

        #[arg(long, default_value_t = 0)]
        height: u32,

        /// Bits per pixel of both bitmaps
        #[arg(long, default_value_t = 0)]
        bpp: u32,

        /// Raw bitmap shown while the update is applied
        #[arg(long)]
        busy: Option<PathBuf>,

        /// Raw bitmap shown if the update fails
        #[arg(long)]
        fail: Option<PathBuf>,

        /// Log whose tail is handed to the next boot
        #[arg(long)]
        log: Option<PathBuf>,
    },

    /// Describe the update staged on the cache partition
    ShowUpdate,
}

fn main() {
    let cli = Bootctl::parse();
    let level = match cli.verbose {
        0 => LevelFilter::Info,
        1 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let _ = SimpleLogger::new().with_level(level).init();

    let result = Device::open(&cli.image, cli.layout.as_deref(), cli.config.as_deref()).and_then(
        |device| match &cli.command {
            Commands::GetCommand => device.get_command(),
            Commands::SetCommand {
                command,
                status,
                recovery,
            } => device.set_command(command, status, recovery),
            Commands::WriteUpdate {
                payload,
                width,
                height,
                bpp,
                busy,
                fail,
                log,
            } => device.write_update(&UpdateArgs {
                payload,
                width: *width,
                height: *height,
                bpp: *bpp,
                busy: busy.as_deref(),
                fail: fail.as_deref(),
                log: log.as_deref(),
            }),
            Commands::ShowUpdate => device.show_update(),
        },
    );
    result.unwrap_or_else(|e| {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    });
}
