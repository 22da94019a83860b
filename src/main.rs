// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Tesseract Ramdisk - Command-line harness for the encrypted block store
//!
//! Builds a device registry from a TOML file and/or flags, then exercises it:
//! a write/read self test, a geometry listing, or an idle media-change run.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use env_logger::Env;
use log::debug;
use tesseract_ramdisk::crypto::cipher::AES_BLOCK_SIZE;
use tesseract_ramdisk::dispatch::CompletionHandler;
use tesseract_ramdisk::{
    Completion, Device, DeviceRegistry, HdGeometry, RamdiskConfig, RamdiskError, Request,
    RequestMode, HDIO_GETGEO,
};

/// Command-line interface definition
#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about,
    long_about = "An in-memory, sector-addressable block store with AES encryption at rest."
)]
struct Cli {
    /// TOML configuration file; flags override its values
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Number of devices
    #[arg(long, global = true)]
    devices: Option<usize>,

    /// Sector size in bytes
    #[arg(long, global = true)]
    sector_size: Option<usize>,

    /// Device capacity in sectors
    #[arg(long, global = true)]
    sectors: Option<u64>,

    /// Request-servicing discipline
    #[arg(long, value_enum, global = true)]
    request_mode: Option<RequestMode>,

    /// Store data in the clear
    #[arg(long, global = true)]
    no_encrypt: bool,

    /// Encryption key (16, 24 or 32 bytes are used as-is)
    #[arg(long, global = true)]
    key: Option<String>,

    /// Idle delay before a simulated media change
    #[arg(long, global = true)]
    invalidate_delay_ms: Option<u64>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

/// Available subcommands
#[derive(Subcommand, Debug)]
enum Commands {
    /// Write and read back a test pattern on every device
    Selftest,
    /// Show configuration and device geometry
    Info,
    /// Open and close a device, then wait for the simulated media change
    Idle {
        /// Device index
        #[arg(short, long, default_value = "0")]
        device: usize,
    },
}

impl Cli {
    fn build_config(&self) -> Result<RamdiskConfig, RamdiskError> {
        let mut config = match &self.config {
            Some(path) => RamdiskConfig::load(path)?,
            None => RamdiskConfig::default(),
        };

        if let Some(count) = self.devices {
            config = config.with_device_count(count);
        }
        if self.sector_size.is_some() || self.sectors.is_some() {
            let sector_size = self.sector_size.unwrap_or(config.sector_size);
            let sectors = self.sectors.unwrap_or(config.sectors_per_device);
            config = config.with_geometry(sector_size, sectors);
        }
        if let Some(mode) = self.request_mode {
            config = config.with_request_mode(mode);
        }
        if self.no_encrypt {
            config = config.with_encryption(false);
        }
        if let Some(key) = &self.key {
            config = config.with_key(key.as_str());
        }
        if let Some(ms) = self.invalidate_delay_ms {
            config = config.with_invalidate_delay(Duration::from_millis(ms));
        }

        config.validate()?;
        Ok(config)
    }
}

/// Main application entry point
fn main() -> Result<(), RamdiskError> {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(Env::default().default_filter_or(level)).init();

    let config = cli.build_config()?;
    debug!("{:?}", config);
    let registry = DeviceRegistry::new(config)?;

    let ok = match cli.command {
        Commands::Selftest => selftest(&registry)?,
        Commands::Info => {
            print_info(&registry)?;
            true
        }
        Commands::Idle { device } => idle(&registry, device)?,
    };

    registry.shutdown();
    if !ok {
        std::process::exit(1);
    }
    Ok(())
}

/// Writes a sector of `0xAB` to every device and reads it back.
fn selftest(registry: &DeviceRegistry) -> Result<bool, RamdiskError> {
    let mut all_ok = true;
    println!(
        "Self test: {} mode, {} device(s)",
        registry.dispatcher().mode(),
        registry.online()
    );

    for device in registry.devices() {
        device.open()?;
        let passed = selftest_device(registry, device);
        device.release()?;

        match passed {
            Ok(()) => println!("✓ {} passed.", device.name()),
            Err(reason) => {
                println!("✗ {} failed: {}", device.name(), reason);
                all_ok = false;
            }
        }
    }

    Ok(all_ok)
}

fn selftest_device(registry: &DeviceRegistry, device: &Device) -> Result<(), String> {
    let sector_size = device.sector_size();
    let pattern = vec![0xABu8; sector_size];
    let failed = Arc::new(AtomicBool::new(false));
    let handler: CompletionHandler<'static> = {
        let failed = Arc::clone(&failed);
        Arc::new(move |c: Completion| {
            if let Err(e) = c.result {
                println!("  request {}: {}", c.tag, e);
                failed.store(true, Ordering::SeqCst);
            }
        })
    };

    let mut block = pattern.clone();
    let write = Request::write(1)
        .with_segment(0, 1, &mut block)
        .with_handler(Arc::clone(&handler));
    registry
        .submit(device.index(), [write])
        .map_err(|e| e.to_string())?;

    let mut readback = vec![0u8; sector_size];
    let read = Request::read(2)
        .with_segment(0, 1, &mut readback)
        .with_handler(handler);
    registry
        .submit(device.index(), [read])
        .map_err(|e| e.to_string())?;

    if failed.load(Ordering::SeqCst) {
        return Err("transfer reported an error".to_string());
    }
    if readback != pattern {
        return Err("read-back does not match the written pattern".to_string());
    }

    if device.is_encrypted() {
        let raw = device.snapshot();
        let leaked = raw[..sector_size]
            .chunks_exact(AES_BLOCK_SIZE)
            .zip(pattern.chunks_exact(AES_BLOCK_SIZE))
            .filter(|(stored, plain)| stored == plain)
            .count();
        if leaked > 0 {
            return Err(format!("{} plaintext stride(s) in the backing store", leaked));
        }
    }

    Ok(())
}

fn print_info(registry: &DeviceRegistry) -> Result<(), RamdiskError> {
    let config = registry.config();
    println!("Configuration:");
    println!("  Devices: {} ({} online)", config.device_count, registry.online());
    println!("  Sector Size: {} bytes", config.sector_size);
    println!(
        "  Capacity: {} sectors ({} bytes)",
        config.sectors_per_device,
        config.capacity_bytes()?
    );
    println!("  Request Mode: {}", config.request_mode);
    println!("  Encryption: {}", if config.encrypt { "Yes" } else { "No" });
    println!("  Invalidate Delay: {} ms", config.invalidate_delay_ms);

    for info in registry.device_info() {
        let mut geo = HdGeometry::default();
        registry.device(info.index)?.ioctl(HDIO_GETGEO, Some(&mut geo))?;

        println!("\n{}:", info.name);
        println!("  Capacity: {} bytes", info.capacity_bytes);
        println!(
            "  Geometry: {} cylinders, {} heads, {} sectors, start {}",
            geo.cylinders, geo.heads, geo.sectors, geo.start
        );
        println!("  Users: {}", info.users);
        println!("  Media Changed: {}", if info.media_changed { "Yes" } else { "No" });
    }

    Ok(())
}

/// Leaves a device idle past the invalidate delay and checks that the next
/// open sees a cleared store.
fn idle(registry: &DeviceRegistry, index: usize) -> Result<bool, RamdiskError> {
    let device = registry.device(index)?;
    let delay = registry.config().invalidate_delay();

    device.open()?;
    let mut block = vec![0x5Au8; device.sector_size()];
    registry.submit(index, [Request::write(1).with_segment(0, 1, &mut block)])?;
    device.release()?;
    println!("{} closed, waiting {} ms...", device.name(), delay.as_millis());

    std::thread::sleep(delay + Duration::from_millis(100));
    if !device.media_changed() {
        println!("✗ {} did not report a media change.", device.name());
        return Ok(false);
    }
    println!("✓ {} reported a media change.", device.name());

    // Revalidation zeroes the raw store, not the decrypted view.
    device.open()?;
    let cleared = device.snapshot().iter().all(|&b| b == 0);
    device.release()?;

    if !cleared {
        println!("✗ {} kept data across revalidation.", device.name());
        return Ok(false);
    }
    println!("✓ {} was revalidated and cleared.", device.name());
    Ok(true)
}
