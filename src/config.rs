// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Configuration management for the encrypted ramdisk.
//!
//! Every setting is read once at startup and is immutable afterwards. The
//! values parameterize registry construction (how many devices, how big)
//! and the transfer engine (sector size, encryption toggle, key).

use std::fmt;
use std::path::Path;
use std::time::Duration;

use log::{info, warn};
use serde::{Deserialize, Deserializer};
use zeroize::Zeroizing;

use crate::error::{RamdiskError, Result};

/// The host always addresses us in units of this size.
pub const KERNEL_SECTOR_SIZE: usize = 512;

/// Default hardware sector size in bytes.
pub const DEFAULT_SECTOR_SIZE: usize = 512;

/// Default device size in sectors.
pub const DEFAULT_SECTORS_PER_DEVICE: u64 = 1024;

/// Default number of devices in the registry.
pub const DEFAULT_DEVICE_COUNT: usize = 4;

/// Devices are named `ramdisk` + a letter, so at most 26 of them.
pub const MAX_DEVICE_COUNT: usize = 26;

/// Idle time after which a closed device simulates a media change.
pub const DEFAULT_INVALIDATE_DELAY: Duration = Duration::from_secs(30);

/// Key used when none is configured.
pub const DEFAULT_KEY: &str = "defaultENCRYPTIONkey733t157";

/// Prefix for device names.
pub const DEVICE_NAME_PREFIX: &str = "ramdisk";

/// Request-servicing discipline, shared by every device in a registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum RequestMode {
    /// One request at a time, one segment per iteration.
    #[default]
    Simple,
    /// Walk every segment of a request, complete it in one call.
    Full,
    /// Bypass the queue and split raw I/O units directly.
    NoQueue,
}

impl RequestMode {
    /// Maps the numeric mode selector (0, 1, 2).
    ///
    /// Unknown values fall back to [`RequestMode::Simple`].
    pub fn from_raw(mode: i64) -> Self {
        match mode {
            0 => Self::Simple,
            1 => Self::Full,
            2 => Self::NoQueue,
            other => {
                warn!("Bad request mode {}, using simple", other);
                Self::Simple
            }
        }
    }
}

impl fmt::Display for RequestMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Simple => write!(f, "simple"),
            Self::Full => write!(f, "full"),
            Self::NoQueue => write!(f, "no-queue"),
        }
    }
}

/// Startup configuration for a [`DeviceRegistry`](crate::registry::DeviceRegistry).
#[derive(Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RamdiskConfig {
    /// Number of devices to create.
    pub device_count: usize,
    /// Sector size in bytes; transfers are addressed in these units.
    pub sector_size: usize,
    /// Device capacity in sectors.
    pub sectors_per_device: u64,
    /// Active request-servicing discipline, by name or by number (0, 1, 2).
    #[serde(deserialize_with = "deserialize_request_mode")]
    pub request_mode: RequestMode,
    /// Whether data is encrypted at rest.
    pub encrypt: bool,
    /// Raw key material. Zeroed on drop.
    #[serde(deserialize_with = "deserialize_key")]
    pub key: Zeroizing<String>,
    /// Idle delay before a simulated media change, in milliseconds.
    pub invalidate_delay_ms: u64,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRequestMode {
    Number(i64),
    Named(RequestMode),
}

fn deserialize_request_mode<'de, D>(deserializer: D) -> std::result::Result<RequestMode, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match RawRequestMode::deserialize(deserializer)? {
        RawRequestMode::Number(n) => RequestMode::from_raw(n),
        RawRequestMode::Named(mode) => mode,
    })
}

fn deserialize_key<'de, D>(deserializer: D) -> std::result::Result<Zeroizing<String>, D::Error>
where
    D: Deserializer<'de>,
{
    String::deserialize(deserializer).map(Zeroizing::new)
}

impl Default for RamdiskConfig {
    fn default() -> Self {
        Self {
            device_count: DEFAULT_DEVICE_COUNT,
            sector_size: DEFAULT_SECTOR_SIZE,
            sectors_per_device: DEFAULT_SECTORS_PER_DEVICE,
            request_mode: RequestMode::Simple,
            encrypt: true,
            key: Zeroizing::new(DEFAULT_KEY.to_string()),
            invalidate_delay_ms: DEFAULT_INVALIDATE_DELAY.as_millis() as u64,
        }
    }
}

impl fmt::Debug for RamdiskConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RamdiskConfig")
            .field("device_count", &self.device_count)
            .field("sector_size", &self.sector_size)
            .field("sectors_per_device", &self.sectors_per_device)
            .field("request_mode", &self.request_mode)
            .field("encrypt", &self.encrypt)
            .field("key", &"<redacted>")
            .field("invalidate_delay_ms", &self.invalidate_delay_ms)
            .finish()
    }
}

impl RamdiskConfig {
    /// Parses a TOML document. Missing keys take their defaults.
    ///
    /// # Examples
    ///
    /// ```
    /// # use tesseract_ramdisk::config::{RamdiskConfig, RequestMode};
    /// let config = RamdiskConfig::from_toml_str("request_mode = \"full\"\nencrypt = false").unwrap();
    /// assert_eq!(config.request_mode, RequestMode::Full);
    /// assert!(!config.encrypt);
    /// ```
    pub fn from_toml_str(input: &str) -> Result<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = Zeroizing::new(std::fs::read_to_string(path)?);
        let config = Self::from_toml_str(&contents)?;
        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Checks that the settings describe a buildable registry.
    pub fn validate(&self) -> Result<()> {
        if self.device_count == 0 || self.device_count > MAX_DEVICE_COUNT {
            return Err(RamdiskError::InvalidConfig(format!(
                "device_count must be between 1 and {}, got {}",
                MAX_DEVICE_COUNT, self.device_count
            )));
        }
        if self.sector_size == 0 {
            return Err(RamdiskError::InvalidConfig(
                "sector_size must be non-zero".to_string(),
            ));
        }
        if self.sectors_per_device == 0 {
            return Err(RamdiskError::InvalidConfig(
                "sectors_per_device must be non-zero".to_string(),
            ));
        }
        if self.encrypt && self.key.is_empty() {
            return Err(RamdiskError::MissingKey);
        }
        self.capacity_bytes()?;
        Ok(())
    }

    /// Device capacity in bytes.
    pub fn capacity_bytes(&self) -> Result<usize> {
        usize::try_from(self.sectors_per_device)
            .ok()
            .and_then(|sectors| sectors.checked_mul(self.sector_size))
            .ok_or_else(|| {
                RamdiskError::InvalidConfig(format!(
                    "{} sectors of {} bytes overflows the address space",
                    self.sectors_per_device, self.sector_size
                ))
            })
    }

    /// Idle delay as a [`Duration`].
    pub fn invalidate_delay(&self) -> Duration {
        Duration::from_millis(self.invalidate_delay_ms)
    }

    pub fn with_device_count(mut self, count: usize) -> Self {
        self.device_count = count;
        self
    }

    pub fn with_geometry(mut self, sector_size: usize, sectors_per_device: u64) -> Self {
        self.sector_size = sector_size;
        self.sectors_per_device = sectors_per_device;
        self
    }

    pub fn with_request_mode(mut self, mode: RequestMode) -> Self {
        self.request_mode = mode;
        self
    }

    pub fn with_encryption(mut self, enabled: bool) -> Self {
        self.encrypt = enabled;
        self
    }

    pub fn with_key(mut self, key: impl Into<String>) -> Self {
        self.key = Zeroizing::new(key.into());
        self
    }

    pub fn with_invalidate_delay(mut self, delay: Duration) -> Self {
        self.invalidate_delay_ms = delay.as_millis() as u64;
        self
    }
}
