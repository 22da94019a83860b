// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Device registry
//!
//! Owns every device for the lifetime of the store. Devices are created
//! together at startup from one [`RamdiskConfig`], share a single cipher
//! context and a single dispatch discipline, and are torn down together.
//!
//! A device whose backing store cannot be allocated is left out; the rest
//! of the registry keeps working and lookups of the missing index fail with
//! [`RamdiskError::NoSuchDevice`].

use std::sync::Arc;

use log::{debug, error, info};

use crate::config::RamdiskConfig;
use crate::crypto::{BlockTransform, CipherContext};
use crate::device::{Device, DeviceInfo, TransferEngine};
use crate::dispatch::{DispatchStats, Dispatcher, IoUnit, Request};
use crate::error::{RamdiskError, Result};

/// Fixed set of devices built from one configuration.
///
/// # Example
///
/// ```
/// use tesseract_ramdisk::config::RamdiskConfig;
/// use tesseract_ramdisk::dispatch::Request;
/// use tesseract_ramdisk::registry::DeviceRegistry;
///
/// let config = RamdiskConfig::default().with_device_count(1).with_geometry(512, 8);
/// let registry = DeviceRegistry::new(config).unwrap();
///
/// let mut data = vec![0x5Au8; 512];
/// registry.submit(0, [Request::write(1).with_segment(0, 1, &mut data)]).unwrap();
///
/// let mut out = vec![0u8; 512];
/// registry.submit(0, [Request::read(2).with_segment(0, 1, &mut out)]).unwrap();
/// assert_eq!(out, data);
/// ```
pub struct DeviceRegistry {
    config: RamdiskConfig,
    dispatcher: Dispatcher,
    devices: Vec<Option<Device>>,
}

impl DeviceRegistry {
    /// Builds all devices described by `config`.
    ///
    /// With encryption enabled the configured key is installed as an AES
    /// context shared by every device.
    ///
    /// # Errors
    ///
    /// - [`RamdiskError::InvalidConfig`] if the configuration is unusable
    /// - [`RamdiskError::MissingKey`] if encryption is on and the key is empty
    pub fn new(config: RamdiskConfig) -> Result<Self> {
        config.validate()?;

        let transform: Option<Arc<dyn BlockTransform>> = if config.encrypt {
            let cipher = CipherContext::new(config.key.as_bytes())?;
            info!("Installed {:?} key", cipher.kind());
            Some(Arc::new(cipher))
        } else {
            None
        };

        Self::build(config, transform)
    }

    /// Builds all devices with a caller-supplied transform in place of the
    /// configured key.
    ///
    /// The `key` setting is ignored and the stored config reports
    /// encryption as enabled.
    pub fn with_transform(config: RamdiskConfig, transform: Arc<dyn BlockTransform>) -> Result<Self> {
        // No key is needed when the transform is supplied.
        config.clone().with_encryption(false).validate()?;
        Self::build(config.with_encryption(true), Some(transform))
    }

    fn build(config: RamdiskConfig, transform: Option<Arc<dyn BlockTransform>>) -> Result<Self> {
        let capacity = config.capacity_bytes()?;
        let dispatcher = Dispatcher::for_mode(config.request_mode);

        let mut devices = Vec::with_capacity(config.device_count);
        for index in 0..config.device_count {
            let engine = match &transform {
                Some(t) => TransferEngine::encrypted(config.sector_size, Arc::clone(t)),
                None => TransferEngine::plain(config.sector_size),
            };

            match Device::new(index, capacity, engine, config.invalidate_delay()) {
                Ok(device) => devices.push(Some(device)),
                Err(e) => {
                    error!("Skipping device {}: {}", index, e);
                    devices.push(None);
                }
            }
        }

        let online = devices.iter().flatten().count();
        info!(
            "Registered {}/{} devices of {} bytes, {} mode, encryption {}",
            online,
            config.device_count,
            capacity,
            dispatcher.mode(),
            if transform.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            config,
            dispatcher,
            devices,
        })
    }

    /// Configured device slots, including any that failed to allocate.
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Number of usable devices.
    pub fn online(&self) -> usize {
        self.devices.iter().flatten().count()
    }

    pub fn config(&self) -> &RamdiskConfig {
        &self.config
    }

    pub fn dispatcher(&self) -> Dispatcher {
        self.dispatcher
    }

    /// Looks up the device at `index`.
    ///
    /// # Errors
    ///
    /// Returns [`RamdiskError::NoSuchDevice`] for an out-of-range index or a
    /// device that failed to allocate.
    pub fn device(&self, index: usize) -> Result<&Device> {
        self.devices
            .get(index)
            .and_then(Option::as_ref)
            .ok_or(RamdiskError::NoSuchDevice(index))
    }

    /// Iterates over usable devices in index order.
    pub fn devices(&self) -> impl Iterator<Item = &Device> {
        self.devices.iter().flatten()
    }

    /// Services a batch of requests on one device.
    pub fn submit<'a, I>(&self, index: usize, requests: I) -> Result<DispatchStats>
    where
        I: IntoIterator<Item = Request<'a>>,
    {
        let device = self.device(index)?;
        Ok(self.dispatcher.submit(device, requests))
    }

    /// Hands one raw I/O unit to a device.
    pub fn make_request(&self, index: usize, unit: IoUnit<'_>) -> Result<DispatchStats> {
        let device = self.device(index)?;
        Ok(self.dispatcher.make_request(device, unit))
    }

    /// Snapshot of every usable device.
    pub fn device_info(&self) -> Vec<DeviceInfo> {
        self.devices().map(Device::info).collect()
    }

    /// Tears down all devices, last created first.
    pub fn shutdown(self) {
        drop(self);
    }
}

impl Drop for DeviceRegistry {
    fn drop(&mut self) {
        while let Some(slot) = self.devices.pop() {
            if let Some(device) = slot {
                debug!("Removing {}", device.name());
                drop(device);
            }
        }
        info!("Device registry shut down");
    }
}

impl std::fmt::Debug for DeviceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceRegistry")
            .field("dispatcher", &self.dispatcher)
            .field("devices", &self.devices)
            .finish()
    }
}
