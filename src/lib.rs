// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Tesseract Ramdisk - An encrypted in-memory block store
//!
//! This library provides a fixed set of sector-addressable devices backed
//! by memory, with data encrypted at rest under a shared AES key.
//!
//! # Features
//!
//! - **Encryption at rest**: AES in per-block (ECB-style) mode, 16/24/32-byte keys
//! - **Three dispatch disciplines**: simple, full and direct-split servicing
//! - **Media change simulation**: idle devices are invalidated after a delay
//! - **Geometry reporting**: `HDIO_GETGEO`-compatible fake geometry
//! - **Memory safety**: key material is zeroized on drop
//!
//! # Example
//!
//! ```
//! use tesseract_ramdisk::{DeviceRegistry, RamdiskConfig, Request};
//!
//! let config = RamdiskConfig::default().with_device_count(2);
//! let registry = DeviceRegistry::new(config).unwrap();
//!
//! let device = registry.device(0).unwrap();
//! device.open().unwrap();
//!
//! let mut block = vec![0xABu8; 512];
//! registry.submit(0, [Request::write(1).with_segment(0, 1, &mut block)]).unwrap();
//!
//! device.release().unwrap();
//! ```

pub mod config;
pub mod crypto;
pub mod device;
pub mod dispatch;
pub mod error;
pub mod registry;

// Re-export commonly used types
pub use config::{RamdiskConfig, RequestMode};
pub use crypto::{BlockTransform, CipherContext, CipherKind};
pub use device::{Device, DeviceInfo, Direction, HdGeometry, TransferEngine, HDIO_GETGEO};
pub use dispatch::{Completion, DispatchStats, Dispatcher, IoUnit, Request, RequestKind};
pub use error::{RamdiskError, Result};
pub use registry::DeviceRegistry;
