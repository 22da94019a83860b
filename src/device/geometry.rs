// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Disk geometry reporting.
//!
//! A memory-backed device has no physical geometry, so we make up something
//! plausible: 4 heads, 16 sectors per track, data starting at sector 4, and
//! as many cylinders as that layout needs.

use crate::config::KERNEL_SECTOR_SIZE;
use crate::error::{RamdiskError, Result};

/// Control request: get disk geometry.
pub const HDIO_GETGEO: u32 = 0x0301;

const GEO_HEADS: u8 = 4;
const GEO_SECTORS: u8 = 16;
const GEO_START: u64 = 4;

/// Cylinder/head/sector triple reported to the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HdGeometry {
    pub heads: u8,
    pub sectors: u8,
    pub cylinders: u16,
    pub start: u64,
}

impl HdGeometry {
    /// Derives a geometry from a capacity in bytes. Pure computation.
    pub fn for_capacity(capacity_bytes: usize) -> Self {
        let size = (capacity_bytes / KERNEL_SECTOR_SIZE) as u64;
        let cylinders = (size & !0x3f) >> 6;
        Self {
            heads: GEO_HEADS,
            sectors: GEO_SECTORS,
            cylinders: u16::try_from(cylinders).unwrap_or(u16::MAX),
            start: GEO_START,
        }
    }
}

/// Control requests understood by a device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoctlCommand {
    GetGeometry,
}

impl IoctlCommand {
    /// Decodes a raw command number.
    ///
    /// # Errors
    ///
    /// Returns [`RamdiskError::UnknownIoctl`] for anything unrecognized.
    pub fn from_raw(cmd: u32) -> Result<Self> {
        match cmd {
            HDIO_GETGEO => Ok(Self::GetGeometry),
            other => Err(RamdiskError::UnknownIoctl(other)),
        }
    }
}
