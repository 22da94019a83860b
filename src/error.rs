// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Error types for the encrypted ramdisk.
//!
//! Every failure a device or dispatcher can hit is one of these variants.
//! Per-request failures (out-of-range transfers, unsupported requests) are
//! handed back through the request's completion rather than aborting the
//! device; only startup failures (missing key, allocation) are fatal, and
//! then only to the affected device.

use thiserror::Error;

use crate::dispatch::RequestKind;

/// Main error type for all ramdisk operations.
#[derive(Error, Debug)]
pub enum RamdiskError {
    /// A transfer reaches past the end of the device.
    #[error("Beyond-end transfer: offset {offset} + length {length} exceeds capacity {capacity}")]
    OutOfRange {
        offset: u64,
        length: u64,
        capacity: u64,
    },

    /// A request that is not plain filesystem I/O reached the dispatcher.
    #[error("Unsupported request type: {0:?}")]
    UnsupportedRequestType(RequestKind),

    /// The backing store for a device could not be allocated.
    #[error("Allocation of {bytes} bytes failed for device {device}")]
    AllocationFailure { device: String, bytes: usize },

    /// The open/close/timer protocol was broken by a caller.
    #[error("Lifecycle violation: {0}")]
    LifecycleViolation(String),

    /// Unrecognized control request.
    #[error("Unsupported ioctl command {0:#06x}")]
    UnknownIoctl(u32),

    /// Caller supplied an unusable argument (e.g. a missing output buffer).
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Encryption was requested but no key was installed.
    #[error("Encryption key was never installed")]
    MissingKey,

    /// The registry has no device at this index.
    #[error("No such device: {0}")]
    NoSuchDevice(usize),

    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// I/O error while reading configuration or spawning the timer thread.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be parsed.
    #[error("Configuration parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

/// Type alias for Results using RamdiskError.
pub type Result<T> = std::result::Result<T, RamdiskError>;
