// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Block cipher transform applied to data at rest.
//!
//! The transfer engine talks to the cipher only through [`BlockTransform`],
//! one fixed-size block at a time. There is no chaining and no
//! authentication: every block is transformed independently with the
//! process-wide key.

pub mod cipher;

pub use cipher::{CipherContext, CipherKind};

/// Trait for a raw block cipher transform.
///
/// Implementors are constructed once with their key and are shared
/// read-only between devices, hence `Send + Sync`.
pub trait BlockTransform: Send + Sync {
    /// Size in bytes of a single cipher block.
    fn block_size(&self) -> usize;

    /// Encrypt exactly one block from `src` into `dst`.
    ///
    /// Both slices must be `block_size()` bytes long.
    fn encrypt_block(&self, dst: &mut [u8], src: &[u8]);

    /// Decrypt exactly one block from `src` into `dst`.
    ///
    /// Both slices must be `block_size()` bytes long.
    fn decrypt_block(&self, dst: &mut [u8], src: &[u8]);
}
