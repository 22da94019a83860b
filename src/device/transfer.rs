// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! Sector transfer engine
//!
//! Maps a `(start_sector, sector_count, buffer, direction)` request onto the
//! backing store of a device. The region is bounds-checked before anything
//! is touched, so a transfer either processes its whole region or fails
//! without modifying a single byte.
//!
//! ## Encrypted layout
//!
//! With encryption on, the region is processed in cipher-block strides:
//!
//! ```text
//! buffer:  | s0 | s1 | s2 | ... | sN | tail |
//!             |    |    |         |
//!             v    v    v         v
//! store:   | E0 | E1 | E2 | ... | EN | 0000 |   (offset + i * block_size)
//! ```
//!
//! Stride `i` of the buffer always lands at stride `i` of the region. A tail
//! shorter than one cipher block is never partially transformed; it is
//! zero-filled (in the store on write, in the buffer on read).

use std::ops::Range;
use std::sync::Arc;

use log::debug;

use crate::crypto::BlockTransform;
use crate::error::{RamdiskError, Result};

/// Direction of a transfer, from the host's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Backing store -> buffer
    Read,
    /// Buffer -> backing store
    Write,
}

/// How bytes are moved between buffers and the backing store.
#[derive(Clone)]
pub enum TransformMode {
    /// Raw byte copy.
    Plain,
    /// Per-block cipher transform.
    Encrypted(Arc<dyn BlockTransform>),
}

impl std::fmt::Debug for TransformMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Plain => write!(f, "Plain"),
            Self::Encrypted(cipher) => write!(f, "Encrypted(block_size={})", cipher.block_size()),
        }
    }
}

/// Converts sector-addressed transfers into copy or cipher operations.
#[derive(Debug, Clone)]
pub struct TransferEngine {
    sector_size: usize,
    mode: TransformMode,
}

impl TransferEngine {
    /// Creates an engine addressing the store in `sector_size` units.
    pub fn new(sector_size: usize, mode: TransformMode) -> Self {
        Self { sector_size, mode }
    }

    /// Engine that copies bytes without encryption.
    pub fn plain(sector_size: usize) -> Self {
        Self::new(sector_size, TransformMode::Plain)
    }

    /// Engine that encrypts every block with `cipher`.
    pub fn encrypted(sector_size: usize, cipher: Arc<dyn BlockTransform>) -> Self {
        Self::new(sector_size, TransformMode::Encrypted(cipher))
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self.mode, TransformMode::Encrypted(_))
    }

    /// Resolves the byte region covered by a sector range.
    ///
    /// # Errors
    ///
    /// Returns [`RamdiskError::OutOfRange`] if `offset + length` exceeds
    /// `capacity` (including arithmetic overflow).
    pub fn region(&self, start_sector: u64, sector_count: u64, capacity: usize) -> Result<Range<usize>> {
        let sector_size = self.sector_size as u64;
        let offset = start_sector.checked_mul(sector_size);
        let length = sector_count.checked_mul(sector_size);

        let end = match (offset, length) {
            (Some(offset), Some(length)) => offset.checked_add(length),
            _ => None,
        };

        match (offset, length, end) {
            (Some(offset), Some(_), Some(end)) if end <= capacity as u64 => {
                Ok(offset as usize..end as usize)
            }
            _ => Err(RamdiskError::OutOfRange {
                offset: offset.unwrap_or(u64::MAX),
                length: length.unwrap_or(u64::MAX),
                capacity: capacity as u64,
            }),
        }
    }

    /// Moves `sector_count` sectors between `buffer` and `store`.
    ///
    /// `buffer` must hold at least `sector_count * sector_size` bytes; any
    /// excess is left alone. Nothing is written on error.
    pub fn transfer(
        &self,
        store: &mut [u8],
        start_sector: u64,
        sector_count: u64,
        buffer: &mut [u8],
        direction: Direction,
    ) -> Result<()> {
        let range = self.region(start_sector, sector_count, store.len())?;
        let length = range.len();
        if buffer.len() < length {
            return Err(RamdiskError::InvalidArgument(format!(
                "buffer of {} bytes cannot hold {} sectors ({} bytes)",
                buffer.len(),
                sector_count,
                length
            )));
        }

        debug!(
            "{:?} {} sectors at sector {} ({:?})",
            direction, sector_count, start_sector, self.mode
        );

        let region = &mut store[range];
        let buffer = &mut buffer[..length];

        match (&self.mode, direction) {
            (TransformMode::Plain, Direction::Write) => region.copy_from_slice(buffer),
            (TransformMode::Plain, Direction::Read) => buffer.copy_from_slice(region),
            (TransformMode::Encrypted(cipher), Direction::Write) => {
                encrypt_region(cipher.as_ref(), region, buffer)
            }
            (TransformMode::Encrypted(cipher), Direction::Read) => {
                decrypt_region(cipher.as_ref(), buffer, region)
            }
        }

        Ok(())
    }
}

/// Length of the prefix of `len` bytes covered by whole cipher blocks.
fn whole_blocks(len: usize, block_size: usize) -> usize {
    len - len % block_size
}

fn encrypt_region(cipher: &dyn BlockTransform, region: &mut [u8], plaintext: &[u8]) {
    let block_size = cipher.block_size();
    let full = whole_blocks(region.len(), block_size);

    let (blocks, tail) = region.split_at_mut(full);
    for (dst, src) in blocks
        .chunks_exact_mut(block_size)
        .zip(plaintext[..full].chunks_exact(block_size))
    {
        dst.fill(0);
        cipher.encrypt_block(dst, src);
    }
    tail.fill(0);
}

fn decrypt_region(cipher: &dyn BlockTransform, plaintext: &mut [u8], region: &[u8]) {
    let block_size = cipher.block_size();
    let full = whole_blocks(region.len(), block_size);

    let (blocks, tail) = plaintext.split_at_mut(full);
    for (dst, src) in blocks
        .chunks_exact_mut(block_size)
        .zip(region[..full].chunks_exact(block_size))
    {
        cipher.decrypt_block(dst, src);
    }
    tail.fill(0);
}
