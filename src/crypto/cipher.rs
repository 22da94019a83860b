// SPDX-License-Identifier: MIT
// SPDX-FileCopyrightText: 2024 Tesseract Vault Contributors
//! AES cipher context.
//!
//! Keys of 16, 24 or 32 bytes select AES-128/192/256 directly. Any other
//! non-empty key is condensed with SHA-256 into an AES-256 key, which is
//! how the 27-byte default key becomes usable.

use aes::cipher::{generic_array::GenericArray, BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Aes192, Aes256};
use log::{debug, warn};
use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use super::BlockTransform;
use crate::error::{RamdiskError, Result};

/// AES block size in bytes.
pub const AES_BLOCK_SIZE: usize = 16;

/// Which AES variant a context was keyed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Aes128,
    Aes192,
    Aes256,
}

impl CipherKind {
    /// Key length in bytes.
    pub fn key_len(&self) -> usize {
        match self {
            Self::Aes128 => 16,
            Self::Aes192 => 24,
            Self::Aes256 => 32,
        }
    }
}

enum Keyed {
    Aes128(Aes128),
    Aes192(Aes192),
    Aes256(Aes256),
}

/// Process-wide cipher state. Key schedules are zeroized on drop.
pub struct CipherContext {
    keyed: Keyed,
}

impl CipherContext {
    /// Installs `key` and builds the key schedule.
    ///
    /// # Errors
    ///
    /// Returns [`RamdiskError::MissingKey`] if `key` is empty.
    pub fn new(key: &[u8]) -> Result<Self> {
        let keyed = match key.len() {
            0 => return Err(RamdiskError::MissingKey),
            16 => Keyed::Aes128(Aes128::new(GenericArray::from_slice(key))),
            24 => Keyed::Aes192(Aes192::new(GenericArray::from_slice(key))),
            32 => Keyed::Aes256(Aes256::new(GenericArray::from_slice(key))),
            other => {
                warn!(
                    "Key is {} bytes, not an AES key size; deriving an AES-256 key with SHA-256",
                    other
                );
                let digest: Zeroizing<[u8; 32]> = Zeroizing::new(Sha256::digest(key).into());
                Keyed::Aes256(Aes256::new(GenericArray::from_slice(&digest[..])))
            }
        };

        let context = Self { keyed };
        debug!("Installed {:?} cipher", context.kind());
        Ok(context)
    }

    /// The AES variant in use.
    pub fn kind(&self) -> CipherKind {
        match self.keyed {
            Keyed::Aes128(_) => CipherKind::Aes128,
            Keyed::Aes192(_) => CipherKind::Aes192,
            Keyed::Aes256(_) => CipherKind::Aes256,
        }
    }
}

impl std::fmt::Debug for CipherContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherContext")
            .field("kind", &self.kind())
            .finish_non_exhaustive()
    }
}

impl BlockTransform for CipherContext {
    fn block_size(&self) -> usize {
        AES_BLOCK_SIZE
    }

    fn encrypt_block(&self, dst: &mut [u8], src: &[u8]) {
        let input = GenericArray::from_slice(src);
        let output = GenericArray::from_mut_slice(dst);
        match &self.keyed {
            Keyed::Aes128(c) => c.encrypt_block_b2b(input, output),
            Keyed::Aes192(c) => c.encrypt_block_b2b(input, output),
            Keyed::Aes256(c) => c.encrypt_block_b2b(input, output),
        }
    }

    fn decrypt_block(&self, dst: &mut [u8], src: &[u8]) {
        let input = GenericArray::from_slice(src);
        let output = GenericArray::from_mut_slice(dst);
        match &self.keyed {
            Keyed::Aes128(c) => c.decrypt_block_b2b(input, output),
            Keyed::Aes192(c) => c.decrypt_block_b2b(input, output),
            Keyed::Aes256(c) => c.decrypt_block_b2b(input, output),
        }
    }
}
