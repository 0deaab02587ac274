//! WebSocket payload masking implementation.
//!
//! Masking and unmasking are the same XOR transform, so a [`Masker`] serves
//! both the client writing payloads and the server reading them.

use rand::Rng;

use crate::{Error, Result};

/// Generates a random masking key, as a client must per RFC6455 §5.3.
pub fn generate_masking_key() -> [u8; 4] {
    rand::thread_rng().gen()
}

/// Applies a repeating 4-byte mask to a payload delivered in pieces.
///
/// The masker remembers how many bytes it has seen so that masking a payload
/// in several calls gives the same bytes as masking it in one. Buffers must be
/// passed in stream order with no gaps; nothing detects a violation.
#[derive(Debug, Clone)]
pub struct Masker {
    key: [u8; 4],
    offset: usize,
}

impl Masker {
    /// Creates a masker from a key slice.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidKeyLength`] if `key` is not exactly 4 bytes.
    pub fn new(key: &[u8]) -> Result<Self> {
        let key: [u8; 4] = key
            .try_into()
            .map_err(|_| Error::InvalidKeyLength(key.len()))?;
        Ok(Self::from(key))
    }

    /// Creates a masker with a freshly generated key.
    pub fn random() -> Self {
        Self::from(generate_masking_key())
    }

    /// The masking key.
    pub fn key(&self) -> [u8; 4] {
        self.key
    }

    /// Number of bytes masked so far.
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Masks `data` into a new buffer and advances the offset.
    pub fn apply(&mut self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.apply_in_place(&mut out);
        out
    }

    /// Masks `data` in place and advances the offset.
    pub fn apply_in_place(&mut self, data: &mut [u8]) {
        for (i, byte) in data.iter_mut().enumerate() {
            *byte ^= self.key[self.offset.wrapping_add(i) % 4];
        }
        // usize::MAX + 1 is a multiple of 4, so wrapping keeps the key aligned.
        self.offset = self.offset.wrapping_add(data.len());
    }
}

impl From<[u8; 4]> for Masker {
    fn from(key: [u8; 4]) -> Self {
        Masker { key, offset: 0 }
    }
}
