//! Obfuscation codec
//!
//! A reversible byte transform keyed by a shared secret, applied to upload
//! payloads (decode direction), download bodies (encode direction) and,
//! optionally, to filenames in listings.
//!
//! **This is obfuscation, not encryption.** The default [`XorCipher`] XORs the
//! data against the secret repeated cyclically. It offers no integrity
//! protection and no resistance to known-plaintext attacks: anyone holding a
//! single plaintext/ciphertext pair recovers the key. Transport security and
//! authentication must be provided by the deployment (TLS, a reverse proxy).
//! Replacing it with authenticated encryption changes the wire contract and
//! needs a protocol version bump, not a silent swap.

pub mod stream;

use std::sync::Arc;

use thiserror::Error;

pub use stream::encode_reader;

/// Codec errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Invalid key: the obfuscation secret must not be empty")]
    InvalidKey,

    #[error("Transformed name is not valid hex: {0}")]
    InvalidHex(String),

    #[error("Transformed name does not decode to UTF-8")]
    InvalidUtf8,
}

/// A keyed, symmetric, position-dependent byte transform.
///
/// Implementations must be their own inverse: applying the transform twice at
/// the same offset restores the input.
pub trait ObfuscationCipher: Send + Sync {
    /// Transform `data` in place as if it started at byte `offset` of the stream
    fn apply_at(&self, data: &mut [u8], offset: u64);
}

/// Cyclic XOR against the secret: `out[i] = data[i] ^ key[i % key.len()]`
#[derive(Debug, Clone)]
pub struct XorCipher {
    key: Vec<u8>,
}

impl XorCipher {
    pub fn new(secret: impl Into<Vec<u8>>) -> Result<Self, CodecError> {
        let key = secret.into();
        if key.is_empty() {
            return Err(CodecError::InvalidKey);
        }
        Ok(Self { key })
    }
}

impl ObfuscationCipher for XorCipher {
    fn apply_at(&self, data: &mut [u8], offset: u64) {
        let start = (offset % self.key.len() as u64) as usize;
        for (byte, k) in data.iter_mut().zip(self.key.iter().cycle().skip(start)) {
            *byte ^= k;
        }
    }
}

/// One-shot XOR transform of `data` with `secret`
pub fn transform(data: &[u8], secret: &[u8]) -> Result<Vec<u8>, CodecError> {
    let cipher = XorCipher::new(secret)?;
    let mut out = data.to_vec();
    cipher.apply_at(&mut out, 0);
    Ok(out)
}

/// Transform a filename and hex-encode it for use in a URL path segment
pub fn transform_name(name: &str, secret: &[u8]) -> Result<String, CodecError> {
    Ok(hex::encode(transform(name.as_bytes(), secret)?))
}

/// Inverse of [`transform_name`]
pub fn reverse_name(encoded: &str, secret: &[u8]) -> Result<String, CodecError> {
    let bytes = hex::decode(encoded).map_err(|e| CodecError::InvalidHex(e.to_string()))?;
    String::from_utf8(transform(&bytes, secret)?).map_err(|_| CodecError::InvalidUtf8)
}

/// Shared handle around the configured cipher
#[derive(Clone)]
pub struct ObfuscationCodec {
    cipher: Arc<dyn ObfuscationCipher>,
}

impl std::fmt::Debug for ObfuscationCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObfuscationCodec").finish_non_exhaustive()
    }
}

impl ObfuscationCodec {
    pub fn new(cipher: impl ObfuscationCipher + 'static) -> Self {
        Self {
            cipher: Arc::new(cipher),
        }
    }

    /// Codec backed by [`XorCipher`]
    pub fn xor(secret: impl Into<Vec<u8>>) -> Result<Self, CodecError> {
        Ok(Self::new(XorCipher::new(secret)?))
    }

    /// Transform a buffer in place at a stream offset
    pub fn apply_at(&self, data: &mut [u8], offset: u64) {
        self.cipher.apply_at(data, offset);
    }

    /// Obfuscate a whole payload
    pub fn encode(&self, data: &[u8]) -> Vec<u8> {
        let mut out = data.to_vec();
        self.cipher.apply_at(&mut out, 0);
        out
    }

    /// Reverse a whole payload, reusing its buffer
    pub fn decode(&self, mut data: Vec<u8>) -> Vec<u8> {
        self.cipher.apply_at(&mut data, 0);
        data
    }

    pub fn transform_name(&self, name: &str) -> String {
        hex::encode(self.encode(name.as_bytes()))
    }

    pub fn reverse_name(&self, encoded: &str) -> Result<String, CodecError> {
        let bytes = hex::decode(encoded).map_err(|e| CodecError::InvalidHex(e.to_string()))?;
        String::from_utf8(self.decode(bytes)).map_err(|_| CodecError::InvalidUtf8)
    }
}
