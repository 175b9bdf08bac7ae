//! Value encryption for changes on the wire.
//!
//! Field values leave the device as opaque strings. The sync engine only
//! needs to turn a [`FieldValue`] into such a string and back; what the
//! string contains is up to the [`ValueCipher`] in use.
//!
//! - [`PlaintextCipher`] writes the JSON form of the value (no secrecy)
//! - `AesGcmCipher` (feature `encryption`) seals the CBOR form of the value
//!   with AES-256-GCM and base64-encodes `nonce || ciphertext || tag`

#[cfg(feature = "encryption")]
mod encrypted;

#[cfg(feature = "encryption")]
pub use encrypted::*;

use crate::error::{CoreError, CoreResult};
use crate::value::FieldValue;

/// Turns field values into opaque wire strings and back.
pub trait ValueCipher: Send + Sync {
    /// Encrypts a value for upload.
    fn encrypt(&self, value: &FieldValue) -> CoreResult<String>;

    /// Decrypts an inbound value.
    fn decrypt(&self, opaque: &str) -> CoreResult<FieldValue>;
}

/// Cipher that stores values as plain JSON text.
#[derive(Debug, Clone, Copy, Default)]
pub struct PlaintextCipher;

impl ValueCipher for PlaintextCipher {
    fn encrypt(&self, value: &FieldValue) -> CoreResult<String> {
        serde_json::to_string(value).map_err(|e| CoreError::codec(e.to_string()))
    }

    fn decrypt(&self, opaque: &str) -> CoreResult<FieldValue> {
        serde_json::from_str(opaque).map_err(|e| CoreError::decryption_failed(e.to_string()))
    }
}
