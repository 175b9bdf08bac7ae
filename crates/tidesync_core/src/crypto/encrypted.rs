//! AES-256-GCM value cipher.

use super::ValueCipher;
use crate::error::{CoreError, CoreResult};
use crate::value::FieldValue;
use aes_gcm::{
    aead::{generic_array::GenericArray, Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the AES-256 key in bytes.
pub const KEY_SIZE: usize = 32;
/// Size of the GCM nonce in bytes.
pub const NONCE_SIZE: usize = 12;
/// Size of the GCM authentication tag in bytes.
pub const TAG_SIZE: usize = 16;

const HKDF_INFO: &[u8] = b"tidesync-value-key-v1";

/// AES-256 key shared by every device of one application.
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct EncryptionKey {
    bytes: [u8; KEY_SIZE],
}

impl EncryptionKey {
    /// Generates a random key.
    #[must_use]
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self { bytes }
    }

    /// Creates a key from exactly 32 raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> CoreResult<Self> {
        if bytes.len() != KEY_SIZE {
            return Err(CoreError::invalid_key_size(bytes.len(), KEY_SIZE));
        }
        let mut key = [0u8; KEY_SIZE];
        key.copy_from_slice(bytes);
        Ok(Self { bytes: key })
    }

    /// Derives a key from a shared secret with HKDF-SHA256.
    ///
    /// HKDF does not stretch low-entropy input; the secret should already be
    /// a high-entropy application key.
    pub fn derive_from_password(password: &[u8], salt: &[u8]) -> CoreResult<Self> {
        use hkdf::Hkdf;
        use sha2::Sha256;

        let hk = Hkdf::<Sha256>::new(Some(salt), password);
        let mut bytes = [0u8; KEY_SIZE];
        hk.expand(HKDF_INFO, &mut bytes)
            .map_err(|_| CoreError::key_derivation_failed("HKDF expand failed"))?;
        Ok(Self { bytes })
    }

    fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl std::fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncryptionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// Seals values with AES-256-GCM.
///
/// Wire form: `base64(nonce (12) || ciphertext || tag (16))`, where the
/// plaintext is the CBOR encoding of the value.
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl AesGcmCipher {
    /// Creates a cipher with the given key.
    #[must_use]
    pub fn new(key: EncryptionKey) -> Self {
        let cipher = Aes256Gcm::new(GenericArray::from_slice(key.as_bytes()));
        Self { cipher }
    }
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").finish_non_exhaustive()
    }
}

impl ValueCipher for AesGcmCipher {
    fn encrypt(&self, value: &FieldValue) -> CoreResult<String> {
        let mut plaintext = Vec::new();
        ciborium::into_writer(value, &mut plaintext)
            .map_err(|e| CoreError::codec(e.to_string()))?;

        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_slice())
            .map_err(|_| CoreError::encryption_failed("encryption error"))?;

        let mut sealed = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
        sealed.extend_from_slice(&nonce_bytes);
        sealed.extend(ciphertext);
        Ok(BASE64.encode(sealed))
    }

    fn decrypt(&self, opaque: &str) -> CoreResult<FieldValue> {
        let sealed = BASE64
            .decode(opaque)
            .map_err(|e| CoreError::decryption_failed(format!("bad base64: {e}")))?;
        if sealed.len() < NONCE_SIZE + TAG_SIZE {
            return Err(CoreError::decryption_failed("ciphertext too short"));
        }

        let nonce = Nonce::from_slice(&sealed[..NONCE_SIZE]);
        let plaintext = self
            .cipher
            .decrypt(nonce, &sealed[NONCE_SIZE..])
            .map_err(|_| CoreError::decryption_failed("decryption error"))?;

        ciborium::from_reader(plaintext.as_slice())
            .map_err(|e| CoreError::decryption_failed(format!("bad value encoding: {e}")))
    }
}
