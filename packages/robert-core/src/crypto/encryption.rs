//! # Encryption Module
//!
//! AES-256-GCM for the server's tuples blob and for key material at rest.
//!
//! ## Blob Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         ENCRYPTED BLOB                                  │
//! ├──────────────┬──────────────────────────────────────┬───────────────────┤
//! │  IV (12 B)   │  ciphertext (len(plaintext) bytes)   │  tag (16 B)       │
//! └──────────────┴──────────────────────────────────────┴───────────────────┘
//! ```
//!
//! The server uses the same layout for the tuples blob it encrypts under KEA,
//! so one decryption routine serves both directions.

use aes_gcm::{
    aead::{Aead, KeyInit, Payload},
    Aes256Gcm, Nonce as AesNonce,
};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Error, Result};

/// Size of the AES-GCM nonce in bytes (96 bits)
pub const NONCE_SIZE: usize = 12;

/// Size of the AES-GCM authentication tag in bytes (128 bits)
pub const TAG_SIZE: usize = 16;

/// Size of the encryption key in bytes (256 bits)
pub const KEY_SIZE: usize = 32;

/// A nonce for AES-GCM encryption
///
/// Always random. Never reuse a nonce with the same key.
#[derive(Clone, Copy, Debug)]
pub struct Nonce(pub [u8; NONCE_SIZE]);

impl Nonce {
    /// Generate a cryptographically random nonce
    pub fn random() -> Result<Self> {
        let mut bytes = [0u8; NONCE_SIZE];
        rand::rngs::OsRng
            .try_fill_bytes(&mut bytes)
            .map_err(|e| Error::EncryptionFailed(format!("RNG failure: {}", e)))?;
        Ok(Self(bytes))
    }

    /// Create from existing bytes
    pub fn from_bytes(bytes: [u8; NONCE_SIZE]) -> Self {
        Self(bytes)
    }
}

/// A 256-bit symmetric key (KA, KEA or the storage key)
///
/// Zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SymmetricKey([u8; KEY_SIZE]);

impl SymmetricKey {
    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Create from a slice, which must be exactly [`KEY_SIZE`] bytes
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let arr: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            Error::InvalidKey(format!(
                "expected {} key bytes, got {}",
                KEY_SIZE,
                bytes.len()
            ))
        })?;
        Ok(Self(arr))
    }

    /// Get the raw key bytes
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }

    fn cipher(&self) -> Result<Aes256Gcm> {
        Aes256Gcm::new_from_slice(&self.0)
            .map_err(|e| Error::InvalidKey(format!("AES-256 key rejected: {}", e)))
    }
}

impl std::fmt::Debug for SymmetricKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SymmetricKey(..)")
    }
}

/// Encrypt `plaintext`, returning `iv || ciphertext || tag`
pub fn encrypt(plaintext: &[u8], key: &SymmetricKey) -> Result<Vec<u8>> {
    encrypt_with_aad(plaintext, key, &[])
}

/// Decrypt an `iv || ciphertext || tag` blob
///
/// ## Errors
///
/// Returns `DecryptionFailed` if the blob is shorter than IV plus tag, the key
/// is wrong, or any byte was modified.
pub fn decrypt(blob: &[u8], key: &SymmetricKey) -> Result<Vec<u8>> {
    decrypt_with_aad(blob, key, &[])
}

/// Encrypt with additional authenticated data
///
/// Used for key material at rest, where the AAD names the stored field so
/// values cannot be swapped between columns.
pub fn encrypt_with_aad(plaintext: &[u8], key: &SymmetricKey, aad: &[u8]) -> Result<Vec<u8>> {
    let nonce = Nonce::random()?;
    let cipher = key.cipher()?;

    let payload = Payload {
        msg: plaintext,
        aad,
    };

    let ciphertext = cipher
        .encrypt(AesNonce::from_slice(&nonce.0), payload)
        .map_err(|e| Error::EncryptionFailed(format!("Encryption failed: {}", e)))?;

    let mut blob = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    blob.extend_from_slice(&nonce.0);
    blob.extend_from_slice(&ciphertext);
    Ok(blob)
}

/// Decrypt with additional authenticated data (must match encryption)
pub fn decrypt_with_aad(blob: &[u8], key: &SymmetricKey, aad: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(Error::DecryptionFailed(format!(
            "blob too short: {} bytes, need at least {}",
            blob.len(),
            NONCE_SIZE + TAG_SIZE
        )));
    }

    let (iv, ciphertext) = blob.split_at(NONCE_SIZE);
    let cipher = key.cipher()?;

    let payload = Payload {
        msg: ciphertext,
        aad,
    };

    cipher
        .decrypt(AesNonce::from_slice(iv), payload)
        .map_err(|_| Error::DecryptionFailed("authentication tag mismatch".into()))
}

// ============================================================================
// TESTS
// ============================================================================
