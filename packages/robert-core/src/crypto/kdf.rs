//! # Key Derivation Functions
//!
//! ## Registration Keys
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                 SHARED SECRET → KA / KEA                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ECDH(device_private, server_public) = shared (32 bytes)                │
//! │                                                                         │
//! │     KA  = HMAC-SHA256(key = shared, msg = "mac")                        │
//! │     KEA = HMAC-SHA256(key = shared, msg = "tuples")                     │
//! │                                                                         │
//! │  The server derives the same pair from its private key and the         │
//! │  device public key it received at registration.                        │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Storage Key
//!
//! The key protecting KA, KEA and the device private key at rest is derived
//! with HKDF-SHA256 from a per-install device secret.

use hkdf::Hkdf;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::encryption::{SymmetricKey, KEY_SIZE};
use super::keys::SharedSecret;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Domain separation labels
///
/// The first two are fixed by the protocol and shared with the server.
pub mod domain {
    /// Label for the authentication key (KA)
    pub const AUTHENTICATION: &[u8] = b"mac";

    /// Label for the tuples encryption key (KEA)
    pub const TUPLES_ENCRYPTION: &[u8] = b"tuples";

    /// HKDF info for the local storage key
    pub const STORAGE_ENCRYPTION: &[u8] = b"robert-storage-encryption-v1";
}

/// Keys derived from the registration shared secret
#[derive(Clone, Debug)]
pub struct RegistrationKeys {
    /// Authentication key for hello, status and unregister MACs
    pub ka: SymmetricKey,
    /// Decryption key for the tuples blob
    pub kea: SymmetricKey,
}

/// Derive a 256-bit key as `HMAC-SHA256(secret, label)`
pub fn derive_symmetric_key(secret: &SharedSecret, label: &[u8]) -> Result<SymmetricKey> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(secret.as_bytes())
        .map_err(|_| Error::KeyDerivationFailed("HMAC key rejected".into()))?;
    mac.update(label);
    let digest = mac.finalize().into_bytes();

    let mut key = [0u8; KEY_SIZE];
    key.copy_from_slice(&digest);
    Ok(SymmetricKey::from_bytes(key))
}

/// Derive KA and KEA from the registration shared secret
pub fn derive_registration_keys(secret: &SharedSecret) -> Result<RegistrationKeys> {
    Ok(RegistrationKeys {
        ka: derive_symmetric_key(secret, domain::AUTHENTICATION)?,
        kea: derive_symmetric_key(secret, domain::TUPLES_ENCRYPTION)?,
    })
}

/// Derive the storage encryption key from the device secret
pub fn derive_storage_key(device_secret: &[u8]) -> Result<SymmetricKey> {
    if device_secret.len() < KEY_SIZE {
        return Err(Error::KeyDerivationFailed(format!(
            "device secret must be at least {} bytes",
            KEY_SIZE
        )));
    }

    let hkdf = Hkdf::<Sha256>::new(None, device_secret);
    let mut key = [0u8; KEY_SIZE];
    hkdf.expand(domain::STORAGE_ENCRYPTION, &mut key)
        .map_err(|_| Error::KeyDerivationFailed("Failed to derive storage key".into()))?;

    Ok(SymmetricKey::from_bytes(key))
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::generate_key_pair;

    #[test]
    fn test_labels_give_independent_keys() {
        let secret = SharedSecret::from_bytes([5u8; 32]);
        let keys = derive_registration_keys(&secret).unwrap();
        assert_ne!(keys.ka.as_bytes(), keys.kea.as_bytes());
    }

    #[test]
    fn test_derivation_is_deterministic() {
        let a = derive_symmetric_key(&SharedSecret::from_bytes([1u8; 32]), b"mac").unwrap();
        let b = derive_symmetric_key(&SharedSecret::from_bytes([1u8; 32]), b"mac").unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn test_device_and_server_agree() {
        let (device, device_pub) = generate_key_pair().unwrap();
        let (server, server_pub) = generate_key_pair().unwrap();

        let device_keys =
            derive_registration_keys(&device.diffie_hellman(server_pub.as_bytes()).unwrap())
                .unwrap();
        let server_keys =
            derive_registration_keys(&server.diffie_hellman(device_pub.as_bytes()).unwrap())
                .unwrap();

        assert_eq!(device_keys.ka.as_bytes(), server_keys.ka.as_bytes());
        assert_eq!(device_keys.kea.as_bytes(), server_keys.kea.as_bytes());
    }

    #[test]
    fn test_storage_key() {
        let a = derive_storage_key(&[9u8; 32]).unwrap();
        let b = derive_storage_key(&[9u8; 32]).unwrap();
        let c = derive_storage_key(&[8u8; 32]).unwrap();
        assert_eq!(a.as_bytes(), b.as_bytes());
        assert_ne!(a.as_bytes(), c.as_bytes());
        assert!(derive_storage_key(&[0u8; 16]).is_err());
    }
}
