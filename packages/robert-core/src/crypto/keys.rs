//! # Key Management
//!
//! P-256 key pairs and ECDH key agreement.
//!
//! The device generates one key pair per registration. Its public half is sent
//! to the server; the private half never leaves the device. The shared secret
//! with the server's long-term public key seeds KA and KEA.

use base64::Engine as _;
use p256::elliptic_curve::sec1::ToEncodedPoint;
use p256::{ecdh, PublicKey as P256PublicKey, SecretKey};
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::error::{Error, Result};

/// Size of an uncompressed SEC1 P-256 public key
pub const PUBLIC_KEY_SIZE: usize = 65;

/// Size of a P-256 scalar / shared secret
const SCALAR_SIZE: usize = 32;

/// A P-256 key pair
///
/// The secret scalar is zeroized on drop by `p256` itself.
pub struct KeyPair {
    secret: SecretKey,
}

impl KeyPair {
    /// Generate a new random key pair
    pub fn generate() -> Result<Self> {
        let mut seed = Zeroizing::new([0u8; SCALAR_SIZE]);
        rand::rngs::OsRng
            .try_fill_bytes(&mut seed[..])
            .map_err(|e| Error::KeyGenerationFailed(format!("RNG failure: {}", e)))?;

        let secret = SecretKey::from_slice(&seed[..]).map_err(|_| {
            Error::KeyGenerationFailed("random scalar outside the curve order".into())
        })?;

        Ok(Self { secret })
    }

    /// Restore from the 32-byte secret scalar
    pub fn from_secret_bytes(bytes: &[u8]) -> Result<Self> {
        let secret = SecretKey::from_slice(bytes)
            .map_err(|_| Error::InvalidKey("not a valid P-256 secret scalar".into()))?;
        Ok(Self { secret })
    }

    /// The secret scalar (for persistence only)
    pub fn secret_bytes(&self) -> Zeroizing<Vec<u8>> {
        Zeroizing::new(self.secret.to_bytes().to_vec())
    }

    /// The public key in uncompressed SEC1 form
    pub fn public_key_bytes(&self) -> PublicKeyBytes {
        let point = self.secret.public_key().to_encoded_point(false);
        PublicKeyBytes(point.as_bytes().to_vec())
    }

    /// ECDH with a peer public key (SEC1, compressed or uncompressed)
    pub fn diffie_hellman(&self, peer_public: &[u8]) -> Result<SharedSecret> {
        let peer = P256PublicKey::from_sec1_bytes(peer_public).map_err(|_| {
            Error::KeyExchangeFailed("peer public key is not a valid P-256 point".into())
        })?;

        let shared = ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());

        let mut bytes = [0u8; SCALAR_SIZE];
        bytes.copy_from_slice(shared.raw_secret_bytes().as_slice());
        Ok(SharedSecret::from_bytes(bytes))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("public", &self.public_key_bytes())
            .finish_non_exhaustive()
    }
}

/// Encoded public key bytes, as exchanged with the server
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKeyBytes(pub Vec<u8>);

impl PublicKeyBytes {
    /// Raw SEC1 bytes
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Standard base64, as carried in the registration request
    pub fn to_base64(&self) -> String {
        base64::engine::general_purpose::STANDARD.encode(&self.0)
    }

    /// Decode and validate a base64 SEC1 public key
    pub fn from_base64(encoded: &str) -> Result<Self> {
        let bytes = base64::engine::general_purpose::STANDARD.decode(encoded.trim())?;
        P256PublicKey::from_sec1_bytes(&bytes)
            .map_err(|_| Error::InvalidKey("not a valid P-256 public key".into()))?;
        Ok(Self(bytes))
    }
}

impl std::fmt::Debug for PublicKeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PublicKeyBytes({})", hex::encode(&self.0))
    }
}

/// Raw ECDH output
///
/// Only ever used as HMAC key material for [`crate::crypto::derive_symmetric_key`].
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret {
    bytes: [u8; SCALAR_SIZE],
}

impl SharedSecret {
    /// Create from raw DH output
    pub fn from_bytes(bytes: [u8; SCALAR_SIZE]) -> Self {
        Self { bytes }
    }

    /// Get the raw bytes (for key derivation)
    pub(crate) fn as_bytes(&self) -> &[u8; SCALAR_SIZE] {
        &self.bytes
    }
}

/// Generate a key pair, returning it with its encoded public half
pub fn generate_key_pair() -> Result<(KeyPair, PublicKeyBytes)> {
    let pair = KeyPair::generate()?;
    let public = pair.public_key_bytes();
    Ok((pair, public))
}

/// ECDH between a local private key and a peer's encoded public key
pub fn derive_shared_secret(private_key: &KeyPair, peer_public: &[u8]) -> Result<SharedSecret> {
    private_key.diffie_hellman(peer_public)
}

// ============================================================================
// TESTS
// ============================================================================
