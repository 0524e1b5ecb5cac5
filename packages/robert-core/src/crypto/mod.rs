//! # Cryptography Module
//!
//! All cryptographic primitives used by the protocol core.
//!
//! ## Key Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    REGISTRATION KEY HIERARCHY                           │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Device P-256 private key          Server P-256 public key (anchor)    │
//! │              │                                 │                        │
//! │              └──────────── ECDH ───────────────┘                        │
//! │                             │                                           │
//! │                     Shared Secret (32 bytes)                            │
//! │                             │                                           │
//! │            ┌────────────────┴─────────────────┐                         │
//! │            ▼                                  ▼                         │
//! │   HMAC-SHA256(secret, "mac")        HMAC-SHA256(secret, "tuples")       │
//! │            │                                  │                         │
//! │           KA                                 KEA                        │
//! │   • hello message MAC               • decrypts the tuples blob         │
//! │   • status / unregister MAC           (AES-256-GCM)                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Algorithm Choices
//!
//! | Algorithm | Purpose |
//! |-----------|---------|
//! | P-256 ECDH | Registration key agreement (protocol-mandated curve) |
//! | HMAC-SHA256 | KA/KEA derivation, message authenticators (truncated to 20 bytes) |
//! | AES-256-GCM | Tuples blob, key material at rest |
//! | HKDF-SHA256 | Storage encryption key |
//!
//! Secret key types zeroize on drop. Randomness comes from `rand::rngs::OsRng`.

mod encryption;
mod kdf;
mod keys;
mod mac;

pub use encryption::{
    decrypt, decrypt_with_aad, encrypt, encrypt_with_aad, Nonce, SymmetricKey, KEY_SIZE,
    NONCE_SIZE, TAG_SIZE,
};
pub use kdf::{
    derive_registration_keys, derive_storage_key, derive_symmetric_key, domain,
    RegistrationKeys,
};
pub use keys::{
    derive_shared_secret, generate_key_pair, KeyPair, PublicKeyBytes, SharedSecret,
    PUBLIC_KEY_SIZE,
};
pub use mac::{compute_mac, prefix, verify_mac, MAC_SIZE};
