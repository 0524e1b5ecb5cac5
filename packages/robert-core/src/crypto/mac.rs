//! Truncated HMAC-SHA256 authenticators under KA.
//!
//! Every authenticated message is `HMAC-SHA256(KA, prefix || fields...)`
//! truncated to the leftmost [`MAC_SIZE`] bytes. The one-byte prefix keeps a
//! hello MAC from ever validating as a status or unregister MAC.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::encryption::SymmetricKey;
use crate::error::{Error, Result};

type HmacSha256 = Hmac<Sha256>;

/// Truncated MAC length in bytes
pub const MAC_SIZE: usize = 20;

/// Message-type prefixes
pub mod prefix {
    /// Hello message broadcast over the radio
    pub const HELLO: u8 = 0x01;
    /// Status request
    pub const STATUS: u8 = 0x02;
    /// Unregister request
    pub const UNREGISTER: u8 = 0x03;
}

fn keyed(key: &SymmetricKey, prefix: u8, fields: &[&[u8]]) -> Result<HmacSha256> {
    let mut mac = <HmacSha256 as Mac>::new_from_slice(key.as_bytes())
        .map_err(|_| Error::InvalidKey("HMAC key rejected".into()))?;
    mac.update(&[prefix]);
    for field in fields {
        mac.update(field);
    }
    Ok(mac)
}

/// Compute a truncated MAC over `prefix || fields[0] || fields[1] || ...`
pub fn compute_mac(key: &SymmetricKey, prefix: u8, fields: &[&[u8]]) -> Result<[u8; MAC_SIZE]> {
    let digest = keyed(key, prefix, fields)?.finalize().into_bytes();
    let mut out = [0u8; MAC_SIZE];
    out.copy_from_slice(&digest[..MAC_SIZE]);
    Ok(out)
}

/// Constant-time check of a truncated MAC
pub fn verify_mac(key: &SymmetricKey, prefix: u8, fields: &[&[u8]], tag: &[u8]) -> bool {
    if tag.len() != MAC_SIZE {
        return false;
    }
    match keyed(key, prefix, fields) {
        Ok(mac) => mac.verify_truncated_left(tag).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ka() -> SymmetricKey {
        SymmetricKey::from_bytes([0x11; 32])
    }

    #[test]
    fn test_compute_and_verify() {
        let fields: [&[u8]; 2] = [b"ebid1234", b"\x00\x01"];
        let tag = compute_mac(&ka(), prefix::HELLO, &fields).unwrap();
        assert!(verify_mac(&ka(), prefix::HELLO, &fields, &tag));
    }

    #[test]
    fn test_prefix_separates_messages() {
        let fields: [&[u8]; 1] = [b"same payload"];
        let tag = compute_mac(&ka(), prefix::STATUS, &fields).unwrap();
        assert!(!verify_mac(&ka(), prefix::UNREGISTER, &fields, &tag));
    }

    #[test]
    fn test_wrong_key_or_length_rejected() {
        let fields: [&[u8]; 1] = [b"payload"];
        let tag = compute_mac(&ka(), prefix::HELLO, &fields).unwrap();
        let other = SymmetricKey::from_bytes([0x22; 32]);
        assert!(!verify_mac(&other, prefix::HELLO, &fields, &tag));
        assert!(!verify_mac(&ka(), prefix::HELLO, &fields, &tag[..19]));
    }

    #[test]
    fn test_field_boundaries_are_concatenation() {
        let a: [&[u8]; 2] = [b"ab", b"cd"];
        let b: [&[u8]; 1] = [b"abcd"];
        assert_eq!(
            compute_mac(&ka(), prefix::HELLO, &a).unwrap(),
            compute_mac(&ka(), prefix::HELLO, &b).unwrap()
        );
    }
}
