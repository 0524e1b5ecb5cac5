//! Tuples blob codec.
//!
//! The decrypted blob is a sequence of fixed-size records:
//!
//! ```text
//! ┌──────────────────────┬────────────────────┬────────────┐
//! │ epoch_id (u32, BE)   │ ebid (8 bytes)     │ ecc (2 B)  │
//! └──────────────────────┴────────────────────┴────────────┘
//!                       14 bytes per record
//! ```

use std::collections::HashSet;

use super::{Ebid, Ecc, Epoch, EBID_SIZE, ECC_SIZE};
use crate::crypto::{decrypt, SymmetricKey};
use crate::error::{Error, Result};

/// Size of one tuple record in bytes
pub const TUPLE_RECORD_SIZE: usize = 4 + EBID_SIZE + ECC_SIZE;

/// Serialize epochs into the plaintext tuples format
pub fn encode_tuples(epochs: &[Epoch]) -> Vec<u8> {
    let mut out = Vec::with_capacity(epochs.len() * TUPLE_RECORD_SIZE);
    for epoch in epochs {
        out.extend_from_slice(&epoch.id.to_be_bytes());
        out.extend_from_slice(epoch.ebid.as_bytes());
        out.extend_from_slice(epoch.ecc.as_bytes());
    }
    out
}

/// Parse a plaintext tuples blob into epochs sorted by id
///
/// ## Errors
///
/// `TupleParsing` when the blob is empty, its length is not a multiple of
/// [`TUPLE_RECORD_SIZE`], or an epoch id or EBID appears twice.
pub fn decode_epochs(plaintext: &[u8], time_start: u64, epoch_duration: u64) -> Result<Vec<Epoch>> {
    if plaintext.is_empty() {
        return Err(Error::TupleParsing("empty tuples blob".into()));
    }
    if plaintext.len() % TUPLE_RECORD_SIZE != 0 {
        return Err(Error::TupleParsing(format!(
            "blob length {} is not a multiple of {}",
            plaintext.len(),
            TUPLE_RECORD_SIZE
        )));
    }

    let count = plaintext.len() / TUPLE_RECORD_SIZE;
    let mut epochs = Vec::with_capacity(count);
    let mut seen_ids = HashSet::with_capacity(count);
    let mut seen_ebids = HashSet::with_capacity(count);

    for record in plaintext.chunks_exact(TUPLE_RECORD_SIZE) {
        let (id_bytes, rest) = record.split_at(4);
        let (ebid_bytes, ecc_bytes) = rest.split_at(EBID_SIZE);

        let mut id = [0u8; 4];
        id.copy_from_slice(id_bytes);
        let id = u32::from_be_bytes(id);

        let mut ebid = [0u8; EBID_SIZE];
        ebid.copy_from_slice(ebid_bytes);
        let mut ecc = [0u8; ECC_SIZE];
        ecc.copy_from_slice(ecc_bytes);

        if !seen_ids.insert(id) {
            return Err(Error::TupleParsing(format!("duplicate epoch id {}", id)));
        }
        if !seen_ebids.insert(ebid) {
            return Err(Error::TupleParsing(format!(
                "EBID reused by epoch {}",
                id
            )));
        }

        let time = (id as u64)
            .checked_mul(epoch_duration)
            .and_then(|offset| time_start.checked_add(offset))
            .ok_or_else(|| {
                Error::TupleParsing(format!("epoch {} start overflows the clock", id))
            })?;

        epochs.push(Epoch {
            id,
            ebid: Ebid(ebid),
            ecc: Ecc(ecc),
            time,
        });
    }

    epochs.sort_by_key(|e| e.id);
    Ok(epochs)
}

/// Decrypt a tuples blob with KEA and decode it
pub fn decrypt_epochs(
    kea: &SymmetricKey,
    blob: &[u8],
    time_start: u64,
    epoch_duration: u64,
) -> Result<Vec<Epoch>> {
    let plaintext = decrypt(blob, kea)?;
    decode_epochs(&plaintext, time_start, epoch_duration)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encrypt;

    fn epoch(id: u32) -> Epoch {
        let mut ebid = [0u8; EBID_SIZE];
        ebid[..4].copy_from_slice(&id.to_be_bytes());
        Epoch {
            id,
            ebid: Ebid(ebid),
            ecc: Ecc([0x33, id as u8]),
            time: 0,
        }
    }

    #[test]
    fn test_decode_assigns_times() {
        let blob = encode_tuples(&[epoch(0), epoch(1), epoch(2)]);
        let epochs = decode_epochs(&blob, 1000, 900).unwrap();
        assert_eq!(epochs.len(), 3);
        assert_eq!(epochs[2].id, 2);
        assert_eq!(epochs[2].time, 1000 + 2 * 900);
        assert_eq!(epochs[1].ebid, epoch(1).ebid);
    }

    #[test]
    fn test_decode_sorts_by_id() {
        let blob = encode_tuples(&[epoch(5), epoch(3), epoch(4)]);
        let ids: Vec<u32> = decode_epochs(&blob, 0, 900)
            .unwrap()
            .iter()
            .map(|e| e.id)
            .collect();
        assert_eq!(ids, vec![3, 4, 5]);
    }

    #[test]
    fn test_epoch_start_overflow_rejected() {
        let blob = encode_tuples(&[epoch(0), epoch(u32::MAX)]);
        assert!(matches!(
            decode_epochs(&blob, 1000, u64::MAX / 2),
            Err(Error::TupleParsing(_))
        ));
        assert!(matches!(
            decode_epochs(&encode_tuples(&[epoch(1)]), u64::MAX, 900),
            Err(Error::TupleParsing(_))
        ));
    }

    #[test]
    fn test_bad_length_rejected() {
        let mut blob = encode_tuples(&[epoch(0)]);
        blob.push(0);
        assert!(matches!(
            decode_epochs(&blob, 0, 900),
            Err(Error::TupleParsing(_))
        ));
        assert!(matches!(decode_epochs(&[], 0, 900), Err(Error::TupleParsing(_))));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let mut dup = epoch(1);
        dup.ebid = Ebid([0xEE; EBID_SIZE]);
        let blob = encode_tuples(&[epoch(1), dup]);
        assert!(matches!(
            decode_epochs(&blob, 0, 900),
            Err(Error::TupleParsing(_))
        ));
    }

    #[test]
    fn test_duplicate_ebid_rejected() {
        let mut dup = epoch(2);
        dup.ebid = epoch(1).ebid;
        let blob = encode_tuples(&[epoch(1), dup]);
        assert!(matches!(
            decode_epochs(&blob, 0, 900),
            Err(Error::TupleParsing(_))
        ));
    }

    #[test]
    fn test_decrypt_full_day() {
        let kea = SymmetricKey::from_bytes([4u8; 32]);
        let day: Vec<Epoch> = (0..96).map(epoch).collect();
        let blob = encrypt(&encode_tuples(&day), &kea).unwrap();

        let epochs = decrypt_epochs(&kea, &blob, 0, 900).unwrap();
        assert_eq!(epochs.len(), 96);

        let wrong = SymmetricKey::from_bytes([5u8; 32]);
        assert!(matches!(
            decrypt_epochs(&wrong, &blob, 0, 900),
            Err(Error::DecryptionFailed(_))
        ));
    }
}
