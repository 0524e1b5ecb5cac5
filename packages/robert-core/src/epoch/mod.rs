//! # Epochs
//!
//! Time is cut into fixed-length epochs. For each epoch the server hands the
//! device an ephemeral Bluetooth identifier (EBID) and an encrypted country
//! code (ECC), delivered as an encrypted tuples blob at registration.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           EPOCH TIMELINE                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  time_start                                                             │
//! │      │                                                                  │
//! │      ▼                                                                  │
//! │      ├──── id 0 ────┼──── id 1 ────┼──── id 2 ────┼ ... ┼── id N-1 ──┤  │
//! │      │  ebid₀ ecc₀  │  ebid₁ ecc₁  │  ebid₂ ecc₂  │     │            │  │
//! │                                                                         │
//! │  id(now) = floor((now − time_start) / epoch_duration)                   │
//! │  past id N-1: keys exhausted, re-register or refresh                    │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod manager;
mod tuples;

pub use manager::{EpochKeyManager, KeyMaterial};
pub use tuples::{decode_epochs, decrypt_epochs, encode_tuples, TUPLE_RECORD_SIZE};

use serde::{Deserialize, Serialize};

/// EBID length in bytes
pub const EBID_SIZE: usize = 8;

/// ECC length in bytes
pub const ECC_SIZE: usize = 2;

/// Ephemeral Bluetooth identifier for one epoch
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Ebid(pub [u8; EBID_SIZE]);

impl Ebid {
    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; EBID_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Ebid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ebid({})", hex::encode(self.0))
    }
}

/// Encrypted country code for one epoch
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Ecc(pub [u8; ECC_SIZE]);

impl Ecc {
    /// Raw bytes
    pub fn as_bytes(&self) -> &[u8; ECC_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for Ecc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Ecc({})", hex::encode(self.0))
    }
}

/// One epoch of the loaded horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Epoch {
    /// Epoch index relative to `time_start`
    pub id: u32,
    /// Identifier broadcast during this epoch
    pub ebid: Ebid,
    /// Country code broadcast during this epoch
    pub ecc: Ecc,
    /// Epoch start, NTP seconds
    pub time: u64,
}

/// Epoch index containing `now`, or `None` before `time_start`
pub fn epoch_id_at(now: u64, time_start: u64, epoch_duration: u64) -> Option<u32> {
    if now < time_start || epoch_duration == 0 {
        return None;
    }
    u32::try_from((now - time_start) / epoch_duration).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_epoch_id_at() {
        let start = 3_900_000_000;
        assert_eq!(epoch_id_at(start, start, 900), Some(0));
        assert_eq!(epoch_id_at(start + 899, start, 900), Some(0));
        assert_eq!(epoch_id_at(start + 900, start, 900), Some(1));
        assert_eq!(epoch_id_at(start + 86_399, start, 900), Some(95));
        assert_eq!(epoch_id_at(start - 1, start, 900), None);
    }

    #[test]
    fn test_ebid_debug_is_hex() {
        let ebid = Ebid([0xAB; EBID_SIZE]);
        assert_eq!(format!("{:?}", ebid), "Ebid(abababababababab)");
    }
}
