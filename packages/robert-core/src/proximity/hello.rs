//! Hello message codec.
//!
//! ```text
//! ┌────────────┬──────────┬─────────────────┬───────────────────────────┐
//! │ ebid (8 B) │ ecc (2 B)│ time (4 B, BE)  │ mac (20 B)                │
//! └────────────┴──────────┴─────────────────┴───────────────────────────┘
//!   mac = HMAC-SHA256(KA, 0x01 || ebid || ecc || time)[..20]
//! ```

use crate::crypto::{compute_mac, prefix, verify_mac, SymmetricKey, MAC_SIZE};
use crate::epoch::{Ebid, Ecc, Epoch, EBID_SIZE, ECC_SIZE};
use crate::error::{Error, Result};

const TIME_SIZE: usize = 4;

/// Total hello payload size in bytes
pub const HELLO_MESSAGE_SIZE: usize = EBID_SIZE + ECC_SIZE + TIME_SIZE + MAC_SIZE;

/// A parsed or freshly built hello message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HelloMessage {
    /// Sender's EBID
    pub ebid: Ebid,
    /// Sender's ECC
    pub ecc: Ecc,
    /// Sender's clock, NTP seconds truncated to 32 bits
    pub time: u32,
    /// Truncated MAC under the sender's KA
    pub mac: [u8; MAC_SIZE],
}

impl HelloMessage {
    /// Build and authenticate a hello for `epoch` at `now` (NTP seconds)
    pub fn build(epoch: &Epoch, ka: &SymmetricKey, now: u64) -> Result<Self> {
        let time = (now & u32::MAX as u64) as u32;
        let mac = compute_mac(
            ka,
            prefix::HELLO,
            &[&epoch.ebid.0[..], &epoch.ecc.0[..], &time.to_be_bytes()[..]],
        )?;
        Ok(Self {
            ebid: epoch.ebid,
            ecc: epoch.ecc,
            time,
            mac,
        })
    }

    /// Check the MAC (only the holder of KA, i.e. the server, can do this)
    pub fn verify(&self, ka: &SymmetricKey) -> bool {
        verify_mac(
            ka,
            prefix::HELLO,
            &[&self.ebid.0[..], &self.ecc.0[..], &self.time.to_be_bytes()[..]],
            &self.mac,
        )
    }

    /// Encode to the wire layout
    pub fn to_bytes(&self) -> [u8; HELLO_MESSAGE_SIZE] {
        let mut out = [0u8; HELLO_MESSAGE_SIZE];
        out[..EBID_SIZE].copy_from_slice(self.ebid.as_bytes());
        out[EBID_SIZE..EBID_SIZE + ECC_SIZE].copy_from_slice(self.ecc.as_bytes());
        out[EBID_SIZE + ECC_SIZE..EBID_SIZE + ECC_SIZE + TIME_SIZE]
            .copy_from_slice(&self.time.to_be_bytes());
        out[EBID_SIZE + ECC_SIZE + TIME_SIZE..].copy_from_slice(&self.mac);
        out
    }

    /// Parse a received payload; anything but exactly 34 bytes is rejected
    pub fn from_bytes(raw: &[u8]) -> Result<Self> {
        if raw.len() != HELLO_MESSAGE_SIZE {
            return Err(Error::InvalidHelloMessage(format!(
                "expected {} bytes, got {}",
                HELLO_MESSAGE_SIZE,
                raw.len()
            )));
        }

        let ebid = Self::extract_ebid(raw)?;

        let mut ecc = [0u8; ECC_SIZE];
        ecc.copy_from_slice(&raw[EBID_SIZE..EBID_SIZE + ECC_SIZE]);

        let mut time = [0u8; TIME_SIZE];
        time.copy_from_slice(&raw[EBID_SIZE + ECC_SIZE..EBID_SIZE + ECC_SIZE + TIME_SIZE]);

        let mut mac = [0u8; MAC_SIZE];
        mac.copy_from_slice(&raw[EBID_SIZE + ECC_SIZE + TIME_SIZE..]);

        Ok(Self {
            ebid,
            ecc: Ecc(ecc),
            time: u32::from_be_bytes(time),
            mac,
        })
    }

    /// Read only the EBID prefix
    ///
    /// Lets the radio layer de-duplicate advertisements without a full parse.
    pub fn extract_ebid(raw: &[u8]) -> Result<Ebid> {
        let bytes = raw.get(..EBID_SIZE).ok_or_else(|| {
            Error::InvalidHelloMessage(format!("payload shorter than {} bytes", EBID_SIZE))
        })?;
        let mut ebid = [0u8; EBID_SIZE];
        ebid.copy_from_slice(bytes);
        Ok(Ebid(ebid))
    }
}
