//! # Proximity
//!
//! Hello-message exchange over the short-range radio and the local encounter
//! log.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       PROXIMITY EXCHANGE                                │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   Radio (BLE)                 Engine task                  Store        │
//! │   ───────────                 ───────────                  ─────        │
//! │                                                                         │
//! │   hello_message() ◄── cached 34-byte payload ◄── tick: current epoch    │
//! │                                                  + MAC under KA         │
//! │                                                                         │
//! │   did_receive_hello ──try_send──► validate ──► calibrate ──► append     │
//! │   (never blocks)                  length        RSSI/TX      dedup      │
//! │                                                              window     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod engine;
mod hello;
mod radio;
mod store;

pub use engine::{
    EngineHandle, EngineSettings, EngineState, ProximityEvent, ProximityExchangeEngine,
    RadioMeasurement, RejectionReason,
};
pub use hello::{HelloMessage, HELLO_MESSAGE_SIZE};
pub use radio::{LoopbackRadio, Radio, RadioActivity};
pub use store::{AppendOutcome, LocalProximityStore, ProximityFilter, ToleranceFilter};

use serde::{Deserialize, Serialize};

use crate::crypto::MAC_SIZE;
use crate::epoch::{Ebid, Ecc};

/// One recorded encounter with a peer device
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalProximity {
    /// Peer's identifier for its current epoch
    pub ebid: Ebid,
    /// Peer's encrypted country code
    pub ecc: Ecc,
    /// Peer's hello MAC, checked by the server at report time
    pub mac: [u8; MAC_SIZE],
    /// Local reception time, NTP seconds
    pub collected_at: u64,
    /// RSSI after receive-gain compensation
    pub rssi_calibrated: i32,
    /// Advertised TX power after transmit-gain compensation
    pub tx_power_calibrated: i32,
    /// Time field from the peer's hello (truncated NTP seconds)
    pub peer_time: u32,
}
