//! # Storage
//!
//! Persistence collaborator for the protocol core.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         STORAGE LAYER                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │                    ┌──────────────────────┐                             │
//! │                    │   trait Storage      │                             │
//! │                    └──────────┬───────────┘                             │
//! │                ┌──────────────┴──────────────┐                          │
//! │                ▼                             ▼                          │
//! │   ┌────────────────────────┐   ┌────────────────────────────┐          │
//! │   │   SqliteStorage        │   │   MemoryStorage            │          │
//! │   │   rusqlite, key        │   │   HashMap/Vec, write-      │          │
//! │   │   material AES-GCM     │   │   failure injection for    │          │
//! │   │   encrypted at rest    │   │   tests                    │          │
//! │   └────────────────────────┘   └────────────────────────────┘          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## What is Stored
//!
//! | Data | Lifetime |
//! |------|----------|
//! | Registration (KA, KEA, device private key, server key, time_start) | Until unregister / re-register |
//! | Epoch horizon | Replaced by re-register or a status refresh |
//! | Encounters | Retention window, or until wipe |
//! | Last status time and risk assessment | Until re-register or wipe |
//!
//! Calls are synchronous and short; the store and protocols call them while
//! holding their own locks so that persistence and memory never diverge.

mod database;
mod memory;
mod schema;

pub use database::SqliteStorage;
pub use memory::MemoryStorage;

use zeroize::Zeroizing;

use crate::config::ServerConfig;
use crate::crypto::SymmetricKey;
use crate::epoch::Epoch;
use crate::error::Result;
use crate::proximity::LocalProximity;
use crate::server::RiskAssessment;

/// Registration state as persisted
#[derive(Clone)]
pub struct StoredRegistration {
    /// Authentication key
    pub ka: SymmetricKey,
    /// Tuples encryption key
    pub kea: SymmetricKey,
    /// Device P-256 secret scalar
    pub private_key: Zeroizing<Vec<u8>>,
    /// Server public key (SEC1)
    pub server_public_key: Vec<u8>,
    /// Start of epoch 0, NTP seconds
    pub time_start: u64,
    /// Server configuration received at registration
    pub server_config: ServerConfig,
    /// Local registration time, NTP seconds
    pub registered_at: u64,
}

impl std::fmt::Debug for StoredRegistration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredRegistration")
            .field("time_start", &self.time_start)
            .field("registered_at", &self.registered_at)
            .finish_non_exhaustive()
    }
}

/// Outcome of the last successful status request
#[derive(Debug, Clone, PartialEq)]
pub struct StatusRecord {
    /// When the status request completed, NTP seconds
    pub last_status_at: u64,
    /// Assessment returned by the server
    pub assessment: RiskAssessment,
}

/// Persistence operations required by the protocol core
pub trait Storage: Send + Sync {
    /// Replace the registration, its epochs and any status state in one transaction
    fn save_registration(&self, registration: &StoredRegistration, epochs: &[Epoch])
        -> Result<()>;

    /// Load the registration and its epochs
    fn load_registration(&self) -> Result<Option<(StoredRegistration, Vec<Epoch>)>>;

    /// Replace the epoch horizon of the current registration
    fn save_epochs(&self, time_start: u64, epochs: &[Epoch]) -> Result<()>;

    /// Replace the stored server configuration
    fn save_server_config(&self, config: &ServerConfig) -> Result<()>;

    /// Remove the registration and epochs
    fn clear_registration(&self) -> Result<()>;

    /// Append one encounter
    fn save_proximity(&self, record: &LocalProximity) -> Result<()>;

    /// All encounters, ascending by `collected_at`
    fn load_proximities(&self) -> Result<Vec<LocalProximity>>;

    /// Remove encounters collected strictly before `before`
    fn delete_proximities_before(&self, before: u64) -> Result<usize>;

    /// Remove all encounters
    fn clear_proximities(&self) -> Result<()>;

    /// Persist the last status outcome
    fn save_status(&self, status: &StatusRecord) -> Result<()>;

    /// Last status outcome
    fn load_status(&self) -> Result<Option<StatusRecord>>;

    /// Remove everything
    fn clear_all(&self) -> Result<()>;
}
