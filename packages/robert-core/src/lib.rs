//! # ROBERT Core
//!
//! Protocol core of a ROBERT-style proximity-tracing client: rotating
//! pseudonymous identifiers exchanged over short-range radio, a local
//! encounter log, and the four authenticated server protocols.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ROBERT CORE                                   │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │                      ContactTracer (facade)                       │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │        │                 │                 │                 │          │
//! │        ▼                 ▼                 ▼                 ▼          │
//! │  ┌───────────┐   ┌──────────────┐   ┌────────────┐   ┌──────────────┐   │
//! │  │ protocol  │   │  proximity   │   │   epoch    │   │   storage    │   │
//! │  │ register  │   │  engine      │   │  tuples    │   │  SQLite /    │   │
//! │  │ status    │   │  hello codec │   │  manager   │   │  memory      │   │
//! │  │ report    │   │  store       │   │            │   │              │   │
//! │  │ unregister│   │  radio trait │   │            │   │              │   │
//! │  └─────┬─────┘   └──────────────┘   └────────────┘   └──────────────┘   │
//! │        ▼                                                                │
//! │  ┌───────────┐   ┌──────────────────────────────────────────────────┐   │
//! │  │  server   │   │  crypto: P-256 ECDH · HMAC-SHA256 · AES-256-GCM  │   │
//! │  │ http/mock │   └──────────────────────────────────────────────────┘   │
//! │  └───────────┘                                                          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Hierarchy
//!
//! - [`error`] - Error types for the entire library
//! - [`config`] - Typed client configuration and server parameters
//! - [`time`] - NTP time and the injectable clock
//! - [`crypto`] - Key agreement, key derivation, AEAD and MACs
//! - [`epoch`] - Epoch identifiers and the key manager
//! - [`proximity`] - Hello exchange engine and encounter log
//! - [`server`] - Server trait, HTTP client, wire formats and mock server
//! - [`protocol`] - Register, status, report and unregister
//! - [`storage`] - Persistence (SQLite and in-memory)
//! - [`tracer`] - The facade
//!
//! ## Privacy Model
//!
//! | Data | Leaves the device |
//! |------|-------------------|
//! | Device private key | Never |
//! | KA / KEA | Never (derived on both sides) |
//! | Own EBIDs | Broadcast over radio, one per epoch |
//! | Encounters | Only on report, with a verification code |

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

// ============================================================================
// MODULE DECLARATIONS
// ============================================================================

pub mod config;
pub mod crypto;
pub mod epoch;
pub mod error;
pub mod protocol;
pub mod proximity;
pub mod server;
pub mod storage;
/// NTP time conversion and the injectable clock.
pub mod time;
pub mod tracer;

// ============================================================================
// RE-EXPORTS
// ============================================================================

pub use config::{ServerConfig, TracerConfig, WireVersion};
pub use epoch::{Ebid, Ecc, Epoch, EpochKeyManager};
pub use error::{Error, Result};
pub use proximity::{LocalProximity, LocalProximityStore, ProximityExchangeEngine};
pub use server::{RiskAssessment, ServerClient};
pub use tracer::{ContactTracer, TracerEvent};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Returns the version of ROBERT Core
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}

/// Returns build information for debugging
pub fn build_info() -> BuildInfo {
    BuildInfo {
        version: env!("CARGO_PKG_VERSION"),
        target: std::env::consts::OS,
        profile: if cfg!(debug_assertions) {
            "debug"
        } else {
            "release"
        },
    }
}

/// Build information for debugging
#[derive(Debug, Clone)]
pub struct BuildInfo {
    /// Crate version
    pub version: &'static str,
    /// Target operating system
    pub target: &'static str,
    /// Build profile (debug/release)
    pub profile: &'static str,
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_build_info() {
        let info = build_info();
        assert_eq!(info.version, version());
        assert!(!info.target.is_empty());
    }
}
