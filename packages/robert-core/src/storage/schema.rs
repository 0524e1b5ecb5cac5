//! # Database Schema
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         DATABASE SCHEMA                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐    ┌─────────────────┐      ┌─────────────────┐    │
//! │  │  registration   │    │     epochs      │      │   proximities   │    │
//! │  ├─────────────────┤    ├─────────────────┤      ├─────────────────┤    │
//! │  │ id (=1)         │    │ id              │      │ id              │    │
//! │  │ ka_enc          │    │ ebid            │      │ ebid            │    │
//! │  │ kea_enc         │    │ ecc             │      │ ecc             │    │
//! │  │ private_key_enc │    │ start_time      │      │ mac             │    │
//! │  │ server_pub_key  │    └─────────────────┘      │ collected_at    │    │
//! │  │ time_start      │                             │ rssi_calibrated │    │
//! │  │ server_config   │    ┌─────────────────┐      │ tx_power_cal.   │    │
//! │  │ registered_at   │    │     status      │      │ peer_time       │    │
//! │  └─────────────────┘    ├─────────────────┤      └─────────────────┘    │
//! │                         │ id (=1)         │                             │
//! │                         │ last_status_at  │                             │
//! │                         │ assessment_enc  │                             │
//! │                         └─────────────────┘                             │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL to create all tables
pub const CREATE_TABLES: &str = r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY
);

-- Registration (single row)
-- Secret columns are AES-256-GCM blobs under the storage key
CREATE TABLE IF NOT EXISTS registration (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    ka_enc BLOB NOT NULL,
    kea_enc BLOB NOT NULL,
    private_key_enc BLOB NOT NULL,
    server_public_key BLOB NOT NULL,
    -- NTP seconds
    time_start INTEGER NOT NULL,
    -- JSON parameter list
    server_config TEXT NOT NULL,
    registered_at INTEGER NOT NULL
);

-- Epoch horizon of the current registration
CREATE TABLE IF NOT EXISTS epochs (
    id INTEGER PRIMARY KEY,
    ebid BLOB NOT NULL UNIQUE,
    ecc BLOB NOT NULL,
    start_time INTEGER NOT NULL
);

-- Encounters
CREATE TABLE IF NOT EXISTS proximities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ebid BLOB NOT NULL,
    ecc BLOB NOT NULL,
    mac BLOB NOT NULL,
    collected_at INTEGER NOT NULL,
    rssi_calibrated INTEGER NOT NULL,
    tx_power_calibrated INTEGER NOT NULL,
    peer_time INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_proximities_collected ON proximities(collected_at);

-- Last status outcome (single row)
CREATE TABLE IF NOT EXISTS status (
    id INTEGER PRIMARY KEY CHECK (id = 1),
    last_status_at INTEGER NOT NULL,
    assessment_enc BLOB NOT NULL
);
"#;
