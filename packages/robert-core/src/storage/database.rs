//! # SQLite Storage
//!
//! Production [`Storage`] backed by rusqlite.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      SQLITE STORAGE                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ┌─────────────────┐                                                   │
//! │  │  Protocol core  │                                                   │
//! │  └────────┬────────┘                                                   │
//! │           ▼                                                             │
//! │  ┌─────────────────┐   KA / KEA / private key / risk:                  │
//! │  │  SqliteStorage  │   AES-256-GCM under the storage key, the column   │
//! │  │   (this file)   │   name as AAD                                     │
//! │  └────────┬────────┘                                                   │
//! │           ▼                                                             │
//! │  ┌─────────────────┐                                                   │
//! │  │    rusqlite     │   file or in-memory                               │
//! │  └─────────────────┘                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! NTP timestamps fit in `i64` and are stored as SQLite INTEGER.

use std::sync::Arc;

use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension, Transaction};
use zeroize::Zeroizing;

use super::schema;
use super::{StatusRecord, Storage, StoredRegistration};
use crate::config::ServerConfig;
use crate::crypto::{decrypt_with_aad, encrypt_with_aad, SymmetricKey, MAC_SIZE};
use crate::epoch::{Ebid, Ecc, Epoch, EBID_SIZE, ECC_SIZE};
use crate::error::{Error, Result};
use crate::proximity::LocalProximity;
use crate::server::RiskAssessment;

mod aad {
    pub const KA: &[u8] = b"registration.ka";
    pub const KEA: &[u8] = b"registration.kea";
    pub const PRIVATE_KEY: &[u8] = b"registration.private_key";
    pub const ASSESSMENT: &[u8] = b"status.assessment";
}

/// SQLite-backed storage
pub struct SqliteStorage {
    conn: Arc<Mutex<Connection>>,
    key: SymmetricKey,
}

impl SqliteStorage {
    /// Open or create a database
    ///
    /// If path is None, creates an in-memory database (useful for testing).
    pub fn open(path: Option<&str>, storage_key: SymmetricKey) -> Result<Self> {
        let conn = match path {
            Some(p) => Connection::open(p)
                .map_err(|e| Error::DatabaseError(format!("Failed to open database: {}", e)))?,
            None => Connection::open_in_memory().map_err(|e| {
                Error::DatabaseError(format!("Failed to create in-memory database: {}", e))
            })?,
        };

        let storage = Self {
            conn: Arc::new(Mutex::new(conn)),
            key: storage_key,
        };
        storage.init_schema()?;
        Ok(storage)
    }

    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock();

        let version: Option<i32> = conn
            .query_row("SELECT version FROM schema_version LIMIT 1", [], |row| {
                row.get(0)
            })
            .ok();

        match version {
            None => {
                conn.execute_batch(schema::CREATE_TABLES)
                    .map_err(|e| Error::DatabaseError(format!("Failed to create tables: {}", e)))?;
                conn.execute(
                    "INSERT INTO schema_version (version) VALUES (?)",
                    params![schema::SCHEMA_VERSION],
                )
                .map_err(|e| {
                    Error::DatabaseError(format!("Failed to set schema version: {}", e))
                })?;
                tracing::info!(
                    "Database schema created (version {})",
                    schema::SCHEMA_VERSION
                );
            }
            Some(v) if v > schema::SCHEMA_VERSION => {
                return Err(Error::DatabaseError(format!(
                    "Database schema version {} is newer than supported {}",
                    v,
                    schema::SCHEMA_VERSION
                )));
            }
            Some(v) => {
                tracing::debug!("Database schema version {}", v);
            }
        }

        Ok(())
    }

    fn seal(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        encrypt_with_aad(plaintext, &self.key, aad)
    }

    fn open_sealed(&self, blob: &[u8], aad: &[u8]) -> Result<Zeroizing<Vec<u8>>> {
        decrypt_with_aad(blob, &self.key, aad)
            .map(Zeroizing::new)
            .map_err(|e| Error::StorageCorrupted(format!("sealed column unreadable: {}", e)))
    }

    fn write_epochs(tx: &Transaction<'_>, epochs: &[Epoch]) -> Result<()> {
        tx.execute("DELETE FROM epochs", [])?;
        let mut stmt =
            tx.prepare("INSERT INTO epochs (id, ebid, ecc, start_time) VALUES (?, ?, ?, ?)")?;
        for epoch in epochs {
            stmt.execute(params![
                epoch.id,
                &epoch.ebid.0[..],
                &epoch.ecc.0[..],
                epoch.time as i64,
            ])?;
        }
        Ok(())
    }

    fn read_epochs(conn: &Connection) -> Result<Vec<Epoch>> {
        let mut stmt = conn.prepare("SELECT id, ebid, ecc, start_time FROM epochs ORDER BY id")?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, u32>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, i64>(3)?,
            ))
        })?;

        let mut epochs = Vec::new();
        for row in rows {
            let (id, ebid, ecc, time) = row?;
            epochs.push(Epoch {
                id,
                ebid: Ebid(fixed::<EBID_SIZE>(&ebid, "epochs.ebid")?),
                ecc: Ecc(fixed::<ECC_SIZE>(&ecc, "epochs.ecc")?),
                time: time as u64,
            });
        }
        Ok(epochs)
    }
}

fn fixed<const N: usize>(bytes: &[u8], column: &str) -> Result<[u8; N]> {
    bytes.try_into().map_err(|_| {
        Error::StorageCorrupted(format!(
            "{}: expected {} bytes, found {}",
            column,
            N,
            bytes.len()
        ))
    })
}

impl Storage for SqliteStorage {
    fn save_registration(
        &self,
        registration: &StoredRegistration,
        epochs: &[Epoch],
    ) -> Result<()> {
        let ka = self.seal(registration.ka.as_bytes(), aad::KA)?;
        let kea = self.seal(registration.kea.as_bytes(), aad::KEA)?;
        let private_key = self.seal(&registration.private_key, aad::PRIVATE_KEY)?;
        let server_config = serde_json::to_string(&registration.server_config)?;

        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        tx.execute("DELETE FROM status", [])?;
        tx.execute(
            "INSERT OR REPLACE INTO registration
             (id, ka_enc, kea_enc, private_key_enc, server_public_key, time_start, server_config, registered_at)
             VALUES (1, ?, ?, ?, ?, ?, ?, ?)",
            params![
                ka,
                kea,
                private_key,
                registration.server_public_key,
                registration.time_start as i64,
                server_config,
                registration.registered_at as i64,
            ],
        )?;
        Self::write_epochs(&tx, epochs)?;

        tx.commit()
            .map_err(|e| Error::StorageWriteError(format!("Failed to commit registration: {}", e)))?;

        tracing::debug!("Persisted registration with {} epochs", epochs.len());
        Ok(())
    }

    fn load_registration(&self) -> Result<Option<(StoredRegistration, Vec<Epoch>)>> {
        let conn = self.conn.lock();

        let row = conn
            .query_row(
                "SELECT ka_enc, kea_enc, private_key_enc, server_public_key, time_start, server_config, registered_at
                 FROM registration WHERE id = 1",
                [],
                |row| {
                    Ok((
                        row.get::<_, Vec<u8>>(0)?,
                        row.get::<_, Vec<u8>>(1)?,
                        row.get::<_, Vec<u8>>(2)?,
                        row.get::<_, Vec<u8>>(3)?,
                        row.get::<_, i64>(4)?,
                        row.get::<_, String>(5)?,
                        row.get::<_, i64>(6)?,
                    ))
                },
            )
            .optional()?;

        let Some((ka, kea, private_key, server_public_key, time_start, server_config, registered_at)) =
            row
        else {
            return Ok(None);
        };

        let ka = SymmetricKey::from_slice(&self.open_sealed(&ka, aad::KA)?)?;
        let kea = SymmetricKey::from_slice(&self.open_sealed(&kea, aad::KEA)?)?;
        let private_key = self.open_sealed(&private_key, aad::PRIVATE_KEY)?;
        let server_config: ServerConfig = serde_json::from_str(&server_config)
            .map_err(|e| Error::StorageCorrupted(format!("server_config: {}", e)))?;

        let epochs = Self::read_epochs(&conn)?;

        Ok(Some((
            StoredRegistration {
                ka,
                kea,
                private_key,
                server_public_key,
                time_start: time_start as u64,
                server_config,
                registered_at: registered_at as u64,
            },
            epochs,
        )))
    }

    fn save_epochs(&self, time_start: u64, epochs: &[Epoch]) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;

        let updated = tx.execute(
            "UPDATE registration SET time_start = ? WHERE id = 1",
            params![time_start as i64],
        )?;
        if updated == 0 {
            return Err(Error::StorageWriteError(
                "no registration to attach epochs to".into(),
            ));
        }
        Self::write_epochs(&tx, epochs)?;

        tx.commit()
            .map_err(|e| Error::StorageWriteError(format!("Failed to commit epochs: {}", e)))?;
        Ok(())
    }

    fn save_server_config(&self, config: &ServerConfig) -> Result<()> {
        let json = serde_json::to_string(config)?;
        self.conn.lock().execute(
            "UPDATE registration SET server_config = ? WHERE id = 1",
            params![json],
        )?;
        Ok(())
    }

    fn clear_registration(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute("DELETE FROM registration", [])?;
        tx.execute("DELETE FROM epochs", [])?;
        tx.commit()?;
        Ok(())
    }

    fn save_proximity(&self, record: &LocalProximity) -> Result<()> {
        self.conn
            .lock()
            .execute(
                "INSERT INTO proximities
                 (ebid, ecc, mac, collected_at, rssi_calibrated, tx_power_calibrated, peer_time)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
                params![
                    &record.ebid.0[..],
                    &record.ecc.0[..],
                    &record.mac[..],
                    record.collected_at as i64,
                    record.rssi_calibrated,
                    record.tx_power_calibrated,
                    record.peer_time,
                ],
            )
            .map_err(|e| Error::StorageWriteError(format!("Failed to store proximity: {}", e)))?;
        Ok(())
    }

    fn load_proximities(&self) -> Result<Vec<LocalProximity>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT ebid, ecc, mac, collected_at, rssi_calibrated, tx_power_calibrated, peer_time
             FROM proximities ORDER BY collected_at, id",
        )?;

        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, Vec<u8>>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, Vec<u8>>(2)?,
                row.get::<_, i64>(3)?,
                row.get::<_, i32>(4)?,
                row.get::<_, i32>(5)?,
                row.get::<_, u32>(6)?,
            ))
        })?;

        let mut records = Vec::new();
        for row in rows {
            let (ebid, ecc, mac, collected_at, rssi, tx_power, peer_time) = row?;
            records.push(LocalProximity {
                ebid: Ebid(fixed::<EBID_SIZE>(&ebid, "proximities.ebid")?),
                ecc: Ecc(fixed::<ECC_SIZE>(&ecc, "proximities.ecc")?),
                mac: fixed::<MAC_SIZE>(&mac, "proximities.mac")?,
                collected_at: collected_at as u64,
                rssi_calibrated: rssi,
                tx_power_calibrated: tx_power,
                peer_time,
            });
        }
        Ok(records)
    }

    fn delete_proximities_before(&self, before: u64) -> Result<usize> {
        let removed = self.conn.lock().execute(
            "DELETE FROM proximities WHERE collected_at < ?",
            params![before as i64],
        )?;
        Ok(removed)
    }

    fn clear_proximities(&self) -> Result<()> {
        self.conn.lock().execute("DELETE FROM proximities", [])?;
        Ok(())
    }

    fn save_status(&self, status: &StatusRecord) -> Result<()> {
        let json = serde_json::to_vec(&status.assessment)?;
        let sealed = self.seal(&json, aad::ASSESSMENT)?;
        self.conn.lock().execute(
            "INSERT OR REPLACE INTO status (id, last_status_at, assessment_enc) VALUES (1, ?, ?)",
            params![status.last_status_at as i64, sealed],
        )?;
        Ok(())
    }

    fn load_status(&self) -> Result<Option<StatusRecord>> {
        let row = self
            .conn
            .lock()
            .query_row(
                "SELECT last_status_at, assessment_enc FROM status WHERE id = 1",
                [],
                |row| Ok((row.get::<_, i64>(0)?, row.get::<_, Vec<u8>>(1)?)),
            )
            .optional()?;

        let Some((last_status_at, sealed)) = row else {
            return Ok(None);
        };

        let json = self.open_sealed(&sealed, aad::ASSESSMENT)?;
        let assessment: RiskAssessment = serde_json::from_slice(&json)
            .map_err(|e| Error::StorageCorrupted(format!("status.assessment: {}", e)))?;

        Ok(Some(StatusRecord {
            last_status_at: last_status_at as u64,
            assessment,
        }))
    }

    fn clear_all(&self) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction()?;
        tx.execute_batch(
            "DELETE FROM registration;
             DELETE FROM epochs;
             DELETE FROM proximities;
             DELETE FROM status;",
        )?;
        tx.commit()
            .map_err(|e| Error::StorageWriteError(format!("Failed to wipe storage: {}", e)))?;
        tracing::info!("Wiped all stored protocol data");
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
