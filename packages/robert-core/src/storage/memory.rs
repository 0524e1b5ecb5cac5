//! In-memory storage.
//!
//! Used by tests and by hosts that keep nothing on disk. Write failures can be
//! injected to exercise the rollback paths of the store and protocols.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;

use super::{StatusRecord, Storage, StoredRegistration};
use crate::config::ServerConfig;
use crate::epoch::Epoch;
use crate::error::{Error, Result};
use crate::proximity::LocalProximity;

#[derive(Default)]
struct MemoryState {
    registration: Option<StoredRegistration>,
    epochs: Vec<Epoch>,
    proximities: Vec<LocalProximity>,
    status: Option<StatusRecord>,
}

/// Storage backed by process memory
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
    fail_writes: AtomicBool,
}

impl MemoryStorage {
    /// Create empty storage
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent write fail with `StorageWriteError`
    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    fn check_writable(&self) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::StorageWriteError("write failure injected".into()));
        }
        Ok(())
    }

    /// Number of stored encounters
    pub fn proximity_count(&self) -> usize {
        self.state.lock().proximities.len()
    }
}

impl Storage for MemoryStorage {
    fn save_registration(
        &self,
        registration: &StoredRegistration,
        epochs: &[Epoch],
    ) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        state.registration = Some(registration.clone());
        state.epochs = epochs.to_vec();
        state.status = None;
        Ok(())
    }

    fn load_registration(&self) -> Result<Option<(StoredRegistration, Vec<Epoch>)>> {
        let state = self.state.lock();
        Ok(state
            .registration
            .clone()
            .map(|registration| (registration, state.epochs.clone())))
    }

    fn save_epochs(&self, time_start: u64, epochs: &[Epoch]) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let registration = state
            .registration
            .as_mut()
            .ok_or_else(|| Error::StorageWriteError("no registration to attach epochs to".into()))?;
        registration.time_start = time_start;
        state.epochs = epochs.to_vec();
        Ok(())
    }

    fn save_server_config(&self, config: &ServerConfig) -> Result<()> {
        self.check_writable()?;
        if let Some(registration) = self.state.lock().registration.as_mut() {
            registration.server_config = config.clone();
        }
        Ok(())
    }

    fn clear_registration(&self) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        state.registration = None;
        state.epochs.clear();
        Ok(())
    }

    fn save_proximity(&self, record: &LocalProximity) -> Result<()> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let index = state
            .proximities
            .partition_point(|p| p.collected_at <= record.collected_at);
        state.proximities.insert(index, record.clone());
        Ok(())
    }

    fn load_proximities(&self) -> Result<Vec<LocalProximity>> {
        Ok(self.state.lock().proximities.clone())
    }

    fn delete_proximities_before(&self, before: u64) -> Result<usize> {
        self.check_writable()?;
        let mut state = self.state.lock();
        let len = state.proximities.len();
        state.proximities.retain(|p| p.collected_at >= before);
        Ok(len - state.proximities.len())
    }

    fn clear_proximities(&self) -> Result<()> {
        self.check_writable()?;
        self.state.lock().proximities.clear();
        Ok(())
    }

    fn save_status(&self, status: &StatusRecord) -> Result<()> {
        self.check_writable()?;
        self.state.lock().status = Some(status.clone());
        Ok(())
    }

    fn load_status(&self) -> Result<Option<StatusRecord>> {
        Ok(self.state.lock().status.clone())
    }

    fn clear_all(&self) -> Result<()> {
        self.check_writable()?;
        *self.state.lock() = MemoryState::default();
        Ok(())
    }
}
