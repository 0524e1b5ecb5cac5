//! # Epoch Key Manager
//!
//! Owns the registration key material and the loaded epoch horizon.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       EPOCH KEY MANAGER                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   RwLock<Option<Arc<KeySet>>>                                           │
//! │        │                                                                │
//! │        └─ KeySet                                                        │
//! │            ├─ material: Arc<KeyMaterial>   KA, KEA, private, server pub │
//! │            ├─ time_start                                                │
//! │            └─ epochs (sorted by id)                                     │
//! │                                                                         │
//! │   Readers clone the Arc and drop the lock immediately.                  │
//! │   install / load / clear swap the whole Arc under the write lock, so    │
//! │   a reader never sees new keys with old epochs or the reverse.          │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use parking_lot::RwLock;

use super::tuples::decrypt_epochs;
use super::{epoch_id_at, Epoch};
use crate::crypto::{KeyPair, PublicKeyBytes, SymmetricKey};
use crate::error::{Error, Result};

/// Key material bound at registration
pub struct KeyMaterial {
    /// Authentication key
    pub ka: SymmetricKey,
    /// Tuples encryption key
    pub kea: SymmetricKey,
    /// Device private key used for the registration ECDH
    pub private_key: KeyPair,
    /// Server public key the shared secret was computed against
    pub server_public_key: PublicKeyBytes,
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("server_public_key", &self.server_public_key)
            .finish_non_exhaustive()
    }
}

struct KeySet {
    material: Arc<KeyMaterial>,
    time_start: u64,
    epochs: Vec<Epoch>,
    contiguous: bool,
}

impl KeySet {
    fn new(material: Arc<KeyMaterial>, time_start: u64, mut epochs: Vec<Epoch>) -> Self {
        epochs.sort_by_key(|e| e.id);
        let contiguous = epochs
            .windows(2)
            .all(|pair| pair[0].id.checked_add(1) == Some(pair[1].id));
        Self {
            material,
            time_start,
            epochs,
            contiguous,
        }
    }

    fn lookup(&self, id: u32) -> Option<Epoch> {
        let first = self.epochs.first()?;
        if self.contiguous {
            let index = id.checked_sub(first.id)? as usize;
            return self.epochs.get(index).copied();
        }
        self.epochs
            .binary_search_by_key(&id, |e| e.id)
            .ok()
            .map(|i| self.epochs[i])
    }
}

/// Registration keys and the epoch horizon
pub struct EpochKeyManager {
    epoch_duration: u64,
    state: RwLock<Option<Arc<KeySet>>>,
}

impl EpochKeyManager {
    /// Create an empty manager
    pub fn new(epoch_duration: u64) -> Self {
        Self {
            epoch_duration,
            state: RwLock::new(None),
        }
    }

    /// Epoch duration in seconds
    pub fn epoch_duration(&self) -> u64 {
        self.epoch_duration
    }

    fn current(&self) -> Option<Arc<KeySet>> {
        self.state.read().clone()
    }

    /// Replace all key material and epochs at once
    pub fn install(&self, material: KeyMaterial, time_start: u64, epochs: Vec<Epoch>) {
        let count = epochs.len();
        let set = KeySet::new(Arc::new(material), time_start, epochs);
        *self.state.write() = Some(Arc::new(set));
        tracing::info!("Installed key material with {} epochs", count);
    }

    /// Decrypt a fresh tuples blob with the installed KEA and replace the horizon
    ///
    /// The key material is kept. On any error the previous horizon stays.
    pub fn load(&self, tuples_blob: &[u8], time_start: u64) -> Result<Vec<Epoch>> {
        let material = self.key_material().ok_or(Error::NotRegistered)?;
        let epochs = decrypt_epochs(&material.kea, tuples_blob, time_start, self.epoch_duration)?;
        self.replace_horizon(&material, time_start, epochs.clone())?;
        Ok(epochs)
    }

    /// Swap in an already decoded horizon for the same key material
    ///
    /// Fails with `Cancelled` when `material` is no longer the installed set,
    /// so a concurrent clear or re-registration always wins.
    pub fn replace_horizon(
        &self,
        material: &Arc<KeyMaterial>,
        time_start: u64,
        epochs: Vec<Epoch>,
    ) -> Result<()> {
        let count = epochs.len();
        let set = KeySet::new(material.clone(), time_start, epochs);
        {
            let mut state = self.state.write();
            match state.as_ref() {
                Some(live) if Arc::ptr_eq(&live.material, material) => {
                    *state = Some(Arc::new(set));
                }
                _ => return Err(Error::Cancelled),
            }
        }

        tracing::info!("Loaded {} epochs from refreshed tuples", count);
        Ok(())
    }

    /// Epoch current at `now`; `None` before the first epoch or past the horizon
    pub fn current_epoch(&self, now: u64) -> Option<Epoch> {
        let set = self.current()?;
        let id = epoch_id_at(now, set.time_start, self.epoch_duration)?;
        set.lookup(id)
    }

    /// Like [`Self::current_epoch`], but explains why nothing is current
    pub fn require_current_epoch(&self, now: u64) -> Result<Epoch> {
        let set = self.current().ok_or(Error::NotRegistered)?;
        let id = epoch_id_at(now, set.time_start, self.epoch_duration)
            .ok_or(Error::NoCurrentEpoch(now))?;

        if let Some(epoch) = set.lookup(id) {
            return Ok(epoch);
        }
        match set.epochs.last() {
            Some(last) if id > last.id => Err(Error::KeysExhausted),
            None => Err(Error::KeysExhausted),
            _ => Err(Error::NoCurrentEpoch(now)),
        }
    }

    /// Epoch by id
    pub fn get_epoch(&self, id: u32) -> Option<Epoch> {
        self.current()?.lookup(id)
    }

    /// Last epoch of the horizon
    pub fn get_last_epoch(&self) -> Option<Epoch> {
        self.current()?.epochs.last().copied()
    }

    /// Copy of the loaded horizon
    pub fn epochs(&self) -> Vec<Epoch> {
        self.current()
            .map(|set| set.epochs.clone())
            .unwrap_or_default()
    }

    /// Start of epoch 0, when registered
    pub fn time_start(&self) -> Option<u64> {
        self.current().map(|set| set.time_start)
    }

    /// Authentication key, when registered
    pub fn authentication_key(&self) -> Option<SymmetricKey> {
        self.current().map(|set| set.material.ka.clone())
    }

    /// Shared handle to the installed key material
    pub fn key_material(&self) -> Option<Arc<KeyMaterial>> {
        self.current().map(|set| set.material.clone())
    }

    /// Whether key material is installed
    pub fn is_registered(&self) -> bool {
        self.state.read().is_some()
    }

    /// Drop all key material and epochs
    pub fn clear(&self) {
        let had_keys = self.state.write().take().is_some();
        if had_keys {
            tracing::info!("Cleared key material and epochs");
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::encrypt;
    use crate::epoch::{encode_tuples, Ebid, Ecc};

    const START: u64 = 3_900_000_000;
    const DURATION: u64 = 900;

    fn material(kea: [u8; 32]) -> KeyMaterial {
        let pair = KeyPair::generate().unwrap();
        let public = pair.public_key_bytes();
        KeyMaterial {
            ka: SymmetricKey::from_bytes([1u8; 32]),
            kea: SymmetricKey::from_bytes(kea),
            private_key: pair,
            server_public_key: public,
        }
    }

    fn epochs(ids: impl IntoIterator<Item = u32>) -> Vec<Epoch> {
        ids.into_iter()
            .map(|id| {
                let mut ebid = [0u8; 8];
                ebid[4..].copy_from_slice(&id.to_be_bytes());
                Epoch {
                    id,
                    ebid: Ebid(ebid),
                    ecc: Ecc([0, 1]),
                    time: START + id as u64 * DURATION,
                }
            })
            .collect()
    }

    fn manager_with(ids: impl IntoIterator<Item = u32>) -> EpochKeyManager {
        let manager = EpochKeyManager::new(DURATION);
        manager.install(material([2u8; 32]), START, epochs(ids));
        manager
    }

    #[test]
    fn test_current_epoch_indexing() {
        let manager = manager_with(0..96);
        assert_eq!(manager.current_epoch(START).unwrap().id, 0);
        assert_eq!(manager.current_epoch(START + 899).unwrap().id, 0);
        assert_eq!(manager.current_epoch(START + 900).unwrap().id, 1);
        assert_eq!(manager.current_epoch(START + 95 * 900).unwrap().id, 95);
    }

    #[test]
    fn test_outside_horizon() {
        let manager = manager_with(0..96);
        assert!(manager.current_epoch(START - 1).is_none());
        assert!(manager.current_epoch(START + 96 * 900).is_none());
        assert!(matches!(
            manager.require_current_epoch(START + 96 * 900),
            Err(Error::KeysExhausted)
        ));
        assert!(matches!(
            manager.require_current_epoch(START - 1),
            Err(Error::NoCurrentEpoch(_))
        ));
    }

    #[test]
    fn test_unregistered() {
        let manager = EpochKeyManager::new(DURATION);
        assert!(!manager.is_registered());
        assert!(manager.current_epoch(START).is_none());
        assert!(matches!(
            manager.require_current_epoch(START),
            Err(Error::NotRegistered)
        ));
        assert!(matches!(manager.load(&[0u8; 64], START), Err(Error::NotRegistered)));
    }

    #[test]
    fn test_get_epoch_with_gaps() {
        let manager = manager_with([0, 1, 2, 10, 11]);
        assert_eq!(manager.get_epoch(10).unwrap().id, 10);
        assert!(manager.get_epoch(5).is_none());
        assert_eq!(manager.get_last_epoch().unwrap().id, 11);
        assert!(matches!(
            manager.require_current_epoch(START + 5 * 900),
            Err(Error::NoCurrentEpoch(_))
        ));
    }

    #[test]
    fn test_load_replaces_horizon() {
        let manager = manager_with(0..4);
        let kea = SymmetricKey::from_bytes([2u8; 32]);
        let blob = encrypt(&encode_tuples(&epochs(4..8)), &kea).unwrap();

        let loaded = manager.load(&blob, START).unwrap();
        assert_eq!(loaded.len(), 4);
        assert!(manager.get_epoch(0).is_none());
        assert_eq!(manager.get_epoch(7).unwrap().id, 7);
        assert!(manager.is_registered());
    }

    #[test]
    fn test_failed_load_keeps_horizon() {
        let manager = manager_with(0..4);
        let wrong = SymmetricKey::from_bytes([9u8; 32]);
        let blob = encrypt(&encode_tuples(&epochs(4..8)), &wrong).unwrap();

        assert!(manager.load(&blob, START).is_err());
        assert_eq!(manager.epochs().len(), 4);
    }

    #[test]
    fn test_install_replaces_everything() {
        let manager = manager_with(0..4);
        let before = manager.key_material().unwrap();
        manager.install(material([3u8; 32]), START + 900, epochs(0..2));

        let after = manager.key_material().unwrap();
        assert!(!Arc::ptr_eq(&before, &after));
        assert_eq!(manager.epochs().len(), 2);
        assert_eq!(manager.time_start(), Some(START + 900));
    }

    #[test]
    fn test_replace_horizon_loses_to_reinstall() {
        let manager = manager_with(0..4);
        let stale = manager.key_material().unwrap();
        manager.install(material([3u8; 32]), START, epochs(0..2));

        let result = manager.replace_horizon(&stale, START, epochs(0..8));
        assert!(matches!(result, Err(Error::Cancelled)));
        assert_eq!(manager.epochs().len(), 2);

        let live = manager.key_material().unwrap();
        manager.replace_horizon(&live, START, epochs(0..8)).unwrap();
        assert_eq!(manager.epochs().len(), 8);
    }

    #[test]
    fn test_clear() {
        let manager = manager_with(0..4);
        manager.clear();
        assert!(!manager.is_registered());
        assert!(manager.authentication_key().is_none());
        assert!(manager.epochs().is_empty());
    }
}
