//! # Local Proximity Store
//!
//! The encounter log. Every record lies inside the retention window and no two
//! records describe the same encounter.
//!
//! ```text
//! append(record, now)
//!   │
//!   ├─ collected_at outside [now − retention, now]  → OutOfWindow
//!   ├─ filter says duplicate of a record
//!   │  with the same EBID                            → Duplicate
//!   ├─ storage.save_proximity() fails                → Err (memory unchanged)
//!   └─ insert into time index + EBID index           → Accepted
//! ```
//!
//! One `RwLock` guards both indexes; the storage write happens under the write
//! lock, so concurrent appends of the same encounter resolve to one record.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;

use parking_lot::RwLock;

use super::LocalProximity;
use crate::epoch::Ebid;
use crate::error::Result;
use crate::storage::Storage;

/// Result of an append
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Stored
    Accepted,
    /// Same encounter already stored
    Duplicate,
    /// Outside the retention window
    OutOfWindow,
}

/// Decides whether a candidate repeats an existing encounter
pub trait ProximityFilter: Send + Sync {
    /// `existing` and `candidate` always share an EBID
    fn is_duplicate(&self, existing: &LocalProximity, candidate: &LocalProximity) -> bool;
}

/// Same EBID with peer times at most `tolerance_secs` apart
#[derive(Debug, Clone, Copy)]
pub struct ToleranceFilter {
    tolerance_secs: u64,
}

impl ToleranceFilter {
    /// Create with a tolerance in seconds
    pub fn new(tolerance_secs: u64) -> Self {
        Self { tolerance_secs }
    }
}

impl ProximityFilter for ToleranceFilter {
    fn is_duplicate(&self, existing: &LocalProximity, candidate: &LocalProximity) -> bool {
        existing.ebid == candidate.ebid
            && (existing.peer_time as u64).abs_diff(candidate.peer_time as u64)
                <= self.tolerance_secs
    }
}

/// (collected_at, insertion sequence)
type RecordKey = (u64, u64);

#[derive(Default)]
struct StoreInner {
    records: BTreeMap<RecordKey, LocalProximity>,
    by_ebid: HashMap<Ebid, BTreeSet<RecordKey>>,
    next_seq: u64,
}

impl StoreInner {
    fn insert(&mut self, record: LocalProximity) {
        let key = (record.collected_at, self.next_seq);
        self.next_seq += 1;
        self.by_ebid.entry(record.ebid).or_default().insert(key);
        self.records.insert(key, record);
    }

    fn remove_before(&mut self, before: u64) -> usize {
        let kept = self.records.split_off(&(before, 0));
        let removed = std::mem::replace(&mut self.records, kept);

        for (key, record) in &removed {
            if let Some(keys) = self.by_ebid.get_mut(&record.ebid) {
                keys.remove(key);
                if keys.is_empty() {
                    self.by_ebid.remove(&record.ebid);
                }
            }
        }
        removed.len()
    }
}

/// Encounter log with write-through persistence
pub struct LocalProximityStore {
    inner: RwLock<StoreInner>,
    storage: Arc<dyn Storage>,
    filter: Box<dyn ProximityFilter>,
    retention_secs: u64,
}

impl LocalProximityStore {
    /// Create an empty store
    pub fn new(
        storage: Arc<dyn Storage>,
        filter: Box<dyn ProximityFilter>,
        retention_secs: u64,
    ) -> Self {
        Self {
            inner: RwLock::new(StoreInner::default()),
            storage,
            filter,
            retention_secs,
        }
    }

    /// Retention window in seconds
    pub fn retention_secs(&self) -> u64 {
        self.retention_secs
    }

    /// Add an encounter observed at `now`
    pub fn append(&self, record: LocalProximity, now: u64) -> Result<AppendOutcome> {
        let window_start = now.saturating_sub(self.retention_secs);
        if record.collected_at < window_start || record.collected_at > now {
            tracing::warn!(
                "Rejected encounter {:?} collected at {} (window {}..={})",
                record.ebid,
                record.collected_at,
                window_start,
                now
            );
            return Ok(AppendOutcome::OutOfWindow);
        }

        let mut inner = self.inner.write();

        let duplicate = inner.by_ebid.get(&record.ebid).is_some_and(|keys| {
            keys.iter()
                .filter_map(|key| inner.records.get(key))
                .any(|existing| self.filter.is_duplicate(existing, &record))
        });
        if duplicate {
            #[cfg(feature = "verbose-logging")]
            tracing::debug!(
                "Duplicate encounter {:?} at peer time {}",
                record.ebid,
                record.peer_time
            );
            return Ok(AppendOutcome::Duplicate);
        }

        self.storage.save_proximity(&record).map_err(|e| {
            tracing::error!("Failed to persist encounter: {}", e);
            e
        })?;

        tracing::debug!(
            "Recorded encounter {:?} (rssi {}, tx {})",
            record.ebid,
            record.rssi_calibrated,
            record.tx_power_calibrated
        );
        inner.insert(record);
        Ok(AppendOutcome::Accepted)
    }

    /// Encounters with `from <= collected_at <= to`, ascending
    pub fn query(&self, from: u64, to: u64) -> Vec<LocalProximity> {
        if from > to {
            return Vec::new();
        }
        self.inner
            .read()
            .records
            .range((from, 0)..=(to, u64::MAX))
            .map(|(_, record)| record.clone())
            .collect()
    }

    /// Remove encounters collected before `before`; returns how many went
    pub fn sweep(&self, before: u64) -> Result<usize> {
        let mut inner = self.inner.write();
        self.storage.delete_proximities_before(before)?;
        let removed = inner.remove_before(before);
        if removed > 0 {
            tracing::info!("Swept {} encounters older than {}", removed, before);
        }
        Ok(removed)
    }

    /// Sweep everything outside the retention window at `now`
    pub fn sweep_expired(&self, now: u64) -> Result<usize> {
        self.sweep(now.saturating_sub(self.retention_secs))
    }

    /// Remove every encounter
    pub fn clear(&self) -> Result<()> {
        let mut inner = self.inner.write();
        self.storage.clear_proximities()?;
        *inner = StoreInner::default();
        Ok(())
    }

    /// All encounters, ascending
    pub fn snapshot(&self) -> Vec<LocalProximity> {
        self.inner.read().records.values().cloned().collect()
    }

    /// Number of encounters
    pub fn len(&self) -> usize {
        self.inner.read().records.len()
    }

    /// Whether the log is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reload from storage, replacing memory
    pub fn restore(&self) -> Result<usize> {
        let records = self.storage.load_proximities()?;
        let mut inner = self.inner.write();
        *inner = StoreInner::default();
        for record in records {
            inner.insert(record);
        }
        Ok(inner.records.len())
    }
}

// ============================================================================
// TESTS
// ============================================================================
