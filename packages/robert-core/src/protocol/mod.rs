//! # Server Protocols
//!
//! The four authenticated interactions with the server, plus the call gate
//! that serializes them.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          PROTOCOL LAYER                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  registration   captcha ─► register(pubkey) ─► ECDH ─► KA/KEA ─► tuples │
//! │  status         sign(0x02, current epoch) ─► assessment (+ new tuples)  │
//! │  report         classify code ─► group encounters ─► validation token   │
//! │  unregister     sign(0x03, current epoch) ─► ack                        │
//! │                                                                         │
//! │  ┌───────────────────────────────────────────────────────────────────┐  │
//! │  │ CallGate                                                          │  │
//! │  │  • one status/report at a time (second caller: in progress)       │  │
//! │  │  • every call bounded by the network timeout                      │  │
//! │  │  • cancel_all() aborts in-flight calls; results are discarded     │  │
//! │  └───────────────────────────────────────────────────────────────────┘  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! The functions here talk to a [`ServerClient`](crate::server::ServerClient)
//! and return normalized results. Applying those results to keys, storage and
//! the encounter log is the job of [`crate::ContactTracer`].

pub mod registration;
pub mod report;
pub mod status;
pub mod unregister;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{watch, Mutex, OwnedMutexGuard};

use crate::epoch::EpochKeyManager;
use crate::error::{Error, Result};
use crate::server::wire::AuthenticatedRequest;

// ============================================================================
// CALL GATE
// ============================================================================

/// Serializes protocol calls and carries their cancellation signal
#[derive(Debug)]
pub struct CallGate {
    inflight: Arc<Mutex<()>>,
    generation: watch::Sender<u64>,
    timeout: Duration,
}

/// Exclusive right to run one protocol call
///
/// Holds the gate until dropped.
#[derive(Debug)]
pub struct CallPermit {
    _guard: OwnedMutexGuard<()>,
    generation: u64,
    cancelled: watch::Receiver<u64>,
    timeout: Duration,
}

impl CallGate {
    /// Create a gate whose calls time out after `timeout`
    pub fn new(timeout: Duration) -> Self {
        let (generation, _) = watch::channel(0);
        Self {
            inflight: Arc::new(Mutex::new(())),
            generation,
            timeout,
        }
    }

    /// Take the gate, failing if another call holds it
    pub fn try_begin(&self) -> Result<CallPermit> {
        let guard = self
            .inflight
            .clone()
            .try_lock_owned()
            .map_err(|_| Error::OperationInProgress)?;
        Ok(self.permit(guard))
    }

    /// Take the gate, waiting for the current holder
    pub async fn begin(&self) -> CallPermit {
        let guard = self.inflight.clone().lock_owned().await;
        self.permit(guard)
    }

    /// Abort every call started before now
    pub fn cancel_all(&self) {
        self.generation.send_modify(|g| *g = g.wrapping_add(1));
        tracing::debug!("Cancelled in-flight protocol calls");
    }

    /// Whether a call currently holds the gate
    pub fn is_busy(&self) -> bool {
        self.inflight.try_lock().is_err()
    }

    fn permit(&self, guard: OwnedMutexGuard<()>) -> CallPermit {
        let mut cancelled = self.generation.subscribe();
        let generation = *cancelled.borrow_and_update();
        CallPermit {
            _guard: guard,
            generation,
            cancelled,
            timeout: self.timeout,
        }
    }
}

impl CallPermit {
    /// Run `call` under the timeout, aborting on cancellation
    pub async fn call<F, T>(&mut self, call: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let timeout = self.timeout;
        tokio::select! {
            biased;
            _ = self.cancelled.changed() => Err(Error::Cancelled),
            result = tokio::time::timeout(timeout, call) => match result {
                Ok(result) => result,
                Err(_) => Err(Error::Timeout(format!("server call exceeded {:?}", timeout))),
            },
        }
    }

    /// Fail with `Cancelled` if the gate was cancelled since this permit was issued
    pub fn ensure_current(&self) -> Result<()> {
        if *self.cancelled.borrow() != self.generation {
            return Err(Error::Cancelled);
        }
        Ok(())
    }
}

// ============================================================================
// SHARED HELPERS
// ============================================================================

/// Sign an authenticated request with the epoch current at `now`
///
/// Never falls back to a cached or neighbouring epoch.
pub fn sign_current(keys: &EpochKeyManager, mac_prefix: u8, now: u64) -> Result<AuthenticatedRequest> {
    let epoch = keys.require_current_epoch(now)?;
    let ka = keys.authentication_key().ok_or(Error::NotRegistered)?;
    AuthenticatedRequest::sign(mac_prefix, &epoch, &ka, now)
}

/// Compare the server clock with the local clock
pub fn check_clock_skew(server_time: Option<u64>, local_time: u64, max_skew_secs: u64) -> Result<()> {
    let Some(server_time) = server_time else {
        return Ok(());
    };
    let skew = server_time as i64 - local_time as i64;
    if skew.unsigned_abs() > max_skew_secs {
        tracing::warn!("Clock skew of {}s exceeds {}s", skew, max_skew_secs);
        return Err(Error::ClockMisalignment {
            skew_secs: Some(skew),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{prefix, KeyPair, SymmetricKey};
    use crate::epoch::{Ebid, Ecc, Epoch, KeyMaterial};

    #[test]
    fn test_clock_skew() {
        assert!(check_clock_skew(None, 1_000, 10).is_ok());
        assert!(check_clock_skew(Some(1_010), 1_000, 10).is_ok());
        assert!(check_clock_skew(Some(990), 1_000, 10).is_ok());

        let err = check_clock_skew(Some(900), 1_000, 10).unwrap_err();
        assert!(matches!(
            err,
            Error::ClockMisalignment {
                skew_secs: Some(-100)
            }
        ));
    }

    #[tokio::test]
    async fn test_gate_rejects_second_call() {
        let gate = CallGate::new(Duration::from_secs(5));
        let first = gate.try_begin().unwrap();
        assert!(gate.is_busy());
        assert!(matches!(gate.try_begin(), Err(Error::OperationInProgress)));

        drop(first);
        assert!(!gate.is_busy());
        assert!(gate.try_begin().is_ok());
    }

    #[tokio::test]
    async fn test_gate_timeout() {
        let gate = CallGate::new(Duration::from_millis(50));
        let mut permit = gate.try_begin().unwrap();

        let result: Result<()> = permit
            .call(async {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Timeout(_))));
    }

    #[tokio::test]
    async fn test_gate_cancellation() {
        let gate = Arc::new(CallGate::new(Duration::from_secs(30)));
        let mut permit = gate.try_begin().unwrap();

        let canceller = gate.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            canceller.cancel_all();
        });

        let result: Result<()> = permit
            .call(async {
                tokio::time::sleep(Duration::from_secs(10)).await;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(matches!(permit.ensure_current(), Err(Error::Cancelled)));

        drop(permit);
        let fresh = gate.begin().await;
        assert!(fresh.ensure_current().is_ok());
    }

    #[test]
    fn test_sign_current_uses_live_epoch() {
        let keys = EpochKeyManager::new(900);
        assert!(matches!(
            sign_current(&keys, prefix::STATUS, 1_000),
            Err(Error::NotRegistered)
        ));

        let pair = KeyPair::generate().unwrap();
        let public = pair.public_key_bytes();
        let epochs = (0..4)
            .map(|id| Epoch {
                id,
                ebid: Ebid([id as u8; 8]),
                ecc: Ecc([0, 0]),
                time: 1_000 + id as u64 * 900,
            })
            .collect();
        keys.install(
            KeyMaterial {
                ka: SymmetricKey::from_bytes([3u8; 32]),
                kea: SymmetricKey::from_bytes([4u8; 32]),
                private_key: pair,
                server_public_key: public,
            },
            1_000,
            epochs,
        );

        let request = sign_current(&keys, prefix::STATUS, 1_000 + 2 * 900 + 5).unwrap();
        assert_eq!(request.epoch_id, 2);

        assert!(matches!(
            sign_current(&keys, prefix::STATUS, 1_000 + 10 * 900),
            Err(Error::KeysExhausted)
        ));
    }
}
