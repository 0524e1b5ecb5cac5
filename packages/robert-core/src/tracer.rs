//! # Contact Tracer
//!
//! Facade wiring the protocol core together by explicit dependency injection.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          CONTACT TRACER                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │   TracerConfig   Clock   Storage   ServerClient   Radio                 │
//! │        │           │        │           │           │                   │
//! │        └───────────┴────────┴─────┬─────┴───────────┘                   │
//! │                                   ▼                                     │
//! │                           ContactTracer::new                            │
//! │                                   │                                     │
//! │         ┌─────────────────┬───────┴─────────┬──────────────────┐        │
//! │         ▼                 ▼                 ▼                  ▼        │
//! │   EpochKeyManager  LocalProximityStore  ProximityExchange   CallGate    │
//! │   (keys, epochs)   (encounter log)      Engine (radio)      (protocols) │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Applying Results
//!
//! Protocol results are applied in the same order everywhere: verify the
//! call was not cancelled, persist, then swap the in-memory state. A failure
//! at any step leaves the previous keys, epochs and log in place.

use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;

use crate::config::{ServerConfig, TracerConfig};
use crate::crypto::{generate_key_pair, KeyPair, PublicKeyBytes};
use crate::epoch::{decrypt_epochs, Epoch, EpochKeyManager, KeyMaterial};
use crate::error::{Error, Result};
use crate::protocol::registration::{self, complete_registration};
use crate::protocol::report::{self, VerificationCode};
use crate::protocol::status;
use crate::protocol::unregister;
use crate::protocol::{check_clock_skew, CallGate};
use crate::proximity::{
    EngineHandle, EngineSettings, EngineState, LocalProximity, LocalProximityStore,
    ProximityEvent, ProximityExchangeEngine, Radio, ToleranceFilter,
};
use crate::server::{CaptchaKind, RiskAssessment, ServerClient};
use crate::storage::{StatusRecord, Storage, StoredRegistration};
use crate::time::Clock;

/// Events emitted by the tracer
#[derive(Debug, Clone, PartialEq)]
pub enum TracerEvent {
    /// A registration was installed
    Registered {
        /// Start of epoch 0
        time_start: u64,
        /// Epochs in the horizon
        epoch_count: usize,
    },
    /// A status response carried a fresh horizon
    EpochsRenewed {
        /// Epochs in the new horizon
        epoch_count: usize,
    },
    /// A status request completed
    StatusUpdated(RiskAssessment),
    /// Encounters were reported
    Reported {
        /// Number of encounters uploaded
        encounter_count: usize,
    },
    /// The registration was deleted server-side and local data wiped
    Unregistered,
    /// Local data was wiped without contacting the server
    LocalDataCleared,
}

/// Entry point to the protocol core
pub struct ContactTracer {
    config: TracerConfig,
    clock: Arc<dyn Clock>,
    storage: Arc<dyn Storage>,
    server: Arc<dyn ServerClient>,
    server_public_key: PublicKeyBytes,
    keys: Arc<EpochKeyManager>,
    store: Arc<LocalProximityStore>,
    engine: ProximityExchangeEngine,
    gate: CallGate,
    server_config: RwLock<ServerConfig>,
    status: RwLock<Option<StatusRecord>>,
    event_tx: broadcast::Sender<TracerEvent>,
}

impl ContactTracer {
    /// Wire up the core from its collaborators
    ///
    /// Nothing is loaded from storage until [`Self::restore`] is called.
    pub fn new(
        config: TracerConfig,
        clock: Arc<dyn Clock>,
        storage: Arc<dyn Storage>,
        server: Arc<dyn ServerClient>,
        radio: Arc<dyn Radio>,
    ) -> Result<Self> {
        config.validate()?;
        let server_public_key = PublicKeyBytes::from_base64(&config.server_public_key)?;

        let keys = Arc::new(EpochKeyManager::new(config.epoch_duration_secs));
        let store = Arc::new(LocalProximityStore::new(
            storage.clone(),
            Box::new(ToleranceFilter::new(config.dedup_tolerance_secs)),
            config.retention_secs(),
        ));
        let engine = ProximityExchangeEngine::new(
            keys.clone(),
            store.clone(),
            radio,
            clock.clone(),
            EngineSettings::from_config(&config),
        );
        let gate = CallGate::new(config.network_timeout());
        let (event_tx, _) = broadcast::channel(64);

        Ok(Self {
            config,
            clock,
            storage,
            server,
            server_public_key,
            keys,
            store,
            engine,
            gate,
            server_config: RwLock::new(ServerConfig::default()),
            status: RwLock::new(None),
            event_tx,
        })
    }

    /// Load registration, encounters and last status from storage
    ///
    /// Returns whether a registration was found.
    pub fn restore(&self) -> Result<bool> {
        let encounters = self.store.restore()?;
        *self.status.write() = self.storage.load_status()?;

        let Some((registration, epochs)) = self.storage.load_registration()? else {
            tracing::info!("No stored registration ({} encounters restored)", encounters);
            return Ok(false);
        };

        let private_key = KeyPair::from_secret_bytes(&registration.private_key)?;
        let material = KeyMaterial {
            ka: registration.ka,
            kea: registration.kea,
            private_key,
            server_public_key: PublicKeyBytes(registration.server_public_key),
        };
        self.keys.install(material, registration.time_start, epochs);
        *self.server_config.write() = registration.server_config;

        tracing::info!("Restored registration ({} encounters)", encounters);
        Ok(true)
    }

    // ========================================================================
    // ACCESSORS
    // ========================================================================

    /// Configuration in use
    pub fn config(&self) -> &TracerConfig {
        &self.config
    }

    /// Subscribe to tracer events
    pub fn subscribe(&self) -> broadcast::Receiver<TracerEvent> {
        self.event_tx.subscribe()
    }

    /// Subscribe to proximity engine events
    pub fn proximity_events(&self) -> broadcast::Receiver<ProximityEvent> {
        self.engine.subscribe()
    }

    /// Handle for the platform radio callbacks
    pub fn engine_handle(&self) -> EngineHandle {
        self.engine.handle()
    }

    /// Proximity engine state
    pub fn engine_state(&self) -> EngineState {
        self.engine.state()
    }

    /// The proximity engine
    pub fn engine(&self) -> &ProximityExchangeEngine {
        &self.engine
    }

    /// Whether key material is installed
    pub fn is_registered(&self) -> bool {
        self.keys.is_registered()
    }

    /// Epoch current now, if any
    pub fn current_epoch(&self) -> Option<Epoch> {
        self.keys.current_epoch(self.clock.now_ntp())
    }

    /// Last assessment received from the server
    pub fn risk_assessment(&self) -> Option<RiskAssessment> {
        self.status.read().as_ref().map(|s| s.assessment.clone())
    }

    /// When the last status request completed, NTP seconds
    pub fn last_status_at(&self) -> Option<u64> {
        self.status.read().as_ref().map(|s| s.last_status_at)
    }

    /// Server configuration parameters
    pub fn server_config(&self) -> ServerConfig {
        self.server_config.read().clone()
    }

    /// Recorded encounters, ascending
    pub fn proximities(&self) -> Vec<LocalProximity> {
        self.store.snapshot()
    }

    /// Encounters collected in `[from, to]`
    pub fn query_proximities(&self, from: u64, to: u64) -> Vec<LocalProximity> {
        self.store.query(from, to)
    }

    // ========================================================================
    // PROXIMITY
    // ========================================================================

    /// Start advertising and scanning
    pub async fn start_proximity(&self) -> Result<()> {
        if !self.keys.is_registered() {
            return Err(Error::NotRegistered);
        }
        self.engine.start().await
    }

    /// Stop the radio
    pub async fn stop_proximity(&self) -> Result<()> {
        self.engine.stop().await
    }

    /// Drop encounters outside the retention window
    pub fn sweep_expired(&self) -> Result<usize> {
        self.store.sweep_expired(self.clock.now_ntp())
    }

    // ========================================================================
    // PROTOCOLS
    // ========================================================================

    /// Ask the server for a captcha challenge
    pub async fn generate_captcha(&self, kind: CaptchaKind, locale: &str) -> Result<String> {
        let call = registration::generate_captcha(self.server.as_ref(), kind, locale);
        tokio::time::timeout(self.config.network_timeout(), call)
            .await
            .map_err(|_| Error::Timeout("captcha request timed out".into()))?
    }

    /// Register with a solved captcha
    ///
    /// Replaces any previous registration, its epochs and status atomically.
    /// In-flight status or report calls are cancelled.
    pub async fn register(&self, captcha_id: &str, solution: &str) -> Result<()> {
        self.gate.cancel_all();
        let mut permit = self.gate.begin().await;

        let (private_key, public_key) = generate_key_pair()?;
        let result = permit
            .call(registration::register(
                self.server.as_ref(),
                captcha_id,
                solution,
                &public_key,
            ))
            .await?;

        let now = self.clock.now_ntp();
        check_clock_skew(result.server_time, now, self.config.max_clock_skew_secs)?;
        let enrollment = complete_registration(
            private_key,
            &self.server_public_key,
            &result,
            self.config.epoch_duration_secs,
        )?;
        permit.ensure_current()?;

        let stored = StoredRegistration {
            ka: enrollment.material.ka.clone(),
            kea: enrollment.material.kea.clone(),
            private_key: enrollment.material.private_key.secret_bytes(),
            server_public_key: enrollment.material.server_public_key.as_bytes().to_vec(),
            time_start: enrollment.time_start,
            server_config: enrollment.config.clone(),
            registered_at: now,
        };
        self.storage.save_registration(&stored, &enrollment.epochs)?;

        let epoch_count = enrollment.epochs.len();
        self.keys
            .install(enrollment.material, enrollment.time_start, enrollment.epochs);
        *self.server_config.write() = enrollment.config;
        *self.status.write() = None;

        tracing::info!("Registered with {} epochs", epoch_count);
        let _ = self.event_tx.send(TracerEvent::Registered {
            time_start: enrollment.time_start,
            epoch_count,
        });
        Ok(())
    }

    /// Request the exposure status with the epoch current now
    pub async fn request_status(&self) -> Result<RiskAssessment> {
        let mut permit = self.gate.try_begin()?;
        let now = self.clock.now_ntp();

        let outcome = permit
            .call(status::request_status(
                self.server.as_ref(),
                &self.keys,
                now,
                self.config.max_clock_skew_secs,
            ))
            .await?;
        permit.ensure_current()?;

        if let Some(tuples) = outcome.tuples.as_deref() {
            let material = self.keys.key_material().ok_or(Error::Cancelled)?;
            let time_start = outcome
                .time_start
                .or_else(|| self.keys.time_start())
                .ok_or(Error::NotRegistered)?;
            let epochs = decrypt_epochs(
                &material.kea,
                tuples,
                time_start,
                self.config.epoch_duration_secs,
            )?;

            self.storage.save_epochs(time_start, &epochs)?;
            let epoch_count = epochs.len();
            self.keys.replace_horizon(&material, time_start, epochs)?;
            let _ = self.event_tx.send(TracerEvent::EpochsRenewed { epoch_count });
        }

        if let Some(update) = outcome.config.as_ref() {
            let mut merged = self.server_config.read().clone();
            merged.merge(update);
            self.storage.save_server_config(&merged)?;
            *self.server_config.write() = merged;
        }

        let record = StatusRecord {
            last_status_at: now,
            assessment: outcome.assessment,
        };
        self.storage.save_status(&record)?;
        let assessment = record.assessment.clone();
        *self.status.write() = Some(record);

        let _ = self
            .event_tx
            .send(TracerEvent::StatusUpdated(assessment.clone()));
        Ok(assessment)
    }

    /// Report every recorded encounter with a verification code
    ///
    /// Returns the report validation token. Collection keeps running; stopping
    /// it and wiping keys afterwards is the caller's decision.
    pub async fn report(&self, code: &str) -> Result<String> {
        let code = VerificationCode::parse(code)?;
        let mut permit = self.gate.try_begin()?;
        let proximities = self.store.snapshot();

        let now = self.clock.now_ntp();
        let token = permit
            .call(report::report(
                self.server.as_ref(),
                self.config.wire_version,
                &code,
                &proximities,
                now,
                self.config.max_clock_skew_secs,
            ))
            .await?;
        permit.ensure_current()?;

        let _ = self.event_tx.send(TracerEvent::Reported {
            encounter_count: proximities.len(),
        });
        Ok(token)
    }

    /// Delete the registration server-side, then wipe all local data
    pub async fn unregister(&self) -> Result<()> {
        self.gate.cancel_all();
        let mut permit = self.gate.begin().await;

        let now = self.clock.now_ntp();
        permit
            .call(unregister::unregister(self.server.as_ref(), &self.keys, now))
            .await?;

        self.wipe().await?;
        let _ = self.event_tx.send(TracerEvent::Unregistered);
        Ok(())
    }

    /// Wipe keys, epochs, encounters and status without contacting the server
    pub async fn clear_local_data(&self) -> Result<()> {
        self.gate.cancel_all();
        let _permit = self.gate.begin().await;

        self.wipe().await?;
        let _ = self.event_tx.send(TracerEvent::LocalDataCleared);
        Ok(())
    }

    async fn wipe(&self) -> Result<()> {
        self.engine.stop().await?;
        self.keys.clear();
        self.store.clear()?;
        self.storage.clear_all()?;
        *self.server_config.write() = ServerConfig::default();
        *self.status.write() = None;
        tracing::info!("Local data wiped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::proximity::{HelloMessage, LoopbackRadio, RadioMeasurement};
    use crate::server::{InjectedFailure, MockServer, MockServerConfig};
    use crate::storage::MemoryStorage;
    use crate::time::ManualClock;

    const NOW: u64 = 3_900_000_000;

    struct Fixture {
        tracer: ContactTracer,
        server: MockServer,
        storage: Arc<MemoryStorage>,
        clock: Arc<ManualClock>,
    }

    fn fixture_with(server_config: MockServerConfig) -> Fixture {
        let clock = Arc::new(ManualClock::new(NOW));
        let server = MockServer::new(clock.clone(), server_config).unwrap();
        let storage = Arc::new(MemoryStorage::new());

        let config = TracerConfig {
            server_url: "http://localhost".into(),
            server_public_key: server.public_key().to_base64(),
            tick_interval_ms: 3_600_000,
            ..TracerConfig::default()
        };
        let tracer = ContactTracer::new(
            config,
            clock.clone(),
            storage.clone(),
            Arc::new(server.clone()),
            Arc::new(LoopbackRadio::new()),
        )
        .unwrap();

        Fixture {
            tracer,
            server,
            storage,
            clock,
        }
    }

    fn fixture() -> Fixture {
        fixture_with(MockServerConfig::default())
    }

    async fn register(f: &Fixture) {
        let captcha = f
            .tracer
            .generate_captcha(CaptchaKind::Image, "fr")
            .await
            .unwrap();
        f.tracer.register(&captcha, "robert").await.unwrap();
    }

    #[test]
    fn test_rejects_bad_server_key() {
        let config = TracerConfig {
            server_public_key: "not base64!".into(),
            ..TracerConfig::default()
        };
        let result = ContactTracer::new(
            config,
            Arc::new(ManualClock::new(NOW)),
            Arc::new(MemoryStorage::new()),
            Arc::new(
                MockServer::new(Arc::new(ManualClock::new(NOW)), MockServerConfig::default())
                    .unwrap(),
            ),
            Arc::new(LoopbackRadio::new()),
        );
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_register_installs_keys() {
        let f = fixture();
        let mut events = f.tracer.subscribe();
        assert!(!f.tracer.is_registered());

        register(&f).await;

        assert!(f.tracer.is_registered());
        assert_eq!(f.tracer.current_epoch().unwrap().id, 0);
        assert_eq!(f.tracer.server_config().data_retention_days(), Some(14));
        assert!(f.storage.load_registration().unwrap().is_some());
        assert!(matches!(
            events.recv().await.unwrap(),
            TracerEvent::Registered {
                epoch_count: 96,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_failed_registration_keeps_previous_keys() {
        let f = fixture();
        register(&f).await;
        let before = f.tracer.current_epoch().unwrap();

        f.storage.set_fail_writes(true);
        let captcha = f
            .tracer
            .generate_captcha(CaptchaKind::Image, "fr")
            .await
            .unwrap();
        assert!(f.tracer.register(&captcha, "robert").await.is_err());

        assert_eq!(f.tracer.current_epoch().unwrap(), before);
    }

    #[tokio::test]
    async fn test_restore_from_storage() {
        let f = fixture();
        register(&f).await;
        let epoch = f.tracer.current_epoch().unwrap();

        let again = ContactTracer::new(
            f.tracer.config().clone(),
            f.clock.clone(),
            f.storage.clone(),
            Arc::new(f.server.clone()),
            Arc::new(LoopbackRadio::new()),
        )
        .unwrap();
        assert!(again.restore().unwrap());
        assert_eq!(again.current_epoch().unwrap(), epoch);

        // Restored keys still authenticate with the server
        again.request_status().await.unwrap();
    }

    #[tokio::test]
    async fn test_status_persists_assessment() {
        let f = fixture();
        register(&f).await;
        f.server.set_risk_level_for_all(2.0);

        let assessment = f.tracer.request_status().await.unwrap();
        assert_eq!(assessment.risk_level, 2.0);
        assert!(assessment.declaration_token.is_some());
        assert_eq!(f.tracer.last_status_at(), Some(NOW));
        assert_eq!(
            f.storage.load_status().unwrap().unwrap().assessment,
            assessment
        );
    }

    #[tokio::test]
    async fn test_status_renews_horizon() {
        let f = fixture_with(MockServerConfig {
            renew_on_status: true,
            ..MockServerConfig::default()
        });
        register(&f).await;
        let before = f.tracer.current_epoch().unwrap();

        f.tracer.request_status().await.unwrap();

        let after = f.tracer.current_epoch().unwrap();
        assert_eq!(after.id, before.id);
        assert_ne!(after.ebid, before.ebid);
        let (_, stored) = f.storage.load_registration().unwrap().unwrap();
        assert!(stored.iter().any(|e| e.ebid == after.ebid));
    }

    #[tokio::test]
    async fn test_status_clock_misalignment() {
        let f = fixture();
        register(&f).await;
        f.server.fail_next(InjectedFailure::Code(-1));

        let err = f.tracer.request_status().await.unwrap_err();
        assert!(err.is_clock_misalignment());
        assert!(f.tracer.risk_assessment().is_none());
    }

    #[tokio::test]
    async fn test_report_clock_misalignment() {
        let f = fixture();
        register(&f).await;
        f.server.fail_next(InjectedFailure::Code(-1));

        let err = f.tracer.report("A1B2C3").await.unwrap_err();
        assert!(err.is_clock_misalignment());
        assert!(!matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_skewed_server_clock_fails_status_and_report() {
        let f = fixture();
        register(&f).await;
        f.server.set_clock_offset(7_200);

        let status = f.tracer.request_status().await.unwrap_err();
        assert!(status.is_clock_misalignment());

        let report = f
            .tracer
            .report("3f2504e0-4f89-11d3-9a0c-0305e82c3301")
            .await
            .unwrap_err();
        assert!(report.is_clock_misalignment());
    }

    #[tokio::test]
    async fn test_concurrent_status_rejected() {
        let f = fixture();
        register(&f).await;
        f.server.set_delay(Some(Duration::from_millis(200)));

        let (first, second) = tokio::join!(f.tracer.request_status(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            f.tracer.request_status().await
        });
        assert!(first.is_ok());
        assert!(matches!(second, Err(Error::OperationInProgress)));
    }

    #[tokio::test]
    async fn test_unregister_cancels_in_flight_status() {
        let f = fixture();
        register(&f).await;
        f.server.set_delay(Some(Duration::from_millis(300)));

        let (status, unregistered) = tokio::join!(f.tracer.request_status(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            f.tracer.unregister().await
        });
        assert!(matches!(status, Err(Error::Cancelled)));
        unregistered.unwrap();

        assert!(!f.tracer.is_registered());
        assert!(f.tracer.risk_assessment().is_none());
        assert_eq!(f.server.registration_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_code_never_reaches_server() {
        let f = fixture();
        register(&f).await;
        let err = f.tracer.report("nope").await.unwrap_err();
        assert!(matches!(err, Error::InvalidVerificationCode(_)));
        assert!(f.server.reports().is_empty());
    }

    #[tokio::test]
    async fn test_report_marks_peer_at_risk() {
        let alice = fixture();
        register(&alice).await;

        // Bob shares the server and the clock
        let storage = Arc::new(MemoryStorage::new());
        let bob = ContactTracer::new(
            alice.tracer.config().clone(),
            alice.clock.clone(),
            storage,
            Arc::new(alice.server.clone()),
            Arc::new(LoopbackRadio::new()),
        )
        .unwrap();
        let captcha = bob.generate_captcha(CaptchaKind::Image, "fr").await.unwrap();
        bob.register(&captcha, "robert").await.unwrap();

        // Alice hears Bob's hello
        bob.start_proximity().await.unwrap();
        alice.tracer.start_proximity().await.unwrap();
        let hello = bob.engine_handle().hello_message().unwrap();
        assert!(HelloMessage::from_bytes(&hello).is_ok());
        alice
            .tracer
            .engine_handle()
            .did_receive_hello(
                &hello,
                RadioMeasurement {
                    rssi: -60,
                    tx_power: Some(-8),
                },
            )
            .unwrap();
        alice.tracer.engine().flush().await.unwrap();
        assert_eq!(alice.tracer.proximities().len(), 1);

        alice.tracer.report("ABC123").await.unwrap();
        assert_eq!(alice.server.reports()[0].matched, 1);

        let assessment = bob.request_status().await.unwrap();
        assert!(assessment.is_at_risk());
        assert!(assessment.last_contact_date.is_some());

        bob.stop_proximity().await.unwrap();
        alice.tracer.stop_proximity().await.unwrap();
    }

    #[tokio::test]
    async fn test_clear_local_data() {
        let f = fixture();
        register(&f).await;
        f.tracer.clear_local_data().await.unwrap();

        assert!(!f.tracer.is_registered());
        assert!(f.storage.load_registration().unwrap().is_none());
        // The server still knows the device
        assert_eq!(f.server.registration_count(), 1);
    }

    #[tokio::test]
    async fn test_proximity_requires_registration() {
        let f = fixture();
        assert!(matches!(
            f.tracer.start_proximity().await,
            Err(Error::NotRegistered)
        ));
    }
}
