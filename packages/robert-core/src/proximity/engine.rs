//! # Proximity Exchange Engine
//!
//! Drives the radio from the epoch schedule and feeds received hellos into the
//! encounter log.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    PROXIMITY ENGINE                                     │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  ProximityExchangeEngine            engine task (tokio::spawn)          │
//! │  ───────────────────────            ──────────────────────────          │
//! │  start() ── spawn ─────────────────► loop {                             │
//! │  tick()  ── Tick ──┐                   select! {                        │
//! │  flush() ── Flush ─┤   mpsc              interval.tick() => on_tick     │
//! │                    ├──────────────────►  command       => dispatch      │
//! │  EngineHandle      │                   }                                │
//! │  did_receive_hello ┘ (try_send)        }                                │
//! │  hello_message() ◄── cached payload ◄── on_tick                         │
//! │                                                                         │
//! │  subscribe() ◄──────── broadcast<ProximityEvent> ◄── state changes     │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## States
//!
//! ```text
//!   Idle ──start/tick──► Active{epoch} ──hello──► ExchangeInProgress{epoch}
//!    ▲                     │   ▲                         │
//!    │                     │   └─────────────────────────┘
//!    └── keys exhausted ───┘
//! ```

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use super::hello::{HelloMessage, HELLO_MESSAGE_SIZE};
use super::radio::Radio;
use super::store::{AppendOutcome, LocalProximityStore};
use super::LocalProximity;
use crate::config::TracerConfig;
use crate::epoch::{Ebid, Epoch, EpochKeyManager};
use crate::error::{Error, Result};
use crate::time::Clock;

/// Engine tuning taken from [`TracerConfig`]
#[derive(Debug, Clone)]
pub struct EngineSettings {
    /// Tick period
    pub tick_interval: Duration,
    /// Sweep every N ticks (0 disables)
    pub sweep_every_ticks: u32,
    /// Subtracted from raw RSSI
    pub rx_compensation_gain: i32,
    /// Added to TX power
    pub tx_compensation_gain: i32,
    /// Used when the radio reports no TX power
    pub default_tx_power: i32,
    /// Command queue capacity
    pub queue_capacity: usize,
}

impl EngineSettings {
    /// Derive from the tracer configuration
    pub fn from_config(config: &TracerConfig) -> Self {
        Self {
            tick_interval: Duration::from_millis(config.tick_interval_ms),
            sweep_every_ticks: config.sweep_every_ticks,
            rx_compensation_gain: config.rx_compensation_gain,
            tx_compensation_gain: config.tx_compensation_gain,
            default_tx_power: config.default_tx_power,
            queue_capacity: config.engine_queue_capacity,
        }
    }
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self::from_config(&TracerConfig::default())
    }
}

/// Signal measurements reported by the radio with a payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RadioMeasurement {
    /// Raw received signal strength, dBm
    pub rssi: i32,
    /// TX power advertised by the peer, when present
    pub tx_power: Option<i32>,
}

/// Engine state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Not broadcasting
    #[default]
    Idle,
    /// Broadcasting the hello for `epoch_id`
    Active {
        /// Current epoch
        epoch_id: u32,
    },
    /// Processing a received hello
    ExchangeInProgress {
        /// Current epoch
        epoch_id: u32,
    },
}

impl EngineState {
    fn epoch_id(&self) -> Option<u32> {
        match self {
            EngineState::Idle => None,
            EngineState::Active { epoch_id } | EngineState::ExchangeInProgress { epoch_id } => {
                Some(*epoch_id)
            }
        }
    }
}

/// Why a received hello was not recorded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectionReason {
    /// Wrong length
    Malformed,
    /// Same encounter already recorded
    Duplicate,
    /// Outside the retention window
    OutOfWindow,
    /// Our own advertisement
    OwnHello,
    /// Engine was idle
    NotActive,
    /// Persisting the encounter failed
    StorageFailure,
}

/// Events emitted by the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProximityEvent {
    /// Engine task running
    Started,
    /// A new epoch became current
    EpochRotated {
        /// New epoch id
        epoch_id: u32,
    },
    /// No epoch is current; radio stopped until keys are refreshed
    KeysExhausted,
    /// An encounter was stored
    ProximityRecorded {
        /// Peer EBID
        ebid: Ebid,
    },
    /// A received hello was dropped
    ProximityRejected {
        /// Peer EBID, when the payload was long enough to carry one
        ebid: Option<Ebid>,
        /// Why
        reason: RejectionReason,
    },
    /// Retention sweep removed encounters
    Swept {
        /// Number removed
        removed: usize,
    },
    /// Engine task finished
    Stopped,
}

enum EngineCommand {
    Tick,
    HelloReceived {
        payload: Vec<u8>,
        measurement: RadioMeasurement,
        received_at: u64,
    },
    Flush(oneshot::Sender<()>),
    Shutdown,
}

impl std::fmt::Debug for EngineCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tick => write!(f, "Tick"),
            Self::HelloReceived {
                payload,
                received_at,
                ..
            } => f
                .debug_struct("HelloReceived")
                .field("payload_len", &payload.len())
                .field("received_at", received_at)
                .finish(),
            Self::Flush(_) => write!(f, "Flush"),
            Self::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// State shared between the engine, its task and radio handles
#[derive(Default)]
struct Shared {
    state: RwLock<EngineState>,
    hello: RwLock<Option<[u8; HELLO_MESSAGE_SIZE]>>,
    command_tx: RwLock<Option<mpsc::Sender<EngineCommand>>>,
}

impl Shared {
    fn sender(&self) -> Result<mpsc::Sender<EngineCommand>> {
        self.command_tx.read().clone().ok_or(Error::EngineNotRunning)
    }
}

// ============================================================================
// RADIO-FACING HANDLE
// ============================================================================

/// Cheap, cloneable handle given to the platform radio
///
/// No method performs crypto or waits on the engine task.
#[derive(Clone)]
pub struct EngineHandle {
    shared: Arc<Shared>,
    clock: Arc<dyn Clock>,
}

impl EngineHandle {
    /// Payload to advertise, if the engine is active
    pub fn hello_message(&self) -> Option<[u8; HELLO_MESSAGE_SIZE]> {
        *self.shared.hello.read()
    }

    /// EBID prefix of a received payload
    pub fn extract_ebid(&self, raw: &[u8]) -> Result<Ebid> {
        HelloMessage::extract_ebid(raw)
    }

    /// Queue a received payload for processing
    ///
    /// A full queue drops the payload; the peer will advertise again.
    pub fn did_receive_hello(&self, raw: &[u8], measurement: RadioMeasurement) -> Result<()> {
        let sender = self.shared.sender()?;
        let command = EngineCommand::HelloReceived {
            payload: raw.to_vec(),
            measurement,
            received_at: self.clock.now_ntp(),
        };

        match sender.try_send(command) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                tracing::warn!("Proximity queue full, dropping received hello");
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(Error::EngineNotRunning),
        }
    }
}

// ============================================================================
// ENGINE
// ============================================================================

/// Proximity exchange engine
pub struct ProximityExchangeEngine {
    keys: Arc<EpochKeyManager>,
    store: Arc<LocalProximityStore>,
    radio: Arc<dyn Radio>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    shared: Arc<Shared>,
    event_tx: broadcast::Sender<ProximityEvent>,
    running: Arc<RwLock<bool>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl ProximityExchangeEngine {
    /// Create a stopped engine
    pub fn new(
        keys: Arc<EpochKeyManager>,
        store: Arc<LocalProximityStore>,
        radio: Arc<dyn Radio>,
        clock: Arc<dyn Clock>,
        settings: EngineSettings,
    ) -> Self {
        let (event_tx, _) = broadcast::channel(256);
        Self {
            keys,
            store,
            radio,
            clock,
            settings,
            shared: Arc::new(Shared::default()),
            event_tx,
            running: Arc::new(RwLock::new(false)),
            task: Mutex::new(None),
        }
    }

    /// Handle for the platform radio callbacks
    pub fn handle(&self) -> EngineHandle {
        EngineHandle {
            shared: self.shared.clone(),
            clock: self.clock.clone(),
        }
    }

    /// Subscribe to engine events
    pub fn subscribe(&self) -> broadcast::Receiver<ProximityEvent> {
        self.event_tx.subscribe()
    }

    /// Current state
    pub fn state(&self) -> EngineState {
        *self.shared.state.read()
    }

    /// Check if the engine task is running
    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Start the engine task
    ///
    /// The first tick runs before this returns, so an engine with a current
    /// epoch is already `Active` afterwards.
    pub async fn start(&self) -> Result<()> {
        {
            let mut running = self.running.write();
            if *running {
                return Err(Error::EngineAlreadyRunning);
            }
            *running = true;
        }

        tracing::info!("Starting proximity engine...");

        let (command_tx, command_rx) = mpsc::channel(self.settings.queue_capacity);
        *self.shared.command_tx.write() = Some(command_tx);

        let mut engine_loop = EngineLoop {
            keys: self.keys.clone(),
            store: self.store.clone(),
            radio: self.radio.clone(),
            clock: self.clock.clone(),
            settings: self.settings.clone(),
            shared: self.shared.clone(),
            event_tx: self.event_tx.clone(),
            ticks: 0,
            current: None,
            exhausted: false,
        };

        let _ = self.event_tx.send(ProximityEvent::Started);
        engine_loop.on_tick();

        let handle = tokio::spawn(engine_loop.run(command_rx));
        *self.task.lock() = Some(handle);

        tracing::info!("Proximity engine started");
        Ok(())
    }

    /// Stop the engine task and the radio
    pub async fn stop(&self) -> Result<()> {
        if !self.is_running() {
            return Ok(());
        }

        tracing::info!("Stopping proximity engine...");

        let sender = self.shared.command_tx.write().take();
        if let Some(sender) = sender {
            let _ = sender.send(EngineCommand::Shutdown).await;
        }

        let handle = self.task.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                tracing::error!("Proximity engine task failed: {}", e);
            }
        }

        *self.running.write() = false;
        tracing::info!("Proximity engine stopped");
        Ok(())
    }

    /// Run a tick now instead of waiting for the interval
    pub async fn tick(&self) -> Result<()> {
        self.shared
            .sender()?
            .send(EngineCommand::Tick)
            .await
            .map_err(|_| Error::EngineNotRunning)
    }

    /// Wait until every command queued so far has been processed
    pub async fn flush(&self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        self.shared
            .sender()?
            .send(EngineCommand::Flush(tx))
            .await
            .map_err(|_| Error::EngineNotRunning)?;
        rx.await.map_err(|_| Error::EngineNotRunning)
    }
}

// ============================================================================
// ENGINE TASK
// ============================================================================

struct EngineLoop {
    keys: Arc<EpochKeyManager>,
    store: Arc<LocalProximityStore>,
    radio: Arc<dyn Radio>,
    clock: Arc<dyn Clock>,
    settings: EngineSettings,
    shared: Arc<Shared>,
    event_tx: broadcast::Sender<ProximityEvent>,
    ticks: u64,
    current: Option<Epoch>,
    exhausted: bool,
}

impl EngineLoop {
    async fn run(mut self, mut command_rx: mpsc::Receiver<EngineCommand>) {
        let period = self.settings.tick_interval;
        let mut interval = tokio::time::interval_at(Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = interval.tick() => self.on_tick(),
                command = command_rx.recv() => match command {
                    Some(EngineCommand::Tick) => self.on_tick(),
                    Some(EngineCommand::HelloReceived { payload, measurement, received_at }) => {
                        self.on_hello(&payload, measurement, received_at);
                    }
                    Some(EngineCommand::Flush(reply)) => {
                        let _ = reply.send(());
                    }
                    Some(EngineCommand::Shutdown) | None => break,
                },
            }
        }

        self.go_idle();
        let _ = self.event_tx.send(ProximityEvent::Stopped);
        tracing::debug!("Proximity engine loop exited");
    }

    fn set_state(&self, state: EngineState) {
        *self.shared.state.write() = state;
    }

    fn go_idle(&mut self) {
        if let Err(e) = self.radio.stop() {
            tracing::error!("Failed to stop radio: {}", e);
        }
        *self.shared.hello.write() = None;
        self.current = None;
        self.set_state(EngineState::Idle);
    }

    fn on_tick(&mut self) {
        self.ticks += 1;
        let now = self.clock.now_ntp();

        let epoch = self.keys.current_epoch(now);
        let ka = self.keys.authentication_key();

        match (epoch, ka) {
            (Some(epoch), Some(ka)) => {
                let hello = match HelloMessage::build(&epoch, &ka, now) {
                    Ok(hello) => hello,
                    Err(e) => {
                        tracing::error!("Failed to build hello for epoch {}: {}", epoch.id, e);
                        return;
                    }
                };
                *self.shared.hello.write() = Some(hello.to_bytes());
                self.exhausted = false;

                if self.current.map(|c| c.id) != Some(epoch.id) {
                    tracing::info!("Epoch {} is now current", epoch.id);
                    let _ = self
                        .event_tx
                        .send(ProximityEvent::EpochRotated { epoch_id: epoch.id });
                }
                self.current = Some(epoch);
                self.set_state(EngineState::Active { epoch_id: epoch.id });

                if let Err(e) = self.radio.start_advertising() {
                    tracing::error!("Failed to start advertising: {}", e);
                }
                if let Err(e) = self.radio.start_scanning() {
                    tracing::error!("Failed to start scanning: {}", e);
                }
            }
            _ => {
                if !self.exhausted {
                    tracing::warn!("No current epoch at {}, stopping radio", now);
                    self.go_idle();
                    self.exhausted = true;
                    let _ = self.event_tx.send(ProximityEvent::KeysExhausted);
                }
            }
        }

        let every = self.settings.sweep_every_ticks as u64;
        if every > 0 && self.ticks % every == 0 {
            match self.store.sweep_expired(now) {
                Ok(0) => {}
                Ok(removed) => {
                    let _ = self.event_tx.send(ProximityEvent::Swept { removed });
                }
                Err(e) => tracing::error!("Retention sweep failed: {}", e),
            }
        }
    }

    fn reject(&self, ebid: Option<Ebid>, reason: RejectionReason) {
        let _ = self
            .event_tx
            .send(ProximityEvent::ProximityRejected { ebid, reason });
    }

    fn on_hello(&mut self, payload: &[u8], measurement: RadioMeasurement, received_at: u64) {
        let Some(epoch_id) = self.shared.state.read().epoch_id() else {
            tracing::debug!("Dropping hello received while idle");
            self.reject(HelloMessage::extract_ebid(payload).ok(), RejectionReason::NotActive);
            return;
        };

        let hello = match HelloMessage::from_bytes(payload) {
            Ok(hello) => hello,
            Err(e) => {
                tracing::warn!("Dropping hello: {}", e);
                self.reject(
                    HelloMessage::extract_ebid(payload).ok(),
                    RejectionReason::Malformed,
                );
                return;
            }
        };

        if self.current.map(|c| c.ebid) == Some(hello.ebid) {
            self.reject(Some(hello.ebid), RejectionReason::OwnHello);
            return;
        }

        self.set_state(EngineState::ExchangeInProgress { epoch_id });

        let record = LocalProximity {
            ebid: hello.ebid,
            ecc: hello.ecc,
            mac: hello.mac,
            collected_at: received_at,
            rssi_calibrated: measurement
                .rssi
                .saturating_sub(self.settings.rx_compensation_gain),
            tx_power_calibrated: measurement
                .tx_power
                .unwrap_or(self.settings.default_tx_power)
                .saturating_add(self.settings.tx_compensation_gain),
            peer_time: hello.time,
        };

        match self.store.append(record, self.clock.now_ntp()) {
            Ok(AppendOutcome::Accepted) => {
                let _ = self
                    .event_tx
                    .send(ProximityEvent::ProximityRecorded { ebid: hello.ebid });
            }
            Ok(AppendOutcome::Duplicate) => {
                self.reject(Some(hello.ebid), RejectionReason::Duplicate);
            }
            Ok(AppendOutcome::OutOfWindow) => {
                self.reject(Some(hello.ebid), RejectionReason::OutOfWindow);
            }
            Err(e) => {
                tracing::error!("Failed to record encounter: {}", e);
                self.reject(Some(hello.ebid), RejectionReason::StorageFailure);
            }
        }

        self.set_state(EngineState::Active { epoch_id });
    }
}

// ============================================================================
// TESTS
// ============================================================================
