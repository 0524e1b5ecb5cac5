//! In-memory ROBERT server.
//!
//! Performs the server side of every protocol for real: ECDH with the device
//! key, KA/KEA derivation, tuple generation and encryption, MAC and epoch
//! checks on authenticated requests, and exposure marking when a report
//! carries a hello from another registered device. Responses go through the
//! versioned JSON bodies in [`super::wire`] so both sides of the wire format
//! are exercised.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rand::Rng;
use uuid::Uuid;

use super::wire::{
    truncate_time, AuthenticatedRequest, CaptchaResponse, RegisterRequest, RegisterResponse,
    ReportRequest, ReportResponse, StatusResponse,
};
use super::{
    CaptchaKind, RegistrationResult, ReportOutcome, RiskAssessment, ServerClient, StatusOutcome,
};
use crate::config::{ConfigParam, ServerConfig, WireVersion, PARAM_DATA_RETENTION};
use crate::crypto::{
    derive_registration_keys, encrypt, prefix, verify_mac, KeyPair, PublicKeyBytes, SymmetricKey,
};
use crate::epoch::{encode_tuples, epoch_id_at, Ebid, Ecc, Epoch};
use crate::error::{Error, Result, SERVER_CODE_CLOCK_MISALIGNMENT};
use crate::time::{ntp_to_datetime, Clock, SECONDS_PER_DAY};

/// Behaviour of the mock server
#[derive(Debug, Clone)]
pub struct MockServerConfig {
    /// Wire version used to render responses
    pub version: WireVersion,
    /// Epoch duration in seconds
    pub epoch_duration: u64,
    /// Days of epochs issued at registration and renewal
    pub horizon_days: u32,
    /// Expected captcha solution
    pub captcha_solution: String,
    /// Accepted distance between the request epoch and the server epoch
    pub epoch_tolerance: u32,
    /// Accepted distance between the request time and the server clock
    pub max_time_skew_secs: u32,
    /// Risk level given to a registration seen in a report
    pub exposed_risk_level: f32,
    /// Issue a fresh horizon, starting at the current epoch, with every status response
    pub renew_on_status: bool,
    /// Parameters returned at registration
    pub server_config: ServerConfig,
}

impl Default for MockServerConfig {
    fn default() -> Self {
        Self {
            version: WireVersion::V4,
            epoch_duration: 900,
            horizon_days: 1,
            captcha_solution: "robert".into(),
            epoch_tolerance: 0,
            max_time_skew_secs: 300,
            exposed_risk_level: 4.0,
            renew_on_status: false,
            server_config: ServerConfig::new(vec![ConfigParam {
                name: PARAM_DATA_RETENTION.into(),
                value: serde_json::json!(14),
            }]),
        }
    }
}

/// A report as received by the mock
#[derive(Debug, Clone)]
pub struct RecordedReport {
    /// The request body
    pub request: ReportRequest,
    /// Server time at reception, NTP seconds
    pub received_at: u64,
    /// Hellos that matched a registered device and carried a valid MAC
    pub matched: usize,
}

/// Failure injected into the next call
#[derive(Debug, Clone)]
pub enum InjectedFailure {
    /// Answer with a protocol error code
    Code(i32),
    /// Fail at the transport level
    Network,
}

struct MockRegistration {
    ka: SymmetricKey,
    kea: SymmetricKey,
    time_start: u64,
    epochs: Vec<Epoch>,
    risk_level: f32,
    last_contact: Option<u64>,
}

#[derive(Default)]
struct MockState {
    captchas: HashSet<String>,
    registrations: HashMap<u64, MockRegistration>,
    by_ebid: HashMap<Ebid, u64>,
    next_id: u64,
    reports: Vec<RecordedReport>,
    used_codes: HashSet<String>,
    fail_next: Option<InjectedFailure>,
    clock_offset: i64,
    delay: Option<Duration>,
    status_calls: u32,
}

/// In-memory server implementing [`ServerClient`]
#[derive(Clone)]
pub struct MockServer {
    state: Arc<Mutex<MockState>>,
    key_pair: Arc<KeyPair>,
    clock: Arc<dyn Clock>,
    config: MockServerConfig,
}

impl MockServer {
    /// Create a server with a fresh long-term key
    pub fn new(clock: Arc<dyn Clock>, config: MockServerConfig) -> Result<Self> {
        Ok(Self {
            state: Arc::new(Mutex::new(MockState::default())),
            key_pair: Arc::new(KeyPair::generate()?),
            clock,
            config,
        })
    }

    /// Server long-term public key
    pub fn public_key(&self) -> PublicKeyBytes {
        self.key_pair.public_key_bytes()
    }

    /// Mock configuration
    pub fn config(&self) -> &MockServerConfig {
        &self.config
    }

    /// Shift the server clock relative to the shared clock
    pub fn set_clock_offset(&self, secs: i64) {
        self.state.lock().clock_offset = secs;
    }

    /// Delay every response
    pub fn set_delay(&self, delay: Option<Duration>) {
        self.state.lock().delay = delay;
    }

    /// Fail the next call
    pub fn fail_next(&self, failure: InjectedFailure) {
        self.state.lock().fail_next = Some(failure);
    }

    /// Force the risk level of every registration
    pub fn set_risk_level_for_all(&self, level: f32) {
        for registration in self.state.lock().registrations.values_mut() {
            registration.risk_level = level;
        }
    }

    /// Number of live registrations
    pub fn registration_count(&self) -> usize {
        self.state.lock().registrations.len()
    }

    /// Whether `ebid` belongs to a live registration
    pub fn knows_ebid(&self, ebid: &Ebid) -> bool {
        self.state.lock().by_ebid.contains_key(ebid)
    }

    /// Reports received so far
    pub fn reports(&self) -> Vec<RecordedReport> {
        self.state.lock().reports.clone()
    }

    /// Number of status calls served
    pub fn status_calls(&self) -> u32 {
        self.state.lock().status_calls
    }

    /// Clear all state
    pub fn clear(&self) {
        *self.state.lock() = MockState::default();
    }

    // ========================================================================
    // INTERNALS
    // ========================================================================

    fn server_now(&self) -> u64 {
        let offset = self.state.lock().clock_offset;
        self.clock.now_ntp().saturating_add_signed(offset)
    }

    fn epochs_per_horizon(&self) -> u32 {
        let per_day = SECONDS_PER_DAY / self.config.epoch_duration.max(1);
        (per_day * self.config.horizon_days as u64).min(u32::MAX as u64) as u32
    }

    /// Simulated latency and injected failures
    async fn before_call(&self) -> Result<()> {
        let delay = self.state.lock().delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        match self.state.lock().fail_next.take() {
            Some(InjectedFailure::Code(code)) => {
                Err(Error::from_server_code(code, "injected failure"))
            }
            Some(InjectedFailure::Network) => Err(Error::Network("injected failure".into())),
            None => Ok(()),
        }
    }

    fn generate_epochs(&self, first_id: u32, time_start: u64) -> Vec<Epoch> {
        let mut rng = rand::thread_rng();
        let count = self.epochs_per_horizon();
        (0..count)
            .filter_map(|offset| first_id.checked_add(offset))
            .map(|id| Epoch {
                id,
                ebid: Ebid(rng.gen()),
                ecc: Ecc(rng.gen()),
                time: time_start + id as u64 * self.config.epoch_duration,
            })
            .collect()
    }

    /// Locate and authenticate the registration behind a signed request
    fn authenticate(
        &self,
        state: &MockState,
        request: &AuthenticatedRequest,
        mac_prefix: u8,
        server_now: u64,
    ) -> Result<u64> {
        let decoded = request.decode()?;
        let id = *state
            .by_ebid
            .get(&decoded.ebid)
            .ok_or_else(|| Error::AuthenticationFailed("unknown ebid".into()))?;
        let registration = state
            .registrations
            .get(&id)
            .ok_or_else(|| Error::AuthenticationFailed("unknown registration".into()))?;

        if !request.verify(mac_prefix, &registration.ka)? {
            return Err(Error::AuthenticationFailed("invalid mac".into()));
        }

        let skew = decoded.time.wrapping_sub(truncate_time(server_now)) as i32;
        if skew.unsigned_abs() > self.config.max_time_skew_secs {
            return Err(Error::from_server_code(
                SERVER_CODE_CLOCK_MISALIGNMENT,
                "request time outside the accepted window",
            ));
        }

        let owns_epoch = registration
            .epochs
            .iter()
            .any(|e| e.id == decoded.epoch_id && e.ebid == decoded.ebid);
        if !owns_epoch {
            return Err(Error::AuthenticationFailed("ebid does not match epoch".into()));
        }

        let current = epoch_id_at(server_now, registration.time_start, self.config.epoch_duration)
            .ok_or_else(|| Error::AuthenticationFailed("request predates the service".into()))?;
        if current.abs_diff(decoded.epoch_id) > self.config.epoch_tolerance {
            return Err(Error::AuthenticationFailed(format!(
                "stale epoch {} (server at {})",
                decoded.epoch_id, current
            )));
        }

        Ok(id)
    }
}

#[async_trait]
impl ServerClient for MockServer {
    async fn generate_captcha(&self, _kind: CaptchaKind, _locale: &str) -> Result<String> {
        self.before_call().await?;
        let response = CaptchaResponse {
            id: Uuid::new_v4().to_string(),
        };
        self.state.lock().captchas.insert(response.id.clone());
        Ok(response.id)
    }

    async fn register(&self, request: &RegisterRequest) -> Result<RegistrationResult> {
        self.before_call().await?;
        let server_now = self.server_now();

        {
            let mut state = self.state.lock();
            if !state.captchas.remove(&request.captcha_id)
                || request.captcha != self.config.captcha_solution
            {
                return Err(Error::CaptchaInvalid);
            }
        }

        let client_key = PublicKeyBytes::from_base64(&request.client_public_ecdh_key)?;
        let shared = self.key_pair.diffie_hellman(client_key.as_bytes())?;
        let keys = derive_registration_keys(&shared)?;

        let duration = self.config.epoch_duration;
        let time_start = server_now - server_now % duration;
        let epochs = self.generate_epochs(0, time_start);
        let tuples = encrypt(&encode_tuples(&epochs), &keys.kea)?;

        {
            let mut state = self.state.lock();
            let id = state.next_id;
            state.next_id += 1;
            for epoch in &epochs {
                state.by_ebid.insert(epoch.ebid, id);
            }
            state.registrations.insert(
                id,
                MockRegistration {
                    ka: keys.ka,
                    kea: keys.kea,
                    time_start,
                    epochs,
                    risk_level: 0.0,
                    last_contact: None,
                },
            );
        }
        tracing::debug!("mock server registered device at {}", time_start);

        let response = RegisterResponse {
            tuples: base64_encode(&tuples),
            time_start,
            config: self.config.server_config.clone(),
            message: None,
        };
        response.normalize(Some(server_now))
    }

    async fn status(&self, request: &AuthenticatedRequest) -> Result<StatusOutcome> {
        self.before_call().await?;
        let server_now = self.server_now();
        let mut guard = self.state.lock();
        let state = &mut *guard;
        state.status_calls += 1;

        let id = self.authenticate(state, request, prefix::STATUS, server_now)?;

        let renewal = if self.config.renew_on_status {
            let registration = state
                .registrations
                .get(&id)
                .ok_or_else(|| Error::Internal("registration vanished".into()))?;
            let time_start = registration.time_start;
            let first = epoch_id_at(server_now, time_start, self.config.epoch_duration).unwrap_or(0);
            let fresh = self.generate_epochs(first, time_start);
            let tuples = encrypt(&encode_tuples(&fresh), &registration.kea)?;
            Some((fresh, tuples, time_start))
        } else {
            None
        };

        let registration = state
            .registrations
            .get_mut(&id)
            .ok_or_else(|| Error::Internal("registration vanished".into()))?;

        let assessment = RiskAssessment {
            risk_level: registration.risk_level,
            last_contact_date: registration.last_contact.and_then(ntp_to_datetime),
            last_risk_scoring_date: ntp_to_datetime(server_now),
            declaration_token: (registration.risk_level > 0.0).then(|| Uuid::new_v4().to_string()),
        };

        let (tuples, time_start) = match renewal {
            Some((fresh, tuples, time_start)) => {
                registration.epochs.extend(fresh.iter().copied());
                for epoch in &fresh {
                    state.by_ebid.insert(epoch.ebid, id);
                }
                (Some(tuples), Some(time_start))
            }
            None => (None, None),
        };

        let body = StatusResponse::from_assessment(
            self.config.version,
            &assessment,
            tuples.as_deref(),
            time_start,
            None,
        )
        .to_json()?;
        drop(guard);

        StatusResponse::parse(self.config.version, &body)?.normalize(Some(server_now))
    }

    async fn report(&self, request: &ReportRequest) -> Result<ReportOutcome> {
        self.before_call().await?;
        let server_now = self.server_now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if !state.used_codes.insert(request.token.clone()) {
            return Err(Error::AuthenticationFailed(
                "verification code already used".into(),
            ));
        }

        let mut matched = 0;
        for contact in &request.contacts {
            let (Ok(ebid), Ok(ecc)) = (contact.decode_ebid(), contact.decode_ecc()) else {
                continue;
            };
            let Some(id) = state.by_ebid.get(&ebid).copied() else {
                continue;
            };
            let Some(registration) = state.registrations.get_mut(&id) else {
                continue;
            };

            for detail in &contact.ids {
                let Ok(mac) = base64_decode(&detail.mac) else {
                    continue;
                };
                let time = detail.time_from_hello_message.to_be_bytes();
                if verify_mac(
                    &registration.ka,
                    prefix::HELLO,
                    &[&ebid.0[..], &ecc.0[..], &time[..]],
                    &mac,
                ) {
                    matched += 1;
                    registration.risk_level = self.config.exposed_risk_level;
                    registration.last_contact = registration
                        .last_contact
                        .max(Some(detail.time_collected_on_device));
                }
            }
        }

        state.reports.push(RecordedReport {
            request: request.clone(),
            received_at: server_now,
            matched,
        });

        let response = ReportResponse {
            success: Some(true),
            message: None,
            report_validation_token: Some(Uuid::new_v4().to_string()),
        };
        response.normalize(Some(server_now))
    }

    async fn unregister(&self, request: &AuthenticatedRequest) -> Result<()> {
        self.before_call().await?;
        let server_now = self.server_now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let id = self.authenticate(state, request, prefix::UNREGISTER, server_now)?;
        if let Some(registration) = state.registrations.remove(&id) {
            for epoch in &registration.epochs {
                state.by_ebid.remove(&epoch.ebid);
            }
        }
        Ok(())
    }
}

fn base64_encode(bytes: &[u8]) -> String {
    use base64::Engine as _;
    base64::engine::general_purpose::STANDARD.encode(bytes)
}

fn base64_decode(encoded: &str) -> Result<Vec<u8>> {
    use base64::Engine as _;
    Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::derive_shared_secret;
    use crate::epoch::decrypt_epochs;
    use crate::time::ManualClock;

    const NOW: u64 = 3_900_000_000;

    async fn registered() -> (MockServer, SymmetricKey, Vec<Epoch>, u64) {
        let server = MockServer::new(Arc::new(ManualClock::new(NOW)), MockServerConfig::default())
            .unwrap();
        let device = KeyPair::generate().unwrap();
        let captcha = server
            .generate_captcha(CaptchaKind::Image, "fr")
            .await
            .unwrap();
        let request = RegisterRequest::new(&captcha, "robert", &device.public_key_bytes());
        let result = server.register(&request).await.unwrap();

        let shared = derive_shared_secret(&device, server.public_key().as_bytes()).unwrap();
        let keys = derive_registration_keys(&shared).unwrap();
        let epochs = decrypt_epochs(&keys.kea, &result.tuples, result.time_start, 900).unwrap();
        (server, keys.ka, epochs, result.time_start)
    }

    #[tokio::test]
    async fn test_register_issues_one_day_of_epochs() {
        let (server, _, epochs, time_start) = registered().await;
        assert_eq!(epochs.len(), 96);
        assert_eq!(epochs[0].id, 0);
        assert_eq!(epochs[0].time, time_start);
        assert!(time_start <= NOW);
        assert_eq!(server.registration_count(), 1);
        assert!(server.knows_ebid(&epochs[5].ebid));
    }

    #[tokio::test]
    async fn test_register_rejects_wrong_captcha() {
        let server = MockServer::new(Arc::new(ManualClock::new(NOW)), MockServerConfig::default())
            .unwrap();
        let device = KeyPair::generate().unwrap();
        let captcha = server
            .generate_captcha(CaptchaKind::Audio, "en")
            .await
            .unwrap();

        let bad = RegisterRequest::new(&captcha, "wrong", &device.public_key_bytes());
        assert!(matches!(server.register(&bad).await, Err(Error::CaptchaInvalid)));

        // The captcha id is consumed even by a failed attempt
        let retry = RegisterRequest::new(&captcha, "robert", &device.public_key_bytes());
        assert!(matches!(server.register(&retry).await, Err(Error::CaptchaInvalid)));
    }

    #[tokio::test]
    async fn test_status_checks_mac_and_epoch() {
        let (server, ka, epochs, _) = registered().await;

        let ok = AuthenticatedRequest::sign(prefix::STATUS, &epochs[0], &ka, NOW).unwrap();
        let outcome = server.status(&ok).await.unwrap();
        assert!(!outcome.assessment.is_at_risk());
        assert_eq!(outcome.server_time, Some(NOW));

        let wrong_key = SymmetricKey::from_bytes([9u8; 32]);
        let forged = AuthenticatedRequest::sign(prefix::STATUS, &epochs[0], &wrong_key, NOW).unwrap();
        assert!(matches!(
            server.status(&forged).await,
            Err(Error::AuthenticationFailed(_))
        ));

        for id in [1, 10] {
            let other = AuthenticatedRequest::sign(prefix::STATUS, &epochs[id], &ka, NOW).unwrap();
            assert!(matches!(
                server.status(&other).await,
                Err(Error::AuthenticationFailed(_))
            ));
        }
    }

    #[tokio::test]
    async fn test_status_clock_skew_is_misalignment() {
        let (server, ka, epochs, _) = registered().await;
        server.set_clock_offset(3_600);

        let request = AuthenticatedRequest::sign(prefix::STATUS, &epochs[0], &ka, NOW).unwrap();
        let err = server.status(&request).await.unwrap_err();
        assert!(err.is_clock_misalignment());
    }

    #[tokio::test]
    async fn test_injected_failures() {
        let (server, ka, epochs, _) = registered().await;
        let request = AuthenticatedRequest::sign(prefix::STATUS, &epochs[0], &ka, NOW).unwrap();

        server.fail_next(InjectedFailure::Code(-1));
        assert!(server.status(&request).await.unwrap_err().is_clock_misalignment());

        server.fail_next(InjectedFailure::Network);
        assert!(matches!(server.status(&request).await, Err(Error::Network(_))));

        assert!(server.status(&request).await.is_ok());
    }

    #[tokio::test]
    async fn test_unregister_forgets_device() {
        let (server, ka, epochs, _) = registered().await;

        let status = AuthenticatedRequest::sign(prefix::STATUS, &epochs[0], &ka, NOW).unwrap();
        assert!(server.unregister(&status).await.is_err());

        let request = AuthenticatedRequest::sign(prefix::UNREGISTER, &epochs[0], &ka, NOW).unwrap();
        server.unregister(&request).await.unwrap();
        assert_eq!(server.registration_count(), 0);
        assert!(!server.knows_ebid(&epochs[0].ebid));
    }

    #[tokio::test]
    async fn test_report_code_single_use() {
        let (server, _, _, _) = registered().await;
        let request = ReportRequest::build(WireVersion::V4, "ABC123", &[]);

        let outcome = server.report(&request).await.unwrap();
        assert!(!outcome.token.is_empty());
        assert_eq!(outcome.server_time, Some(NOW));
        assert!(matches!(
            server.report(&request).await,
            Err(Error::AuthenticationFailed(_))
        ));
        assert_eq!(server.reports().len(), 1);
    }

    #[tokio::test]
    async fn test_renewal_extends_horizon() {
        let clock = Arc::new(ManualClock::new(NOW));
        let config = MockServerConfig {
            renew_on_status: true,
            ..MockServerConfig::default()
        };
        let server = MockServer::new(clock, config).unwrap();
        let device = KeyPair::generate().unwrap();
        let captcha = server
            .generate_captcha(CaptchaKind::Image, "fr")
            .await
            .unwrap();
        let result = server
            .register(&RegisterRequest::new(&captcha, "robert", &device.public_key_bytes()))
            .await
            .unwrap();

        let shared = derive_shared_secret(&device, server.public_key().as_bytes()).unwrap();
        let keys = derive_registration_keys(&shared).unwrap();
        let epochs = decrypt_epochs(&keys.kea, &result.tuples, result.time_start, 900).unwrap();

        let request = AuthenticatedRequest::sign(prefix::STATUS, &epochs[0], &keys.ka, NOW).unwrap();
        let outcome = server.status(&request).await.unwrap();
        let fresh = decrypt_epochs(
            &keys.kea,
            &outcome.tuples.unwrap(),
            outcome.time_start.unwrap(),
            900,
        )
        .unwrap();
        assert_eq!(fresh.first().unwrap().id, 0);
        assert_eq!(fresh.len(), 96);
        assert_ne!(fresh[0].ebid, epochs[0].ebid);
        assert!(server.knows_ebid(&fresh[0].ebid));
        assert!(server.knows_ebid(&epochs[0].ebid));
    }
}
