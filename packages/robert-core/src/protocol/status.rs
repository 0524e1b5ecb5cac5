//! Status protocol.
//!
//! The request is signed with the epoch current at call time:
//!
//! ```text
//! { ebid, epochId, time, mac = HMAC(KA, 0x02 || ebid || epochId || time)[..20] }
//! ```
//!
//! A server that sees any other epoch rejects the request. Code `-1` in the
//! reply means the device clock is off and surfaces as `ClockMisalignment`.

use crate::crypto::prefix;
use crate::epoch::EpochKeyManager;
use crate::error::Result;
use crate::server::{ServerClient, StatusOutcome};

use super::{check_clock_skew, sign_current};

/// Query the exposure status with the epoch current at `now`
pub async fn request_status(
    server: &dyn ServerClient,
    keys: &EpochKeyManager,
    now: u64,
    max_clock_skew_secs: u64,
) -> Result<StatusOutcome> {
    let request = sign_current(keys, prefix::STATUS, now)?;
    tracing::debug!("Requesting status for epoch {}", request.epoch_id);

    let outcome = server.status(&request).await.inspect_err(|e| {
        if e.is_clock_misalignment() {
            tracing::warn!("Server reports clock misalignment");
        }
    })?;
    check_clock_skew(outcome.server_time, now, max_clock_skew_secs)?;

    tracing::info!(
        "Status received (risk level {}, fresh tuples: {})",
        outcome.assessment.risk_level,
        outcome.tuples.is_some()
    );
    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::crypto::KeyPair;
    use crate::error::Error;
    use crate::protocol::registration::{complete_registration, generate_captcha, register};
    use crate::server::{CaptchaKind, InjectedFailure, MockServer, MockServerConfig};
    use crate::time::ManualClock;

    const NOW: u64 = 3_900_000_000;

    async fn registered_with(
        config: MockServerConfig,
    ) -> (MockServer, Arc<ManualClock>, EpochKeyManager) {
        let clock = Arc::new(ManualClock::new(NOW));
        let server = MockServer::new(clock.clone(), config).unwrap();
        let device = KeyPair::generate().unwrap();
        let public = device.public_key_bytes();

        let captcha = generate_captcha(&server, CaptchaKind::Image, "fr").await.unwrap();
        let result = register(&server, &captcha, "robert", &public).await.unwrap();
        let enrollment = complete_registration(device, &server.public_key(), &result, 900).unwrap();

        let keys = EpochKeyManager::new(900);
        keys.install(enrollment.material, enrollment.time_start, enrollment.epochs);
        (server, clock, keys)
    }

    async fn registered() -> (MockServer, Arc<ManualClock>, EpochKeyManager) {
        registered_with(MockServerConfig::default()).await
    }

    #[tokio::test]
    async fn test_status_with_current_epoch() {
        let (server, _, keys) = registered().await;
        let outcome = request_status(&server, &keys, NOW, 300).await.unwrap();
        assert!(!outcome.assessment.is_at_risk());
        assert!(outcome.assessment.last_risk_scoring_date.is_some());
        assert_eq!(server.status_calls(), 1);
    }

    #[tokio::test]
    async fn test_stale_epoch_rejected_by_server() {
        // Wide time window so only the epoch check can reject the request
        let config = MockServerConfig {
            max_time_skew_secs: 86_400,
            ..MockServerConfig::default()
        };
        let (server, clock, keys) = registered_with(config).await;

        clock.advance(3 * 900);
        let err = request_status(&server, &keys, NOW, u64::MAX)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(_)));
        assert!(err.requires_reregistration());
    }

    #[tokio::test]
    async fn test_server_code_minus_one_is_clock_misalignment() {
        let (server, _, keys) = registered().await;
        server.fail_next(InjectedFailure::Code(-1));

        let err = request_status(&server, &keys, NOW, 300).await.unwrap_err();
        assert!(err.is_clock_misalignment());
        assert!(!matches!(err, Error::Network(_)));
    }

    #[tokio::test]
    async fn test_server_time_skew_detected_locally() {
        let (server, _, keys) = registered().await;
        server.set_clock_offset(120);

        let err = request_status(&server, &keys, NOW, 60).await.unwrap_err();
        assert!(matches!(
            err,
            Error::ClockMisalignment {
                skew_secs: Some(120)
            }
        ));
    }

    #[tokio::test]
    async fn test_exhausted_keys_never_reach_server() {
        let (server, _, keys) = registered().await;
        let err = request_status(&server, &keys, NOW + 2 * 86_400, 300)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::KeysExhausted));
        assert_eq!(server.status_calls(), 0);
    }
}
