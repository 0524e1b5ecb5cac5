//! Unregister protocol.
//!
//! Same authentication material as status, with MAC prefix `0x03`. Wiping
//! local keys and encounters after the acknowledgement is up to the caller.

use crate::crypto::prefix;
use crate::epoch::EpochKeyManager;
use crate::error::Result;
use crate::server::ServerClient;

use super::sign_current;

/// Delete the registration server-side using the epoch current at `now`
pub async fn unregister(server: &dyn ServerClient, keys: &EpochKeyManager, now: u64) -> Result<()> {
    let request = sign_current(keys, prefix::UNREGISTER, now)?;
    server.unregister(&request).await?;
    tracing::info!("Unregistered (epoch {})", request.epoch_id);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::crypto::KeyPair;
    use crate::error::Error;
    use crate::protocol::registration::{complete_registration, generate_captcha, register};
    use crate::server::{CaptchaKind, MockServer, MockServerConfig};
    use crate::time::ManualClock;

    const NOW: u64 = 3_900_000_000;

    #[tokio::test]
    async fn test_unregister_removes_server_state() {
        let server = MockServer::new(Arc::new(ManualClock::new(NOW)), MockServerConfig::default())
            .unwrap();
        let device = KeyPair::generate().unwrap();
        let public = device.public_key_bytes();
        let captcha = generate_captcha(&server, CaptchaKind::Audio, "en").await.unwrap();
        let result = register(&server, &captcha, "robert", &public).await.unwrap();
        let enrollment = complete_registration(device, &server.public_key(), &result, 900).unwrap();

        let keys = EpochKeyManager::new(900);
        keys.install(enrollment.material, enrollment.time_start, enrollment.epochs);

        unregister(&server, &keys, NOW).await.unwrap();
        assert_eq!(server.registration_count(), 0);

        // A second attempt is no longer recognized
        let err = unregister(&server, &keys, NOW).await.unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed(_)));
    }

    #[tokio::test]
    async fn test_unregister_requires_keys() {
        let server = MockServer::new(Arc::new(ManualClock::new(NOW)), MockServerConfig::default())
            .unwrap();
        let keys = EpochKeyManager::new(900);
        assert!(matches!(
            unregister(&server, &keys, NOW).await,
            Err(Error::NotRegistered)
        ));
    }
}
