//! Registration protocol.
//!
//! ```text
//! device                                   server
//!   │  captcha(kind, locale)  ───────────►   │
//!   │  ◄───────────────────────────  id      │
//!   │  register(id, solution, pubkey) ──►    │
//!   │  ◄──────  tuples, timeStart, config    │
//!   │                                        │
//!   │  shared = ECDH(device sk, server pk)   │
//!   │  KA  = HMAC(shared, "mac")             │
//!   │  KEA = HMAC(shared, "tuples")          │
//!   │  epochs = AES-GCM-open(KEA, tuples)    │
//! ```
//!
//! [`complete_registration`] is pure: it turns the server response into a
//! ready-to-install [`Enrollment`] or fails without touching any state.

use crate::config::ServerConfig;
use crate::crypto::{derive_registration_keys, derive_shared_secret, KeyPair, PublicKeyBytes};
use crate::epoch::{decrypt_epochs, Epoch, KeyMaterial};
use crate::error::{Error, Result};
use crate::server::wire::RegisterRequest;
use crate::server::{CaptchaKind, RegistrationResult, ServerClient};

/// Everything needed to install a new registration
#[derive(Debug)]
pub struct Enrollment {
    /// Key material bound by this registration
    pub material: KeyMaterial,
    /// Start of epoch 0, NTP seconds
    pub time_start: u64,
    /// Decrypted epoch horizon, sorted by id
    pub epochs: Vec<Epoch>,
    /// Server configuration parameters
    pub config: ServerConfig,
}

/// Ask the server for a captcha challenge
pub async fn generate_captcha(
    server: &dyn ServerClient,
    kind: CaptchaKind,
    locale: &str,
) -> Result<String> {
    let id = server.generate_captcha(kind, locale).await?;
    tracing::debug!("Received captcha {}", id);
    Ok(id)
}

/// Register `local_public_key` with a solved captcha
pub async fn register(
    server: &dyn ServerClient,
    captcha_id: &str,
    solution: &str,
    local_public_key: &PublicKeyBytes,
) -> Result<RegistrationResult> {
    if captcha_id.trim().is_empty() || solution.trim().is_empty() {
        return Err(Error::CaptchaInvalid);
    }

    let request = RegisterRequest::new(captcha_id, solution.trim(), local_public_key);
    let result = server.register(&request).await?;
    tracing::info!(
        "Registration accepted (timeStart {}, {} byte tuples)",
        result.time_start,
        result.tuples.len()
    );
    Ok(result)
}

/// Derive keys and decrypt the epoch horizon from a registration response
pub fn complete_registration(
    private_key: KeyPair,
    server_public_key: &PublicKeyBytes,
    result: &RegistrationResult,
    epoch_duration: u64,
) -> Result<Enrollment> {
    let shared = derive_shared_secret(&private_key, server_public_key.as_bytes())?;
    let keys = derive_registration_keys(&shared)?;
    let epochs = decrypt_epochs(&keys.kea, &result.tuples, result.time_start, epoch_duration)?;

    Ok(Enrollment {
        material: KeyMaterial {
            ka: keys.ka,
            kea: keys.kea,
            private_key,
            server_public_key: server_public_key.clone(),
        },
        time_start: result.time_start,
        epochs,
        config: result.config.clone(),
    })
}
