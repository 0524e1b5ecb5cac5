//! # Error Handling
//!
//! Error types for the whole protocol core.
//!
//! ## Error Hierarchy
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           ERROR HIERARCHY                               │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  Error (top-level)                                                     │
//! │  │                                                                      │
//! │  ├── Protocol State (200s) - caller must refresh or re-register        │
//! │  │   ├── NotRegistered / NoCurrentEpoch / KeysExhausted                │
//! │  │   ├── ClockMisalignment                                             │
//! │  │   └── TupleParsing / InvalidHelloMessage / InvalidVerificationCode  │
//! │  │                                                                      │
//! │  ├── Crypto (300s) - fatal to the current operation, never retried     │
//! │  │   ├── KeyGenerationFailed / KeyExchangeFailed / KeyDerivationFailed │
//! │  │   └── EncryptionFailed / DecryptionFailed / InvalidKey              │
//! │  │                                                                      │
//! │  ├── Storage (400s)                                                    │
//! │  ├── Network (500s) - transient, retry policy belongs to the caller    │
//! │  ├── Server (600s) - Server{code}, CaptchaInvalid, AuthenticationFailed│
//! │  ├── Concurrency (700s) - OperationInProgress, Cancelled               │
//! │  └── Internal (900s)                                                   │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Duplicate or out-of-window encounters are not errors: the store reports them
//! through [`crate::proximity::AppendOutcome`] and keeps going.

use thiserror::Error;

/// Result type alias for protocol core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Server error code that signals the device clock is misaligned with the server.
pub const SERVER_CODE_CLOCK_MISALIGNMENT: i32 = -1;

/// Coarse error category, used by callers to pick a recovery path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// No usable epoch or key material; refresh or re-register.
    ProtocolState,
    /// Key generation, exchange or AEAD failure.
    Crypto,
    /// Local persistence failure.
    Storage,
    /// Transport failure or timeout.
    Network,
    /// The server answered with an error.
    Server,
    /// Another call is in flight, or this call was cancelled.
    Concurrency,
    /// Bug or unexpected state.
    Internal,
}

/// Main error type for the protocol core
#[derive(Error, Debug)]
pub enum Error {
    // ========================================================================
    // Protocol State Errors (200-299)
    // ========================================================================
    /// No key material is installed
    #[error("Device is not registered.")]
    NotRegistered,

    /// Key material exists but `now` lies before the first epoch
    #[error("No epoch is current at {0} (NTP seconds).")]
    NoCurrentEpoch(u64),

    /// `now` lies past the loaded epoch horizon
    #[error("Epoch keys are exhausted; re-registration is required.")]
    KeysExhausted,

    /// Device clock disagrees with the server clock
    #[error("Device clock is misaligned with the server (skew: {skew_secs:?}s).")]
    ClockMisalignment {
        /// Measured skew in seconds (server − local), when known
        skew_secs: Option<i64>,
    },

    /// Decrypted tuples blob is malformed
    #[error("Failed to parse epoch tuples: {0}")]
    TupleParsing(String),

    /// Hello payload from a peer is malformed
    #[error("Invalid hello message: {0}")]
    InvalidHelloMessage(String),

    /// Verification code entered by the user has an unknown format
    #[error("Invalid verification code: {0}")]
    InvalidVerificationCode(String),

    // ========================================================================
    // Crypto Errors (300-399)
    // ========================================================================
    /// EC key pair generation failed
    #[error("Key generation failed: {0}")]
    KeyGenerationFailed(String),

    /// ECDH key agreement failed
    #[error("Key exchange failed: {0}")]
    KeyExchangeFailed(String),

    /// Key derivation failed
    #[error("Failed to derive keys: {0}")]
    KeyDerivationFailed(String),

    /// Encryption failed
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    /// Decryption or tag verification failed
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Invalid key format or length
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    // ========================================================================
    // Storage Errors (400-499)
    // ========================================================================
    /// Failed to read from storage
    #[error("Failed to read from storage: {0}")]
    StorageReadError(String),

    /// Failed to write to storage
    #[error("Failed to write to storage: {0}")]
    StorageWriteError(String),

    /// Stored data could not be decoded
    #[error("Data corruption detected: {0}")]
    StorageCorrupted(String),

    /// Database error
    #[error("Database error: {0}")]
    DatabaseError(String),

    // ========================================================================
    // Network Errors (500-599)
    // ========================================================================
    /// Transport-level failure
    #[error("Network error: {0}")]
    Network(String),

    /// Operation timed out
    #[error("Operation timed out: {0}")]
    Timeout(String),

    // ========================================================================
    // Server Errors (600-699)
    // ========================================================================
    /// Server rejected the request with a protocol code
    #[error("Server error {code}: {message}")]
    Server {
        /// Server-provided code (HTTP status when the body carried none)
        code: i32,
        /// Server-provided message
        message: String,
    },

    /// Captcha solution rejected during registration
    #[error("Captcha solution was rejected.")]
    CaptchaInvalid,

    /// Epoch/MAC mismatch; the registration is no longer usable
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    // ========================================================================
    // Concurrency Errors (700-799)
    // ========================================================================
    /// A status or report call is already in flight
    #[error("Another server call is already in progress.")]
    OperationInProgress,

    /// Call cancelled because keys were cleared mid-flight
    #[error("Operation cancelled.")]
    Cancelled,

    /// Proximity engine is not running
    #[error("Proximity engine is not running.")]
    EngineNotRunning,

    /// Proximity engine was already started
    #[error("Proximity engine is already running.")]
    EngineAlreadyRunning,

    // ========================================================================
    // Internal Errors (900-999)
    // ========================================================================
    /// Internal error (should not happen in normal operation)
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
}

impl Error {
    /// Get the numeric error code
    ///
    /// - 200-299: Protocol state
    /// - 300-399: Crypto
    /// - 400-499: Storage
    /// - 500-599: Network
    /// - 600-699: Server
    /// - 700-799: Concurrency
    /// - 900-999: Internal
    pub fn code(&self) -> i32 {
        match self {
            Error::NotRegistered => 200,
            Error::NoCurrentEpoch(_) => 201,
            Error::KeysExhausted => 202,
            Error::ClockMisalignment { .. } => 203,
            Error::TupleParsing(_) => 204,
            Error::InvalidHelloMessage(_) => 205,
            Error::InvalidVerificationCode(_) => 206,

            Error::KeyGenerationFailed(_) => 300,
            Error::KeyExchangeFailed(_) => 301,
            Error::KeyDerivationFailed(_) => 302,
            Error::EncryptionFailed(_) => 303,
            Error::DecryptionFailed(_) => 304,
            Error::InvalidKey(_) => 305,

            Error::StorageReadError(_) => 400,
            Error::StorageWriteError(_) => 401,
            Error::StorageCorrupted(_) => 402,
            Error::DatabaseError(_) => 403,

            Error::Network(_) => 500,
            Error::Timeout(_) => 501,

            Error::Server { .. } => 600,
            Error::CaptchaInvalid => 601,
            Error::AuthenticationFailed(_) => 602,

            Error::OperationInProgress => 700,
            Error::Cancelled => 701,
            Error::EngineNotRunning => 702,
            Error::EngineAlreadyRunning => 703,

            Error::Internal(_) => 900,
            Error::SerializationError(_) => 901,
            Error::DeserializationError(_) => 902,
        }
    }

    /// Category of this error
    pub fn category(&self) -> ErrorCategory {
        match self.code() {
            200..=299 => ErrorCategory::ProtocolState,
            300..=399 => ErrorCategory::Crypto,
            400..=499 => ErrorCategory::Storage,
            500..=599 => ErrorCategory::Network,
            600..=699 => ErrorCategory::Server,
            700..=799 => ErrorCategory::Concurrency,
            _ => ErrorCategory::Internal,
        }
    }

    /// Check if this error is recoverable by simply retrying later
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Error::Network(_) | Error::Timeout(_) | Error::OperationInProgress
        )
    }

    /// Check if this error can only be resolved by registering again
    pub fn requires_reregistration(&self) -> bool {
        matches!(
            self,
            Error::NotRegistered | Error::KeysExhausted | Error::AuthenticationFailed(_)
        )
    }

    /// Check if this error is the distinguished clock-misalignment condition
    pub fn is_clock_misalignment(&self) -> bool {
        matches!(self, Error::ClockMisalignment { .. })
    }

    /// Classify a server-provided error code
    ///
    /// Code `-1` is the clock-misalignment signal and must never surface as a
    /// generic server or network failure.
    pub fn from_server_code(code: i32, message: impl Into<String>) -> Self {
        if code == SERVER_CODE_CLOCK_MISALIGNMENT {
            Error::ClockMisalignment { skew_secs: None }
        } else {
            Error::Server {
                code,
                message: message.into(),
            }
        }
    }
}

// ============================================================================
// ERROR CONVERSIONS
// ============================================================================

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::DatabaseError(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<base64::DecodeError> for Error {
    fn from(err: base64::DecodeError) -> Self {
        Error::DeserializationError(format!("invalid base64: {}", err))
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Error::Timeout(err.to_string())
        } else {
            Error::Network(err.to_string())
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================
