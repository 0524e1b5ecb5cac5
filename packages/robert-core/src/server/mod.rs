//! # Server Collaborator
//!
//! The four protocol calls (plus captcha creation) behind one async trait.
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SERVER BOUNDARY                                 │
//! ├─────────────────────────────────────────────────────────────────────────┤
//! │                                                                         │
//! │  protocol::*  ──► trait ServerClient ──┬──► HttpServerClient (reqwest)  │
//! │                                        │    {base}/api/{v1|v3|v4}/...   │
//! │                                        │                                │
//! │                                        └──► MockServer (in-memory)      │
//! │                                                                         │
//! │  Versioned JSON bodies live in `wire`; everything above this trait      │
//! │  sees only the normalized types below.                                  │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

mod http;
mod mock;
pub mod wire;

pub use http::HttpServerClient;
pub use mock::{InjectedFailure, MockServer, MockServerConfig, RecordedReport};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::ServerConfig;
use crate::error::Result;
use wire::{AuthenticatedRequest, RegisterRequest, ReportRequest};

/// Captcha flavour requested from the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CaptchaKind {
    /// Image challenge
    Image,
    /// Audio challenge
    Audio,
}

/// Normalized registration response
#[derive(Debug, Clone)]
pub struct RegistrationResult {
    /// Tuples blob encrypted under KEA (`iv || ct || tag`)
    pub tuples: Vec<u8>,
    /// Start of epoch 0, NTP seconds
    pub time_start: u64,
    /// Server configuration parameters
    pub config: ServerConfig,
    /// Server clock at response time, NTP seconds, when known
    pub server_time: Option<u64>,
}

/// Exposure risk as assessed by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RiskAssessment {
    /// Risk level; 0 means no known exposure
    pub risk_level: f32,
    /// Date of the last risky contact
    pub last_contact_date: Option<DateTime<Utc>>,
    /// When the server last scored this registration
    pub last_risk_scoring_date: Option<DateTime<Utc>>,
    /// Token to obtain a sick-leave declaration, when at risk
    pub declaration_token: Option<String>,
}

impl RiskAssessment {
    /// Whether any exposure was detected
    pub fn is_at_risk(&self) -> bool {
        self.risk_level > 0.0
    }
}

/// Normalized status response
#[derive(Debug, Clone, Default)]
pub struct StatusOutcome {
    /// Current assessment
    pub assessment: RiskAssessment,
    /// Fresh tuples blob, when the server renewed the horizon
    pub tuples: Option<Vec<u8>>,
    /// Start of epoch 0 for the fresh tuples, when it changed
    pub time_start: Option<u64>,
    /// Updated configuration parameters
    pub config: Option<ServerConfig>,
    /// Server clock at response time, NTP seconds, when known
    pub server_time: Option<u64>,
}

/// Normalized report response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReportOutcome {
    /// Report validation token
    pub token: String,
    /// Server clock at response time, NTP seconds, when known
    pub server_time: Option<u64>,
}

/// Remote ROBERT server
#[async_trait]
pub trait ServerClient: Send + Sync {
    /// Create a captcha challenge; returns its id
    async fn generate_captcha(&self, kind: CaptchaKind, locale: &str) -> Result<String>;

    /// Register a new device public key
    async fn register(&self, request: &RegisterRequest) -> Result<RegistrationResult>;

    /// Ask for the current exposure status
    async fn status(&self, request: &AuthenticatedRequest) -> Result<StatusOutcome>;

    /// Upload encounters
    async fn report(&self, request: &ReportRequest) -> Result<ReportOutcome>;

    /// Delete the registration server-side
    async fn unregister(&self, request: &AuthenticatedRequest) -> Result<()>;
}
