//! HTTP transport for [`ServerClient`].
//!
//! Every call is a JSON `POST` to `{base}/api/{version}/{endpoint}`. The
//! response `Date` header, when present, is surfaced as the server clock so
//! the protocols can detect clock skew.

use std::time::Duration;

use async_trait::async_trait;
use chrono::DateTime;
use reqwest::{Client, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;

use super::wire::{
    AuthenticatedRequest, CaptchaRequest, CaptchaResponse, ErrorBody, RegisterRequest,
    RegisterResponse, ReportRequest, ReportResponse, StatusResponse, UnregisterResponse,
};
use super::{CaptchaKind, RegistrationResult, ReportOutcome, ServerClient, StatusOutcome};
use crate::config::{TracerConfig, WireVersion};
use crate::error::{Error, Result};
use crate::time::unix_to_ntp;

/// Endpoint names under `/api/{version}/`
mod endpoint {
    pub const CAPTCHA: &str = "captcha";
    pub const REGISTER: &str = "register";
    pub const STATUS: &str = "status";
    pub const REPORT: &str = "report";
    pub const UNREGISTER: &str = "unregister";
}

/// Raw successful response
struct Reply {
    body: Vec<u8>,
    server_time: Option<u64>,
}

/// reqwest-backed server client
#[derive(Debug, Clone)]
pub struct HttpServerClient {
    client: Client,
    base_url: String,
    version: WireVersion,
}

impl HttpServerClient {
    /// Create a client for `base_url`
    pub fn new(base_url: &str, version: WireVersion, timeout: Duration) -> Result<Self> {
        if base_url.is_empty() {
            return Err(Error::Internal("server_url is not configured".into()));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            version,
        })
    }

    /// Create a client from the tracer configuration
    pub fn from_config(config: &TracerConfig) -> Result<Self> {
        Self::new(
            &config.server_url,
            config.wire_version,
            config.network_timeout(),
        )
    }

    /// Wire version spoken by this client
    pub fn version(&self) -> WireVersion {
        self.version
    }

    fn url(&self, endpoint: &str) -> String {
        format!(
            "{}/api/{}/{}",
            self.base_url,
            self.version.path_segment(),
            endpoint
        )
    }

    async fn post<B: Serialize + ?Sized>(&self, endpoint: &str, body: &B) -> Result<Reply> {
        let url = self.url(endpoint);
        tracing::debug!("POST {}", url);

        let response = self.client.post(&url).json(body).send().await?;
        let status = response.status();
        let server_time = response
            .headers()
            .get(reqwest::header::DATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_http_date);
        let body = response.bytes().await?.to_vec();

        if status.is_success() {
            return Ok(Reply { body, server_time });
        }

        tracing::warn!("{} returned {}", endpoint, status);
        Err(map_error_status(endpoint, status, &body))
    }

    async fn post_json<B, R>(&self, endpoint: &str, body: &B) -> Result<(R, Option<u64>)>
    where
        B: Serialize + ?Sized,
        R: DeserializeOwned,
    {
        let reply = self.post(endpoint, body).await?;
        let parsed = serde_json::from_slice(&reply.body).map_err(|e| {
            Error::DeserializationError(format!("invalid {} response: {}", endpoint, e))
        })?;
        Ok((parsed, reply.server_time))
    }
}

/// Parse an RFC 7231 `Date` header into NTP seconds
fn parse_http_date(value: &str) -> Option<u64> {
    DateTime::parse_from_rfc2822(value)
        .ok()
        .map(|d| unix_to_ntp(d.timestamp()))
}

/// Map a non-2xx response to an error
fn map_error_status(endpoint: &str, status: StatusCode, body: &[u8]) -> Error {
    let parsed: ErrorBody = serde_json::from_slice(body).unwrap_or_default();

    if let Some(code) = parsed.code {
        let message = parsed.message.unwrap_or_else(|| status.to_string());
        return Error::from_server_code(code, message);
    }

    match status {
        StatusCode::UNAUTHORIZED if endpoint == endpoint::REGISTER => Error::CaptchaInvalid,
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Error::AuthenticationFailed(
            parsed
                .message
                .unwrap_or_else(|| format!("{} rejected credentials", endpoint)),
        ),
        StatusCode::REQUEST_TIMEOUT | StatusCode::GATEWAY_TIMEOUT => {
            Error::Timeout(format!("{} timed out server-side", endpoint))
        }
        _ => Error::Server {
            code: status.as_u16() as i32,
            message: parsed.message.unwrap_or_else(|| status.to_string()),
        },
    }
}

#[async_trait]
impl ServerClient for HttpServerClient {
    async fn generate_captcha(&self, kind: CaptchaKind, locale: &str) -> Result<String> {
        let request = CaptchaRequest {
            kind,
            locale: locale.to_string(),
        };
        let (response, _): (CaptchaResponse, _) =
            self.post_json(endpoint::CAPTCHA, &request).await?;
        Ok(response.id)
    }

    async fn register(&self, request: &RegisterRequest) -> Result<RegistrationResult> {
        let (response, server_time): (RegisterResponse, _) =
            self.post_json(endpoint::REGISTER, request).await?;
        response.normalize(server_time)
    }

    async fn status(&self, request: &AuthenticatedRequest) -> Result<StatusOutcome> {
        let reply = self.post(endpoint::STATUS, request).await?;
        StatusResponse::parse(self.version, &reply.body)?.normalize(reply.server_time)
    }

    async fn report(&self, request: &ReportRequest) -> Result<ReportOutcome> {
        let (response, server_time): (ReportResponse, _) =
            self.post_json(endpoint::REPORT, request).await?;
        response.normalize(server_time)
    }

    async fn unregister(&self, request: &AuthenticatedRequest) -> Result<()> {
        let reply = self.post(endpoint::UNREGISTER, request).await?;
        if reply.body.is_empty() {
            return Ok(());
        }
        let response: UnregisterResponse = serde_json::from_slice(&reply.body)
            .map_err(|e| Error::DeserializationError(format!("invalid unregister response: {}", e)))?;
        response.normalize()
    }
}
