//! Report protocol.
//!
//! The only point where collected encounters leave the device. The user
//! enters a verification code obtained from a health authority; it comes in
//! two shapes:
//!
//! | Kind  | Shape                               |
//! |-------|-------------------------------------|
//! | Short | 6 ASCII alphanumerics (`A1B2C3`)    |
//! | Long  | hyphenated UUID (36 characters)     |
//!
//! Anything else is rejected before a request is built. As with status, a
//! reply whose server clock is too far from the local one fails with
//! `ClockMisalignment`.

use uuid::Uuid;

use crate::config::WireVersion;
use crate::error::{Error, Result};
use crate::proximity::LocalProximity;
use crate::server::wire::ReportRequest;
use crate::server::ServerClient;

use super::check_clock_skew;

const SHORT_CODE_LEN: usize = 6;
const LONG_CODE_LEN: usize = 36;

/// Shape of a verification code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodeKind {
    /// Six alphanumerics
    Short,
    /// UUID
    Long,
}

/// A validated verification code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerificationCode {
    kind: CodeKind,
    value: String,
}

impl VerificationCode {
    /// Classify and normalize user input
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();

        if input.len() == SHORT_CODE_LEN && input.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Ok(Self {
                kind: CodeKind::Short,
                value: input.to_ascii_uppercase(),
            });
        }

        if input.len() == LONG_CODE_LEN {
            if let Ok(uuid) = Uuid::parse_str(input) {
                return Ok(Self {
                    kind: CodeKind::Long,
                    value: uuid.hyphenated().to_string(),
                });
            }
        }

        Err(Error::InvalidVerificationCode(format!(
            "expected {} alphanumerics or a UUID, got {} characters",
            SHORT_CODE_LEN,
            input.len()
        )))
    }

    /// Code shape
    pub fn kind(&self) -> CodeKind {
        self.kind
    }

    /// Normalized code as sent to the server
    pub fn as_str(&self) -> &str {
        &self.value
    }
}

/// Upload `proximities` with `code`; returns the report validation token
pub async fn report(
    server: &dyn ServerClient,
    version: WireVersion,
    code: &VerificationCode,
    proximities: &[LocalProximity],
    now: u64,
    max_clock_skew_secs: u64,
) -> Result<String> {
    let request = ReportRequest::build(version, code.as_str(), proximities);
    tracing::info!(
        "Reporting {} encounters from {} peers ({:?} code)",
        request.hello_count(),
        request.contacts.len(),
        code.kind()
    );

    let outcome = server.report(&request).await.inspect_err(|e| {
        if e.is_clock_misalignment() {
            tracing::warn!("Server reports clock misalignment");
        }
    })?;
    check_clock_skew(outcome.server_time, now, max_clock_skew_secs)?;

    tracing::info!("Report accepted");
    Ok(outcome.token)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::epoch::{Ebid, Ecc};
    use crate::server::{InjectedFailure, MockServer, MockServerConfig};
    use crate::time::ManualClock;

    const NOW: u64 = 3_900_000_000;

    fn mock_server() -> MockServer {
        MockServer::new(Arc::new(ManualClock::new(NOW)), MockServerConfig::default()).unwrap()
    }

    #[test]
    fn test_short_code() {
        let code = VerificationCode::parse(" a1b2c3 ").unwrap();
        assert_eq!(code.kind(), CodeKind::Short);
        assert_eq!(code.as_str(), "A1B2C3");
    }

    #[test]
    fn test_long_code() {
        let code = VerificationCode::parse("3F2504E0-4F89-11D3-9A0C-0305E82C3301").unwrap();
        assert_eq!(code.kind(), CodeKind::Long);
        assert_eq!(code.as_str(), "3f2504e0-4f89-11d3-9a0c-0305e82c3301");
    }

    #[test]
    fn test_invalid_codes() {
        for input in ["", "ABC12", "ABC1234", "ABC-12", "not-a-uuid-but-thirty-six-chars-long"] {
            assert!(
                matches!(
                    VerificationCode::parse(input),
                    Err(Error::InvalidVerificationCode(_))
                ),
                "accepted {:?}",
                input
            );
        }
    }

    #[tokio::test]
    async fn test_report_uploads_all_encounters() {
        let server = mock_server();
        let proximities: Vec<LocalProximity> = (0..3u8)
            .map(|i| LocalProximity {
                ebid: Ebid([i % 2; 8]),
                ecc: Ecc([0, 0]),
                mac: [i; 20],
                collected_at: NOW + i as u64,
                rssi_calibrated: -70,
                tx_power_calibrated: -12,
                peer_time: 100 + i as u32,
            })
            .collect();

        let code = VerificationCode::parse("ZZZ999").unwrap();
        let token = report(&server, WireVersion::V4, &code, &proximities, NOW, 300)
            .await
            .unwrap();
        assert!(!token.is_empty());

        let reports = server.reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].request.token, "ZZZ999");
        assert_eq!(reports[0].request.hello_count(), 3);
        assert_eq!(reports[0].request.contacts.len(), 2);
    }

    #[tokio::test]
    async fn test_report_detects_server_clock_skew() {
        let server = mock_server();
        server.set_clock_offset(7_200);

        let code = VerificationCode::parse("ZZZ999").unwrap();
        let err = report(&server, WireVersion::V4, &code, &[], NOW, 300)
            .await
            .unwrap_err();
        assert!(err.is_clock_misalignment());
        assert!(matches!(
            err,
            Error::ClockMisalignment {
                skew_secs: Some(7_200)
            }
        ));
    }

    #[tokio::test]
    async fn test_report_server_code_minus_one() {
        let server = mock_server();
        server.fail_next(InjectedFailure::Code(-1));

        let code = VerificationCode::parse("ZZZ999").unwrap();
        let err = report(&server, WireVersion::V4, &code, &[], NOW, 300)
            .await
            .unwrap_err();
        assert!(err.is_clock_misalignment());
        assert!(server.reports().is_empty());
    }
}
