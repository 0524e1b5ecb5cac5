//! JSON bodies exchanged with the server.
//!
//! Binary fields travel as standard base64. Dates are NTP seconds rendered as
//! decimal strings. Status responses differ per wire version and are held in
//! [`StatusResponse`] until normalized into [`super::StatusOutcome`].

use std::collections::BTreeMap;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{CaptchaKind, RegistrationResult, ReportOutcome, RiskAssessment, StatusOutcome};
use crate::config::{ServerConfig, WireVersion};
use crate::crypto::{compute_mac, verify_mac, PublicKeyBytes, SymmetricKey};
use crate::epoch::{Ebid, Ecc, Epoch, EBID_SIZE, ECC_SIZE};
use crate::error::{Error, Result};
use crate::proximity::LocalProximity;
use crate::time::{ntp_to_datetime, unix_to_ntp};

// ============================================================================
// HELPERS
// ============================================================================

fn decode_fixed<const N: usize>(encoded: &str, field: &str) -> Result<[u8; N]> {
    let bytes = BASE64.decode(encoded)?;
    bytes.as_slice().try_into().map_err(|_| {
        Error::DeserializationError(format!(
            "{}: expected {} bytes, got {}",
            field,
            N,
            bytes.len()
        ))
    })
}

/// Parse an NTP-seconds date string
pub fn parse_ntp_date(value: Option<&str>) -> Result<Option<DateTime<Utc>>> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    let secs: u64 = value
        .parse()
        .map_err(|_| Error::DeserializationError(format!("invalid NTP date '{}'", value)))?;
    ntp_to_datetime(secs)
        .map(Some)
        .ok_or_else(|| Error::DeserializationError(format!("NTP date out of range: {}", secs)))
}

/// Render a date as NTP seconds
pub fn format_ntp_date(date: &DateTime<Utc>) -> String {
    unix_to_ntp(date.timestamp()).to_string()
}

/// Truncate NTP seconds to the 32-bit field used on the wire
pub fn truncate_time(now: u64) -> u32 {
    (now & u32::MAX as u64) as u32
}

// ============================================================================
// CAPTCHA / REGISTER
// ============================================================================

/// Captcha creation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaRequest {
    /// Challenge flavour
    #[serde(rename = "type")]
    pub kind: CaptchaKind,
    /// Challenge language
    pub locale: String,
}

/// Captcha creation response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptchaResponse {
    /// Captcha id to echo back at registration
    pub id: String,
}

/// Registration request
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterRequest {
    /// User's captcha solution
    pub captcha: String,
    /// Captcha id
    pub captcha_id: String,
    /// Device P-256 public key, base64 SEC1
    #[serde(rename = "clientPublicECDHKey")]
    pub client_public_ecdh_key: String,
}

impl RegisterRequest {
    /// Build a request for `public_key`
    pub fn new(captcha_id: &str, solution: &str, public_key: &PublicKeyBytes) -> Self {
        Self {
            captcha: solution.to_string(),
            captcha_id: captcha_id.to_string(),
            client_public_ecdh_key: public_key.to_base64(),
        }
    }
}

/// Registration response
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    /// Tuples blob, base64
    pub tuples: String,
    /// Start of epoch 0, NTP seconds
    pub time_start: u64,
    /// Configuration parameters
    #[serde(default)]
    pub config: ServerConfig,
    /// Informational message
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl RegisterResponse {
    /// Decode into the normalized result
    pub fn normalize(self, server_time: Option<u64>) -> Result<RegistrationResult> {
        Ok(RegistrationResult {
            tuples: BASE64.decode(&self.tuples)?,
            time_start: self.time_start,
            config: self.config,
            server_time,
        })
    }
}

// ============================================================================
// AUTHENTICATED REQUESTS (status, unregister)
// ============================================================================

/// Body shared by status and unregister
///
/// `mac = HMAC-SHA256(KA, prefix || ebid || epochId (u32 BE) || time (u32 BE))[..20]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatedRequest {
    /// EBID of the current epoch, base64
    pub ebid: String,
    /// Current epoch id
    pub epoch_id: u32,
    /// Truncated NTP time, base64 of 4 bytes BE
    pub time: String,
    /// Truncated MAC, base64
    pub mac: String,
}

/// Decoded form of an [`AuthenticatedRequest`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DecodedAuthentication {
    /// EBID
    pub ebid: Ebid,
    /// Epoch id
    pub epoch_id: u32,
    /// Truncated NTP time
    pub time: u32,
    /// MAC bytes
    pub mac: Vec<u8>,
}

impl AuthenticatedRequest {
    /// Sign a request for `epoch` at `now` under KA
    pub fn sign(prefix: u8, epoch: &Epoch, ka: &SymmetricKey, now: u64) -> Result<Self> {
        let time = truncate_time(now).to_be_bytes();
        let epoch_id = epoch.id.to_be_bytes();
        let mac = compute_mac(ka, prefix, &[&epoch.ebid.0[..], &epoch_id[..], &time[..]])?;

        Ok(Self {
            ebid: BASE64.encode(epoch.ebid.0),
            epoch_id: epoch.id,
            time: BASE64.encode(time),
            mac: BASE64.encode(mac),
        })
    }

    /// Decode the base64 fields
    pub fn decode(&self) -> Result<DecodedAuthentication> {
        let ebid = decode_fixed::<EBID_SIZE>(&self.ebid, "ebid")?;
        let time = decode_fixed::<4>(&self.time, "time")?;
        Ok(DecodedAuthentication {
            ebid: Ebid(ebid),
            epoch_id: self.epoch_id,
            time: u32::from_be_bytes(time),
            mac: BASE64.decode(&self.mac)?,
        })
    }

    /// Check the MAC under KA
    pub fn verify(&self, prefix: u8, ka: &SymmetricKey) -> Result<bool> {
        let decoded = self.decode()?;
        let epoch_id = decoded.epoch_id.to_be_bytes();
        let time = decoded.time.to_be_bytes();
        Ok(verify_mac(
            ka,
            prefix,
            &[&decoded.ebid.0[..], &epoch_id[..], &time[..]],
            &decoded.mac,
        ))
    }
}

// ============================================================================
// STATUS
// ============================================================================

/// Status response, first generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponseV1 {
    /// Exposure flag
    pub at_risk: bool,
    /// Fresh tuples, base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuples: Option<String>,
    /// Start of epoch 0 for the fresh tuples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_start: Option<u64>,
    /// Updated configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ServerConfig>,
}

/// Status response, v3: integer risk level and dates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponseV3 {
    /// Risk level 0..=4
    pub risk_level: u8,
    /// NTP seconds
    #[serde(default)]
    pub last_contact_date: Option<String>,
    /// NTP seconds
    #[serde(default)]
    pub last_risk_scoring_date: Option<String>,
    /// Declaration token
    #[serde(default)]
    pub declaration_token: Option<String>,
    /// Fresh tuples, base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuples: Option<String>,
    /// Start of epoch 0 for the fresh tuples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_start: Option<u64>,
    /// Updated configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ServerConfig>,
}

/// Status response, v4: fractional risk level
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponseV4 {
    /// Risk level
    pub risk_level: f32,
    /// NTP seconds
    #[serde(default)]
    pub last_contact_date: Option<String>,
    /// NTP seconds
    #[serde(default)]
    pub last_risk_scoring_date: Option<String>,
    /// Declaration token
    #[serde(default)]
    pub declaration_token: Option<String>,
    /// Analytics token; analytics are not handled by this crate
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub analytics_token: Option<String>,
    /// Fresh tuples, base64
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuples: Option<String>,
    /// Start of epoch 0 for the fresh tuples
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub time_start: Option<u64>,
    /// Updated configuration
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub config: Option<ServerConfig>,
}

/// Status response of any wire version
#[derive(Debug, Clone)]
pub enum StatusResponse {
    /// v1 body
    V1(StatusResponseV1),
    /// v3 body
    V3(StatusResponseV3),
    /// v4 body
    V4(StatusResponseV4),
}

/// Risk level reported for `atRisk: true` in v1 responses
const V1_AT_RISK_LEVEL: f32 = 4.0;

impl StatusResponse {
    /// Parse a body of the given version
    pub fn parse(version: WireVersion, body: &[u8]) -> Result<Self> {
        let parsed = match version {
            WireVersion::V1 => StatusResponse::V1(serde_json::from_slice(body)?),
            WireVersion::V3 => StatusResponse::V3(serde_json::from_slice(body)?),
            WireVersion::V4 => StatusResponse::V4(serde_json::from_slice(body)?),
        };
        Ok(parsed)
    }

    /// Serialize to JSON
    pub fn to_json(&self) -> Result<Vec<u8>> {
        let body = match self {
            StatusResponse::V1(r) => serde_json::to_vec(r)?,
            StatusResponse::V3(r) => serde_json::to_vec(r)?,
            StatusResponse::V4(r) => serde_json::to_vec(r)?,
        };
        Ok(body)
    }

    /// Build a response of `version` from a normalized assessment
    pub fn from_assessment(
        version: WireVersion,
        assessment: &RiskAssessment,
        tuples: Option<&[u8]>,
        time_start: Option<u64>,
        config: Option<ServerConfig>,
    ) -> Self {
        let tuples = tuples.map(|t| BASE64.encode(t));
        let last_contact = assessment.last_contact_date.as_ref().map(format_ntp_date);
        let last_scoring = assessment
            .last_risk_scoring_date
            .as_ref()
            .map(format_ntp_date);

        match version {
            WireVersion::V1 => StatusResponse::V1(StatusResponseV1 {
                at_risk: assessment.is_at_risk(),
                tuples,
                time_start,
                config,
            }),
            WireVersion::V3 => StatusResponse::V3(StatusResponseV3 {
                risk_level: assessment.risk_level.round().clamp(0.0, u8::MAX as f32) as u8,
                last_contact_date: last_contact,
                last_risk_scoring_date: last_scoring,
                declaration_token: assessment.declaration_token.clone(),
                tuples,
                time_start,
                config,
            }),
            WireVersion::V4 => StatusResponse::V4(StatusResponseV4 {
                risk_level: assessment.risk_level,
                last_contact_date: last_contact,
                last_risk_scoring_date: last_scoring,
                declaration_token: assessment.declaration_token.clone(),
                analytics_token: None,
                tuples,
                time_start,
                config,
            }),
        }
    }

    /// Collapse into the version-independent outcome
    pub fn normalize(self, server_time: Option<u64>) -> Result<StatusOutcome> {
        let (assessment, tuples, time_start, config) = match self {
            StatusResponse::V1(r) => (
                RiskAssessment {
                    risk_level: if r.at_risk { V1_AT_RISK_LEVEL } else { 0.0 },
                    ..RiskAssessment::default()
                },
                r.tuples,
                r.time_start,
                r.config,
            ),
            StatusResponse::V3(r) => (
                RiskAssessment {
                    risk_level: r.risk_level as f32,
                    last_contact_date: parse_ntp_date(r.last_contact_date.as_deref())?,
                    last_risk_scoring_date: parse_ntp_date(r.last_risk_scoring_date.as_deref())?,
                    declaration_token: r.declaration_token,
                },
                r.tuples,
                r.time_start,
                r.config,
            ),
            StatusResponse::V4(r) => (
                RiskAssessment {
                    risk_level: r.risk_level,
                    last_contact_date: parse_ntp_date(r.last_contact_date.as_deref())?,
                    last_risk_scoring_date: parse_ntp_date(r.last_risk_scoring_date.as_deref())?,
                    declaration_token: r.declaration_token,
                },
                r.tuples,
                r.time_start,
                r.config,
            ),
        };

        let tuples = match tuples {
            Some(encoded) if !encoded.is_empty() => Some(BASE64.decode(encoded)?),
            _ => None,
        };

        Ok(StatusOutcome {
            assessment,
            tuples,
            time_start,
            config,
            server_time,
        })
    }
}

// ============================================================================
// REPORT
// ============================================================================

/// One received hello inside a report
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContactDetail {
    /// Local reception time, NTP seconds
    pub time_collected_on_device: u64,
    /// Time field of the hello
    pub time_from_hello_message: u32,
    /// Hello MAC, base64
    pub mac: String,
    /// Calibrated RSSI
    pub rssi_calibrated: i32,
    /// Calibrated TX power (v3 and later)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_power_calibrated: Option<i32>,
}

/// All hellos received from one EBID
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    /// Peer EBID, base64
    pub ebid: String,
    /// Peer ECC, base64
    pub ecc: String,
    /// Individual hellos
    pub ids: Vec<ContactDetail>,
}

impl Contact {
    /// Decode the EBID
    pub fn decode_ebid(&self) -> Result<Ebid> {
        decode_fixed::<EBID_SIZE>(&self.ebid, "ebid").map(Ebid)
    }

    /// Decode the ECC
    pub fn decode_ecc(&self) -> Result<Ecc> {
        decode_fixed::<ECC_SIZE>(&self.ecc, "ecc").map(Ecc)
    }
}

/// Report request
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportRequest {
    /// Verification code entered by the user
    pub token: String,
    /// Encounters grouped by EBID
    pub contacts: Vec<Contact>,
}

impl ReportRequest {
    /// Group encounters by EBID in the layout of `version`
    pub fn build(version: WireVersion, token: &str, proximities: &[LocalProximity]) -> Self {
        let mut grouped: BTreeMap<Ebid, (Ecc, Vec<ContactDetail>)> = BTreeMap::new();

        for proximity in proximities {
            let detail = ContactDetail {
                time_collected_on_device: proximity.collected_at,
                time_from_hello_message: proximity.peer_time,
                mac: BASE64.encode(proximity.mac),
                rssi_calibrated: proximity.rssi_calibrated,
                tx_power_calibrated: match version {
                    WireVersion::V1 => None,
                    WireVersion::V3 | WireVersion::V4 => Some(proximity.tx_power_calibrated),
                },
            };
            grouped
                .entry(proximity.ebid)
                .or_insert_with(|| (proximity.ecc, Vec::new()))
                .1
                .push(detail);
        }

        let contacts = grouped
            .into_iter()
            .map(|(ebid, (ecc, ids))| Contact {
                ebid: BASE64.encode(ebid.0),
                ecc: BASE64.encode(ecc.0),
                ids,
            })
            .collect();

        Self {
            token: token.to_string(),
            contacts,
        }
    }

    /// Total number of hellos carried
    pub fn hello_count(&self) -> usize {
        self.contacts.iter().map(|c| c.ids.len()).sum()
    }
}

/// Report response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportResponse {
    /// Whether the report was accepted
    #[serde(default)]
    pub success: Option<bool>,
    /// Informational message
    #[serde(default)]
    pub message: Option<String>,
    /// Report validation token
    #[serde(default, alias = "token")]
    pub report_validation_token: Option<String>,
}

impl ReportResponse {
    /// Extract the validation token
    pub fn normalize(self, server_time: Option<u64>) -> Result<ReportOutcome> {
        if self.success == Some(false) {
            return Err(Error::Server {
                code: 400,
                message: self.message.unwrap_or_else(|| "report rejected".into()),
            });
        }
        let token = self.report_validation_token.ok_or_else(|| {
            Error::DeserializationError("report response carries no token".into())
        })?;
        Ok(ReportOutcome { token, server_time })
    }
}

// ============================================================================
// UNREGISTER / ERRORS
// ============================================================================

/// Unregister response
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnregisterResponse {
    /// Whether the registration was deleted
    #[serde(default)]
    pub success: Option<bool>,
    /// Informational message
    #[serde(default)]
    pub message: Option<String>,
}

impl UnregisterResponse {
    /// Map an explicit failure to an error
    pub fn normalize(self) -> Result<()> {
        if self.success == Some(false) {
            return Err(Error::Server {
                code: 400,
                message: self.message.unwrap_or_else(|| "unregister rejected".into()),
            });
        }
        Ok(())
    }
}

/// Error body returned with non-2xx statuses
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Protocol error code
    #[serde(default)]
    pub code: Option<i32>,
    /// Human-readable message
    #[serde(default)]
    pub message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::prefix;

    fn epoch() -> Epoch {
        Epoch {
            id: 12,
            ebid: Ebid([0x10; 8]),
            ecc: Ecc([0x20, 0x21]),
            time: 3_900_010_800,
        }
    }

    fn proximity(ebid: u8, collected_at: u64) -> LocalProximity {
        LocalProximity {
            ebid: Ebid([ebid; 8]),
            ecc: Ecc([0x33, 0x00]),
            mac: [0x44; 20],
            collected_at,
            rssi_calibrated: -61,
            tx_power_calibrated: -9,
            peer_time: collected_at as u32,
        }
    }

    #[test]
    fn test_register_request_field_names() {
        let key = PublicKeyBytes(vec![4u8; 65]);
        let json = serde_json::to_value(RegisterRequest::new("cid", "abc", &key)).unwrap();
        assert_eq!(json["captchaId"], "cid");
        assert_eq!(json["captcha"], "abc");
        assert!(json["clientPublicECDHKey"].is_string());
    }

    #[test]
    fn test_authenticated_request_sign_and_verify() {
        let ka = SymmetricKey::from_bytes([5u8; 32]);
        let request = AuthenticatedRequest::sign(prefix::STATUS, &epoch(), &ka, 3_900_011_000).unwrap();

        let decoded = request.decode().unwrap();
        assert_eq!(decoded.ebid, Ebid([0x10; 8]));
        assert_eq!(decoded.epoch_id, 12);
        assert_eq!(decoded.time, 3_900_011_000);

        assert!(request.verify(prefix::STATUS, &ka).unwrap());
        assert!(!request.verify(prefix::UNREGISTER, &ka).unwrap());

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["epochId"], 12);
    }

    #[test]
    fn test_status_v1_normalizes() {
        let body = br#"{"atRisk":true}"#;
        let outcome = StatusResponse::parse(WireVersion::V1, body)
            .unwrap()
            .normalize(None)
            .unwrap();
        assert!(outcome.assessment.is_at_risk());
        assert!(outcome.tuples.is_none());
    }

    #[test]
    fn test_status_v4_with_dates_and_tuples() {
        let body = format!(
            r#"{{"riskLevel":2.5,"lastContactDate":"3900000000","declarationToken":"decl",
                "tuples":"{}","timeStart":3900086400,
                "config":[{{"name":"app.dataRetentionPeriod","value":14}}]}}"#,
            BASE64.encode([1u8, 2, 3])
        );
        let outcome = StatusResponse::parse(WireVersion::V4, body.as_bytes())
            .unwrap()
            .normalize(Some(3_900_000_100))
            .unwrap();

        assert_eq!(outcome.assessment.risk_level, 2.5);
        assert_eq!(
            outcome.assessment.last_contact_date.unwrap().timestamp(),
            3_900_000_000 - 2_208_988_800
        );
        assert_eq!(outcome.assessment.declaration_token.as_deref(), Some("decl"));
        assert_eq!(outcome.tuples, Some(vec![1, 2, 3]));
        assert_eq!(outcome.time_start, Some(3_900_086_400));
        assert_eq!(outcome.config.unwrap().data_retention_days(), Some(14));
        assert_eq!(outcome.server_time, Some(3_900_000_100));
    }

    #[test]
    fn test_status_v3_bad_date_rejected() {
        let body = br#"{"riskLevel":1,"lastContactDate":"yesterday"}"#;
        let result = StatusResponse::parse(WireVersion::V3, body)
            .unwrap()
            .normalize(None);
        assert!(matches!(result, Err(Error::DeserializationError(_))));
    }

    #[test]
    fn test_status_survives_version_round_trip() {
        let assessment = RiskAssessment {
            risk_level: 3.0,
            last_contact_date: ntp_to_datetime(3_900_000_000),
            last_risk_scoring_date: None,
            declaration_token: Some("t".into()),
        };
        for version in [WireVersion::V3, WireVersion::V4] {
            let json = StatusResponse::from_assessment(version, &assessment, None, None, None)
                .to_json()
                .unwrap();
            let outcome = StatusResponse::parse(version, &json)
                .unwrap()
                .normalize(None)
                .unwrap();
            assert_eq!(outcome.assessment, assessment);
        }
    }

    #[test]
    fn test_report_groups_by_ebid() {
        let proximities = vec![proximity(1, 100), proximity(2, 150), proximity(1, 200)];
        let request = ReportRequest::build(WireVersion::V4, "ABC123", &proximities);

        assert_eq!(request.token, "ABC123");
        assert_eq!(request.contacts.len(), 2);
        assert_eq!(request.hello_count(), 3);

        let first = &request.contacts[0];
        assert_eq!(first.decode_ebid().unwrap(), Ebid([1; 8]));
        assert_eq!(first.ids.len(), 2);
        assert_eq!(first.ids[0].time_collected_on_device, 100);
        assert_eq!(first.ids[0].tx_power_calibrated, Some(-9));
    }

    #[test]
    fn test_report_v1_omits_tx_power() {
        let request = ReportRequest::build(WireVersion::V1, "ABC123", &[proximity(1, 100)]);
        let json = serde_json::to_value(&request).unwrap();
        assert!(json["contacts"][0]["ids"][0].get("txPowerCalibrated").is_none());
        assert_eq!(json["contacts"][0]["ids"][0]["rssiCalibrated"], -61);
    }

    #[test]
    fn test_report_response() {
        let token: ReportResponse =
            serde_json::from_str(r#"{"success":true,"reportValidationToken":"rvt"}"#).unwrap();
        let outcome = token.normalize(Some(42)).unwrap();
        assert_eq!(outcome.token, "rvt");
        assert_eq!(outcome.server_time, Some(42));

        let legacy: ReportResponse = serde_json::from_str(r#"{"token":"old"}"#).unwrap();
        assert_eq!(legacy.normalize(None).unwrap().token, "old");

        let failed: ReportResponse =
            serde_json::from_str(r#"{"success":false,"message":"nope"}"#).unwrap();
        assert!(matches!(failed.normalize(None), Err(Error::Server { .. })));

        let empty: ReportResponse = serde_json::from_str(r#"{"success":true}"#).unwrap();
        assert!(matches!(
            empty.normalize(None),
            Err(Error::DeserializationError(_))
        ));
    }
}
