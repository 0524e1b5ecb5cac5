//! # Configuration
//!
//! [`TracerConfig`] is the explicit, typed configuration handed to
//! [`crate::ContactTracer::new`]. Nothing is read from globals or persisted
//! automatically; hosts deserialize it from wherever they keep settings.
//!
//! [`ServerConfig`] is the parameter list the server returns at registration
//! (and optionally with status responses). Unknown parameters are kept so a
//! newer server does not break an older client.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Wire format generation spoken with the server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WireVersion {
    /// Original format
    V1,
    /// Adds declaration token and dates to status responses
    V3,
    /// Current format
    #[default]
    V4,
}

impl WireVersion {
    /// Path segment under `/api/`
    pub fn path_segment(&self) -> &'static str {
        match self {
            WireVersion::V1 => "v1",
            WireVersion::V3 => "v3",
            WireVersion::V4 => "v4",
        }
    }
}

/// Configuration for the protocol core
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TracerConfig {
    /// Server base URL (without `/api/...`)
    pub server_url: String,

    /// Wire format version
    pub wire_version: WireVersion,

    /// Server long-term P-256 public key, standard base64 SEC1
    pub server_public_key: String,

    /// Epoch duration in seconds
    pub epoch_duration_secs: u64,

    /// Days an encounter is kept before sweep
    pub retention_days: u32,

    /// Two hellos from the same EBID whose peer times differ by at most this
    /// are the same encounter
    pub dedup_tolerance_secs: u64,

    /// Timeout applied to every server call
    pub network_timeout_secs: u64,

    /// Server time may differ from local time by at most this much
    pub max_clock_skew_secs: u64,

    /// Proximity engine tick period
    pub tick_interval_ms: u64,

    /// Run a retention sweep every N ticks (0 disables)
    pub sweep_every_ticks: u32,

    /// Subtracted from raw RSSI
    pub rx_compensation_gain: i32,

    /// Added to the advertised TX power
    pub tx_compensation_gain: i32,

    /// TX power assumed when the radio reports none
    pub default_tx_power: i32,

    /// Capacity of the proximity engine's command queue
    pub engine_queue_capacity: usize,
}

impl Default for TracerConfig {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            wire_version: WireVersion::default(),
            server_public_key: String::new(),
            epoch_duration_secs: 900,
            retention_days: 14,
            dedup_tolerance_secs: 60,
            network_timeout_secs: 30,
            max_clock_skew_secs: 300,
            tick_interval_ms: 1_000,
            sweep_every_ticks: 900,
            rx_compensation_gain: 0,
            tx_compensation_gain: 0,
            default_tx_power: -12,
            engine_queue_capacity: 256,
        }
    }
}

impl TracerConfig {
    /// Parse from JSON; missing fields take their defaults
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)
            .map_err(|e| Error::DeserializationError(format!("invalid config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the protocol cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.epoch_duration_secs == 0 {
            return Err(Error::Internal("epoch_duration_secs must be > 0".into()));
        }
        if self.tick_interval_ms == 0 {
            return Err(Error::Internal("tick_interval_ms must be > 0".into()));
        }
        if self.engine_queue_capacity == 0 {
            return Err(Error::Internal("engine_queue_capacity must be > 0".into()));
        }
        Ok(())
    }

    /// Retention window in seconds
    pub fn retention_secs(&self) -> u64 {
        self.retention_days as u64 * crate::time::SECONDS_PER_DAY
    }

    /// Per-call network timeout
    pub fn network_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.network_timeout_secs)
    }
}

// ============================================================================
// SERVER CONFIG
// ============================================================================

/// Parameter name for the retention period in days
pub const PARAM_DATA_RETENTION: &str = "app.dataRetentionPeriod";

/// Parameter name for the status polling frequency in hours
pub const PARAM_CHECK_STATUS_FREQUENCY: &str = "app.checkStatusFrequency";

/// Parameter name for the number of days of tuples delivered
pub const PARAM_PRE_SYMPTOMS_SPAN: &str = "app.preSymptomsSpan";

/// One server configuration parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfigParam {
    /// Dotted parameter name
    pub name: String,
    /// Raw JSON value
    pub value: serde_json::Value,
}

/// Configuration parameters returned by the server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerConfig {
    params: Vec<ConfigParam>,
}

impl ServerConfig {
    /// Wrap a parameter list
    pub fn new(params: Vec<ConfigParam>) -> Self {
        Self { params }
    }

    /// All parameters
    pub fn params(&self) -> &[ConfigParam] {
        &self.params
    }

    /// Raw lookup
    pub fn get(&self, name: &str) -> Option<&serde_json::Value> {
        self.params
            .iter()
            .find(|p| p.name == name)
            .map(|p| &p.value)
    }

    /// Numeric lookup; the server sends numbers either as JSON numbers or strings
    pub fn get_u64(&self, name: &str) -> Option<u64> {
        match self.get(name)? {
            serde_json::Value::Number(n) => n.as_u64(),
            serde_json::Value::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Server-mandated retention period
    pub fn data_retention_days(&self) -> Option<u32> {
        self.get_u64(PARAM_DATA_RETENTION)
            .and_then(|v| u32::try_from(v).ok())
    }

    /// Suggested status polling frequency
    pub fn check_status_frequency_hours(&self) -> Option<u64> {
        self.get_u64(PARAM_CHECK_STATUS_FREQUENCY)
    }

    /// Overlay `other` on top of `self`; parameters in `other` win
    pub fn merge(&mut self, other: &ServerConfig) {
        for param in &other.params {
            match self.params.iter_mut().find(|p| p.name == param.name) {
                Some(existing) => existing.value = param.value.clone(),
                None => self.params.push(param.clone()),
            }
        }
    }

    /// No parameters
    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
