//! `IDENTIFY` body builder and feature negotiation response.
//!
//! The IDENTIFY body tells the broker:
//! - Who this client is (short and long identifier)
//! - The heartbeat interval it wants
//! - Output buffering preferences
//! - Whether it wants a feature negotiation response
//!
//! # Example
//!
//! ```
//! use qreader::control::{identify_command, IdentifyData};
//!
//! let data = IdentifyData::new("worker-1", "worker-1.example.com");
//! let cmd = identify_command(&data).unwrap();
//! assert_eq!(cmd.name(), "IDENTIFY");
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::protocol::Command;

/// Host name used when the OS does not report one.
pub const UNKNOWN_HOST: &str = "unknown.host";

/// Client metadata sent with `IDENTIFY`.
///
/// Intervals are in milliseconds; `0` keeps the broker default and `-1`
/// disables the feature, as the broker defines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct IdentifyData {
    /// Short identifier, usually the unqualified host name.
    pub short_id: String,
    /// Long identifier, usually the fully-qualified host name.
    pub long_id: String,
    /// Requested heartbeat interval in milliseconds.
    pub heartbeat_interval: i64,
    /// Requested broker output buffer size in bytes.
    pub output_buffer_size: i64,
    /// Requested broker output buffer flush timeout in milliseconds.
    pub output_buffer_timeout: i64,
    /// Ask the broker to answer with a JSON feature document instead of `OK`.
    pub feature_negotiation: bool,
}

impl IdentifyData {
    /// Create identify data with broker defaults for every tunable.
    pub fn new(short_id: impl Into<String>, long_id: impl Into<String>) -> Self {
        Self {
            short_id: short_id.into(),
            long_id: long_id.into(),
            heartbeat_interval: 0,
            output_buffer_size: 0,
            output_buffer_timeout: 0,
            feature_negotiation: false,
        }
    }

    /// Identify as the local host, using the name the OS reports.
    pub fn from_hostname() -> Self {
        let host = gethostname::gethostname().into_string().unwrap_or_default();
        Self::for_host(&host)
    }

    /// Identify as `host`: the long id is the full name (or
    /// [`UNKNOWN_HOST`] when empty), the short id its first label.
    pub fn for_host(host: &str) -> Self {
        let long_id = match host.trim() {
            "" => UNKNOWN_HOST,
            host => host,
        };
        let short_id = long_id.split('.').next().unwrap_or(long_id);
        Self::new(short_id, long_id)
    }

    /// Request a heartbeat interval.
    pub fn heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.as_millis() as i64;
        self
    }

    /// Request a feature negotiation response.
    pub fn feature_negotiation(mut self, enabled: bool) -> Self {
        self.feature_negotiation = enabled;
        self
    }
}

impl Default for IdentifyData {
    fn default() -> Self {
        Self::from_hostname()
    }
}

/// Broker limits returned when `feature_negotiation` is requested.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NegotiatedFeatures {
    /// Largest RDY count the broker accepts.
    pub max_rdy_count: i64,
    /// Broker version string.
    pub version: String,
    /// Largest per-message timeout in milliseconds.
    pub max_msg_timeout: i64,
    /// Default per-message timeout in milliseconds.
    pub msg_timeout: i64,
}

/// Build the IDENTIFY command carrying `data` as JSON.
pub fn identify_command(data: &IdentifyData) -> Result<Command> {
    let body = serde_json::to_vec(data)?;
    Command::identify(body)
}

/// Parse the broker's answer to IDENTIFY.
///
/// Returns `None` for a plain `OK` and the negotiated features otherwise.
pub fn parse_identify_response(payload: &[u8]) -> Result<Option<NegotiatedFeatures>> {
    if payload == crate::protocol::OK {
        return Ok(None);
    }
    Ok(Some(serde_json::from_slice(payload)?))
}
