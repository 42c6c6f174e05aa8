//! Configuration types for the request gate.

use std::time::Duration;

use gatehouse_core_types::{SESSION_EXPIRED_CODE, SUCCESS_CODE};
use serde::{Deserialize, Serialize};

use crate::error::GateError;

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GateConfig {
    pub base_url: String,
    /// Deadline for regular API calls, humantime syntax (`30s`, `1m`).
    pub timeout: String,
    pub download_timeout: String,
    pub connect_timeout: String,
    pub token_header: String,
    pub success_code: i64,
    pub session_expired_code: i64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".to_string(),
            timeout: "30s".to_string(),
            download_timeout: "60s".to_string(),
            connect_timeout: "10s".to_string(),
            token_header: "Access-Token".to_string(),
            success_code: SUCCESS_CODE,
            session_expired_code: SESSION_EXPIRED_CODE,
        }
    }
}

/// Deadlines parsed once when the gate is built.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Deadlines {
    pub request: Duration,
    pub download: Duration,
    pub connect: Duration,
}

impl GateConfig {
    pub fn deadlines(&self) -> Result<Deadlines, GateError> {
        Ok(Deadlines {
            request: parse_duration("timeout", &self.timeout)?,
            download: parse_duration("download_timeout", &self.download_timeout)?,
            connect: parse_duration("connect_timeout", &self.connect_timeout)?,
        })
    }
}

fn parse_duration(field: &str, raw: &str) -> Result<Duration, GateError> {
    let duration = humantime::parse_duration(raw.trim())
        .map_err(|_| GateError::Config(format!("invalid {field}: {raw}")))?;
    if duration.is_zero() {
        return Err(GateError::Config(format!("{field} must be positive")));
    }
    Ok(duration)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse() {
        let deadlines = GateConfig::default().deadlines().unwrap();
        assert_eq!(deadlines.request, Duration::from_secs(30));
        assert_eq!(deadlines.download, Duration::from_secs(60));
    }

    #[test]
    fn rejects_bad_durations() {
        let config = GateConfig {
            timeout: "soon".into(),
            ..GateConfig::default()
        };
        assert!(matches!(config.deadlines(), Err(GateError::Config(_))));

        let zero = GateConfig {
            download_timeout: "0s".into(),
            ..GateConfig::default()
        };
        assert!(matches!(zero.deadlines(), Err(GateError::Config(_))));
    }
}
