use std::time::Duration;

use thiserror::Error;

use crate::inflight::CancelReason;

/// Shown when neither the transport nor the payload explains a failure.
pub const GENERIC_NETWORK_MESSAGE: &str = "The network is unavailable, please try again later";

pub const SESSION_EXPIRED_MESSAGE: &str = "Login expired, please sign in again";

pub const DOWNLOAD_FAILED_MESSAGE: &str = "Download failed, please contact the developers";

/// Errors surfaced by the gate.
#[derive(Clone, Debug, Error, PartialEq)]
pub enum GateError {
    /// Control-flow signal, never reported to the operator.
    #[error("request cancelled: {0}")]
    Cancelled(CancelReason),
    #[error("request timed out after {0:?}")]
    Timeout(Duration),
    #[error("transport failure: {message}")]
    Transport { status: Option<u16>, message: String },
    #[error("application error {code}: {message}")]
    Application { code: i64, message: String },
    #[error("session expired: {message}")]
    SessionExpired { message: String },
    #[error("download failed: {0}")]
    Download(String),
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("invalid gate configuration: {0}")]
    Config(String),
}

impl GateError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, GateError::Cancelled(_))
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, GateError::Cancelled(CancelReason::Superseded))
    }

    /// Message the operator saw for this failure; `None` for cancellations.
    pub fn user_message(&self) -> Option<String> {
        match self {
            GateError::Cancelled(_) => None,
            GateError::Timeout(_) => Some(GENERIC_NETWORK_MESSAGE.to_string()),
            GateError::Transport { message, .. } | GateError::Application { message, .. } => {
                Some(message.clone())
            }
            GateError::SessionExpired { .. } => Some(SESSION_EXPIRED_MESSAGE.to_string()),
            GateError::Download(_) => Some(DOWNLOAD_FAILED_MESSAGE.to_string()),
            GateError::Decode(_) => Some(GENERIC_NETWORK_MESSAGE.to_string()),
            GateError::Config(message) => Some(message.clone()),
        }
    }
}
