//! Shared primitives for the Gatehouse console kernel.
//!
//! Every backend call made by the console answers with the same `{ code, data, message }`
//! envelope; the request gate and the permission store both decode it through the types
//! defined here.

use std::fmt;

use parking_lot::Mutex;
use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Application code signalling a usable payload.
pub const SUCCESS_CODE: i64 = 200;

/// Application code signalling that the server invalidated the session.
pub const SESSION_EXPIRED_CODE: i64 = 403;

/// Shared error type for envelope handling.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    #[error("malformed envelope: {0}")]
    Envelope(String),
}

/// Uniform response envelope returned by the console backend.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct ApiEnvelope<T> {
    #[serde(deserialize_with = "deserialize_code")]
    pub code: i64,
    #[serde(default)]
    pub data: T,
    #[serde(default)]
    pub message: String,
}

impl<T> ApiEnvelope<T> {
    pub fn success(data: T) -> Self {
        Self {
            code: SUCCESS_CODE,
            data,
            message: "success".to_string(),
        }
    }

    pub fn failure(code: i64, message: impl Into<String>) -> Self
    where
        T: Default,
    {
        Self {
            code,
            data: T::default(),
            message: message.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.code == SUCCESS_CODE
    }

    pub fn is_session_expired(&self) -> bool {
        self.code == SESSION_EXPIRED_CODE
    }
}

impl ApiEnvelope<serde_json::Value> {
    pub fn from_slice(raw: &[u8]) -> Result<Self, CoreError> {
        serde_json::from_slice(raw).map_err(|err| CoreError::Envelope(err.to_string()))
    }

    /// Re-types the payload. A `null` payload becomes an empty list where the target allows it.
    pub fn decode_data<T>(self) -> Result<ApiEnvelope<T>, CoreError>
    where
        T: for<'de> Deserialize<'de>,
    {
        let data = match self.data {
            serde_json::Value::Null => serde_json::from_value(serde_json::Value::Null)
                .or_else(|_| serde_json::from_value(serde_json::Value::Array(Vec::new()))),
            other => serde_json::from_value(other),
        }
        .map_err(|err| CoreError::Envelope(err.to_string()))?;
        Ok(ApiEnvelope {
            code: self.code,
            data,
            message: self.message,
        })
    }
}

/// Accepts `200`, `200.0` and `"200"`; the backend is not consistent about it.
fn deserialize_code<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    struct CodeVisitor;

    impl<'de> Visitor<'de> for CodeVisitor {
        type Value = i64;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("a numeric response code")
        }

        fn visit_i64<E: de::Error>(self, v: i64) -> Result<i64, E> {
            Ok(v)
        }

        fn visit_u64<E: de::Error>(self, v: u64) -> Result<i64, E> {
            i64::try_from(v).map_err(|_| E::custom(format!("code out of range: {v}")))
        }

        fn visit_f64<E: de::Error>(self, v: f64) -> Result<i64, E> {
            if v.fract() == 0.0 {
                Ok(v as i64)
            } else {
                Err(E::custom(format!("non-integral code: {v}")))
            }
        }

        fn visit_str<E: de::Error>(self, v: &str) -> Result<i64, E> {
            v.trim()
                .parse::<i64>()
                .map_err(|_| E::custom(format!("non-numeric code: {v}")))
        }
    }

    deserializer.deserialize_any(CodeVisitor)
}

/// Paged list query: page cursor plus arbitrary filter fields.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery<T = serde_json::Map<String, serde_json::Value>> {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_num: Option<u32>,
    pub page_size: u32,
    #[serde(flatten)]
    pub filters: T,
}

/// Paged list payload.
#[derive(Clone, Debug, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PageList<T> {
    #[serde(default)]
    pub list: Vec<T>,
    #[serde(default)]
    pub count: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_page: Option<u64>,
}

/// Sink for messages that must reach the operator (toasts in the web console).
pub trait Notifier: Send + Sync {
    fn error(&self, message: &str);
}

/// Default notifier: user-facing messages end up in the log.
#[derive(Clone, Debug, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
    fn error(&self, message: &str) {
        warn!(target: "gatehouse", "{message}");
    }
}

/// Notifier that keeps every message; the CLI prints them and tests assert on them.
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    messages: Mutex<Vec<String>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().clone()
    }

    pub fn drain(&self) -> Vec<String> {
        std::mem::take(&mut *self.messages.lock())
    }
}

impl Notifier for MemoryNotifier {
    fn error(&self, message: &str) {
        self.messages.lock().push(message.to_string());
    }
}
