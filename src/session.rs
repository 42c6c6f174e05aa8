//! Signed-in user state.

use std::path::Path;

use parking_lot::RwLock;
use permission_tree::LOGIN_PATH;
use request_gate::TokenSlot;
use serde::{Deserialize, Deserializer, Serialize};
use tracing::debug;

use crate::errors::{ConsoleError, ConsoleResult};

/// Profile returned by the login endpoint.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
    #[serde(
        default,
        deserialize_with = "flag",
        skip_serializing_if = "Option::is_none"
    )]
    pub is_reset_password: Option<bool>,
}

impl UserInfo {
    /// True when no field is set.
    pub fn is_empty(&self) -> bool {
        self.phone.is_none()
            && self.username.is_none()
            && self.token.is_none()
            && self.is_reset_password.is_none()
    }
}

fn flag<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::Bool(b)) => Some(b),
        Some(serde_json::Value::Number(n)) => Some(n.as_f64().map(|n| n != 0.0).unwrap_or(false)),
        Some(serde_json::Value::String(s)) => Some(!s.is_empty() && s != "0" && s != "false"),
        Some(_) => Some(true),
    })
}

/// Serializable form of a session, kept between CLI invocations.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub user_info: UserInfo,
}

impl SessionSnapshot {
    pub fn load(path: &Path) -> ConsoleResult<Option<Self>> {
        if !path.exists() {
            return Ok(None);
        }
        let raw = std::fs::read_to_string(path)
            .map_err(|err| ConsoleError::Session(format!("{}: {err}", path.display())))?;
        let snapshot = serde_json::from_str(&raw)
            .map_err(|err| ConsoleError::Session(format!("{}: {err}", path.display())))?;
        Ok(Some(snapshot))
    }

    pub fn save(&self, path: &Path) -> ConsoleResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|err| ConsoleError::Session(format!("{}: {err}", parent.display())))?;
        }
        let raw = serde_json::to_string_pretty(self)
            .map_err(|err| ConsoleError::Session(err.to_string()))?;
        std::fs::write(path, raw)
            .map_err(|err| ConsoleError::Session(format!("{}: {err}", path.display())))?;
        debug!(target: "gatehouse", path = %path.display(), "session saved");
        Ok(())
    }

    pub fn remove(path: &Path) -> ConsoleResult<()> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(ConsoleError::Session(format!("{}: {err}", path.display()))),
        }
    }
}

/// The token lives in a [`TokenSlot`] shared with the transport, so every request picks
/// up the current value.
#[derive(Debug, Default)]
pub struct UserSession {
    token: TokenSlot,
    user_info: RwLock<UserInfo>,
}

impl UserSession {
    pub fn new(token: TokenSlot) -> Self {
        Self {
            token,
            user_info: RwLock::new(UserInfo::default()),
        }
    }

    pub fn token_slot(&self) -> &TokenSlot {
        &self.token
    }

    pub fn token(&self) -> String {
        self.token.get().unwrap_or_default()
    }

    pub fn set_token(&self, token: impl Into<String>) {
        self.token.set(token);
    }

    pub fn reset_token(&self) {
        self.token.clear();
    }

    pub fn user_info(&self) -> UserInfo {
        self.user_info.read().clone()
    }

    pub fn set_user_info(&self, info: UserInfo) {
        *self.user_info.write() = info;
    }

    pub fn reset_user_info(&self) {
        *self.user_info.write() = UserInfo::default();
    }

    pub fn is_login(&self) -> bool {
        !self.token().is_empty() && !self.user_info.read().is_empty()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            token: self.token(),
            user_info: self.user_info(),
        }
    }

    pub fn restore(&self, snapshot: SessionSnapshot) {
        if snapshot.token.is_empty() {
            self.reset_token();
        } else {
            self.set_token(snapshot.token);
        }
        self.set_user_info(snapshot.user_info);
    }
}

/// Login page location, carrying `redirect` percent-encoded when given.
pub fn login_location(redirect: Option<&str>) -> String {
    match redirect.filter(|target| !target.is_empty()) {
        Some(target) => format!("{LOGIN_PATH}?redirect={}", urlencoding::encode(target)),
        None => LOGIN_PATH.to_string(),
    }
}
