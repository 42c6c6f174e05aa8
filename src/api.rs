//! Backend endpoints used by the console outside of page-specific screens.

use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core_types::ApiEnvelope;
use permission_tree::{PermissionNode, PermissionSource, SourceError};
use request_gate::{Payload, RequestGate};
use serde::Serialize;
use serde_json::{json, Value};

use crate::session::UserInfo;

pub const LOGIN_PATH: &str = "/login";
pub const LOGOUT_PATH: &str = "/logout";
pub const PASSWORD_SET_PATH: &str = "/password/set";
pub const PASSWORD_SMS_PATH: &str = "/password/sendSms";

#[derive(Clone, Debug, Serialize)]
pub struct LoginParams {
    pub phone: String,
    pub password: String,
}

#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordSetParams {
    pub phone: String,
    pub new_password: String,
    pub sms_code: String,
}

pub async fn request_login(
    gate: &RequestGate,
    params: &LoginParams,
) -> Result<ApiEnvelope<UserInfo>, request_gate::GateError> {
    gate.post(LOGIN_PATH, Some(Payload::from_serialize(params))).await
}

pub async fn request_logout(gate: &RequestGate) -> Result<ApiEnvelope<Value>, request_gate::GateError> {
    gate.post(LOGOUT_PATH, None).await
}

pub async fn request_password_set(
    gate: &RequestGate,
    params: &PasswordSetParams,
) -> Result<ApiEnvelope<Value>, request_gate::GateError> {
    gate.post(PASSWORD_SET_PATH, Some(Payload::from_serialize(params)))
        .await
}

pub async fn request_password_send_sms(
    gate: &RequestGate,
    phone: &str,
) -> Result<ApiEnvelope<Value>, request_gate::GateError> {
    gate.post(PASSWORD_SMS_PATH, Some(Payload::json(json!({ "phone": phone }))))
        .await
}

/// Permission tree fetched through the gate.
pub struct GatePermissionSource {
    gate: Arc<RequestGate>,
    path: String,
}

impl GatePermissionSource {
    pub fn new(gate: Arc<RequestGate>, path: impl Into<String>) -> Self {
        Self {
            gate,
            path: path.into(),
        }
    }
}

#[async_trait]
impl PermissionSource for GatePermissionSource {
    async fn fetch_menu(&self) -> Result<ApiEnvelope<Vec<PermissionNode>>, SourceError> {
        self.gate
            .get::<Vec<PermissionNode>>(&self.path, None)
            .await
            .map_err(|err| SourceError(err.to_string()))
    }
}
