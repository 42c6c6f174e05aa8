//! Gatehouse request gate.
//!
//! Every API call of the console goes through [`RequestGate`]. The gate fingerprints the
//! call, cancels any in-flight call with the same fingerprint, runs the transport under a
//! per-call deadline and maps the backend envelope onto [`GateError`]. Superseded calls
//! resolve as [`GateError::Cancelled`] and are never reported to the operator.

pub mod config;
pub mod download;
pub mod error;
pub mod fingerprint;
pub mod inflight;
pub mod transport;

pub use crate::config::{Deadlines, GateConfig};
pub use crate::download::{DownloadedFile, DEFAULT_DOWNLOAD_TYPE};
pub use crate::error::{GateError, GENERIC_NETWORK_MESSAGE, SESSION_EXPIRED_MESSAGE};
pub use crate::fingerprint::{compute_fingerprint, Fingerprint, Payload};
pub use crate::inflight::{CancelHandle, CancelReason, InFlightGuard, InFlightTable};
pub use crate::transport::{
    AccessTokenInterceptor, GatewayRequest, HttpTransport, Interceptor, ReqwestTransport,
    ResponseKind, TokenSlot, TransportError, TransportResponse,
};

use std::sync::Arc;

use gatehouse_core_types::{ApiEnvelope, Notifier, TracingNotifier};
use http::Method;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::time::timeout;
use tracing::{debug, warn};

/// Hook invoked when the backend reports the session as expired.
pub trait SessionListener: Send + Sync {
    fn on_session_expired(&self);
}

pub struct RequestGate {
    config: GateConfig,
    deadlines: Deadlines,
    transport: Arc<dyn HttpTransport>,
    inflight: InFlightTable,
    notifier: Arc<dyn Notifier>,
    listeners: RwLock<Vec<Arc<dyn SessionListener>>>,
}

impl RequestGate {
    pub fn new(config: GateConfig, transport: Arc<dyn HttpTransport>) -> Result<Self, GateError> {
        let deadlines = config.deadlines()?;
        Ok(Self {
            config,
            deadlines,
            transport,
            inflight: InFlightTable::new(),
            notifier: Arc::new(TracingNotifier),
            listeners: RwLock::new(Vec::new()),
        })
    }

    /// Gate over a reqwest transport stamping the session token held by `token`.
    pub fn with_reqwest(config: GateConfig, token: TokenSlot) -> Result<Self, GateError> {
        let deadlines = config.deadlines()?;
        let interceptor = AccessTokenInterceptor::new(&config.token_header, token)
            .map_err(|err| GateError::Config(err.to_string()))?;
        let transport = ReqwestTransport::new(&config.base_url, deadlines.connect)
            .map_err(|err| GateError::Config(err.to_string()))?
            .with_interceptor(interceptor);
        Self::new(config, Arc::new(transport))
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &GateConfig {
        &self.config
    }

    pub fn inflight(&self) -> &InFlightTable {
        &self.inflight
    }

    pub fn add_session_listener(&self, listener: Arc<dyn SessionListener>) {
        self.listeners.write().push(listener);
    }

    pub fn cancel_all(&self, reason: CancelReason) -> usize {
        self.inflight.cancel_all(reason)
    }

    /// Runs a JSON call and returns the envelope when its code is the success code.
    pub async fn execute(&self, request: GatewayRequest) -> Result<ApiEnvelope<Value>, GateError> {
        let response = self.dispatch(request).await?;
        self.accept_envelope(&response.body)
    }

    pub async fn get<T>(&self, path: &str, params: Option<Payload>) -> Result<ApiEnvelope<T>, GateError>
    where
        T: DeserializeOwned,
    {
        let mut request = GatewayRequest::get(path);
        request.params = params;
        self.execute_typed(request).await
    }

    pub async fn post<T>(&self, path: &str, body: Option<Payload>) -> Result<ApiEnvelope<T>, GateError>
    where
        T: DeserializeOwned,
    {
        let mut request = GatewayRequest::post(path);
        request.body = body;
        self.execute_typed(request).await
    }

    pub async fn put<T>(&self, path: &str, body: Option<Payload>) -> Result<ApiEnvelope<T>, GateError>
    where
        T: DeserializeOwned,
    {
        let mut request = GatewayRequest::put(path);
        request.body = body;
        self.execute_typed(request).await
    }

    pub async fn execute_typed<T>(&self, request: GatewayRequest) -> Result<ApiEnvelope<T>, GateError>
    where
        T: DeserializeOwned,
    {
        let envelope = self.execute(request).await?;
        envelope
            .decode_data()
            .map_err(|err| self.surface(GateError::Decode(err.to_string())))
    }

    /// Downloads a file. `params` travel as the body for POST and as the query otherwise.
    pub async fn download(
        &self,
        method: Method,
        path: &str,
        params: Option<Payload>,
        file_type: &str,
    ) -> Result<DownloadedFile, GateError> {
        let mut request = GatewayRequest::new(method.clone(), path)
            .with_response(ResponseKind::Blob)
            .with_timeout(self.deadlines.download);
        if method == Method::POST {
            request.body = params;
        } else {
            request.params = params;
        }

        let response = self.dispatch(request).await?;
        if response.is_json() {
            // The backend answers failed exports with an envelope instead of a file.
            self.accept_envelope(&response.body)?;
            return Err(self.surface(GateError::Download(
                "expected file content, received a JSON envelope".to_string(),
            )));
        }

        let file_name = response
            .header(http::header::CONTENT_DISPOSITION.as_str())
            .and_then(download::file_name_from_disposition)
            .unwrap_or_else(|| download::DEFAULT_FILE_NAME.to_string());
        Ok(DownloadedFile {
            file_name,
            content_type: download::content_type_for(file_type),
            bytes: response.body,
        })
    }

    /// Fingerprints, de-duplicates and sends one request. The table entry is released
    /// whatever the outcome, including when the caller drops this future.
    async fn dispatch(&self, request: GatewayRequest) -> Result<TransportResponse, GateError> {
        let fingerprint = request.fingerprint();
        let deadline = request.timeout.unwrap_or(self.deadlines.request);
        let guard = self.inflight.track(fingerprint.clone());
        let handle = guard.handle().clone();

        let outcome = tokio::select! {
            biased;
            _ = handle.cancelled() => Err(cancelled_error(&handle)),
            result = timeout(deadline, self.transport.send(&request, handle.token())) => {
                match result {
                    Err(_) => Err(GateError::Timeout(deadline)),
                    Ok(Err(TransportError::Cancelled)) => Err(cancelled_error(&handle)),
                    Ok(Err(err)) => Err(transport_error(err)),
                    Ok(Ok(response)) => Ok(response),
                }
            }
        };

        guard.finish();

        // A result that raced a newer identical dispatch must not reach the caller.
        let outcome = match outcome {
            Ok(_) if handle.is_cancelled() => Err(cancelled_error(&handle)),
            other => other,
        };

        match outcome {
            Ok(response) => {
                debug!(target: "request-gate", fingerprint = %fingerprint, status = %response.status, "settled");
                Ok(response)
            }
            Err(err) => Err(self.surface(err)),
        }
    }

    fn accept_envelope(&self, body: &[u8]) -> Result<ApiEnvelope<Value>, GateError> {
        let envelope = ApiEnvelope::from_slice(body)
            .map_err(|err| self.surface(GateError::Decode(err.to_string())))?;

        if envelope.code == self.config.session_expired_code {
            self.expire_session(&envelope.message);
            return Err(GateError::SessionExpired {
                message: envelope.message,
            });
        }

        if envelope.code != self.config.success_code {
            let message = if envelope.message.trim().is_empty() {
                GENERIC_NETWORK_MESSAGE.to_string()
            } else {
                envelope.message
            };
            return Err(self.surface(GateError::Application {
                code: envelope.code,
                message,
            }));
        }

        Ok(envelope)
    }

    fn expire_session(&self, message: &str) {
        let cancelled = self.inflight.cancel_all(CancelReason::SessionExpired);
        warn!(target: "request-gate", cancelled, server_message = %message, "session expired");
        self.notifier.error(SESSION_EXPIRED_MESSAGE);
        let listeners = self.listeners.read().clone();
        for listener in listeners {
            listener.on_session_expired();
        }
    }

    /// Reports `err` to the operator unless it is a cancellation.
    fn surface(&self, err: GateError) -> GateError {
        if let Some(message) = err.user_message() {
            warn!(target: "request-gate", error = %err, "request failed");
            self.notifier.error(&message);
        }
        err
    }
}

fn cancelled_error(handle: &CancelHandle) -> GateError {
    GateError::Cancelled(
        handle
            .reason()
            .unwrap_or_else(|| CancelReason::Manual("cancelled".to_string())),
    )
}

fn transport_error(err: TransportError) -> GateError {
    match err {
        TransportError::Status { status, body } => {
            let message = ApiEnvelope::from_slice(&body)
                .ok()
                .map(|envelope| envelope.message)
                .or_else(|| {
                    serde_json::from_slice::<Value>(&body).ok().and_then(|value| {
                        value
                            .get("message")
                            .and_then(Value::as_str)
                            .map(str::to_string)
                    })
                })
                .filter(|message| !message.trim().is_empty())
                .unwrap_or_else(|| GENERIC_NETWORK_MESSAGE.to_string());
            GateError::Transport {
                status: Some(status.as_u16()),
                message,
            }
        }
        TransportError::Timeout => GateError::Transport {
            status: None,
            message: GENERIC_NETWORK_MESSAGE.to_string(),
        },
        TransportError::Request(_) | TransportError::Cancelled => GateError::Transport {
            status: None,
            message: GENERIC_NETWORK_MESSAGE.to_string(),
        },
    }
}
