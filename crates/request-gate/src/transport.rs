//! Transport collaborator: the gate hands each call a cancellation token and expects
//! cancellation to be reported distinctly from other failures.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, StatusCode};
use parking_lot::RwLock;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use url::Url;

use crate::fingerprint::{Fingerprint, Payload};

/// How the caller wants the response body treated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResponseKind {
    #[default]
    Json,
    Blob,
}

#[derive(Clone, Debug)]
pub struct GatewayRequest {
    pub method: Method,
    /// Path relative to the configured base URL (absolute URLs are used as-is).
    pub path: String,
    pub params: Option<Payload>,
    pub body: Option<Payload>,
    pub headers: HeaderMap,
    /// Per-call deadline; the gate's default applies when unset.
    pub timeout: Option<Duration>,
    pub response: ResponseKind,
}

impl GatewayRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            params: None,
            body: None,
            headers: HeaderMap::new(),
            timeout: None,
            response: ResponseKind::Json,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>) -> Self {
        Self::new(Method::POST, path)
    }

    pub fn put(path: impl Into<String>) -> Self {
        Self::new(Method::PUT, path)
    }

    pub fn with_params(mut self, params: impl Into<Payload>) -> Self {
        self.params = Some(params.into());
        self
    }

    pub fn with_body(mut self, body: impl Into<Payload>) -> Self {
        self.body = Some(body.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_response(mut self, response: ResponseKind) -> Self {
        self.response = response;
        self
    }

    pub fn fingerprint(&self) -> Fingerprint {
        Fingerprint::compute(
            &self.method,
            &self.path,
            self.params.as_ref(),
            self.body.as_ref(),
        )
    }
}

#[derive(Clone, Debug)]
pub struct TransportResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl TransportResponse {
    pub fn new(status: StatusCode, headers: HeaderMap, body: Bytes) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }

    pub fn json(body: &serde_json::Value) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        Self::new(StatusCode::OK, headers, Bytes::from(body.to_string()))
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|value| value.to_str().ok())
    }

    pub fn is_json(&self) -> bool {
        self.header(http::header::CONTENT_TYPE.as_str())
            .map(|value| value.contains("json"))
            .unwrap_or(false)
    }
}

#[derive(Clone, Debug, Error)]
pub enum TransportError {
    #[error("cancelled")]
    Cancelled,
    #[error("upstream returned status {status}")]
    Status { status: StatusCode, body: Bytes },
    #[error("request error: {0}")]
    Request(String),
    #[error("transport timeout")]
    Timeout,
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse, TransportError>;
}

pub type InterceptorObject = Arc<dyn Interceptor>;

#[async_trait]
pub trait Interceptor: Send + Sync {
    async fn before_send(&self, _request: &mut GatewayRequest) -> Result<(), TransportError> {
        Ok(())
    }
}

/// Shared slot holding the session token; written at login, cleared at logout.
#[derive(Clone, Debug, Default)]
pub struct TokenSlot {
    inner: Arc<RwLock<Option<String>>>,
}

impl TokenSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write() = Some(token.into());
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    pub fn get(&self) -> Option<String> {
        self.inner.read().clone()
    }
}

/// Stamps the session token onto every outgoing request.
#[derive(Clone, Debug)]
pub struct AccessTokenInterceptor {
    header: HeaderName,
    token: TokenSlot,
}

impl AccessTokenInterceptor {
    pub fn new(header: &str, token: TokenSlot) -> Result<Self, TransportError> {
        let header = HeaderName::from_bytes(header.as_bytes())
            .map_err(|err| TransportError::Request(format!("invalid token header: {err}")))?;
        Ok(Self { header, token })
    }
}

#[async_trait]
impl Interceptor for AccessTokenInterceptor {
    async fn before_send(&self, request: &mut GatewayRequest) -> Result<(), TransportError> {
        let token = self.token.get().unwrap_or_default();
        let value = HeaderValue::from_str(&token)
            .map_err(|err| TransportError::Request(format!("invalid token value: {err}")))?;
        request.headers.insert(self.header.clone(), value);
        Ok(())
    }
}

/// reqwest-backed transport.
#[derive(Clone)]
pub struct ReqwestTransport {
    base_url: Url,
    client: reqwest::Client,
    interceptors: Vec<InterceptorObject>,
}

impl ReqwestTransport {
    pub fn new(base_url: &str, connect_timeout: Duration) -> Result<Self, TransportError> {
        let base_url = Url::parse(base_url)
            .map_err(|err| TransportError::Request(format!("invalid base url: {err}")))?;
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .tcp_keepalive(Some(Duration::from_secs(30)))
            .connect_timeout(connect_timeout)
            .build()
            .map_err(|err| TransportError::Request(format!("failed to build client: {err}")))?;
        Ok(Self {
            base_url,
            client,
            interceptors: Vec::new(),
        })
    }

    pub fn with_interceptor<I>(mut self, interceptor: I) -> Self
    where
        I: Interceptor + 'static,
    {
        self.interceptors.push(Arc::new(interceptor));
        self
    }

    pub fn resolve(&self, path: &str) -> Result<Url, TransportError> {
        if path.starts_with("http://") || path.starts_with("https://") {
            return Url::parse(path)
                .map_err(|err| TransportError::Request(format!("invalid url {path}: {err}")));
        }
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Url::parse(&joined)
            .map_err(|err| TransportError::Request(format!("invalid url {joined}: {err}")))
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(
        &self,
        request: &GatewayRequest,
        cancel: &CancellationToken,
    ) -> Result<TransportResponse, TransportError> {
        let mut outgoing = request.clone();
        for interceptor in &self.interceptors {
            interceptor.before_send(&mut outgoing).await?;
        }

        let mut url = self.resolve(&outgoing.path)?;
        if let Some(Payload::Opaque(raw)) = &outgoing.params {
            if !raw.is_empty() {
                url.set_query(Some(raw));
            }
        }
        let mut builder = self
            .client
            .request(outgoing.method.clone(), url)
            .headers(outgoing.headers.clone());

        if let Some(Payload::Json(value)) = &outgoing.params {
            if !value.is_null() {
                builder = builder.query(value);
            }
        }

        match &outgoing.body {
            Some(Payload::Json(value)) => builder = builder.json(value),
            Some(Payload::Opaque(raw)) => builder = builder.body(raw.clone()),
            None => {}
        }

        if let Some(timeout) = outgoing.timeout {
            builder = builder.timeout(timeout);
        }

        let response = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            response = builder.send() => response.map_err(map_reqwest_error)?,
        };

        let status = response.status();
        let headers = response.headers().clone();
        let body = tokio::select! {
            _ = cancel.cancelled() => return Err(TransportError::Cancelled),
            body = response.bytes() => body.map_err(map_reqwest_error)?,
        };

        if !status.is_success() {
            return Err(TransportError::Status { status, body });
        }
        Ok(TransportResponse::new(status, headers, body))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout
    } else {
        TransportError::Request(err.to_string())
    }
}
