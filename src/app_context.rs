//! Application context: owns the gate, the permission store and the session.

use std::sync::Arc;

use gatehouse_core_types::Notifier;
use parking_lot::RwLock;
use permission_tree::{
    constant_routes, load_manifest_from_path, merge_under_root, CompiledRoute, PermissionStore,
    ViewRegistry,
};
use request_gate::{CancelReason, HttpTransport, RequestGate, SessionListener, TokenSlot};
use tracing::{info, warn};

use crate::api::{self, GatePermissionSource, LoginParams};
use crate::config::AppConfig;
use crate::errors::{ConsoleError, ConsoleResult};
use crate::guard::{Navigation, NavigationGuard};
use crate::session::{login_location, UserInfo, UserSession};

/// Where the console currently is, and where it must go next after a forced logout.
#[derive(Debug, Default)]
struct Location {
    current: RwLock<Option<String>>,
    pending: RwLock<Option<String>>,
}

/// Tears the session down when the backend reports it expired.
struct ExpiryHandler {
    session: Arc<UserSession>,
    permissions: Arc<PermissionStore>,
    location: Arc<Location>,
}

impl SessionListener for ExpiryHandler {
    fn on_session_expired(&self) {
        let current = self.location.current.read().clone();
        self.session.reset_token();
        self.session.reset_user_info();
        self.permissions.clear();
        *self.location.pending.write() = Some(login_location(current.as_deref()));
        info!(target: "gatehouse", "session expired, signed out");
    }
}

pub struct AppContext {
    config: AppConfig,
    gate: Arc<RequestGate>,
    permissions: Arc<PermissionStore>,
    registry: Arc<ViewRegistry>,
    session: Arc<UserSession>,
    guard: NavigationGuard,
    location: Arc<Location>,
}

impl AppContext {
    /// Context talking to the configured backend over HTTP.
    pub fn new(config: AppConfig, notifier: Arc<dyn Notifier>) -> ConsoleResult<Self> {
        let token = TokenSlot::new();
        let gate = RequestGate::with_reqwest(config.gate.clone(), token.clone())?;
        Self::assemble(config, gate, token, notifier)
    }

    /// Context over an arbitrary transport. The transport is expected to stamp `token`
    /// itself if the backend needs it.
    pub fn with_transport(
        config: AppConfig,
        transport: Arc<dyn HttpTransport>,
        token: TokenSlot,
        notifier: Arc<dyn Notifier>,
    ) -> ConsoleResult<Self> {
        let gate = RequestGate::new(config.gate.clone(), transport)?;
        Self::assemble(config, gate, token, notifier)
    }

    fn assemble(
        config: AppConfig,
        gate: RequestGate,
        token: TokenSlot,
        notifier: Arc<dyn Notifier>,
    ) -> ConsoleResult<Self> {
        let registry = match &config.permissions.views_manifest {
            Some(path) => load_manifest_from_path(path)?,
            None => ViewRegistry::new(),
        };
        let registry = Arc::new(registry);
        let permissions = Arc::new(
            PermissionStore::new(registry.clone())
                .with_limits(config.permissions.limits())
                .with_notifier(notifier.clone()),
        );
        let session = Arc::new(UserSession::new(token));
        let location = Arc::new(Location::default());

        let gate = Arc::new(gate.with_notifier(notifier));
        gate.add_session_listener(Arc::new(ExpiryHandler {
            session: session.clone(),
            permissions: permissions.clone(),
            location: location.clone(),
        }));

        Ok(Self {
            config,
            gate,
            permissions,
            registry,
            session,
            guard: NavigationGuard::default(),
            location,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn gate(&self) -> &Arc<RequestGate> {
        &self.gate
    }

    pub fn permissions(&self) -> &Arc<PermissionStore> {
        &self.permissions
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    pub fn session(&self) -> &UserSession {
        &self.session
    }

    pub fn permission_source(&self) -> GatePermissionSource {
        GatePermissionSource::new(self.gate.clone(), self.config.permissions.menu_path.clone())
    }

    /// Signs in and starts the session.
    pub async fn login(&self, phone: &str, password: &str) -> ConsoleResult<UserInfo> {
        let params = LoginParams {
            phone: phone.to_string(),
            password: password.to_string(),
        };
        let envelope = api::request_login(&self.gate, &params).await?;
        let info = envelope.data;
        let token = info
            .token
            .clone()
            .filter(|token| !token.is_empty())
            .ok_or(ConsoleError::MissingToken)?;
        self.session.set_token(token);
        self.session.set_user_info(info.clone());
        self.location.pending.write().take();
        info!(target: "gatehouse", user = ?info.username, "signed in");
        Ok(info)
    }

    /// Ends the session locally and returns the login location to show next.
    pub fn logout(&self, redirect: Option<&str>) -> String {
        self.session.reset_token();
        self.session.reset_user_info();
        self.permissions.clear();
        let cancelled = self
            .gate
            .cancel_all(CancelReason::Manual("logout".to_string()));
        info!(target: "gatehouse", cancelled, "signed out");
        login_location(redirect)
    }

    /// Notifies the backend, then ends the session whatever the backend answered.
    pub async fn sign_out(&self, redirect: Option<&str>) -> String {
        if let Err(err) = api::request_logout(&self.gate).await {
            warn!(target: "gatehouse", error = %err, "remote logout failed");
        }
        self.logout(redirect)
    }

    /// Location forced by an expired session, consumed on read.
    pub fn take_pending_redirect(&self) -> Option<String> {
        self.location.pending.write().take()
    }

    pub fn current_location(&self) -> Option<String> {
        self.location.current.read().clone()
    }

    /// Runs the guard for `to` and settles on the location the console ends up at.
    pub async fn navigate(&self, to: &str) -> Navigation {
        let source = self.permission_source();
        let mut outcome = self.guard.before_each(self, &source, to).await;
        if let Navigation::Replace(target) = outcome.clone() {
            // Routes are installed now; the second pass proceeds.
            outcome = match self.guard.before_each(self, &source, &target).await {
                Navigation::Proceed => Navigation::Replace(target),
                other => other,
            };
        }
        match &outcome {
            Navigation::Proceed | Navigation::Replace(_) => {
                *self.location.current.write() = Some(to.to_string());
            }
            Navigation::Redirect(target) => {
                *self.location.current.write() = Some(target.clone());
            }
            Navigation::Stay => {}
        }
        outcome
    }

    /// Every route the console can currently render.
    pub fn route_table(&self) -> Vec<CompiledRoute> {
        if self.permissions.is_loaded() {
            merge_under_root(&constant_routes(), &self.permissions.installable_routes())
        } else {
            constant_routes()
        }
    }
}
