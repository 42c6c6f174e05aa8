//! Session-scoped permission state: compiled dynamic routes and the capability set.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core_types::{ApiEnvelope, Notifier, TracingNotifier};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

use crate::compiler::{compile_tree, CompileError, CompilerLimits};
use crate::model::{CompiledRoute, PermissionNode};
use crate::perms::{PermissionError, PermissionSet};
use crate::registry::ViewRegistry;
use crate::routes::{merge_under_root, not_found_catch_all};

const REJECTED_FALLBACK_MESSAGE: &str = "Failed to load permissions";

/// Fetches the session's permission tree.
#[async_trait]
pub trait PermissionSource: Send + Sync {
    /// Transport failures are returned as `Err` and are assumed to be reported already.
    async fn fetch_menu(&self) -> Result<ApiEnvelope<Vec<PermissionNode>>, SourceError>;
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
#[error("{0}")]
pub struct SourceError(pub String);

#[derive(Clone, Debug, Error, PartialEq)]
pub enum StoreError {
    #[error("failed to fetch permissions: {0}")]
    Fetch(#[from] SourceError),
    #[error("permission fetch rejected ({code}): {message}")]
    Rejected { code: i64, message: String },
    #[error(transparent)]
    Compile(#[from] CompileError),
    #[error("permissions were cleared while loading")]
    Stale,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum StoreEvent {
    Generated { routes: usize, perms: usize },
    Cleared,
}

#[derive(Debug, Default)]
struct StoreState {
    dynamic_routes_loaded: bool,
    dynamic_routes: Vec<CompiledRoute>,
    perms: PermissionSet,
}

pub struct PermissionStore {
    state: RwLock<StoreState>,
    registry: Arc<ViewRegistry>,
    limits: CompilerLimits,
    notifier: Arc<dyn Notifier>,
    events: broadcast::Sender<StoreEvent>,
    generation: Mutex<()>,
    epoch: AtomicU64,
}

impl PermissionStore {
    pub fn new(registry: Arc<ViewRegistry>) -> Self {
        let (tx, _rx) = broadcast::channel(32);
        Self {
            state: RwLock::new(StoreState::default()),
            registry,
            limits: CompilerLimits::default(),
            notifier: Arc::new(TracingNotifier),
            events: tx,
            generation: Mutex::new(()),
            epoch: AtomicU64::new(0),
        }
    }

    pub fn with_limits(mut self, limits: CompilerLimits) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    pub fn registry(&self) -> &ViewRegistry {
        &self.registry
    }

    /// Fetches the tree and installs its routes and permissions together.
    pub async fn generate(&self, source: &dyn PermissionSource) -> Result<(), StoreError> {
        let _serial = self.generation.lock().await;
        let epoch = self.epoch.load(Ordering::SeqCst);

        let envelope = source.fetch_menu().await?;
        if !envelope.is_success() {
            let message = if envelope.message.trim().is_empty() {
                REJECTED_FALLBACK_MESSAGE.to_string()
            } else {
                envelope.message
            };
            self.notifier.error(&message);
            return Err(StoreError::Rejected {
                code: envelope.code,
                message,
            });
        }

        let compiled = compile_tree(&envelope.data, &self.registry, self.limits).map_err(|err| {
            warn!(target: "permission-tree", error = %err, "rejected permission tree");
            self.notifier.error(&err.to_string());
            err
        })?;

        let (routes, perms) = (compiled.routes.len(), compiled.perms.len());
        {
            let mut state = self.state.write();
            if self.epoch.load(Ordering::SeqCst) != epoch {
                return Err(StoreError::Stale);
            }
            state.dynamic_routes = compiled.routes;
            state.perms = compiled.perms;
            state.dynamic_routes_loaded = true;
        }

        info!(target: "permission-tree", routes, perms, "permissions generated");
        self.publish(StoreEvent::Generated { routes, perms });
        Ok(())
    }

    /// Drops everything installed for the session.
    pub fn clear(&self) {
        {
            let mut state = self.state.write();
            self.epoch.fetch_add(1, Ordering::SeqCst);
            *state = StoreState::default();
        }
        info!(target: "permission-tree", "permissions cleared");
        self.publish(StoreEvent::Cleared);
    }

    pub fn is_loaded(&self) -> bool {
        self.state.read().dynamic_routes_loaded
    }

    pub fn dynamic_routes(&self) -> Vec<CompiledRoute> {
        self.state.read().dynamic_routes.clone()
    }

    pub fn perms(&self) -> PermissionSet {
        self.state.read().perms.clone()
    }

    /// Constant routes with the dynamic routes merged under the root layout.
    pub fn routes(&self, constant_routes: &[CompiledRoute]) -> Vec<CompiledRoute> {
        merge_under_root(constant_routes, &self.state.read().dynamic_routes)
    }

    /// Dynamic routes followed by the not-found catch-all, in installation order.
    pub fn installable_routes(&self) -> Vec<CompiledRoute> {
        let mut routes = self.dynamic_routes();
        routes.push(not_found_catch_all());
        routes
    }

    pub fn has_permission(&self, key: Option<&str>) -> bool {
        self.state.read().perms.has_permission(key)
    }

    pub fn require_permission_key(&self, key: Option<&str>) -> Result<bool, PermissionError> {
        self.state.read().perms.require_permission_key(key)
    }

    fn publish(&self, event: StoreEvent) {
        if self.events.receiver_count() > 0 {
            let _ = self.events.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(ApiEnvelope<Vec<PermissionNode>>);

    #[async_trait]
    impl PermissionSource for Fixed {
        async fn fetch_menu(&self) -> Result<ApiEnvelope<Vec<PermissionNode>>, SourceError> {
            Ok(self.0.clone())
        }
    }

    #[tokio::test]
    async fn empty_tree_still_marks_loaded() {
        let store = PermissionStore::new(Arc::new(ViewRegistry::new()));
        store.generate(&Fixed(ApiEnvelope::success(Vec::new()))).await.unwrap();
        assert!(store.is_loaded());
        assert_eq!(store.installable_routes().len(), 1);
    }

    #[tokio::test]
    async fn events_reach_only_current_subscribers() {
        let store = PermissionStore::new(Arc::new(ViewRegistry::new()));
        store.generate(&Fixed(ApiEnvelope::success(Vec::new()))).await.unwrap();

        let mut events = store.subscribe();
        store.clear();
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Cleared);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn clear_resets_state_and_emits_event() {
        let store = PermissionStore::new(Arc::new(ViewRegistry::new()));
        let mut events = store.subscribe();
        let tree = vec![PermissionNode::capability("Add", "user:add")];
        store.generate(&Fixed(ApiEnvelope::success(tree))).await.unwrap();
        assert!(store.has_permission(Some("user:add")));

        store.clear();
        assert!(!store.is_loaded());
        assert!(!store.has_permission(Some("user:add")));
        assert_eq!(
            events.recv().await.unwrap(),
            StoreEvent::Generated { routes: 1, perms: 1 }
        );
        assert_eq!(events.recv().await.unwrap(), StoreEvent::Cleared);
    }
}
