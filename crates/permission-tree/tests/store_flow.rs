use std::io::Write;
use std::sync::Arc;

use async_trait::async_trait;
use gatehouse_core_types::{ApiEnvelope, MemoryNotifier};
use permission_tree::{
    constant_routes, load_manifest_from_path, load_tree_from_path, CompileError,
    CompilerLimits, PermissionNode, PermissionSource, PermissionStore, SourceError, StoreError,
    ViewRegistry, CATCH_ALL_PATH, NOT_FOUND_VIEW, ROOT_PATH,
};
use tokio::sync::Notify;

const TREE_YAML: &str = r#"
- id: 1
  name: System
  type: 1
  icon: setting
  redirect: /system
  children:
    - id: 2
      name: Users
      type: "1"
      redirect: /system/user
      keepAlive: 1
      children:
        - { id: 3, name: Add, type: 2, permission: "user:add" }
        - { id: 4, name: Delete, type: 2, permission: "user:delete" }
    - id: 5
      name: Audit
      type: 1
      redirect: /system/audit
- id: 6
  name: Dashboard
  type: 1
  redirect: /dashboard
  children:
    - { id: 7, name: Export, type: 2, permission: "dashboard:export" }
"#;

struct StaticSource(ApiEnvelope<Vec<PermissionNode>>);

#[async_trait]
impl PermissionSource for StaticSource {
    async fn fetch_menu(&self) -> Result<ApiEnvelope<Vec<PermissionNode>>, SourceError> {
        Ok(self.0.clone())
    }
}

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

fn registry() -> Arc<ViewRegistry> {
    Arc::new(
        ViewRegistry::new()
            .with("views/system/user/index", "src/views/system/user/index.vue")
            .with("views/dashboard/index", "src/views/dashboard/index.vue"),
    )
}

#[tokio::test]
async fn installs_routes_and_permissions_from_file() {
    let tree_file = write_temp(TREE_YAML);
    let tree = load_tree_from_path(tree_file.path()).unwrap();

    let store = PermissionStore::new(registry());
    store
        .generate(&StaticSource(ApiEnvelope::success(tree)))
        .await
        .unwrap();

    assert!(store.is_loaded());
    let perms: Vec<_> = store.perms().iter().map(str::to_string).collect();
    assert_eq!(perms, vec!["dashboard:export", "user:add", "user:delete"]);
    assert!(store.has_permission(Some("user:delete")));
    assert!(!store.has_permission(Some("user:export")));
    assert!(store.has_permission(None));

    let dynamic = store.dynamic_routes();
    let system = &dynamic[0];
    assert_eq!(system.redirect.as_deref(), Some("/system/user"));
    assert_eq!(system.meta.icon.as_deref(), Some("setting"));
    let users = system.find("/system/user").unwrap();
    assert_eq!(
        users.view.as_ref().unwrap().target,
        "src/views/system/user/index.vue"
    );
    assert!(users.meta.keep_alive);
    let audit = system.find("/system/audit").unwrap();
    assert_eq!(audit.view.as_ref().unwrap().key, NOT_FOUND_VIEW);

    // A menu whose only child is a capability renders its own view.
    let dashboard = &dynamic[1];
    assert!(dashboard.redirect.is_none());
    assert_eq!(
        dashboard.view.as_ref().unwrap().target,
        "src/views/dashboard/index.vue"
    );
    assert!(dashboard.children.is_empty());

    let merged = store.routes(&constant_routes());
    let root = merged.iter().find(|route| route.path == ROOT_PATH).unwrap();
    assert!(root.find("/system/audit").is_some());
    assert!(root.find("/error/404").is_some());

    let installable = store.installable_routes();
    assert_eq!(installable.len(), 3);
    assert_eq!(installable.last().unwrap().path, CATCH_ALL_PATH);
}

#[tokio::test]
async fn manifest_file_drives_view_resolution() {
    let manifest = write_temp("- views/system/audit/index\n");
    let registry = load_manifest_from_path(manifest.path()).unwrap();
    let store = PermissionStore::new(Arc::new(registry));
    let tree = vec![PermissionNode::menu("Audit", "/system/audit")];
    store
        .generate(&StaticSource(ApiEnvelope::success(tree)))
        .await
        .unwrap();
    let audit = &store.dynamic_routes()[0];
    assert_eq!(audit.view.as_ref().unwrap().key, "views/system/audit/index");
}

#[tokio::test]
async fn rejected_fetch_installs_nothing() {
    let notifier = Arc::new(MemoryNotifier::new());
    let store = PermissionStore::new(registry()).with_notifier(notifier.clone());

    let err = store
        .generate(&StaticSource(ApiEnvelope::failure(500, "menu service down")))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        StoreError::Rejected {
            code: 500,
            message: "menu service down".into()
        }
    );
    assert!(!store.is_loaded());
    assert!(store.dynamic_routes().is_empty());
    assert_eq!(notifier.messages(), vec!["menu service down".to_string()]);
}

#[tokio::test]
async fn oversized_tree_installs_nothing() {
    let notifier = Arc::new(MemoryNotifier::new());
    let store = PermissionStore::new(registry())
        .with_notifier(notifier.clone())
        .with_limits(CompilerLimits {
            max_depth: 2,
            max_nodes: 100,
        });
    let tree = vec![PermissionNode::menu("a", "/a").with_children(vec![
        PermissionNode::menu("b", "/a/b").with_children(vec![PermissionNode::capability(
            "c", "c:perm",
        )]),
    ])];

    let err = store
        .generate(&StaticSource(ApiEnvelope::success(tree)))
        .await
        .unwrap_err();
    assert_eq!(err, StoreError::Compile(CompileError::DepthExceeded { limit: 2 }));
    assert!(!store.is_loaded());
    assert!(store.perms().is_empty());
    assert_eq!(notifier.messages().len(), 1);
}

struct GatedSource {
    release: Notify,
    entered: Notify,
}

#[async_trait]
impl PermissionSource for GatedSource {
    async fn fetch_menu(&self) -> Result<ApiEnvelope<Vec<PermissionNode>>, SourceError> {
        self.entered.notify_one();
        self.release.notified().await;
        Ok(ApiEnvelope::success(vec![PermissionNode::capability(
            "Add", "user:add",
        )]))
    }
}

#[tokio::test]
async fn clear_during_generation_discards_result() {
    let store = Arc::new(PermissionStore::new(registry()));
    let source = Arc::new(GatedSource {
        release: Notify::new(),
        entered: Notify::new(),
    });

    let task = {
        let store = store.clone();
        let source = source.clone();
        tokio::spawn(async move { store.generate(source.as_ref()).await })
    };
    source.entered.notified().await;
    store.clear();
    source.release.notify_one();

    assert_eq!(task.await.unwrap(), Err(StoreError::Stale));
    assert!(!store.is_loaded());
    assert!(!store.has_permission(Some("user:add")));
}

#[tokio::test]
async fn fetch_errors_propagate_without_notifying() {
    struct Failing;

    #[async_trait]
    impl PermissionSource for Failing {
        async fn fetch_menu(&self) -> Result<ApiEnvelope<Vec<PermissionNode>>, SourceError> {
            Err(SourceError("connection refused".into()))
        }
    }

    let notifier = Arc::new(MemoryNotifier::new());
    let store = PermissionStore::new(registry()).with_notifier(notifier.clone());
    let err = store.generate(&Failing).await.unwrap_err();
    assert!(matches!(err, StoreError::Fetch(_)));
    assert!(notifier.messages().is_empty());
}
