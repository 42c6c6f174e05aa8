//! Gatehouse permission tree.
//!
//! Compiles the server-supplied permission tree into navigable routes and a set of
//! capability strings, and keeps both for the lifetime of a session.

pub mod compiler;
pub mod config;
pub mod model;
pub mod perms;
pub mod registry;
pub mod routes;
pub mod store;

pub use crate::compiler::{
    collect_permissions, compile_routes, compile_tree, CompileError, CompiledTree,
    CompilerLimits, DEFAULT_MAX_DEPTH, DEFAULT_MAX_NODES,
};
pub use crate::config::{
    load_manifest_from_path, load_tree_from_path, load_tree_from_reader, parse_manifest_str,
    parse_tree_str, ConfigError,
};
pub use crate::model::{CompiledRoute, NodeKind, PermissionNode, RouteMeta, ViewBinding};
pub use crate::perms::{PermissionError, PermissionSet};
pub use crate::registry::{view_key, ViewRegistry, NOT_FOUND_VIEW};
pub use crate::routes::{
    constant_routes, merge_under_root, not_found_catch_all, CATCH_ALL_PATH, LOGIN_PATH,
    NOT_FOUND_PATH, NOT_FOUND_ROUTE_NAME, ROOT_PATH,
};
pub use crate::store::{PermissionSource, PermissionStore, SourceError, StoreError, StoreEvent};
