//! Turns the server permission tree into routes and a capability set.

use thiserror::Error;
use tracing::debug;

use crate::model::{CompiledRoute, NodeKind, PermissionNode, RouteMeta};
use crate::perms::PermissionSet;
use crate::registry::ViewRegistry;

pub const DEFAULT_MAX_DEPTH: usize = 32;
pub const DEFAULT_MAX_NODES: usize = 10_000;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CompileError {
    #[error("permission tree deeper than {limit} levels")]
    DepthExceeded { limit: usize },
    #[error("permission tree has more than {limit} nodes")]
    TooManyNodes { limit: usize },
}

/// Bounds applied to server-supplied trees before anything is compiled.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompilerLimits {
    pub max_depth: usize,
    pub max_nodes: usize,
}

impl Default for CompilerLimits {
    fn default() -> Self {
        Self {
            max_depth: DEFAULT_MAX_DEPTH,
            max_nodes: DEFAULT_MAX_NODES,
        }
    }
}

impl CompilerLimits {
    /// Walks the whole tree without recursion and rejects it when a bound is exceeded.
    pub fn check(&self, nodes: &[PermissionNode]) -> Result<(), CompileError> {
        let mut stack: Vec<(&PermissionNode, usize)> = nodes.iter().map(|node| (node, 1)).collect();
        let mut seen = 0usize;
        while let Some((node, depth)) = stack.pop() {
            seen += 1;
            if seen > self.max_nodes {
                return Err(CompileError::TooManyNodes {
                    limit: self.max_nodes,
                });
            }
            if depth > self.max_depth {
                return Err(CompileError::DepthExceeded {
                    limit: self.max_depth,
                });
            }
            stack.extend(node.children.iter().map(|child| (child, depth + 1)));
        }
        Ok(())
    }
}

/// Routes and capabilities compiled from one tree.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct CompiledTree {
    pub routes: Vec<CompiledRoute>,
    pub perms: PermissionSet,
}

/// Compiles routes and permissions together; either both succeed or nothing is produced.
pub fn compile_tree(
    nodes: &[PermissionNode],
    registry: &ViewRegistry,
    limits: CompilerLimits,
) -> Result<CompiledTree, CompileError> {
    limits.check(nodes)?;
    let routes = nodes.iter().map(|node| compile_node(node, registry)).collect();
    let mut perms = PermissionSet::new();
    collect_into(nodes, &mut perms);
    debug!(
        target: "permission-tree",
        roots = nodes.len(),
        perms = perms.len(),
        "compiled permission tree"
    );
    Ok(CompiledTree { routes, perms })
}

/// Compiles the navigable routes of `nodes`, preserving server order.
pub fn compile_routes(
    nodes: &[PermissionNode],
    registry: &ViewRegistry,
    limits: CompilerLimits,
) -> Result<Vec<CompiledRoute>, CompileError> {
    limits.check(nodes)?;
    Ok(nodes.iter().map(|node| compile_node(node, registry)).collect())
}

/// Adds the permission string of every capability node in `nodes` to `out`.
pub fn collect_permissions(
    nodes: &[PermissionNode],
    out: &mut PermissionSet,
    limits: CompilerLimits,
) -> Result<(), CompileError> {
    limits.check(nodes)?;
    collect_into(nodes, out);
    Ok(())
}

fn compile_node(node: &PermissionNode, registry: &ViewRegistry) -> CompiledRoute {
    let mut route = CompiledRoute {
        path: node.redirect.clone(),
        name: Some(node.redirect.clone()),
        view: None,
        meta: RouteMeta {
            title: Some(node.name.clone()),
            icon: node.icon.clone(),
            hide_in_menu: node.hide_in_menu,
            hide_in_tagview: false,
            active_menu: node.active_menu.clone(),
            keep_alive: node.keep_alive,
            dynamic: true,
        },
        redirect: None,
        children: Vec::new(),
    };

    let first_menu_child = node.first_menu_child();
    if node.kind == NodeKind::Menu {
        match first_menu_child {
            // Structural menus delegate rendering to their first menu child.
            Some(child) => route.redirect = Some(child.redirect.clone()),
            None => route.view = Some(registry.resolve_or_not_found(&node.redirect)),
        }
    }

    if first_menu_child.is_some() {
        route.children = node
            .children
            .iter()
            .map(|child| compile_node(child, registry))
            .collect();
    }
    route
}

fn collect_into(nodes: &[PermissionNode], out: &mut PermissionSet) {
    for node in nodes {
        if node.kind == NodeKind::Capability {
            if let Some(permission) = node.permission.as_deref().filter(|p| !p.is_empty()) {
                out.insert(permission);
            }
        }
        collect_into(&node.children, out);
    }
}
