//! Server-side permission records and the routes compiled from them.

use std::fmt;

use serde::de::{self, Deserializer, Visitor};
use serde::{Deserialize, Serialize, Serializer};

/// Discriminant of a permission node.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NodeKind {
    /// Contributes a navigable route (code 1).
    Menu,
    /// Contributes a gating string (code 2).
    Capability,
    /// Any other code; compiled as a bare leaf.
    Other(i64),
}

impl NodeKind {
    pub const MENU_CODE: i64 = 1;
    pub const CAPABILITY_CODE: i64 = 2;

    pub fn from_code(code: i64) -> Self {
        match code {
            Self::MENU_CODE => NodeKind::Menu,
            Self::CAPABILITY_CODE => NodeKind::Capability,
            other => NodeKind::Other(other),
        }
    }

    pub fn code(self) -> i64 {
        match self {
            NodeKind::Menu => Self::MENU_CODE,
            NodeKind::Capability => Self::CAPABILITY_CODE,
            NodeKind::Other(code) => code,
        }
    }

    pub fn is_menu(self) -> bool {
        self == NodeKind::Menu
    }
}

impl Default for NodeKind {
    fn default() -> Self {
        NodeKind::Other(0)
    }
}

impl Serialize for NodeKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_i64(self.code())
    }
}

impl<'de> Deserialize<'de> for NodeKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct KindVisitor;

        impl<'de> Visitor<'de> for KindVisitor {
            type Value = NodeKind;

            fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
                f.write_str("a node type code as number or string")
            }

            fn visit_i64<E: de::Error>(self, v: i64) -> Result<NodeKind, E> {
                Ok(NodeKind::from_code(v))
            }

            fn visit_u64<E: de::Error>(self, v: u64) -> Result<NodeKind, E> {
                Ok(i64::try_from(v)
                    .map(NodeKind::from_code)
                    .unwrap_or_default())
            }

            fn visit_f64<E: de::Error>(self, v: f64) -> Result<NodeKind, E> {
                if v.fract() == 0.0 {
                    Ok(NodeKind::from_code(v as i64))
                } else {
                    Ok(NodeKind::default())
                }
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<NodeKind, E> {
                Ok(v.trim()
                    .parse::<i64>()
                    .map(NodeKind::from_code)
                    .unwrap_or_default())
            }

            fn visit_unit<E: de::Error>(self) -> Result<NodeKind, E> {
                Ok(NodeKind::default())
            }

            fn visit_none<E: de::Error>(self) -> Result<NodeKind, E> {
                Ok(NodeKind::default())
            }

            fn visit_some<D: Deserializer<'de>>(self, d: D) -> Result<NodeKind, D::Error> {
                d.deserialize_any(self)
            }
        }

        deserializer.deserialize_any(KindVisitor)
    }
}

/// One record of the server permission tree.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PermissionNode {
    #[serde(default, deserialize_with = "lenient_string")]
    pub id: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: NodeKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, deserialize_with = "truthy")]
    pub hide_in_menu: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<String>,
    /// Route path of the node; also used as the route name.
    #[serde(default)]
    pub redirect: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_menu: Option<String>,
    #[serde(default, deserialize_with = "truthy")]
    pub keep_alive: bool,
    #[serde(default, deserialize_with = "null_as_empty")]
    pub children: Vec<PermissionNode>,
}

impl PermissionNode {
    pub fn menu(name: impl Into<String>, redirect: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Menu,
            redirect: redirect.into(),
            ..Self::default()
        }
    }

    pub fn capability(name: impl Into<String>, permission: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            kind: NodeKind::Capability,
            permission: Some(permission.into()),
            ..Self::default()
        }
    }

    pub fn with_children(mut self, children: Vec<PermissionNode>) -> Self {
        self.children = children;
        self
    }

    pub fn has_menu_child(&self) -> bool {
        self.children.iter().any(|child| child.kind.is_menu())
    }

    pub fn first_menu_child(&self) -> Option<&PermissionNode> {
        self.children.iter().find(|child| child.kind.is_menu())
    }
}

/// Reference to the page rendered by a route.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ViewBinding {
    /// Registry key, `views<path>/index`.
    pub key: String,
    /// Whatever the registry maps the key to.
    pub target: String,
    /// Set when the key was missing and the not-found view was bound instead.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub fallback: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RouteMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default)]
    pub hide_in_menu: bool,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub hide_in_tagview: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub active_menu: Option<String>,
    #[serde(default)]
    pub keep_alive: bool,
    /// Marks routes installed from the permission tree; they are removed on logout.
    #[serde(default)]
    pub dynamic: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompiledRoute {
    pub path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub view: Option<ViewBinding>,
    #[serde(default)]
    pub meta: RouteMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<CompiledRoute>,
}

impl CompiledRoute {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..Self::default()
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Depth-first search by path, this route included.
    pub fn find(&self, path: &str) -> Option<&CompiledRoute> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(path))
    }

    /// Number of routes in this subtree.
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(CompiledRoute::count).sum::<usize>()
    }
}

fn lenient_string<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => None,
        Some(serde_json::Value::String(s)) => Some(s),
        Some(other) => Some(other.to_string()),
    })
}

/// Accepts booleans, 0/1 flags and strings the way the backend sends them.
fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<serde_json::Value>::deserialize(deserializer)?;
    Ok(match value {
        None | Some(serde_json::Value::Null) => false,
        Some(serde_json::Value::Bool(b)) => b,
        Some(serde_json::Value::Number(n)) => n.as_f64().map(|n| n != 0.0).unwrap_or(false),
        Some(serde_json::Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    })
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<Vec<PermissionNode>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<PermissionNode>>::deserialize(deserializer)?.unwrap_or_default())
}
