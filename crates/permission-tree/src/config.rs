//! Loading permission trees and view manifests from disk.
//!
//! Both documents are accepted as JSON or YAML. A tree may be a bare list of nodes or a
//! captured `{ code, data, message }` response.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::Read;
use std::path::Path;

use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;

use crate::model::PermissionNode;
use crate::registry::ViewRegistry;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to deserialize: {0}")]
    Deserialize(String),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TreeDocument {
    Nodes(Vec<PermissionNode>),
    Envelope { data: Option<Vec<PermissionNode>> },
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ManifestDocument {
    Keys(Vec<String>),
    Table(BTreeMap<String, String>),
}

fn parse_json_or_yaml<T: DeserializeOwned>(raw: &str) -> Result<T, ConfigError> {
    match serde_json::from_str(raw) {
        Ok(value) => Ok(value),
        Err(json_err) => serde_yaml::from_str(raw).map_err(|yaml_err| {
            ConfigError::Deserialize(format!(
                "json error: {}; yaml error: {}",
                json_err, yaml_err
            ))
        }),
    }
}

fn read_to_string<R: Read>(mut reader: R) -> Result<String, ConfigError> {
    let mut buf = String::new();
    reader.read_to_string(&mut buf)?;
    Ok(buf)
}

pub fn parse_tree_str(raw: &str) -> Result<Vec<PermissionNode>, ConfigError> {
    Ok(match parse_json_or_yaml::<TreeDocument>(raw)? {
        TreeDocument::Nodes(nodes) => nodes,
        TreeDocument::Envelope { data } => data.unwrap_or_default(),
    })
}

pub fn load_tree_from_reader<R: Read>(reader: R) -> Result<Vec<PermissionNode>, ConfigError> {
    parse_tree_str(&read_to_string(reader)?)
}

pub fn load_tree_from_path(path: impl AsRef<Path>) -> Result<Vec<PermissionNode>, ConfigError> {
    load_tree_from_reader(File::open(path.as_ref())?)
}

/// Parses a view manifest: either a list of keys or a key → target table.
pub fn parse_manifest_str(raw: &str) -> Result<ViewRegistry, ConfigError> {
    Ok(match parse_json_or_yaml::<ManifestDocument>(raw)? {
        ManifestDocument::Keys(keys) => ViewRegistry::from_keys(keys),
        ManifestDocument::Table(table) => {
            let mut registry = ViewRegistry::new();
            for (key, target) in table {
                registry.register(key, target);
            }
            registry
        }
    })
}

pub fn load_manifest_from_path(path: impl AsRef<Path>) -> Result<ViewRegistry, ConfigError> {
    parse_manifest_str(&read_to_string(File::open(path.as_ref())?)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NodeKind;

    #[test]
    fn parses_bare_json_tree() {
        let nodes = parse_tree_str(r#"[{"name":"Users","type":1,"redirect":"/user"}]"#).unwrap();
        assert_eq!(nodes.len(), 1);
        assert_eq!(nodes[0].kind, NodeKind::Menu);
    }

    #[test]
    fn parses_captured_envelope() {
        let nodes = parse_tree_str(
            r#"{"code":200,"message":"success","data":[{"name":"Add","type":"2","permission":"user:add"}]}"#,
        )
        .unwrap();
        assert_eq!(nodes[0].permission.as_deref(), Some("user:add"));

        let empty = parse_tree_str(r#"{"code":200,"data":null}"#).unwrap();
        assert!(empty.is_empty());
    }

    #[test]
    fn falls_back_to_yaml() {
        let raw = "- name: System\n  type: 1\n  redirect: /system\n  children:\n    - name: Users\n      type: 1\n      redirect: /system/user\n";
        let nodes = parse_tree_str(raw).unwrap();
        assert_eq!(nodes[0].children[0].redirect, "/system/user");
    }

    #[test]
    fn manifest_accepts_keys_or_table() {
        let keys = parse_manifest_str(r#"["views/user/index"]"#).unwrap();
        assert!(keys.contains("views/user/index"));

        let table = parse_manifest_str("views/user/index: src/views/user/index.vue\n").unwrap();
        assert_eq!(table.resolve("/user").unwrap().target, "src/views/user/index.vue");
    }

    #[test]
    fn reports_both_parse_errors() {
        let err = parse_tree_str("{not valid").unwrap_err();
        let message = err.to_string();
        assert!(message.contains("json error"));
        assert!(message.contains("yaml error"));
    }
}
