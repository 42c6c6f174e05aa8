use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum PermissionError {
    #[error("permission gate requires a permission key")]
    MissingKey,
}

/// Capability strings granted to the current session.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermissionSet {
    keys: BTreeSet<String>,
}

impl PermissionSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>) -> bool {
        self.keys.insert(key.into())
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.keys.iter().map(String::as_str)
    }

    /// An absent or empty key is always granted.
    pub fn has_permission(&self, key: Option<&str>) -> bool {
        match key {
            None => true,
            Some(key) if key.is_empty() => true,
            Some(key) => self.contains(key),
        }
    }

    /// Check used by UI gating: the element must name a key.
    pub fn require_permission_key(&self, key: Option<&str>) -> Result<bool, PermissionError> {
        match key {
            Some(key) if !key.is_empty() => Ok(self.contains(key)),
            _ => Err(PermissionError::MissingKey),
        }
    }
}

impl<S: Into<String>> FromIterator<S> for PermissionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            keys: iter.into_iter().map(Into::into).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_key_is_always_granted() {
        let perms = PermissionSet::new();
        assert!(perms.has_permission(None));
        assert!(perms.has_permission(Some("")));
        assert!(!perms.has_permission(Some("user:add")));
    }

    #[test]
    fn duplicates_collapse() {
        let perms: PermissionSet = ["user:add", "user:add", "user:delete"].into_iter().collect();
        assert_eq!(perms.len(), 2);
        assert!(perms.has_permission(Some("user:delete")));
    }

    #[test]
    fn gate_requires_a_key() {
        let perms: PermissionSet = ["user:add"].into_iter().collect();
        assert_eq!(perms.require_permission_key(None), Err(PermissionError::MissingKey));
        assert_eq!(perms.require_permission_key(Some("")), Err(PermissionError::MissingKey));
        assert_eq!(perms.require_permission_key(Some("user:add")), Ok(true));
        assert_eq!(perms.require_permission_key(Some("user:drop")), Ok(false));
    }
}
