//! Table of known views, keyed by `views<path>/index`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::model::ViewBinding;

/// Key of the view bound when a route's own view is not registered.
pub const NOT_FOUND_VIEW: &str = "views/error/404/index";

/// Registry key for a route path.
pub fn view_key(path: &str) -> String {
    format!("views{path}/index")
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ViewRegistry {
    views: BTreeMap<String, String>,
}

impl ViewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose targets are the keys themselves.
    pub fn from_keys<I, S>(keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let views = keys
            .into_iter()
            .map(|key| {
                let key = key.into();
                (key.clone(), key)
            })
            .collect();
        Self { views }
    }

    pub fn register(&mut self, key: impl Into<String>, target: impl Into<String>) {
        self.views.insert(key.into(), target.into());
    }

    pub fn with(mut self, key: impl Into<String>, target: impl Into<String>) -> Self {
        self.register(key, target);
        self
    }

    pub fn contains(&self, key: &str) -> bool {
        self.views.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.views.len()
    }

    pub fn is_empty(&self) -> bool {
        self.views.is_empty()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.views.keys().map(String::as_str)
    }

    /// Binding for the route at `path`, if its view is registered.
    pub fn resolve(&self, path: &str) -> Option<ViewBinding> {
        let key = view_key(path);
        self.views.get(&key).map(|target| ViewBinding {
            target: target.clone(),
            key,
            fallback: false,
        })
    }

    /// Binding for the route at `path`, or the not-found view.
    pub fn resolve_or_not_found(&self, path: &str) -> ViewBinding {
        self.resolve(path).unwrap_or_else(|| self.not_found())
    }

    pub fn not_found(&self) -> ViewBinding {
        ViewBinding {
            key: NOT_FOUND_VIEW.to_string(),
            target: self
                .views
                .get(NOT_FOUND_VIEW)
                .cloned()
                .unwrap_or_else(|| NOT_FOUND_VIEW.to_string()),
            fallback: true,
        }
    }
}
