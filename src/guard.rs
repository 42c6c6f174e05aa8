//! Navigation guard run before every route change.

use permission_tree::{PermissionSource, LOGIN_PATH};
use tracing::{debug, warn};

use crate::app_context::AppContext;
use crate::session::login_location;

/// Outcome of a guarded navigation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Navigation {
    /// Continue to the requested location.
    Proceed,
    /// Remain where the user came from.
    Stay,
    /// Go somewhere else instead.
    Redirect(String),
    /// Routes were installed; navigate to the same target again, replacing history.
    Replace(String),
}

#[derive(Clone, Debug)]
pub struct NavigationGuard {
    white_list: Vec<String>,
}

impl Default for NavigationGuard {
    fn default() -> Self {
        Self {
            white_list: vec![LOGIN_PATH.to_string()],
        }
    }
}

/// Path component of a full path (query and fragment dropped).
pub fn path_of(full_path: &str) -> &str {
    full_path
        .split(|c| c == '?' || c == '#')
        .next()
        .unwrap_or(full_path)
}

impl NavigationGuard {
    pub fn with_white_list<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            white_list: paths.into_iter().map(Into::into).collect(),
        }
    }

    pub fn is_white_listed(&self, path: &str) -> bool {
        self.white_list.iter().any(|allowed| allowed == path)
    }

    pub async fn before_each(
        &self,
        ctx: &AppContext,
        source: &dyn PermissionSource,
        to: &str,
    ) -> Navigation {
        let path = path_of(to);
        if !ctx.session().is_login() {
            if self.is_white_listed(path) {
                return Navigation::Proceed;
            }
            debug!(target: "gatehouse", to, "not signed in");
            return Navigation::Redirect(LOGIN_PATH.to_string());
        }
        if path == LOGIN_PATH {
            return Navigation::Stay;
        }
        if ctx.permissions().is_loaded() {
            return Navigation::Proceed;
        }

        match ctx.permissions().generate(source).await {
            Ok(()) => Navigation::Replace(to.to_string()),
            Err(err) => {
                warn!(target: "gatehouse", error = %err, to, "permission generation failed");
                ctx.session().reset_token();
                ctx.session().reset_user_info();
                Navigation::Redirect(login_location(Some(to)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_drops_query_and_fragment() {
        assert_eq!(path_of("/login?redirect=%2F"), "/login");
        assert_eq!(path_of("/user#top"), "/user");
        assert_eq!(path_of("/"), "/");
    }

    #[test]
    fn default_white_list_is_login_only() {
        let guard = NavigationGuard::default();
        assert!(guard.is_white_listed("/login"));
        assert!(!guard.is_white_listed("/"));
    }
}
