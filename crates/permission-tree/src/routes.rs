//! Routes that exist regardless of the session's permissions.

use crate::model::{CompiledRoute, RouteMeta, ViewBinding};
use crate::registry::NOT_FOUND_VIEW;

pub const ROOT_PATH: &str = "/";
pub const LOGIN_PATH: &str = "/login";
pub const NOT_FOUND_PATH: &str = "/error/404";
pub const NOT_FOUND_ROUTE_NAME: &str = "NotFound";
pub const CATCH_ALL_PATH: &str = "/:pathMatch(.*)";

const LAYOUT_VIEW: &str = "components/Layout/index";

fn static_view(key: &str) -> Option<ViewBinding> {
    Some(ViewBinding {
        key: key.to_string(),
        target: key.to_string(),
        fallback: false,
    })
}

/// Login page, redirect helper and the root layout holding the error pages. Dynamic
/// routes are merged under the root layout.
pub fn constant_routes() -> Vec<CompiledRoute> {
    let redirect = CompiledRoute {
        path: "/redirect".to_string(),
        view: static_view(LAYOUT_VIEW),
        meta: RouteMeta {
            hide_in_menu: true,
            ..RouteMeta::default()
        },
        children: vec![CompiledRoute {
            path: "/redirect/:path(.*)".to_string(),
            view: static_view("views/redirect/index"),
            ..CompiledRoute::default()
        }],
        ..CompiledRoute::default()
    };

    let login = CompiledRoute {
        path: LOGIN_PATH.to_string(),
        name: Some(LOGIN_PATH.to_string()),
        view: static_view("views/login/index"),
        meta: RouteMeta {
            title: Some("Login".to_string()),
            hide_in_menu: true,
            ..RouteMeta::default()
        },
        ..CompiledRoute::default()
    };

    let error = CompiledRoute {
        path: "/error".to_string(),
        name: Some("/error".to_string()),
        redirect: Some(NOT_FOUND_PATH.to_string()),
        meta: RouteMeta {
            title: Some("Page error".to_string()),
            hide_in_menu: true,
            ..RouteMeta::default()
        },
        children: vec![CompiledRoute {
            path: NOT_FOUND_PATH.to_string(),
            name: Some(NOT_FOUND_PATH.to_string()),
            view: static_view(NOT_FOUND_VIEW),
            meta: RouteMeta {
                title: Some("404".to_string()),
                hide_in_tagview: true,
                ..RouteMeta::default()
            },
            ..CompiledRoute::default()
        }],
        ..CompiledRoute::default()
    };

    let root = CompiledRoute {
        path: ROOT_PATH.to_string(),
        name: Some(ROOT_PATH.to_string()),
        view: static_view(LAYOUT_VIEW),
        children: vec![error],
        ..CompiledRoute::default()
    };

    vec![redirect, login, root]
}

/// Hidden catch-all sending unknown paths to the not-found page.
pub fn not_found_catch_all() -> CompiledRoute {
    CompiledRoute {
        path: CATCH_ALL_PATH.to_string(),
        name: Some(NOT_FOUND_ROUTE_NAME.to_string()),
        redirect: Some(NOT_FOUND_PATH.to_string()),
        meta: RouteMeta {
            hide_in_menu: true,
            dynamic: true,
            ..RouteMeta::default()
        },
        ..CompiledRoute::default()
    }
}

/// `constant` with `dynamic` appended to the root layout's children.
pub fn merge_under_root(constant: &[CompiledRoute], dynamic: &[CompiledRoute]) -> Vec<CompiledRoute> {
    constant
        .iter()
        .map(|route| {
            let mut route = route.clone();
            if route.path == ROOT_PATH && route.name.as_deref() == Some(ROOT_PATH) {
                route.children.extend(dynamic.iter().cloned());
            }
            route
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn constant_table_holds_login_and_not_found() {
        let routes = constant_routes();
        assert!(routes.iter().any(|route| route.path == LOGIN_PATH));
        let root = routes.iter().find(|route| route.path == ROOT_PATH).unwrap();
        assert!(root.find(NOT_FOUND_PATH).is_some());
        assert!(routes.iter().all(|route| !route.meta.dynamic));
    }

    #[test]
    fn merge_only_touches_root_layout() {
        let dynamic = vec![CompiledRoute::new("/system").named("/system")];
        let merged = merge_under_root(&constant_routes(), &dynamic);
        let root = merged.iter().find(|route| route.path == ROOT_PATH).unwrap();
        assert_eq!(root.children.last().unwrap().path, "/system");
        let login = merged.iter().find(|route| route.path == LOGIN_PATH).unwrap();
        assert!(login.children.is_empty());
    }

    #[test]
    fn catch_all_is_hidden_and_dynamic() {
        let route = not_found_catch_all();
        assert_eq!(route.name.as_deref(), Some(NOT_FOUND_ROUTE_NAME));
        assert_eq!(route.redirect.as_deref(), Some(NOT_FOUND_PATH));
        assert!(route.meta.hide_in_menu && route.meta.dynamic);
    }
}
