//! Gatehouse console kernel.
//!
//! Wires the request gate and the permission tree into a signed-in console session and
//! exposes the pieces the `gatehouse` binary and integration tests use.

pub mod api;
pub mod app_context;
pub mod config;
pub mod errors;
pub mod guard;
pub mod session;

pub use app_context::AppContext;
pub use config::AppConfig;
pub use errors::{ConsoleError, ConsoleResult};
pub use guard::{Navigation, NavigationGuard};
pub use session::{login_location, SessionSnapshot, UserInfo, UserSession};
