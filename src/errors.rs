//! Console-level errors.

use permission_tree::{ConfigError as TreeConfigError, PermissionError, StoreError};
use request_gate::GateError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConsoleError {
    #[error(transparent)]
    Gate(#[from] GateError),
    #[error(transparent)]
    Permissions(#[from] StoreError),
    #[error(transparent)]
    Permission(#[from] PermissionError),
    #[error("failed to load permission data: {0}")]
    TreeConfig(#[from] TreeConfigError),
    #[error("configuration error: {0}")]
    Config(String),
    #[error("session persistence failed: {0}")]
    Session(String),
    #[error("login response did not carry a token")]
    MissingToken,
}

impl From<config::ConfigError> for ConsoleError {
    fn from(err: config::ConfigError) -> Self {
        ConsoleError::Config(err.to_string())
    }
}

pub type ConsoleResult<T> = Result<T, ConsoleError>;
