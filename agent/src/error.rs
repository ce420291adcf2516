//! Error types for the tunhost agent.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for tunhost operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the tunhost agent.
#[derive(Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("IPC error: {0}")]
    Ipc(String),

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("engine initialization failed: {0}")]
    EngineInit(String),

    #[error("unknown uid {0}")]
    UnknownUid(u32),

    #[error("connection lookup failed: {0}")]
    ConnectionLookup(String),

    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("package source error: {0}")]
    PackageSource(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("socket already in use: {0}")]
    SocketInUse(PathBuf),
}

impl Error {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn ipc(msg: impl Into<String>) -> Self {
        Self::Ipc(msg.into())
    }

    pub fn engine_init(msg: impl Into<String>) -> Self {
        Self::EngineInit(msg.into())
    }

    pub fn connection_lookup(msg: impl Into<String>) -> Self {
        Self::ConnectionLookup(msg.into())
    }

    pub fn unsupported(msg: impl Into<String>) -> Self {
        Self::Unsupported(msg.into())
    }

    pub fn package_source(msg: impl Into<String>) -> Self {
        Self::PackageSource(msg.into())
    }

    pub fn permission_denied(msg: impl Into<String>) -> Self {
        Self::PermissionDenied(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_config() {
        let err = Error::config("missing application id");
        assert_eq!(err.to_string(), "configuration error: missing application id");
    }

    #[test]
    fn test_error_unknown_uid() {
        let err = Error::UnknownUid(10123);
        assert_eq!(err.to_string(), "unknown uid 10123");
    }

    #[test]
    fn test_error_engine_init() {
        let err = Error::engine_init("assets missing");
        assert_eq!(err.to_string(), "engine initialization failed: assets missing");
    }

    #[test]
    fn test_error_connection_lookup() {
        let err = Error::connection_lookup("no owner for tcp 10.0.0.2:443");
        assert!(err.to_string().starts_with("connection lookup failed"));
    }

    #[test]
    fn test_error_unsupported() {
        let err = Error::unsupported("connection owner lookup needs platform 29");
        assert_eq!(
            err.to_string(),
            "unsupported: connection owner lookup needs platform 29"
        );
    }

    #[test]
    fn test_error_permission_denied() {
        let err = Error::permission_denied("foreign package");
        assert_eq!(err.to_string(), "permission denied: foreign package");
    }

    #[test]
    fn test_error_socket_in_use() {
        let err = Error::SocketInUse(PathBuf::from("/run/tunhost/control.sock"));
        assert_eq!(
            err.to_string(),
            "socket already in use: /run/tunhost/control.sock"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(err.to_string().contains("JSON serialization error"));
    }
}
