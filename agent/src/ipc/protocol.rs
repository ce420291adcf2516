//! Control channel message types.

use super::state::{ServiceState, Transition};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Command addressed to the background service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceCommand {
    Start,
    Reload,
    Close,
}

impl std::fmt::Display for ServiceCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Start => write!(f, "start"),
            Self::Reload => write!(f, "reload"),
            Self::Close => write!(f, "close"),
        }
    }
}

/// A command scoped to the package that sent it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Correlation id for logs.
    pub id: Uuid,
    /// Package the command is addressed to; receivers drop foreign ones.
    pub package: String,
    pub sent_at: DateTime<Utc>,
    pub command: ServiceCommand,
}

impl CommandEnvelope {
    pub fn new(package: impl Into<String>, command: ServiceCommand) -> Self {
        Self {
            id: Uuid::new_v4(),
            package: package.into(),
            sent_at: Utc::now(),
            command,
        }
    }
}

/// Client request on the control socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    /// Apply a service command.
    Command(CommandEnvelope),

    /// Get the service state.
    Status,

    /// Ping for health check.
    Ping,
}

/// Server response on the control socket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    /// Command accepted; `transition` says whether it changed anything.
    Applied {
        id: Uuid,
        command: ServiceCommand,
        transition: Transition,
        state: ServiceState,
    },

    /// Service state.
    State {
        state: ServiceState,
        uptime_secs: u64,
    },

    /// Operation failed.
    Error {
        message: String,
        #[serde(default)]
        code: Option<String>,
    },

    /// Pong response to ping.
    Pong,
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: None,
        }
    }

    pub fn error_with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
            code: Some(code.into()),
        }
    }
}
