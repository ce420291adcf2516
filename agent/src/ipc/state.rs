//! Receiver-side service state.
//!
//! Commands are idempotent: starting a running service, stopping a stopped
//! one or reloading while stopped leave the state as it is.

use super::protocol::{CommandEnvelope, ServiceCommand};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::{broadcast, RwLock};
use uuid::Uuid;

/// State of the background service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ServiceState {
    #[default]
    Stopped,
    /// `generation` counts reloads since the last start.
    Running { generation: u64 },
}

/// Effect of one command on the state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Transition {
    Started,
    Reloaded { generation: u64 },
    Stopped,
    Unchanged,
}

impl ServiceState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running { .. })
    }

    /// Apply a command and report what changed.
    pub fn apply(&mut self, command: ServiceCommand) -> Transition {
        match (*self, command) {
            (Self::Stopped, ServiceCommand::Start) => {
                *self = Self::Running { generation: 0 };
                Transition::Started
            }
            (Self::Running { generation }, ServiceCommand::Reload) => {
                let generation = generation + 1;
                *self = Self::Running { generation };
                Transition::Reloaded { generation }
            }
            (Self::Running { .. }, ServiceCommand::Close) => {
                *self = Self::Stopped;
                Transition::Stopped
            }
            (Self::Running { .. }, ServiceCommand::Start)
            | (Self::Stopped, ServiceCommand::Reload)
            | (Self::Stopped, ServiceCommand::Close) => Transition::Unchanged,
        }
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stopped => write!(f, "stopped"),
            Self::Running { generation } => write!(f, "running (generation {})", generation),
        }
    }
}

/// An applied command, published to subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceEvent {
    pub id: Uuid,
    pub command: ServiceCommand,
    pub transition: Transition,
    pub state: ServiceState,
}

/// Applies package-scoped commands to the service state.
pub struct ServiceController {
    package: String,
    state: RwLock<ServiceState>,
    events: broadcast::Sender<ServiceEvent>,
    started_at: Instant,
}

impl ServiceController {
    pub fn new(package: impl Into<String>) -> Self {
        let (events, _) = broadcast::channel(64);
        Self {
            package: package.into(),
            state: RwLock::new(ServiceState::Stopped),
            events,
            started_at: Instant::now(),
        }
    }

    pub fn package(&self) -> &str {
        &self.package
    }

    pub async fn state(&self) -> ServiceState {
        *self.state.read().await
    }

    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }

    /// Subscribe to applied commands.
    pub fn subscribe(&self) -> broadcast::Receiver<ServiceEvent> {
        self.events.subscribe()
    }

    /// Apply an envelope. Envelopes for another package are rejected.
    pub async fn apply(&self, envelope: &CommandEnvelope) -> Result<ServiceEvent> {
        if envelope.package != self.package {
            tracing::warn!(
                "Dropping {} command {} for foreign package '{}'",
                envelope.command,
                envelope.id,
                envelope.package
            );
            return Err(Error::permission_denied(format!(
                "command addressed to '{}'",
                envelope.package
            )));
        }

        let (transition, state) = {
            let mut state = self.state.write().await;
            let transition = state.apply(envelope.command);
            (transition, *state)
        };

        if transition == Transition::Unchanged {
            tracing::debug!(
                "{} command {} ignored, service {}",
                envelope.command,
                envelope.id,
                state
            );
        } else {
            tracing::info!("{} command {}: service {}", envelope.command, envelope.id, state);
        }

        let event = ServiceEvent {
            id: envelope.id,
            command: envelope.command,
            transition,
            state,
        };
        // No subscribers is fine.
        let _ = self.events.send(event.clone());
        Ok(event)
    }

    /// Apply envelopes from an in-process broadcast until the sender is
    /// dropped.
    pub async fn listen(&self, mut commands: broadcast::Receiver<CommandEnvelope>) {
        loop {
            match commands.recv().await {
                Ok(envelope) => {
                    if let Err(e) = self.apply(&envelope).await {
                        tracing::debug!("Command {} rejected: {}", envelope.id, e);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    tracing::warn!("Command listener lagged, missed {} commands", n);
                }
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    }
}
