//! Sending side of the service control channel.

use super::protocol::{CommandEnvelope, Request, Response, ServiceCommand};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::broadcast;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Delivers command envelopes to the background process.
#[async_trait]
pub trait CommandTransport: Send + Sync {
    async fn dispatch(&self, envelope: CommandEnvelope) -> Result<()>;
}

/// Newline-delimited JSON over the control socket.
pub struct SocketTransport {
    path: PathBuf,
    timeout: Duration,
}

impl SocketTransport {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Send one request and wait for its response.
    pub async fn request(&self, request: &Request) -> Result<Response> {
        tokio::time::timeout(self.timeout, self.exchange(request))
            .await
            .map_err(|_| Error::ipc(format!("timed out talking to {}", self.path.display())))?
    }

    async fn exchange(&self, request: &Request) -> Result<Response> {
        let stream = UnixStream::connect(&self.path).await.map_err(|e| {
            Error::ipc(format!("failed to connect to {}: {}", self.path.display(), e))
        })?;
        let (reader, mut writer) = stream.into_split();

        let json = serde_json::to_string(request)?;
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;

        let mut reader = BufReader::new(reader);
        let mut line = String::new();
        if reader.read_line(&mut line).await? == 0 {
            return Err(Error::ipc("connection closed before response"));
        }
        Ok(serde_json::from_str(line.trim())?)
    }
}

#[async_trait]
impl CommandTransport for SocketTransport {
    async fn dispatch(&self, envelope: CommandEnvelope) -> Result<()> {
        match self.request(&Request::Command(envelope)).await? {
            Response::Applied { .. } => Ok(()),
            Response::Error { message, code } if code.as_deref() == Some("E_PERM") => {
                Err(Error::permission_denied(message))
            }
            Response::Error { message, .. } => Err(Error::ipc(message)),
            other => Err(Error::ipc(format!("unexpected response: {:?}", other))),
        }
    }
}

/// In-process broadcast. Like a platform broadcast, sending with nobody
/// listening is not an error.
#[derive(Clone)]
pub struct BroadcastTransport {
    tx: broadcast::Sender<CommandEnvelope>,
}

impl BroadcastTransport {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<CommandEnvelope> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl CommandTransport for BroadcastTransport {
    async fn dispatch(&self, envelope: CommandEnvelope) -> Result<()> {
        let id = envelope.id;
        if self.tx.send(envelope).is_err() {
            tracing::debug!("No receiver for command {}", id);
        }
        Ok(())
    }
}

/// Issues start/reload/stop commands scoped to the host's own package.
pub struct ServiceControl<T: CommandTransport> {
    package: String,
    transport: T,
}

impl<T: CommandTransport> ServiceControl<T> {
    pub fn new(package: impl Into<String>, transport: T) -> Self {
        Self {
            package: package.into(),
            transport,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub async fn send_start(&self) -> Result<()> {
        self.send(ServiceCommand::Start).await
    }

    pub async fn send_reload(&self) -> Result<()> {
        self.send(ServiceCommand::Reload).await
    }

    pub async fn send_stop(&self) -> Result<()> {
        self.send(ServiceCommand::Close).await
    }

    async fn send(&self, command: ServiceCommand) -> Result<()> {
        let envelope = CommandEnvelope::new(self.package.clone(), command);
        tracing::debug!("Sending {} command {} to {}", command, envelope.id, self.package);
        self.transport.dispatch(envelope).await
    }
}
