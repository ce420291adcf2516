//! Unix socket control server run by the background process.

use super::protocol::{Request, Response};
use super::state::ServiceController;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};

/// Maximum size of a single request line.
const MAX_LINE_LENGTH: usize = 65536;

/// Peer credentials from Unix socket.
#[derive(Debug, Clone, Copy)]
pub struct PeerCredentials {
    pub pid: u32,
    pub uid: u32,
    pub gid: u32,
}

impl PeerCredentials {
    /// Check if peer is root (uid 0).
    pub fn is_root(&self) -> bool {
        self.uid == 0
    }

    /// Commands are accepted from root and from the server's own uid, i.e.
    /// processes of the same application.
    pub fn is_authorized(&self) -> bool {
        self.is_root() || self.uid == unsafe { libc::getuid() }
    }
}

/// Get peer credentials from a Unix socket.
#[cfg(any(target_os = "linux", target_os = "android"))]
fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let fd = stream.as_raw_fd();
    let mut cred: libc::ucred = unsafe { std::mem::zeroed() };
    let mut len = std::mem::size_of::<libc::ucred>() as libc::socklen_t;

    let ret = unsafe {
        libc::getsockopt(
            fd,
            libc::SOL_SOCKET,
            libc::SO_PEERCRED,
            &mut cred as *mut _ as *mut libc::c_void,
            &mut len,
        )
    };

    if ret == 0 {
        Some(PeerCredentials {
            pid: cred.pid as u32,
            uid: cred.uid,
            gid: cred.gid,
        })
    } else {
        None
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn get_peer_credentials(stream: &UnixStream) -> Option<PeerCredentials> {
    use std::os::unix::io::AsRawFd;

    let mut uid: libc::uid_t = 0;
    let mut gid: libc::gid_t = 0;

    let ret = unsafe { libc::getpeereid(stream.as_raw_fd(), &mut uid, &mut gid) };

    if ret == 0 {
        // getpeereid does not report the pid
        Some(PeerCredentials { pid: 0, uid, gid })
    } else {
        None
    }
}

/// Control socket server applying commands to a [`ServiceController`].
pub struct ControlServer {
    listener: UnixListener,
    path: PathBuf,
    controller: Arc<ServiceController>,
}

impl ControlServer {
    /// Bind the control socket, replacing a stale one. Fails with
    /// [`Error::SocketInUse`] while another server still accepts on it.
    pub async fn new(socket_path: &Path, controller: Arc<ServiceController>) -> Result<Self> {
        if socket_path.exists() {
            if UnixStream::connect(socket_path).await.is_ok() {
                return Err(Error::SocketInUse(socket_path.to_path_buf()));
            }
            tracing::debug!("Removing stale socket {}", socket_path.display());
            std::fs::remove_file(socket_path)?;
        }

        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let listener = UnixListener::bind(socket_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::AddrInUse {
                Error::SocketInUse(socket_path.to_path_buf())
            } else {
                Error::Io(e)
            }
        })?;

        // Owner only; other applications run under other uids.
        {
            use std::os::unix::fs::PermissionsExt;
            let perms = std::fs::Permissions::from_mode(0o600);
            std::fs::set_permissions(socket_path, perms)?;
        }

        tracing::info!("Control server listening on {}", socket_path.display());

        Ok(Self {
            listener,
            path: socket_path.to_path_buf(),
            controller,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn controller(&self) -> Arc<ServiceController> {
        self.controller.clone()
    }

    /// Run the server, accepting connections.
    pub async fn run(&self) -> Result<()> {
        loop {
            match self.listener.accept().await {
                Ok((stream, _)) => {
                    // Get peer credentials before splitting the stream
                    let peer_creds = get_peer_credentials(&stream);
                    let controller = self.controller.clone();

                    tokio::spawn(async move {
                        if let Err(e) = handle_client(stream, controller, peer_creds).await {
                            tracing::debug!("Client disconnected: {}", e);
                        }
                    });
                }
                Err(e) => {
                    tracing::error!("Failed to accept connection: {}", e);
                }
            }
        }
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.path);
    }
}

async fn handle_client(
    stream: UnixStream,
    controller: Arc<ServiceController>,
    peer_creds: Option<PeerCredentials>,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);
    let mut line = String::new();

    if let Some(creds) = &peer_creds {
        tracing::debug!(
            "Client connected: pid={}, uid={}, gid={}",
            creds.pid,
            creds.uid,
            creds.gid
        );
    }

    loop {
        line.clear();

        let n = reader.read_line(&mut line).await?;
        if n == 0 {
            // EOF - client disconnected
            return Ok(());
        }
        if n > MAX_LINE_LENGTH {
            send_response(&mut writer, &Response::error("Request too large")).await?;
            continue;
        }

        let response = match serde_json::from_str::<Request>(line.trim()) {
            Ok(request) => handle_request(&controller, request, peer_creds.as_ref()).await,
            Err(e) => Response::error(format!("Invalid JSON: {}", e)),
        };
        send_response(&mut writer, &response).await?;
    }
}

/// Handle one request from a peer.
pub async fn handle_request(
    controller: &ServiceController,
    request: Request,
    peer_creds: Option<&PeerCredentials>,
) -> Response {
    match request {
        Request::Ping => Response::Pong,
        Request::Status => Response::State {
            state: controller.state().await,
            uptime_secs: controller.uptime_secs(),
        },
        Request::Command(envelope) => {
            match peer_creds {
                Some(creds) if creds.is_authorized() => {}
                Some(creds) => {
                    tracing::warn!(
                        "Unauthorized {} command from uid={}",
                        envelope.command,
                        creds.uid
                    );
                    return Response::error_with_code(
                        "Permission denied: peer belongs to another application",
                        "E_PERM",
                    );
                }
                None => {
                    tracing::warn!("Could not verify credentials for {} command", envelope.command);
                    return Response::error_with_code(
                        "Permission denied: could not verify credentials",
                        "E_CRED",
                    );
                }
            }

            match controller.apply(&envelope).await {
                Ok(event) => Response::Applied {
                    id: event.id,
                    command: event.command,
                    transition: event.transition,
                    state: event.state,
                },
                Err(Error::PermissionDenied(message)) => {
                    Response::error_with_code(format!("Permission denied: {}", message), "E_PERM")
                }
                Err(e) => Response::error(e.to_string()),
            }
        }
    }
}

async fn send_response(writer: &mut OwnedWriteHalf, response: &Response) -> Result<()> {
    let json = serde_json::to_string(response)?;
    writer.write_all(json.as_bytes()).await?;
    writer.write_all(b"\n").await?;
    writer.flush().await?;
    Ok(())
}
