//! Service control channel: idempotent start/reload/close commands sent to
//! the background process.

pub mod client;
mod protocol;
mod server;
mod state;

pub use client::{BroadcastTransport, CommandTransport, ServiceControl, SocketTransport};
pub use protocol::{CommandEnvelope, Request, Response, ServiceCommand};
pub use server::{handle_request, ControlServer, PeerCredentials};
pub use state::{ServiceController, ServiceEvent, ServiceState, Transition};
