//! Per-connection uid attribution.

pub mod bridge;
pub mod connection;
pub mod procfs;

pub use bridge::{UidBridge, UidInfo, UidResolver};
pub use connection::{ConnectionOwnerLookup, ConnectionTuple, Protocol, CONNECTION_OWNER_MIN_VERSION};
pub use procfs::ProcNetLookup;
