//! tunhost: uid attribution and process lifecycle host for an embedded
//! traffic engine.

pub mod attribution;
pub mod config;
pub mod context;
pub mod engine;
pub mod error;
pub mod ipc;
pub mod lifecycle;
pub mod platform;
pub mod process;
pub mod storage;

pub use error::{Error, Result};
