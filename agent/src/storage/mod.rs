//! Persistent settings storage.

mod sqlite;

pub use sqlite::{SettingsStore, KEY_ENABLE_LOG, KEY_LOG_BUFFER_SIZE, KEY_RULES_PROVIDER};
