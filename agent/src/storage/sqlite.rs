//! SQLite storage for persistent host settings.

use crate::error::{Error, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

/// Setting key: selected rules provider, 0 means the built-in provider is off.
pub const KEY_RULES_PROVIDER: &str = "rules_provider";
/// Setting key: whether the engine writes its own log.
pub const KEY_ENABLE_LOG: &str = "enable_log";
/// Setting key: engine log ring buffer size in KiB.
pub const KEY_LOG_BUFFER_SIZE: &str = "log_buffer_size";

const DEFAULT_LOG_BUFFER_SIZE: u32 = 50;

/// Persistent key/value settings backed by SQLite.
pub struct SettingsStore {
    conn: Mutex<Connection>,
}

impl SettingsStore {
    /// Acquire the database lock, recovering from poison if necessary.
    /// Poisoned mutexes indicate a previous panic - we log and continue.
    fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Settings mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }
}

impl SettingsStore {
    /// Open or create a settings database at the given path.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    /// Open an in-memory database (for testing).
    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.initialize()?;
        Ok(store)
    }

    fn initialize(&self) -> Result<()> {
        let conn = self.lock();

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                updated_at TEXT DEFAULT CURRENT_TIMESTAMP
            );
            "#,
        )?;

        Ok(())
    }

    /// Get a raw setting value.
    pub fn get(&self, key: &str) -> Result<Option<String>> {
        let conn = self.lock();
        conn.query_row(
            "SELECT value FROM settings WHERE key = ?1",
            params![key],
            |row| row.get(0),
        )
        .optional()
        .map_err(Error::from)
    }

    /// Set a raw setting value.
    pub fn set(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.lock();
        conn.execute(
            r#"
            INSERT INTO settings (key, value, updated_at)
            VALUES (?1, ?2, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET value = ?2, updated_at = CURRENT_TIMESTAMP
            "#,
            params![key, value],
        )?;
        Ok(())
    }

    /// Remove a setting. Returns whether it existed.
    pub fn remove(&self, key: &str) -> Result<bool> {
        let conn = self.lock();
        let rows = conn.execute("DELETE FROM settings WHERE key = ?1", params![key])?;
        Ok(rows > 0)
    }

    fn get_parsed<T: std::str::FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            Ok(Some(value)) => value.parse().unwrap_or_else(|_| {
                tracing::warn!("Ignoring malformed setting {}={:?}", key, value);
                default
            }),
            Ok(None) => default,
            Err(e) => {
                tracing::warn!("Failed to read setting {}: {}", key, e);
                default
            }
        }
    }

    /// Selected rules provider (0 when none is configured).
    pub fn rules_provider(&self) -> u32 {
        self.get_parsed(KEY_RULES_PROVIDER, 0)
    }

    pub fn set_rules_provider(&self, provider: u32) -> Result<()> {
        self.set(KEY_RULES_PROVIDER, &provider.to_string())
    }

    /// Whether the engine should keep its own log.
    pub fn enable_log(&self) -> bool {
        self.get_parsed(KEY_ENABLE_LOG, false)
    }

    pub fn set_enable_log(&self, enabled: bool) -> Result<()> {
        self.set(KEY_ENABLE_LOG, &enabled.to_string())
    }

    /// Engine log buffer size in KiB.
    pub fn log_buffer_size(&self) -> u32 {
        self.get_parsed(KEY_LOG_BUFFER_SIZE, DEFAULT_LOG_BUFFER_SIZE)
    }

    pub fn set_log_buffer_size(&self, size: u32) -> Result<()> {
        self.set(KEY_LOG_BUFFER_SIZE, &size.to_string())
    }
}
