//! Platform services the host touches during startup.
//!
//! On a device these are backed by the application framework; the
//! [`HeadlessPlatform`] keeps the same observable effects on the filesystem
//! for hosts running without a UI.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Platform version from which notification channels exist.
pub const NOTIFICATION_CHANNELS_MIN_VERSION: u32 = 26;

/// Platform version from which the VPN channel can be demoted to `Min`.
pub const MIN_IMPORTANCE_VERSION: u32 = 28;

/// Notification importance levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Importance {
    Min,
    Low,
    Default,
    High,
}

/// A notification channel the main process registers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationChannel {
    pub id: String,
    pub name: String,
    pub importance: Importance,
}

impl NotificationChannel {
    pub fn new(id: &str, name: &str, importance: Importance) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            importance,
        }
    }
}

/// The host's notification channels for a platform version. Empty below the
/// version that introduced channels.
pub fn notification_channels(platform_version: u32) -> Vec<NotificationChannel> {
    if platform_version < NOTIFICATION_CHANNELS_MIN_VERSION {
        return Vec::new();
    }

    let vpn_importance = if platform_version >= MIN_IMPORTANCE_VERSION {
        Importance::Min
    } else {
        Importance::Low
    };

    vec![
        NotificationChannel::new("service-vpn", "VPN Service", vpn_importance),
        NotificationChannel::new("service-proxy", "Proxy Service", Importance::Low),
        NotificationChannel::new(
            "service-subscription",
            "Subscription Update",
            Importance::Default,
        ),
    ]
}

/// Platform services used by the lifecycle manager.
pub trait Platform: Send + Sync {
    /// Give this process its own webview data directory. Must run before
    /// any webview is created.
    fn fix_webview_dir(&self, process_suffix: Option<&str>) -> Result<()>;

    fn set_webview_debugging(&self, enabled: bool);

    /// Drop cached webview data left by earlier runs.
    fn clean_webview_cache(&self) -> Result<()>;

    fn apply_theme(&self);

    fn apply_night_theme(&self);

    /// Create or update channels. Existing channels with the same id are
    /// replaced.
    fn create_notification_channels(&self, channels: &[NotificationChannel]) -> Result<()>;
}

/// Filesystem-backed platform for hosts without an application framework.
pub struct HeadlessPlatform {
    data_dir: PathBuf,
    cache_dir: PathBuf,
    webview_debugging: AtomicBool,
    state: Mutex<HeadlessState>,
}

#[derive(Default)]
struct HeadlessState {
    webview_dir: Option<PathBuf>,
    channels: BTreeMap<String, NotificationChannel>,
    theme_applied: bool,
    night_theme_applied: bool,
}

impl HeadlessPlatform {
    pub fn new(data_dir: impl Into<PathBuf>, cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            cache_dir: cache_dir.into(),
            webview_debugging: AtomicBool::new(false),
            state: Mutex::new(HeadlessState::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HeadlessState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn webview_dir(&self) -> Option<PathBuf> {
        self.lock().webview_dir.clone()
    }

    pub fn webview_debugging(&self) -> bool {
        self.webview_debugging.load(Ordering::SeqCst)
    }

    pub fn channels(&self) -> Vec<NotificationChannel> {
        self.lock().channels.values().cloned().collect()
    }

    /// Whether both theme and night mode were applied.
    pub fn theme_applied(&self) -> bool {
        let state = self.lock();
        state.theme_applied && state.night_theme_applied
    }

    fn webview_cache_dir(&self) -> PathBuf {
        self.cache_dir.join("WebView")
    }
}

impl Platform for HeadlessPlatform {
    fn fix_webview_dir(&self, process_suffix: Option<&str>) -> Result<()> {
        let dir = webview_dir_for(&self.data_dir, process_suffix);
        std::fs::create_dir_all(&dir)?;
        tracing::debug!("Webview data directory: {}", dir.display());
        self.lock().webview_dir = Some(dir);
        Ok(())
    }

    fn set_webview_debugging(&self, enabled: bool) {
        self.webview_debugging.store(enabled, Ordering::SeqCst);
    }

    fn clean_webview_cache(&self) -> Result<()> {
        let dir = self.webview_cache_dir();
        match std::fs::remove_dir_all(&dir) {
            Ok(()) => {
                tracing::debug!("Removed webview cache {}", dir.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn apply_theme(&self) {
        self.lock().theme_applied = true;
    }

    fn apply_night_theme(&self) {
        self.lock().night_theme_applied = true;
    }

    fn create_notification_channels(&self, channels: &[NotificationChannel]) -> Result<()> {
        let mut state = self.lock();
        for channel in channels {
            state.channels.insert(channel.id.clone(), channel.clone());
        }
        Ok(())
    }
}

/// Webview data directory for a process: `app_webview` for the main
/// process, `app_webview_<suffix>` for the others.
pub fn webview_dir_for(data_dir: &Path, process_suffix: Option<&str>) -> PathBuf {
    match process_suffix {
        Some(suffix) if !suffix.is_empty() => {
            let suffix: String = suffix
                .trim_start_matches(':')
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            data_dir.join(format!("app_webview_{}", suffix))
        }
        _ => data_dir.join("app_webview"),
    }
}
