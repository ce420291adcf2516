//! Process role classification.
//!
//! The host application runs as several OS processes that share one binary.
//! The main (UI) process runs under the bare application id, the engine runs
//! in a process named `<application id>:bg`, and anything else (crash
//! reporters, isolated services) is classified as [`ProcessRole::Other`].

use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// Reserved process-name suffix of the background process.
pub const BACKGROUND_SUFFIX: &str = ":bg";

static CURRENT_ROLE: OnceLock<ProcessRole> = OnceLock::new();

/// Role of the current OS process within the host application.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessRole {
    /// UI process, named exactly like the application id.
    Main,
    /// Process hosting the traffic engine.
    Background,
    /// Any other process of the application.
    Other,
}

impl ProcessRole {
    /// Classify a process by name using the reserved background suffix.
    #[must_use]
    pub fn classify(process_name: &str, main_process_id: &str) -> Self {
        Self::classify_with_suffix(process_name, main_process_id, BACKGROUND_SUFFIX)
    }

    /// Classify a process by name with an explicit background suffix.
    #[must_use]
    pub fn classify_with_suffix(
        process_name: &str,
        main_process_id: &str,
        background_suffix: &str,
    ) -> Self {
        if process_name == main_process_id {
            Self::Main
        } else if process_name.ends_with(background_suffix) {
            Self::Background
        } else {
            Self::Other
        }
    }

    /// Classify the current process once and cache the result for the
    /// lifetime of the process. Later calls return the first result.
    pub fn init_current(process_name: &str, main_process_id: &str, background_suffix: &str) -> Self {
        *CURRENT_ROLE.get_or_init(|| {
            let role = Self::classify_with_suffix(process_name, main_process_id, background_suffix);
            tracing::debug!("Process '{}' classified as {}", process_name, role);
            role
        })
    }

    /// Role of the current process, if it has been classified.
    pub fn current() -> Option<Self> {
        CURRENT_ROLE.get().copied()
    }

    pub fn is_main(self) -> bool {
        self == Self::Main
    }

    pub fn is_background(self) -> bool {
        self == Self::Background
    }

    /// Main and background processes both embed webviews and warm the
    /// package cache.
    pub fn is_app_process(self) -> bool {
        matches!(self, Self::Main | Self::Background)
    }
}

impl std::fmt::Display for ProcessRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Background => write!(f, "background"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Returns the part of a process name after `<application id>:`.
/// `None` for the main process or for names outside the application.
pub fn process_suffix<'a>(process_name: &'a str, application_id: &str) -> Option<&'a str> {
    process_name
        .strip_prefix(application_id)?
        .strip_prefix(':')
        .filter(|suffix| !suffix.is_empty())
}
