//! Configuration schema definitions.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    /// Host process configuration.
    #[serde(default)]
    pub host: HostConfig,

    /// Installed package enumeration.
    #[serde(default)]
    pub packages: PackagesConfig,
}

impl Config {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.host.log_level.as_str()) {
            return Err(Error::config(format!(
                "Invalid log level '{}'. Must be one of: {:?}",
                self.host.log_level, valid_levels
            )));
        }

        if self.host.application_id.is_empty() {
            return Err(Error::config("host.application_id must not be empty"));
        }
        if self.host.application_id.contains(|c: char| c.is_whitespace() || c == ':') {
            return Err(Error::config(format!(
                "host.application_id '{}' must not contain whitespace or ':'",
                self.host.application_id
            )));
        }

        // The suffix is appended to the application id by the OS, so it has to
        // look like a process-name suffix.
        if !self.host.background_suffix.starts_with(':') || self.host.background_suffix.len() < 2
        {
            return Err(Error::config(format!(
                "host.background_suffix '{}' must start with ':' and name a process",
                self.host.background_suffix
            )));
        }

        if !self.host.asset_subpath.ends_with('/') {
            return Err(Error::config(format!(
                "host.asset_subpath '{}' must end with '/'",
                self.host.asset_subpath
            )));
        }

        for (package, label) in &self.packages.labels {
            if label.trim().is_empty() {
                return Err(Error::config(format!(
                    "Label for package '{}' must not be empty",
                    package
                )));
            }
        }

        Ok(())
    }

    /// Merge another config into this one.
    /// Scalar fields that differ from the defaults override, label tables are
    /// merged with the other config winning on conflicts.
    pub fn merge(&mut self, other: Config) {
        let defaults = HostConfig::default();

        if other.host.log_level != defaults.log_level {
            self.host.log_level = other.host.log_level;
        }
        if other.host.application_id != defaults.application_id {
            self.host.application_id = other.host.application_id;
        }
        if other.host.background_suffix != defaults.background_suffix {
            self.host.background_suffix = other.host.background_suffix;
        }
        if other.host.platform_version != defaults.platform_version {
            self.host.platform_version = other.host.platform_version;
        }
        if other.host.debug_build {
            self.host.debug_build = true;
        }
        if other.host.abort_on_panic != defaults.abort_on_panic {
            self.host.abort_on_panic = other.host.abort_on_panic;
        }
        if other.host.files_dir != defaults.files_dir {
            self.host.files_dir = other.host.files_dir;
        }
        if other.host.external_files_dir.is_some() {
            self.host.external_files_dir = other.host.external_files_dir;
        }
        if other.host.cache_dir != defaults.cache_dir {
            self.host.cache_dir = other.host.cache_dir;
        }
        if other.host.asset_subpath != defaults.asset_subpath {
            self.host.asset_subpath = other.host.asset_subpath;
        }
        if other.host.socket_path != defaults.socket_path {
            self.host.socket_path = other.host.socket_path;
        }
        if other.host.settings_path != defaults.settings_path {
            self.host.settings_path = other.host.settings_path;
        }

        if other.packages.packages_list != PackagesConfig::default().packages_list {
            self.packages.packages_list = other.packages.packages_list;
        }
        self.packages.labels.extend(other.packages.labels);
    }
}

/// Host process configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct HostConfig {
    /// Log level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Application id; the main process runs under exactly this name.
    #[serde(default = "default_application_id")]
    pub application_id: String,

    /// Process-name suffix of the background (engine) process.
    #[serde(default = "default_background_suffix")]
    pub background_suffix: String,

    /// Platform API level reported to capability gates.
    #[serde(default = "default_platform_version")]
    pub platform_version: u32,

    /// Whether this is a debug build (enables webview debugging).
    #[serde(default)]
    pub debug_build: bool,

    /// Abort the process after reporting a panic on any thread.
    #[serde(default = "default_abort_on_panic")]
    pub abort_on_panic: bool,

    /// Writable files root handed to the engine.
    #[serde(default = "super::default_files_dir")]
    pub files_dir: PathBuf,

    /// External assets root. Falls back to `files_dir` when unset.
    #[serde(default)]
    pub external_files_dir: Option<PathBuf>,

    /// Cache directory handed to the engine.
    #[serde(default = "super::default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Asset subpath under the assets root.
    #[serde(default = "default_asset_subpath")]
    pub asset_subpath: String,

    /// Unix socket of the background process control channel.
    #[serde(default = "super::default_socket_path")]
    pub socket_path: PathBuf,

    /// SQLite database holding persistent settings.
    #[serde(default = "super::default_settings_path")]
    pub settings_path: PathBuf,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            application_id: default_application_id(),
            background_suffix: default_background_suffix(),
            platform_version: default_platform_version(),
            debug_build: false,
            abort_on_panic: default_abort_on_panic(),
            files_dir: super::default_files_dir(),
            external_files_dir: None,
            cache_dir: super::default_cache_dir(),
            asset_subpath: default_asset_subpath(),
            socket_path: super::default_socket_path(),
            settings_path: super::default_settings_path(),
        }
    }
}

impl HostConfig {
    /// External assets root, or the files root when none is configured.
    pub fn external_assets_dir(&self) -> PathBuf {
        self.external_files_dir
            .clone()
            .unwrap_or_else(|| self.files_dir.clone())
    }

    /// Full process name of the background process.
    pub fn background_process_name(&self) -> String {
        format!("{}{}", self.application_id, self.background_suffix)
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_application_id() -> String {
    "io.tunhost".to_string()
}

fn default_background_suffix() -> String {
    ":bg".to_string()
}

fn default_platform_version() -> u32 {
    29
}

fn default_abort_on_panic() -> bool {
    true
}

fn default_asset_subpath() -> String {
    "v2ray/".to_string()
}

/// Installed package enumeration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PackagesConfig {
    /// Path of the `packages.list` file enumerating installed packages.
    #[serde(default = "default_packages_list")]
    pub packages_list: PathBuf,

    /// Human-readable labels keyed by package name.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
}

impl Default for PackagesConfig {
    fn default() -> Self {
        Self {
            packages_list: default_packages_list(),
            labels: default_labels(),
        }
    }
}

fn default_packages_list() -> PathBuf {
    PathBuf::from("/data/system/packages.list")
}

fn default_labels() -> BTreeMap<String, String> {
    let mut labels = BTreeMap::new();
    labels.insert("android".to_string(), "Android System".to_string());
    labels
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_config() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.host.log_level, "info");
        assert_eq!(config.host.background_suffix, ":bg");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[host]
log_level = "debug"
application_id = "com.example.proxy"
background_suffix = ":engine"
platform_version = 28
debug_build = true
abort_on_panic = false
files_dir = "/data/files"
external_files_dir = "/sdcard/files"
cache_dir = "/data/cache"
asset_subpath = "geo/"
socket_path = "/run/example.sock"
settings_path = "/data/settings.db"

[packages]
packages_list = "/tmp/packages.list"

[packages.labels]
"org.mozilla.firefox" = "Firefox"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.host.application_id, "com.example.proxy");
        assert_eq!(config.host.platform_version, 28);
        assert!(config.host.debug_build);
        assert!(!config.host.abort_on_panic);
        assert_eq!(config.host.external_assets_dir(), PathBuf::from("/sdcard/files"));
        assert_eq!(
            config.host.background_process_name(),
            "com.example.proxy:engine"
        );
        assert_eq!(
            config.packages.labels.get("org.mozilla.firefox"),
            Some(&"Firefox".to_string())
        );
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_external_assets_dir_falls_back_to_files_dir() {
        let host = HostConfig {
            files_dir: PathBuf::from("/data/files"),
            ..HostConfig::default()
        };
        assert_eq!(host.external_assets_dir(), PathBuf::from("/data/files"));
    }

    #[test]
    fn test_validate_invalid_log_level() {
        let mut config = Config::default();
        config.host.log_level = "verbose".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("Invalid log level"));
    }

    #[test]
    fn test_validate_empty_application_id() {
        let mut config = Config::default();
        config.host.application_id = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_application_id_with_suffix() {
        let mut config = Config::default();
        config.host.application_id = "io.tunhost:bg".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("must not contain"));
    }

    #[test]
    fn test_validate_background_suffix() {
        let mut config = Config::default();
        config.host.background_suffix = "bg".to_string();
        assert!(config.validate().is_err());

        config.host.background_suffix = ":".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_asset_subpath() {
        let mut config = Config::default();
        config.host.asset_subpath = "v2ray".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("asset_subpath"));
    }

    #[test]
    fn test_validate_empty_label() {
        let mut config = Config::default();
        config
            .packages
            .labels
            .insert("com.example".to_string(), "  ".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_merge_overrides_scalars_and_extends_labels() {
        let mut base = Config::default();
        let mut other = Config::default();
        other.host.application_id = "com.example.proxy".to_string();
        other.host.platform_version = 34;
        other
            .packages
            .labels
            .insert("com.example".to_string(), "Example".to_string());

        base.merge(other);

        assert_eq!(base.host.application_id, "com.example.proxy");
        assert_eq!(base.host.platform_version, 34);
        assert_eq!(base.host.log_level, "info");
        assert!(base.packages.labels.contains_key("android"));
        assert!(base.packages.labels.contains_key("com.example"));
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.host.application_id, "io.tunhost");
        assert_eq!(config.host.asset_subpath, "v2ray/");
        assert_eq!(config.host.platform_version, 29);
        assert!(!config.host.debug_build);
        assert!(config.host.abort_on_panic);
        assert_eq!(
            config.packages.labels.get("android"),
            Some(&"Android System".to_string())
        );
    }
}
