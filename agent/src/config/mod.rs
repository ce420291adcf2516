//! Configuration loading and validation.

mod schema;

pub use schema::{Config, HostConfig, PackagesConfig};

use crate::error::{Error, Result};
use std::path::{Path, PathBuf};

/// Load configuration from a TOML file.
/// This first loads default.toml from the same directory, then merges
/// the given config on top.
pub fn load_config(path: &Path) -> Result<Config> {
    let mut config = Config::default();

    if let Some(parent) = path.parent() {
        let default_path = parent.join("default.toml");
        if default_path.exists() && default_path != path {
            let contents = std::fs::read_to_string(&default_path)?;
            let default_config: Config =
                toml::from_str(&contents).map_err(|e| Error::ConfigParse {
                    path: default_path.clone(),
                    source: e,
                })?;
            config.merge(default_config);
            tracing::info!("Loaded default config from {}", default_path.display());
        }
    }

    let contents = std::fs::read_to_string(path)?;
    let file_config: Config = toml::from_str(&contents).map_err(|e| Error::ConfigParse {
        path: path.to_path_buf(),
        source: e,
    })?;
    config.merge(file_config);
    tracing::info!("Loaded config from {}", path.display());

    config.validate()?;
    Ok(config)
}

/// Load configuration from a string.
pub fn load_config_str(contents: &str) -> Result<Config> {
    let config: Config = toml::from_str(contents).map_err(|e| Error::ConfigParse {
        path: PathBuf::from("<string>"),
        source: e,
    })?;
    config.validate()?;
    Ok(config)
}

/// Get the default configuration path for the current platform.
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "android")]
    {
        PathBuf::from("/data/local/tunhost/config.toml")
    }

    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/tunhost/config.toml")
    }

    #[cfg(not(any(target_os = "android", target_os = "linux")))]
    {
        PathBuf::from("config.toml")
    }
}

/// Get the default control socket path for the current platform.
pub fn default_socket_path() -> PathBuf {
    #[cfg(target_os = "android")]
    {
        PathBuf::from("/data/local/tunhost/control.sock")
    }

    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/run/tunhost/control.sock")
    }

    #[cfg(not(any(target_os = "android", target_os = "linux")))]
    {
        PathBuf::from("tunhost.sock")
    }
}

/// Get the default writable files root.
pub fn default_files_dir() -> PathBuf {
    #[cfg(target_os = "android")]
    {
        PathBuf::from("/data/local/tunhost/files")
    }

    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/tunhost/files")
    }

    #[cfg(not(any(target_os = "android", target_os = "linux")))]
    {
        PathBuf::from("files")
    }
}

/// Get the default cache directory.
pub fn default_cache_dir() -> PathBuf {
    #[cfg(target_os = "android")]
    {
        PathBuf::from("/data/local/tunhost/cache")
    }

    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/cache/tunhost")
    }

    #[cfg(not(any(target_os = "android", target_os = "linux")))]
    {
        PathBuf::from("cache")
    }
}

/// Get the default settings database path.
pub fn default_settings_path() -> PathBuf {
    #[cfg(target_os = "android")]
    {
        PathBuf::from("/data/local/tunhost/settings.db")
    }

    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/var/lib/tunhost/settings.db")
    }

    #[cfg(not(any(target_os = "android", target_os = "linux")))]
    {
        PathBuf::from("settings.db")
    }
}
