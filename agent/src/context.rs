//! Per-process host context.
//!
//! Built once at process start and passed explicitly to the lifecycle
//! manager and the commands that need it.

use crate::attribution::{ConnectionOwnerLookup, ProcNetLookup, CONNECTION_OWNER_MIN_VERSION};
use crate::config::Config;
use crate::platform::{HeadlessPlatform, Platform};
use crate::process::{process_suffix, PackageSource, PackagesListSource, ProcessRole};
use std::sync::Arc;

/// Everything a host process knows about itself at startup.
pub struct HostContext {
    pub config: Config,
    pub process_name: String,
    pub role: ProcessRole,
    pub platform: Arc<dyn Platform>,
    pub packages: Arc<dyn PackageSource>,
    pub connections: Option<Arc<dyn ConnectionOwnerLookup>>,
}

impl HostContext {
    /// Context with explicit collaborators. The role is classified from
    /// `process_name` but not recorded as the process-wide role.
    pub fn new(
        config: Config,
        process_name: impl Into<String>,
        platform: Arc<dyn Platform>,
        packages: Arc<dyn PackageSource>,
    ) -> Self {
        let process_name = process_name.into();
        let role = ProcessRole::classify_with_suffix(
            &process_name,
            &config.host.application_id,
            &config.host.background_suffix,
        );
        Self {
            config,
            process_name,
            role,
            platform,
            packages,
            connections: None,
        }
    }

    /// Context for the running process with the default collaborators:
    /// a headless platform, the configured `packages.list` and `/proc/net`.
    pub fn from_config(config: Config, process_name: impl Into<String>) -> Self {
        let process_name = process_name.into();
        let role = ProcessRole::init_current(
            &process_name,
            &config.host.application_id,
            &config.host.background_suffix,
        );
        let platform = Arc::new(HeadlessPlatform::new(
            config.host.files_dir.clone(),
            config.host.cache_dir.clone(),
        ));
        let packages = Arc::new(PackagesListSource::new(
            config.packages.packages_list.clone(),
            config.packages.labels.clone(),
        ));

        Self {
            config,
            process_name,
            role,
            platform,
            packages,
            connections: Some(Arc::new(ProcNetLookup::default())),
        }
    }

    pub fn with_connection_lookup(mut self, lookup: Arc<dyn ConnectionOwnerLookup>) -> Self {
        self.connections = Some(lookup);
        self
    }

    pub fn without_connection_lookup(mut self) -> Self {
        self.connections = None;
        self
    }

    pub fn platform_version(&self) -> u32 {
        self.config.host.platform_version
    }

    /// Suffix after `<application id>:`, `None` in the main process.
    pub fn process_suffix(&self) -> Option<&str> {
        process_suffix(&self.process_name, &self.config.host.application_id)
    }

    /// The connection lookup to hand to the attribution bridge, if the
    /// platform version allows one.
    pub fn connection_lookup(&self) -> Option<Arc<dyn ConnectionOwnerLookup>> {
        if self.platform_version() < CONNECTION_OWNER_MIN_VERSION {
            return None;
        }
        self.connections.clone()
    }
}

impl std::fmt::Debug for HostContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostContext")
            .field("process_name", &self.process_name)
            .field("role", &self.role)
            .field("platform_version", &self.platform_version())
            .field("connection_lookup", &self.connections.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::StaticPackageSource;
    use tempfile::TempDir;

    fn context(name: &str, version: u32, dir: &TempDir) -> HostContext {
        let mut config = Config::default();
        config.host.platform_version = version;
        HostContext::new(
            config,
            name,
            Arc::new(HeadlessPlatform::new(dir.path(), dir.path())),
            Arc::new(StaticPackageSource::default()),
        )
        .with_connection_lookup(Arc::new(ProcNetLookup::new(dir.path())))
    }

    #[test]
    fn test_roles() {
        let dir = TempDir::new().unwrap();
        assert_eq!(context("io.tunhost", 29, &dir).role, ProcessRole::Main);
        assert_eq!(context("io.tunhost:bg", 29, &dir).role, ProcessRole::Background);
        assert_eq!(context("io.tunhost:sync", 29, &dir).role, ProcessRole::Other);
    }

    #[test]
    fn test_process_suffix() {
        let dir = TempDir::new().unwrap();
        assert_eq!(context("io.tunhost", 29, &dir).process_suffix(), None);
        assert_eq!(context("io.tunhost:bg", 29, &dir).process_suffix(), Some("bg"));
    }

    #[test]
    fn test_connection_lookup_gated_by_version() {
        let dir = TempDir::new().unwrap();
        assert!(context("io.tunhost:bg", 28, &dir).connection_lookup().is_none());
        assert!(context("io.tunhost:bg", 29, &dir).connection_lookup().is_some());
        assert!(context("io.tunhost:bg", 34, &dir)
            .without_connection_lookup()
            .connection_lookup()
            .is_none());
    }
}
