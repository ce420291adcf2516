//! Synchronous UID attribution capability handed to the engine.
//!
//! The engine calls these methods from its own worker threads, once per
//! connection. `resolve_identity` may block until the package cache has
//! finished its first load; nothing here ever terminates the process, every
//! failure is returned to the engine which applies its own default policy.

use super::connection::{ConnectionOwnerLookup, ConnectionTuple};
use crate::error::{Error, Result};
use crate::process::{PackageCache, PackageIdentity, SYSTEM_PACKAGE, SYSTEM_UID_MAX};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Package name and label as reported back to the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UidInfo {
    pub package_name: String,
    pub label: String,
}

impl From<PackageIdentity> for UidInfo {
    fn from(identity: PackageIdentity) -> Self {
        Self {
            package_name: identity.package_name,
            label: identity.label,
        }
    }
}

/// Capability registered with the engine for per-connection attribution.
pub trait UidResolver: Send + Sync {
    /// Map a live connection to the uid that owns it.
    fn resolve_uid_from_connection(&self, tuple: &ConnectionTuple) -> Result<u32>;

    /// Map a uid to the identity of the application owning it.
    fn resolve_identity(&self, uid: u32) -> Result<PackageIdentity>;

    /// Engine callback taking the raw connection values.
    fn dump_uid(
        &self,
        protocol: i32,
        source_ip: &str,
        source_port: i32,
        destination_ip: &str,
        destination_port: i32,
    ) -> Result<u32> {
        let tuple = ConnectionTuple::from_raw(
            protocol,
            source_ip,
            source_port,
            destination_ip,
            destination_port,
        )?;
        self.resolve_uid_from_connection(&tuple)
    }

    /// Engine callback returning package name and label for a uid.
    fn get_uid_info(&self, uid: u32) -> Result<UidInfo> {
        self.resolve_identity(uid).map(UidInfo::from)
    }
}

/// [`UidResolver`] backed by the package cache and, when the platform has
/// one, the OS connection-ownership lookup.
pub struct UidBridge {
    cache: Arc<PackageCache>,
    connections: Option<Arc<dyn ConnectionOwnerLookup>>,
}

impl UidBridge {
    /// Bridge without connection lookup; `resolve_uid_from_connection`
    /// returns [`Error::Unsupported`].
    pub fn new(cache: Arc<PackageCache>) -> Self {
        Self {
            cache,
            connections: None,
        }
    }

    pub fn with_connection_lookup(mut self, lookup: Arc<dyn ConnectionOwnerLookup>) -> Self {
        self.connections = Some(lookup);
        self
    }

    pub fn supports_connection_lookup(&self) -> bool {
        self.connections.is_some()
    }

    pub fn cache(&self) -> &Arc<PackageCache> {
        &self.cache
    }
}

impl UidResolver for UidBridge {
    fn resolve_uid_from_connection(&self, tuple: &ConnectionTuple) -> Result<u32> {
        let lookup = self.connections.as_ref().ok_or_else(|| {
            Error::unsupported("connection-ownership lookup is not available on this platform")
        })?;

        let uid = lookup.connection_owner_uid(tuple)?;
        tracing::trace!("{} owned by uid {}", tuple, uid);
        Ok(uid)
    }

    fn resolve_identity(&self, uid: u32) -> Result<PackageIdentity> {
        self.cache.await_loaded_sync();

        if uid <= SYSTEM_UID_MAX {
            let label = self.cache.load_label(SYSTEM_PACKAGE);
            return Ok(PackageIdentity::new(uid, SYSTEM_PACKAGE, label));
        }

        // Shared-uid packages: the first in enumeration order wins.
        let package_name = self
            .cache
            .lookup(uid)
            .first()
            .cloned()
            .ok_or(Error::UnknownUid(uid))?;
        let label = self.cache.load_label(&package_name);
        Ok(PackageIdentity::new(uid, package_name, label))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::attribution::Protocol;
    use crate::process::{InstalledPackage, PackageSource, StaticPackageSource};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    fn bridge_with(packages: Vec<InstalledPackage>) -> UidBridge {
        let source = StaticPackageSource::new(packages)
            .with_label(SYSTEM_PACKAGE, "Android System")
            .with_label("org.mozilla.firefox", "Firefox");
        UidBridge::new(Arc::new(PackageCache::new(Arc::new(source))))
    }

    struct FixedLookup(u32);

    impl ConnectionOwnerLookup for FixedLookup {
        fn connection_owner_uid(&self, _tuple: &ConnectionTuple) -> Result<u32> {
            Ok(self.0)
        }
    }

    /// Records enumerations and never returns packages.
    struct CountingSource {
        enumerations: AtomicUsize,
        labels: Mutex<Vec<String>>,
    }

    impl PackageSource for CountingSource {
        fn installed_packages(&self) -> Result<Vec<InstalledPackage>> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            Ok(vec![InstalledPackage::new("com.shadow.system", 1000)])
        }

        fn load_label(&self, package_name: &str) -> Result<String> {
            self.labels.lock().unwrap().push(package_name.to_string());
            Ok("Android System".to_string())
        }
    }

    #[test]
    fn test_system_uid_resolves_before_any_load() {
        let source = Arc::new(CountingSource {
            enumerations: AtomicUsize::new(0),
            labels: Mutex::new(Vec::new()),
        });
        let cache = Arc::new(PackageCache::new(source.clone()));
        let bridge = UidBridge::new(cache.clone());

        for uid in [0, 1, 999, 1000] {
            let identity = bridge.resolve_identity(uid).unwrap();
            assert_eq!(identity.package_name, SYSTEM_PACKAGE);
            assert_eq!(identity.label, "Android System");
            assert_eq!(identity.uid, uid);
        }

        // The reserved range never consults the map, even though the source
        // lists a package at uid 1000.
        assert!(cache.is_loaded());
        assert_eq!(source.enumerations.load(Ordering::SeqCst), 1);
        assert_eq!(*source.labels.lock().unwrap(), vec![SYSTEM_PACKAGE.to_string()]);
    }

    #[test]
    fn test_unknown_uid() {
        let bridge = bridge_with(vec![InstalledPackage::new("org.mozilla.firefox", 10123)]);
        let err = bridge.resolve_identity(10999).unwrap_err();
        assert!(matches!(err, Error::UnknownUid(10999)));
        assert_eq!(err.to_string(), "unknown uid 10999");
    }

    #[test]
    fn test_known_uid_with_label() {
        let bridge = bridge_with(vec![InstalledPackage::new("org.mozilla.firefox", 10123)]);
        let identity = bridge.resolve_identity(10123).unwrap();
        assert_eq!(
            identity,
            PackageIdentity::new(10123, "org.mozilla.firefox", "Firefox")
        );
    }

    #[test]
    fn test_label_falls_back_to_package_name() {
        let bridge = bridge_with(vec![InstalledPackage::new("com.example.nolabel", 10200)]);
        let identity = bridge.resolve_identity(10200).unwrap();
        assert_eq!(identity.label, "com.example.nolabel");
    }

    #[test]
    fn test_shared_uid_returns_first_package() {
        let bridge = bridge_with(vec![
            InstalledPackage::new("com.google.android.gms", 10145),
            InstalledPackage::new("com.google.android.gsf", 10145),
        ]);
        for _ in 0..5 {
            let identity = bridge.resolve_identity(10145).unwrap();
            assert_eq!(identity.package_name, "com.google.android.gms");
        }
    }

    #[test]
    fn test_connection_lookup_unsupported() {
        let bridge = bridge_with(Vec::new());
        assert!(!bridge.supports_connection_lookup());
        let err = bridge.dump_uid(6, "10.0.0.2", 40000, "1.1.1.1", 443).unwrap_err();
        assert!(matches!(err, Error::Unsupported(_)));
    }

    #[test]
    fn test_dump_uid_delegates_to_lookup() {
        let bridge = bridge_with(Vec::new()).with_connection_lookup(Arc::new(FixedLookup(10123)));
        assert!(bridge.supports_connection_lookup());
        assert_eq!(
            bridge.dump_uid(6, "10.0.0.2", 40000, "1.1.1.1", 443).unwrap(),
            10123
        );

        let tuple = ConnectionTuple::new(
            Protocol::Udp,
            "10.0.0.2:5353".parse().unwrap(),
            "224.0.0.251:5353".parse().unwrap(),
        );
        assert_eq!(bridge.resolve_uid_from_connection(&tuple).unwrap(), 10123);
    }

    #[test]
    fn test_dump_uid_rejects_malformed_tuple() {
        let bridge = bridge_with(Vec::new()).with_connection_lookup(Arc::new(FixedLookup(1)));
        assert!(bridge.dump_uid(6, "bogus", 1, "1.1.1.1", 443).is_err());
    }

    #[test]
    fn test_get_uid_info() {
        let bridge = bridge_with(vec![InstalledPackage::new("org.mozilla.firefox", 10123)]);
        let info = bridge.get_uid_info(10123).unwrap();
        assert_eq!(info.package_name, "org.mozilla.firefox");
        assert_eq!(info.label, "Firefox");
        assert!(bridge.get_uid_info(4242424).is_err());
    }
}
