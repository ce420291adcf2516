//! Installed package enumeration and identity types.
//!
//! A [`PackageSource`] is the seam to the platform package manager. The
//! identity cache enumerates it once per process and asks it for labels on
//! demand, so implementations only need to be correct, not fast.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Package name reported for uids in the reserved system range.
pub const SYSTEM_PACKAGE: &str = "android";

/// Highest uid of the reserved system range.
pub const SYSTEM_UID_MAX: u32 = 1000;

/// Identity of the application that owns a uid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageIdentity {
    pub uid: u32,
    pub package_name: String,
    pub label: String,
}

impl PackageIdentity {
    pub fn new(uid: u32, package_name: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            uid,
            package_name: package_name.into(),
            label: label.into(),
        }
    }

    /// Whether this is the synthetic identity for the reserved system range.
    pub fn is_system(&self) -> bool {
        self.package_name == SYSTEM_PACKAGE
    }
}

/// One installed package as enumerated by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstalledPackage {
    pub name: String,
    pub uid: u32,
}

impl InstalledPackage {
    pub fn new(name: impl Into<String>, uid: u32) -> Self {
        Self {
            name: name.into(),
            uid,
        }
    }
}

/// Source of installed packages and their labels.
pub trait PackageSource: Send + Sync {
    /// Enumerate all installed packages in platform order.
    fn installed_packages(&self) -> Result<Vec<InstalledPackage>>;

    /// Resolve a human-readable label for a package.
    fn load_label(&self, package_name: &str) -> Result<String>;
}

/// Package source backed by a `packages.list` file.
///
/// Each line is `<name> <uid> <debuggable> <data dir> <seinfo> <gids> ...`;
/// only the first two fields are used. Labels come from a static table.
pub struct PackagesListSource {
    path: PathBuf,
    labels: BTreeMap<String, String>,
}

impl PackagesListSource {
    pub fn new(path: impl Into<PathBuf>, labels: BTreeMap<String, String>) -> Self {
        Self {
            path: path.into(),
            labels,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl PackageSource for PackagesListSource {
    fn installed_packages(&self) -> Result<Vec<InstalledPackage>> {
        let contents = std::fs::read_to_string(&self.path).map_err(|e| {
            Error::package_source(format!("failed to read {}: {}", self.path.display(), e))
        })?;
        Ok(parse_packages_list(&contents))
    }

    fn load_label(&self, package_name: &str) -> Result<String> {
        self.labels
            .get(package_name)
            .cloned()
            .ok_or_else(|| Error::package_source(format!("no label for {}", package_name)))
    }
}

/// Parse the contents of a `packages.list` file, skipping malformed lines.
pub fn parse_packages_list(contents: &str) -> Vec<InstalledPackage> {
    contents
        .lines()
        .filter_map(|line| {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') {
                return None;
            }
            let mut fields = line.split_whitespace();
            let name = fields.next()?;
            match fields.next().and_then(|uid| uid.parse::<u32>().ok()) {
                Some(uid) => Some(InstalledPackage::new(name, uid)),
                None => {
                    tracing::debug!("Skipping malformed packages.list line: {}", line);
                    None
                }
            }
        })
        .collect()
}

/// Package source with a fixed package list, for embedders that enumerate
/// packages themselves.
#[derive(Debug, Clone, Default)]
pub struct StaticPackageSource {
    packages: Vec<InstalledPackage>,
    labels: BTreeMap<String, String>,
}

impl StaticPackageSource {
    pub fn new(packages: Vec<InstalledPackage>) -> Self {
        Self {
            packages,
            labels: BTreeMap::new(),
        }
    }

    pub fn with_label(mut self, package_name: impl Into<String>, label: impl Into<String>) -> Self {
        self.labels.insert(package_name.into(), label.into());
        self
    }
}

impl PackageSource for StaticPackageSource {
    fn installed_packages(&self) -> Result<Vec<InstalledPackage>> {
        Ok(self.packages.clone())
    }

    fn load_label(&self, package_name: &str) -> Result<String> {
        self.labels
            .get(package_name)
            .cloned()
            .ok_or_else(|| Error::package_source(format!("no label for {}", package_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const PACKAGES_LIST: &str = "\
com.android.shell 2000 0 /data/user_de/0/com.android.shell platform:privapp 3002,3003
org.mozilla.firefox 10123 0 /data/user/0/org.mozilla.firefox default:targetSdkVersion=34 3003
com.google.android.gms 10145 0 /data/user/0/com.google.android.gms default:privapp 3002,3003,3007
com.google.android.gsf 10145 0 /data/user/0/com.google.android.gsf default:privapp 3002,3003
";

    #[test]
    fn test_parse_packages_list_preserves_order() {
        let packages = parse_packages_list(PACKAGES_LIST);
        let names: Vec<&str> = packages.iter().map(|p| p.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "com.android.shell",
                "org.mozilla.firefox",
                "com.google.android.gms",
                "com.google.android.gsf",
            ]
        );
        assert_eq!(packages[1].uid, 10123);
        assert_eq!(packages[2].uid, packages[3].uid);
    }

    #[test]
    fn test_parse_packages_list_skips_malformed() {
        let packages = parse_packages_list("broken\n\n# comment\ncom.ok 10001 0 /data\ncom.bad uid\n");
        assert_eq!(packages, vec![InstalledPackage::new("com.ok", 10001)]);
    }

    #[test]
    fn test_packages_list_source_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(PACKAGES_LIST.as_bytes()).unwrap();
        file.flush().unwrap();

        let source = PackagesListSource::new(file.path(), BTreeMap::new());
        let packages = source.installed_packages().unwrap();
        assert_eq!(packages.len(), 4);
    }

    #[test]
    fn test_packages_list_source_missing_file() {
        let source = PackagesListSource::new("/nonexistent/packages.list", BTreeMap::new());
        let err = source.installed_packages().unwrap_err();
        assert!(err.to_string().contains("package source error"));
    }

    #[test]
    fn test_packages_list_source_labels() {
        let mut labels = BTreeMap::new();
        labels.insert("org.mozilla.firefox".to_string(), "Firefox".to_string());
        let source = PackagesListSource::new("/nonexistent", labels);

        assert_eq!(source.load_label("org.mozilla.firefox").unwrap(), "Firefox");
        assert!(source.load_label("com.unknown").is_err());
    }

    #[test]
    fn test_static_source() {
        let source = StaticPackageSource::new(vec![InstalledPackage::new("com.a", 10001)])
            .with_label("com.a", "App A");
        assert_eq!(source.installed_packages().unwrap().len(), 1);
        assert_eq!(source.load_label("com.a").unwrap(), "App A");
        assert!(source.load_label("com.b").is_err());
    }

    #[test]
    fn test_package_identity_is_system() {
        assert!(PackageIdentity::new(1000, SYSTEM_PACKAGE, "Android System").is_system());
        assert!(!PackageIdentity::new(10123, "org.mozilla.firefox", "Firefox").is_system());
    }
}
