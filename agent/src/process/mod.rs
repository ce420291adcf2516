//! Process identity: role classification and the installed-package cache.

pub mod context;
pub mod package;
pub mod package_cache;
pub mod role;

pub use context::current_process_name;
pub use package::{
    InstalledPackage, PackageIdentity, PackageSource, PackagesListSource, StaticPackageSource,
    SYSTEM_PACKAGE, SYSTEM_UID_MAX,
};
pub use package_cache::{CacheState, CacheStats, PackageCache};
pub use role::{process_suffix, ProcessRole, BACKGROUND_SUFFIX};
