//! UID to installed-package cache.
//!
//! The cache is built once per process by a single background worker and is
//! never invalidated: packages installed or removed after the load are not
//! seen until the process restarts. State only moves forward:
//!
//! ```text
//! Unloaded --register_and_load()--> Loading --worker done--> Loaded
//! ```
//!
//! The Loaded transition is the only synchronization point. Waiters park on a
//! condition variable and are all released by a single `notify_all`. After
//! that the uid map sits in a `OnceLock` and is read without locking.

use super::package::{InstalledPackage, PackageSource};
use crate::error::Result;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, OnceLock, RwLock};
use std::time::{Duration, Instant};

const STATE_UNLOADED: u8 = 0;
const STATE_LOADING: u8 = 1;
const STATE_LOADED: u8 = 2;

/// Load state of the package cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheState {
    Unloaded,
    Loading,
    Loaded,
}

/// Cache statistics for debugging/monitoring.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub state: CacheState,
    /// Number of distinct uids
    pub uids: usize,
    /// Number of package names across all uids
    pub packages: usize,
    /// Number of memoized labels
    pub labels: usize,
}

/// Process-wide uid → package names cache.
pub struct PackageCache {
    source: Arc<dyn PackageSource>,
    state: AtomicU8,
    loaded: Mutex<bool>,
    loaded_cv: Condvar,
    uid_map: OnceLock<HashMap<u32, Vec<String>>>,
    labels: RwLock<HashMap<String, String>>,
}

impl PackageCache {
    /// Create an unloaded cache over the given package source.
    pub fn new(source: Arc<dyn PackageSource>) -> Self {
        Self {
            source,
            state: AtomicU8::new(STATE_UNLOADED),
            loaded: Mutex::new(false),
            loaded_cv: Condvar::new(),
            uid_map: OnceLock::new(),
            labels: RwLock::new(HashMap::new()),
        }
    }

    /// Current load state.
    pub fn state(&self) -> CacheState {
        match self.state.load(Ordering::Acquire) {
            STATE_UNLOADED => CacheState::Unloaded,
            STATE_LOADING => CacheState::Loading,
            _ => CacheState::Loaded,
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.state() == CacheState::Loaded
    }

    /// Start the one-time background load. No-op when a load is already
    /// running or finished.
    pub fn register_and_load(self: &Arc<Self>) {
        if self
            .state
            .compare_exchange(
                STATE_UNLOADED,
                STATE_LOADING,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_err()
        {
            return;
        }

        let cache = Arc::clone(self);
        let spawned = std::thread::Builder::new()
            .name("package-cache".to_string())
            .spawn(move || cache.load());

        if let Err(e) = spawned {
            // Loading inline keeps the Loaded guarantee when no thread can be
            // created.
            tracing::warn!("Failed to spawn package cache loader, loading inline: {}", e);
            self.load();
        }
    }

    fn load(&self) {
        let started = Instant::now();

        // An aborting panic hook ends the process before this catch runs.
        // Without one, waiters still get released with an empty map.

        let packages = match catch_unwind(AssertUnwindSafe(|| self.source.installed_packages())) {
            Ok(Ok(packages)) => packages,
            Ok(Err(e)) => {
                tracing::warn!("Failed to enumerate installed packages: {}", e);
                Vec::new()
            }
            Err(_) => {
                tracing::error!("Package source panicked during enumeration");
                Vec::new()
            }
        };

        let map = group_by_uid(packages);
        let (uids, total) = (map.len(), map.values().map(Vec::len).sum::<usize>());
        // Only the loader ever sets the map.
        let _ = self.uid_map.set(map);
        self.state.store(STATE_LOADED, Ordering::Release);

        let mut loaded = self.lock_loaded();
        *loaded = true;
        self.loaded_cv.notify_all();
        drop(loaded);

        tracing::info!(
            "Package cache loaded: {} packages across {} uids in {:?}",
            total,
            uids,
            started.elapsed()
        );
    }

    fn lock_loaded(&self) -> MutexGuard<'_, bool> {
        self.loaded.lock().unwrap_or_else(|poisoned| {
            tracing::warn!("Package cache mutex was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    /// Block the calling thread until the cache is loaded.
    ///
    /// Triggers the load itself if nothing has yet, so it never waits on a
    /// load that will not happen. Must not be called from the loader thread.
    pub fn await_loaded_sync(self: &Arc<Self>) {
        if self.is_loaded() {
            return;
        }
        if self.state() == CacheState::Unloaded {
            self.register_and_load();
        }

        let mut loaded = self.lock_loaded();
        while !*loaded {
            loaded = self
                .loaded_cv
                .wait(loaded)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    /// Like [`await_loaded_sync`](Self::await_loaded_sync) but gives up after
    /// `timeout`. Returns whether the cache is loaded.
    pub fn await_loaded_timeout(self: &Arc<Self>, timeout: Duration) -> bool {
        if self.is_loaded() {
            return true;
        }
        if self.state() == CacheState::Unloaded {
            self.register_and_load();
        }

        let loaded = self.lock_loaded();
        let (loaded, _) = self
            .loaded_cv
            .wait_timeout_while(loaded, timeout, |loaded| !*loaded)
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        *loaded
    }

    /// Package names owned by `uid` in enumeration order. Empty when the uid
    /// is unknown or the cache is not loaded yet.
    pub fn lookup(&self, uid: u32) -> &[String] {
        self.uid_map
            .get()
            .and_then(|map| map.get(&uid))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Human-readable label for a package, memoized. Falls back to the
    /// package name when the source cannot resolve one.
    pub fn load_label(&self, package_name: &str) -> String {
        if let Ok(labels) = self.labels.read() {
            if let Some(label) = labels.get(package_name) {
                return label.clone();
            }
        }

        let label = match catch_unwind(AssertUnwindSafe(|| self.source.load_label(package_name))) {
            Ok(Ok(label)) if !label.trim().is_empty() => label,
            Ok(Ok(_)) => package_name.to_string(),
            Ok(Err(e)) => {
                tracing::trace!("No label for {}: {}", package_name, e);
                package_name.to_string()
            }
            Err(_) => {
                tracing::warn!("Package source panicked resolving label for {}", package_name);
                package_name.to_string()
            }
        };

        if let Ok(mut labels) = self.labels.write() {
            labels
                .entry(package_name.to_string())
                .or_insert_with(|| label.clone());
        }
        label
    }

    /// Get cache statistics.
    #[must_use]
    pub fn stats(&self) -> CacheStats {
        let (uids, packages) = self
            .uid_map
            .get()
            .map(|map| (map.len(), map.values().map(Vec::len).sum::<usize>()))
            .unwrap_or((0, 0));
        let labels = self.labels.read().map(|l| l.len()).unwrap_or(0);
        CacheStats {
            state: self.state(),
            uids,
            packages,
            labels,
        }
    }
}

/// Group packages by uid, keeping the first-seen order and dropping repeats.
fn group_by_uid(packages: Vec<InstalledPackage>) -> HashMap<u32, Vec<String>> {
    let mut map: HashMap<u32, Vec<String>> = HashMap::new();
    for package in packages {
        let names = map.entry(package.uid).or_default();
        if !names.contains(&package.name) {
            names.push(package.name);
        }
    }
    map
}

/// Enumerate a source directly, for one-shot tools that do not need a cache.
pub fn enumerate_grouped(source: &dyn PackageSource) -> Result<HashMap<u32, Vec<String>>> {
    Ok(group_by_uid(source.installed_packages()?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use crate::process::package::StaticPackageSource;
    use std::sync::atomic::AtomicUsize;
    use std::sync::mpsc;

    /// Source that blocks enumeration until released.
    struct GatedSource {
        gate: Mutex<mpsc::Receiver<()>>,
        packages: Vec<InstalledPackage>,
        enumerations: AtomicUsize,
    }

    impl GatedSource {
        fn new(packages: Vec<InstalledPackage>) -> (Arc<Self>, mpsc::Sender<()>) {
            let (tx, rx) = mpsc::channel();
            let source = Arc::new(Self {
                gate: Mutex::new(rx),
                packages,
                enumerations: AtomicUsize::new(0),
            });
            (source, tx)
        }
    }

    impl PackageSource for GatedSource {
        fn installed_packages(&self) -> Result<Vec<InstalledPackage>> {
            self.enumerations.fetch_add(1, Ordering::SeqCst);
            let _ = self.gate.lock().unwrap().recv();
            Ok(self.packages.clone())
        }

        fn load_label(&self, package_name: &str) -> Result<String> {
            Err(Error::package_source(format!("no label for {}", package_name)))
        }
    }

    struct FailingSource;

    impl PackageSource for FailingSource {
        fn installed_packages(&self) -> Result<Vec<InstalledPackage>> {
            Err(Error::package_source("package manager unavailable"))
        }

        fn load_label(&self, _package_name: &str) -> Result<String> {
            Err(Error::package_source("package manager unavailable"))
        }
    }

    fn sample_packages() -> Vec<InstalledPackage> {
        vec![
            InstalledPackage::new("org.mozilla.firefox", 10123),
            InstalledPackage::new("com.google.android.gms", 10145),
            InstalledPackage::new("com.google.android.gsf", 10145),
            InstalledPackage::new("com.google.android.gms", 10145),
        ]
    }

    fn static_cache() -> Arc<PackageCache> {
        let source = StaticPackageSource::new(sample_packages()).with_label("org.mozilla.firefox", "Firefox");
        Arc::new(PackageCache::new(Arc::new(source)))
    }

    #[test]
    fn test_new_cache_is_unloaded() {
        let cache = static_cache();
        assert_eq!(cache.state(), CacheState::Unloaded);
        assert!(cache.lookup(10123).is_empty());
    }

    #[test]
    fn test_register_and_load_groups_by_uid() {
        let cache = static_cache();
        cache.register_and_load();
        cache.await_loaded_sync();

        assert_eq!(cache.state(), CacheState::Loaded);
        assert_eq!(cache.lookup(10123), ["org.mozilla.firefox".to_string()]);
        assert_eq!(
            cache.lookup(10145),
            [
                "com.google.android.gms".to_string(),
                "com.google.android.gsf".to_string()
            ]
        );
        assert!(cache.lookup(99999).is_empty());
    }

    #[test]
    fn test_register_and_load_is_idempotent() {
        let (source, release) = GatedSource::new(sample_packages());
        let cache = Arc::new(PackageCache::new(source.clone()));

        cache.register_and_load();
        cache.register_and_load();
        assert_eq!(cache.state(), CacheState::Loading);

        release.send(()).unwrap();
        cache.await_loaded_sync();
        cache.register_and_load();

        assert_eq!(source.enumerations.load(Ordering::SeqCst), 1);
        assert_eq!(cache.state(), CacheState::Loaded);
    }

    #[test]
    fn test_await_before_register_does_not_deadlock() {
        let cache = static_cache();
        // Never registered explicitly
        assert!(cache.await_loaded_timeout(Duration::from_secs(5)));
        assert!(cache.is_loaded());
    }

    #[test]
    fn test_await_blocks_until_loaded() {
        let (source, release) = GatedSource::new(sample_packages());
        let cache = Arc::new(PackageCache::new(source));
        cache.register_and_load();

        assert!(!cache.await_loaded_timeout(Duration::from_millis(50)));

        release.send(()).unwrap();
        assert!(cache.await_loaded_timeout(Duration::from_secs(5)));
    }

    #[test]
    fn test_concurrent_waiters_all_released_once() {
        const WAITERS: usize = 16;

        let (source, release) = GatedSource::new(sample_packages());
        let cache = Arc::new(PackageCache::new(source.clone()));
        let released = Arc::new(AtomicUsize::new(0));

        let handles: Vec<_> = (0..WAITERS)
            .map(|_| {
                let cache = Arc::clone(&cache);
                let released = Arc::clone(&released);
                std::thread::spawn(move || {
                    cache.await_loaded_sync();
                    released.fetch_add(1, Ordering::SeqCst);
                    cache.lookup(10123).to_vec()
                })
            })
            .collect();

        std::thread::sleep(Duration::from_millis(50));
        assert_eq!(released.load(Ordering::SeqCst), 0);

        release.send(()).unwrap();
        for handle in handles {
            let names = handle.join().unwrap();
            assert_eq!(names, vec!["org.mozilla.firefox".to_string()]);
        }

        assert_eq!(released.load(Ordering::SeqCst), WAITERS);
        assert_eq!(source.enumerations.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_failed_enumeration_still_loads() {
        let cache = Arc::new(PackageCache::new(Arc::new(FailingSource)));
        cache.register_and_load();
        assert!(cache.await_loaded_timeout(Duration::from_secs(5)));
        assert!(cache.lookup(10123).is_empty());
    }

    #[test]
    fn test_load_label_falls_back_to_package_name() {
        let cache = static_cache();
        assert_eq!(cache.load_label("nonexistent.pkg"), "nonexistent.pkg");
        assert_eq!(cache.load_label("org.mozilla.firefox"), "Firefox");
    }

    #[test]
    fn test_load_label_is_memoized() {
        let cache = static_cache();
        cache.load_label("org.mozilla.firefox");
        cache.load_label("org.mozilla.firefox");
        cache.load_label("nonexistent.pkg");
        assert_eq!(cache.stats().labels, 2);
    }

    #[test]
    fn test_stats() {
        let cache = static_cache();
        cache.await_loaded_sync();
        let stats = cache.stats();
        assert_eq!(stats.state, CacheState::Loaded);
        assert_eq!(stats.uids, 2);
        assert_eq!(stats.packages, 3);
    }

    #[test]
    fn test_enumerate_grouped() {
        let source = StaticPackageSource::new(sample_packages());
        let map = enumerate_grouped(&source).unwrap();
        assert_eq!(map.get(&10145).map(Vec::len), Some(2));
    }
}
