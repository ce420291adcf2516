//! Interface to the embedded traffic engine.
//!
//! The engine itself is linked in by the embedder. The host only drives its
//! one-time initialization and hands it the uid attribution capability.

use crate::attribution::UidResolver;
use crate::error::{Error, Result};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

/// Live accessor the engine polls to decide whether the rules provider is
/// disabled. Evaluated on every call, never cached.
pub type RulesProviderDisabled = Arc<dyn Fn() -> bool + Send + Sync>;

/// Arguments for [`Engine::init_core`].
#[derive(Clone)]
pub struct CoreOptions {
    /// Private files root.
    pub files_root: PathBuf,
    /// External assets root (geo databases, rule sets).
    pub assets_root: PathBuf,
    /// Subdirectory of the packaged assets the engine extracts from.
    pub asset_subpath: String,
    pub rules_provider_disabled: RulesProviderDisabled,
    pub cache_dir: PathBuf,
    /// Whether this is the background (engine-hosting) process.
    pub is_background: bool,
}

impl std::fmt::Debug for CoreOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreOptions")
            .field("files_root", &self.files_root)
            .field("assets_root", &self.assets_root)
            .field("asset_subpath", &self.asset_subpath)
            .field("rules_provider_disabled", &(self.rules_provider_disabled)())
            .field("cache_dir", &self.cache_dir)
            .field("is_background", &self.is_background)
            .finish()
    }
}

/// The traffic engine as seen by the host.
pub trait Engine: Send + Sync {
    /// Configure engine logging before init.
    fn set_log(&self, enabled: bool, buffer_size: u32);

    /// Initialize the engine. Called at most once per process.
    fn init_core(&self, options: CoreOptions) -> Result<()>;

    /// Register the uid attribution capability. When
    /// `use_connection_lookup` is false the engine must attribute
    /// connections by its own means and only call `resolve_identity`.
    fn register_uid_resolver(&self, resolver: Arc<dyn UidResolver>, use_connection_lookup: bool);
}

/// Engine stand-in used when no engine is linked. Records what the host
/// asked of it so the binary and tests can inspect it.
#[derive(Default)]
pub struct NullEngine {
    init_calls: AtomicUsize,
    state: Mutex<NullEngineState>,
}

#[derive(Default)]
struct NullEngineState {
    log: Option<(bool, u32)>,
    options: Option<CoreOptions>,
    resolver: Option<Arc<dyn UidResolver>>,
    use_connection_lookup: bool,
}

impl NullEngine {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, NullEngineState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of `init_core` calls seen.
    pub fn init_calls(&self) -> usize {
        self.init_calls.load(Ordering::SeqCst)
    }

    pub fn log_settings(&self) -> Option<(bool, u32)> {
        self.lock().log
    }

    pub fn options(&self) -> Option<CoreOptions> {
        self.lock().options.clone()
    }

    /// The registered resolver and whether connection lookup was enabled.
    pub fn resolver(&self) -> Option<(Arc<dyn UidResolver>, bool)> {
        let state = self.lock();
        state
            .resolver
            .clone()
            .map(|resolver| (resolver, state.use_connection_lookup))
    }
}

impl Engine for NullEngine {
    fn set_log(&self, enabled: bool, buffer_size: u32) {
        tracing::debug!("Engine log: enabled={} buffer={}", enabled, buffer_size);
        self.lock().log = Some((enabled, buffer_size));
    }

    fn init_core(&self, options: CoreOptions) -> Result<()> {
        if self.init_calls.fetch_add(1, Ordering::SeqCst) > 0 {
            return Err(Error::engine_init("engine already initialized"));
        }
        tracing::info!(
            "Engine init: files={} assets={} background={}",
            options.files_root.display(),
            options.assets_root.display(),
            options.is_background
        );
        self.lock().options = Some(options);
        Ok(())
    }

    fn register_uid_resolver(&self, resolver: Arc<dyn UidResolver>, use_connection_lookup: bool) {
        tracing::debug!(
            "Uid resolver registered (connection lookup: {})",
            use_connection_lookup
        );
        let mut state = self.lock();
        state.resolver = Some(resolver);
        state.use_connection_lookup = use_connection_lookup;
    }
}
