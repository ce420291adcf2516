//! One-time host initialization per OS process.
//!
//! [`Host::initialize`] runs these steps in order, exactly once:
//!
//! 1. install the panic hook (aborting unless `host.abort_on_panic` is off)
//! 2. main/background: webview directory fix-up, then webview debugging
//! 3. main/background: warm the package cache and clean the webview cache
//!    on a worker thread, without waiting for it
//! 4. open the settings store
//! 5. create the files, cache and external assets directories, configure
//!    engine logging and initialize the engine
//! 6. main: theme, night mode, notification channels
//! 7. background: register the uid attribution bridge with the engine

mod crash;

pub use crash::install_panic_hook;

use crate::attribution::UidBridge;
use crate::context::HostContext;
use crate::engine::{CoreOptions, Engine};
use crate::error::{Error, Result};
use crate::platform::notification_channels;
use crate::process::{PackageCache, ProcessRole};
use crate::storage::SettingsStore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, OnceLock};
use std::thread::JoinHandle;

/// Owns the engine handle and the per-process state built at startup.
pub struct Host {
    context: HostContext,
    engine: Arc<dyn Engine>,
    cache: Arc<PackageCache>,
    settings: OnceLock<Arc<SettingsStore>>,
    initialized: AtomicBool,
    warmup: Mutex<Option<JoinHandle<()>>>,
}

impl Host {
    /// Build the host for this process. The once-guard lives on the `Host`,
    /// so a process must build exactly one and share it.
    pub fn new(context: HostContext, engine: Arc<dyn Engine>) -> Self {
        let cache = Arc::new(PackageCache::new(Arc::clone(&context.packages)));
        Self {
            context,
            engine,
            cache,
            settings: OnceLock::new(),
            initialized: AtomicBool::new(false),
            warmup: Mutex::new(None),
        }
    }

    /// Run the startup sequence. Later calls return immediately; a failed
    /// first call is not retried.
    pub fn initialize(&self) -> Result<()> {
        if self.initialized.swap(true, Ordering::AcqRel) {
            tracing::debug!("Host already initialized");
            return Ok(());
        }

        let role = self.context.role;
        tracing::info!(
            "Initializing {} process '{}' (platform {})",
            role,
            self.context.process_name,
            self.context.platform_version()
        );

        install_panic_hook(self.context.config.host.abort_on_panic);

        if role.is_app_process() {
            self.prepare_webview();
            self.spawn_warmup();
        }

        let settings = self.open_settings()?;
        self.init_engine(&settings)?;

        match role {
            ProcessRole::Main => {
                self.context.platform.apply_theme();
                self.context.platform.apply_night_theme();
                self.update_notification_channels();
            }
            ProcessRole::Background => self.register_bridge(),
            ProcessRole::Other => {}
        }

        tracing::info!("Host initialized");
        Ok(())
    }

    fn prepare_webview(&self) {
        let platform = &self.context.platform;
        if let Err(e) = platform.fix_webview_dir(self.context.process_suffix()) {
            tracing::warn!("Failed to set up webview data directory: {}", e);
        }
        platform.set_webview_debugging(self.context.config.host.debug_build);
    }

    fn spawn_warmup(&self) {
        let cache = Arc::clone(&self.cache);
        let platform = Arc::clone(&self.context.platform);
        let spawned = std::thread::Builder::new()
            .name("host-warmup".to_string())
            .spawn(move || {
                cache.register_and_load();
                if let Err(e) = platform.clean_webview_cache() {
                    tracing::warn!("Failed to clean webview cache: {}", e);
                }
            });

        match spawned {
            Ok(handle) => {
                if let Ok(mut warmup) = self.warmup.lock() {
                    *warmup = Some(handle);
                }
            }
            Err(e) => {
                // The cache must still load; attribution waits on it.
                tracing::warn!("Failed to spawn warm-up worker: {}", e);
                self.cache.register_and_load();
            }
        }
    }

    fn open_settings(&self) -> Result<Arc<SettingsStore>> {
        let path = &self.context.config.host.settings_path;
        let store = Arc::new(SettingsStore::open(path)?);
        tracing::debug!("Settings: {}", path.display());
        Ok(Arc::clone(self.settings.get_or_init(|| store)))
    }

    fn init_engine(&self, settings: &Arc<SettingsStore>) -> Result<()> {
        let host = &self.context.config.host;
        let assets_root = host.external_assets_dir();
        for dir in [&host.files_dir, &host.cache_dir, &assets_root] {
            std::fs::create_dir_all(dir)?;
        }

        self.engine
            .set_log(settings.enable_log(), settings.log_buffer_size());

        let store = Arc::clone(settings);
        let options = CoreOptions {
            files_root: host.files_dir.clone(),
            assets_root,
            asset_subpath: host.asset_subpath.clone(),
            rules_provider_disabled: Arc::new(move || store.rules_provider() == 0),
            cache_dir: host.cache_dir.clone(),
            is_background: self.context.role.is_background(),
        };

        self.engine.init_core(options).map_err(|e| match e {
            Error::EngineInit(_) => e,
            other => Error::engine_init(other.to_string()),
        })
    }

    fn register_bridge(&self) {
        let mut bridge = UidBridge::new(Arc::clone(&self.cache));
        if let Some(lookup) = self.context.connection_lookup() {
            bridge = bridge.with_connection_lookup(lookup);
        }
        let use_connection_lookup = bridge.supports_connection_lookup();
        self.engine
            .register_uid_resolver(Arc::new(bridge), use_connection_lookup);
    }

    /// (Re)create notification channels. Only the main process owns them.
    pub fn update_notification_channels(&self) {
        if !self.context.role.is_main() {
            return;
        }
        let channels = notification_channels(self.context.platform_version());
        if channels.is_empty() {
            return;
        }
        if let Err(e) = self.context.platform.create_notification_channels(&channels) {
            tracing::warn!("Failed to create notification channels: {}", e);
        }
    }

    /// Device configuration (locale, ui mode) changed.
    pub fn on_configuration_changed(&self) {
        self.update_notification_channels();
    }

    /// Wait for the warm-up worker started by `initialize`, if any.
    pub fn join_warmup(&self) {
        let handle = self.warmup.lock().ok().and_then(|mut w| w.take());
        if let Some(handle) = handle {
            if handle.join().is_err() {
                tracing::warn!("Warm-up worker panicked");
            }
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub fn context(&self) -> &HostContext {
        &self.context
    }

    pub fn role(&self) -> ProcessRole {
        self.context.role
    }

    pub fn package_cache(&self) -> &Arc<PackageCache> {
        &self.cache
    }

    /// Settings store, once step 4 has run.
    pub fn settings(&self) -> Option<&Arc<SettingsStore>> {
        self.settings.get()
    }
}
