//! Process-level wiring of the kernel services.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bagfs_kernel::{BagfsConfig, SyncWatcher, VolumeRegistry, VolumeSource};
use tokio::runtime::Handle;

/// The registry, the pipeline and the watcher, built once and shared.
pub struct Bagfs {
    config: BagfsConfig,
    registry: Arc<VolumeRegistry>,
    watcher: Arc<SyncWatcher>,
    serving: AtomicBool,
}

impl Bagfs {
    pub fn new(config: BagfsConfig, runtime: Handle) -> Arc<Self> {
        let source = config.volume_source();
        Self::with_source(config, source, runtime)
    }

    pub fn with_source(
        config: BagfsConfig,
        source: Arc<dyn VolumeSource>,
        runtime: Handle,
    ) -> Arc<Self> {
        let registry = Arc::new(VolumeRegistry::new(source, config.registry_options()));
        let pipeline = Arc::new(config.pipeline());
        let watcher = SyncWatcher::new(Arc::clone(&registry), pipeline, runtime);
        Arc::new(Self {
            config,
            registry,
            watcher,
            serving: AtomicBool::new(false),
        })
    }

    pub fn config(&self) -> &BagfsConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<VolumeRegistry> {
        &self.registry
    }

    pub fn watcher(&self) -> &Arc<SyncWatcher> {
        &self.watcher
    }

    /// Discover and mount every healthy bag. Returns the mounted count.
    pub fn load(&self) -> usize {
        let mounted = self.registry.mount_all();
        let discovered = self.registry.discovered().len();
        tracing::info!(discovered, mounted, "loaded bag volumes");
        mounted
    }

    /// [`load`](Self::load), then keep every bag in sync with its directory.
    pub fn start(&self) -> usize {
        let mounted = self.load();
        self.serving.store(true, Ordering::SeqCst);
        let watched = self.watcher.start_all();
        tracing::info!(watched, "sync watchers running");
        mounted
    }

    /// True between [`start`](Self::start) and [`shutdown`](Self::shutdown).
    pub fn is_serving(&self) -> bool {
        self.serving.load(Ordering::SeqCst)
    }

    pub fn shutdown(&self) {
        self.serving.store(false, Ordering::SeqCst);
        self.watcher.stop_all();
        self.registry.shutdown();
        tracing::info!("bagfs shut down");
    }
}
