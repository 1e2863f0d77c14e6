//! Device-change monitoring with debounced rescans.
//!
//! Device notifications arrive in bursts (one per partition, plus follow-up
//! change events). The monitor waits for a quiet window before running a
//! single `mount_all`, and never runs two rescans at once.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use super::{Debouncer, VolumeRegistry};

/// A device notification from the OS host or a media-root watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceEvent {
    Arrived,
    Removed,
    Changed,
}

/// Cloneable handle for feeding device events into a monitor.
#[derive(Debug, Clone)]
pub struct HotplugSender {
    tx: mpsc::UnboundedSender<DeviceEvent>,
}

impl HotplugSender {
    /// Events sent after the monitor shut down are dropped.
    pub fn notify(&self, event: DeviceEvent) {
        let _ = self.tx.send(event);
    }
}

/// Callback run after every debounced rescan.
pub type RescanHook = Arc<dyn Fn() + Send + Sync>;

/// Background task that turns device events into registry rescans.
pub struct HotplugMonitor {
    sender: HotplugSender,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
    media_watchers: Vec<RecommendedWatcher>,
}

impl HotplugMonitor {
    /// Spawn the monitor on the current tokio runtime.
    pub fn spawn(registry: Arc<VolumeRegistry>, window: Duration) -> Self {
        Self::spawn_with_hook(registry, window, Arc::new(|| {}))
    }

    /// Like [`spawn`](Self::spawn), running `after_rescan` on the blocking
    /// pool once each rescan has finished.
    pub fn spawn_with_hook(
        registry: Arc<VolumeRegistry>,
        window: Duration,
        after_rescan: RescanHook,
    ) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let debouncer = Debouncer::new(window);
        let tick = (window / 4).clamp(Duration::from_millis(10), Duration::from_millis(500));

        let task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => {
                        tracing::debug!("hotplug monitor shutting down");
                        break;
                    }
                    event = rx.recv() => {
                        let Some(event) = event else { break };
                        tracing::debug!(?event, "device event");
                        debouncer.record(Instant::now());
                    }
                    _ = interval.tick() => {
                        if !debouncer.ready(Instant::now()) {
                            continue;
                        }
                        let registry = Arc::clone(&registry);
                        let hook = Arc::clone(&after_rescan);
                        let rescan = move || {
                            let count = registry.mount_all();
                            hook();
                            count
                        };
                        match tokio::task::spawn_blocking(rescan).await {
                            Ok(count) => tracing::info!(count, "rescanned volumes after device change"),
                            Err(e) => tracing::warn!(error = %e, "volume rescan task failed"),
                        }
                    }
                }
            }
        });

        Self {
            sender: HotplugSender { tx },
            shutdown_tx: Some(shutdown_tx),
            task,
            media_watchers: Vec::new(),
        }
    }

    pub fn sender(&self) -> HotplugSender {
        self.sender.clone()
    }

    /// Treat entries appearing or vanishing under `roots` as device events.
    ///
    /// Desktop automounters create a directory per medium under a fixed
    /// parent such as `/media/$USER`; watching the parent is the portable
    /// stand-in for OS device broadcasts.
    pub fn watch_media_roots(&mut self, roots: &[PathBuf]) -> Result<(), notify::Error> {
        for root in roots {
            let sender = self.sender();
            let mut watcher = RecommendedWatcher::new(
                move |result: Result<Event, notify::Error>| {
                    let Ok(event) = result else { return };
                    let device = match event.kind {
                        EventKind::Create(_) => DeviceEvent::Arrived,
                        EventKind::Remove(_) => DeviceEvent::Removed,
                        EventKind::Modify(_) => DeviceEvent::Changed,
                        _ => return,
                    };
                    sender.notify(device);
                },
                notify::Config::default(),
            )?;
            watcher.watch(root, RecursiveMode::NonRecursive)?;
            tracing::info!(path = %root.display(), "watching media root");
            self.media_watchers.push(watcher);
        }
        Ok(())
    }

    /// Stop the task and wait for an in-flight rescan to finish.
    pub async fn shutdown(mut self) {
        self.media_watchers.clear();
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        if let Err(e) = (&mut self.task).await {
            tracing::warn!(error = %e, "hotplug monitor task failed");
        }
    }
}
