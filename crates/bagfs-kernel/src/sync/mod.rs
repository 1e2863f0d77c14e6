//! Keeps each catalog in step with its bag directory.
//!
//! One `notify` watcher per watched volume feeds an mpsc channel drained by a
//! tokio task. Changes for a volume are applied strictly in arrival order on
//! the blocking pool. Handler failures are logged and never stop the loop.

mod events;

pub use events::{BagChange, classify};

use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use dashmap::mapref::entry::Entry;
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};

use crate::catalog::{CatalogError, Item};
use crate::meta::MetaPipeline;
use crate::volume::{BagVolume, VolumeId, VolumeRegistry};

/// Sync error type.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("volume has no registered bag: {0}")]
    NotRegistered(VolumeId),

    #[error("volume is not being watched: {0}")]
    NotWatched(VolumeId),

    #[error("catalog failed its integrity check: {0}")]
    Suspect(VolumeId),

    #[error("bag directory is missing: {0}")]
    BagMissing(PathBuf),

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("watch error: {0}")]
    Watch(#[from] notify::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Handle to a running bag watcher.
struct WatchHandle {
    /// Keep alive to continue watching.
    _watcher: RecommendedWatcher,
    shutdown_tx: oneshot::Sender<()>,
    /// Held for the duration of each apply; `true` once stopped.
    closed: Arc<Mutex<bool>>,
}

impl WatchHandle {
    /// Returns once no change is being applied and none will start.
    fn stop(self) {
        let _ = self.shutdown_tx.send(());
        *self.closed.lock() = true;
    }
}

pub struct SyncWatcher {
    registry: Arc<VolumeRegistry>,
    pipeline: Arc<MetaPipeline>,
    runtime: Handle,
    watched: DashMap<VolumeId, WatchHandle>,
}

impl SyncWatcher {
    pub fn new(registry: Arc<VolumeRegistry>, pipeline: Arc<MetaPipeline>, runtime: Handle) -> Arc<Self> {
        Arc::new(Self {
            registry,
            pipeline,
            runtime,
            watched: DashMap::new(),
        })
    }

    /// Begin watching a discovered volume. Watching twice is a no-op.
    pub fn start(self: &Arc<Self>, id: &str) -> Result<(), SyncError> {
        let bag = self
            .registry
            .discovered_volume(id)
            .ok_or_else(|| SyncError::NotRegistered(id.to_string()))?;
        if bag.catalog.is_suspect() {
            return Err(SyncError::Suspect(id.to_string()));
        }

        let slot = match self.watched.entry(id.to_string()) {
            Entry::Occupied(_) => return Ok(()),
            Entry::Vacant(slot) => slot,
        };

        let bag_dir = bag.bag_dir()?;
        if !bag_dir.is_dir() {
            return Err(SyncError::BagMissing(bag_dir));
        }

        let (tx, mut rx) = mpsc::unbounded_channel::<BagChange>();
        let mut watcher = RecommendedWatcher::new(
            move |result: Result<Event, notify::Error>| match result {
                Ok(event) => {
                    for change in classify(event) {
                        let _ = tx.send(change);
                    }
                }
                Err(e) => tracing::warn!(error = %e, "bag watcher error"),
            },
            notify::Config::default(),
        )?;
        watcher.watch(&bag_dir, RecursiveMode::NonRecursive)?;

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        let closed = Arc::new(Mutex::new(false));
        let gate = Arc::clone(&closed);
        let this = Arc::clone(self);
        let volume = id.to_string();
        self.runtime.spawn(async move {
            loop {
                tokio::select! {
                    _ = &mut shutdown_rx => break,
                    change = rx.recv() => {
                        let Some(change) = change else { break };
                        let worker = Arc::clone(&this);
                        let target = volume.clone();
                        let gate = Arc::clone(&gate);
                        let applied = tokio::task::spawn_blocking(move || {
                            let stopped = gate.lock();
                            if !*stopped {
                                worker.apply(&target, change);
                            }
                        })
                        .await;
                        if let Err(e) = applied {
                            tracing::warn!(volume = %volume, error = %e, "bag change handler panicked");
                        }
                    }
                }
            }
            tracing::debug!(volume = %volume, "bag watcher stopped");
        });

        slot.insert(WatchHandle {
            _watcher: watcher,
            shutdown_tx,
            closed,
        });
        tracing::info!(volume = %id, path = %bag_dir.display(), "watching bag");
        Ok(())
    }

    pub fn stop(&self, id: &str) -> Result<(), SyncError> {
        let (_, handle) = self
            .watched
            .remove(id)
            .ok_or_else(|| SyncError::NotWatched(id.to_string()))?;
        handle.stop();
        tracing::info!(volume = %id, "stopped watching bag");
        Ok(())
    }

    /// Watch every discovered volume; returns how many are now watched.
    pub fn start_all(self: &Arc<Self>) -> usize {
        for id in self.registry.discovered().into_keys() {
            match self.start(&id) {
                Ok(()) => {}
                Err(SyncError::Suspect(_)) => {
                    tracing::debug!(volume = %id, "suspect catalog left unwatched");
                }
                Err(e) => tracing::warn!(volume = %id, error = %e, "failed to start bag watcher"),
            }
        }
        self.watched.len()
    }

    pub fn stop_all(&self) {
        for id in self.watched() {
            let _ = self.stop(&id);
        }
    }

    /// Match the watched set to the registry: stop watchers whose volume
    /// is no longer discovered, start the missing ones.
    pub fn reconcile(self: &Arc<Self>) -> usize {
        let discovered = self.registry.discovered();
        for id in self.watched() {
            if !discovered.contains_key(&id) {
                let _ = self.stop(&id);
            }
        }
        self.start_all()
    }

    pub fn watched(&self) -> Vec<VolumeId> {
        let mut ids: Vec<VolumeId> = self.watched.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    pub fn is_watched(&self, id: &str) -> bool {
        self.watched.contains_key(id)
    }

    /// Rebuild a catalog from the bag directory's current contents.
    ///
    /// Watching pauses for the duration and resumes if it was running. This
    /// is the one path that clears a suspect catalog. Returns the number of
    /// items cataloged.
    pub fn resynchronize(self: &Arc<Self>, id: &str) -> Result<usize, SyncError> {
        let bag = self
            .registry
            .discovered_volume(id)
            .ok_or_else(|| SyncError::NotRegistered(id.to_string()))?;
        let bag_dir = bag.bag_dir()?;
        if !bag_dir.is_dir() {
            return Err(SyncError::BagMissing(bag_dir));
        }

        let was_watched = match self.watched.remove(id) {
            Some((_, handle)) => {
                handle.stop();
                true
            }
            None => false,
        };

        let result = self.rescan(&bag, &bag_dir);

        if was_watched {
            if let Err(e) = self.start(id) {
                tracing::warn!(volume = %id, error = %e, "failed to resume bag watcher");
            }
        }
        result
    }

    fn rescan(&self, bag: &BagVolume, bag_dir: &Path) -> Result<usize, SyncError> {
        bag.catalog.truncate_items()?;

        let mut count = 0;
        for entry in std::fs::read_dir(bag_dir)? {
            let path = entry?.path();
            if self.is_catalog_file(&path) {
                continue;
            }
            let item = match Item::from_path(&path) {
                Ok(Some(item)) => item,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable file");
                    continue;
                }
            };
            let stored = bag
                .catalog
                .upsert_item(&item)
                .and_then(|()| self.pipeline.process(&item, &bag.catalog, &path));
            match stored {
                Ok(_) => count += 1,
                Err(e) if e.is_structural() => return Err(e.into()),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "failed to catalog file");
                }
            }
        }

        bag.catalog.compute_and_store_integrity_hash()?;
        tracing::info!(volume = %bag.id(), count, "resynchronized bag");
        Ok(count)
    }

    /// Apply one change to the volume's catalog. Errors are logged.
    pub fn apply(&self, id: &str, change: BagChange) {
        let Some(bag) = self.registry.discovered_volume(id) else {
            tracing::debug!(volume = %id, ?change, "change for unregistered volume dropped");
            return;
        };
        if bag.catalog.is_suspect() {
            tracing::debug!(volume = %id, ?change, "change for suspect catalog dropped");
            return;
        }
        if change.paths().iter().any(|p| self.is_catalog_file(p)) {
            return;
        }

        let result = match &change {
            BagChange::Created(path) => self.on_created(&bag, path),
            BagChange::Deleted(path) => self.on_deleted(&bag, path),
            BagChange::Renamed { from, to } => self
                .on_deleted(&bag, from)
                .and_then(|()| self.on_created(&bag, to)),
            BagChange::Modified(path) => self.on_modified(&bag, path),
        };

        match result {
            Ok(()) => tracing::debug!(volume = %id, ?change, "applied bag change"),
            Err(e) => tracing::warn!(volume = %id, ?change, error = %e, "failed to apply bag change"),
        }

        if let Err(e) = bag.catalog.refresh_integrity_if_dirty() {
            tracing::debug!(volume = %id, error = %e, "integrity refresh skipped");
        }
    }

    fn on_created(&self, bag: &BagVolume, path: &Path) -> Result<(), SyncError> {
        let Some(item) = stat(path)? else {
            return Ok(());
        };
        bag.catalog.upsert_item(&item)?;
        self.pipeline.process_fresh(&item, &bag.catalog, path)?;
        Ok(())
    }

    fn on_deleted(&self, bag: &BagVolume, path: &Path) -> Result<(), SyncError> {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(());
        };
        bag.catalog.delete_item(name)?;
        Ok(())
    }

    fn on_modified(&self, bag: &BagVolume, path: &Path) -> Result<(), SyncError> {
        let Some(item) = stat(path)? else {
            return Ok(());
        };
        if bag.catalog.get_item(&item.id)?.is_some() {
            bag.catalog.update_item(&item)?;
            Ok(())
        } else {
            self.on_created(bag, path)
        }
    }

    /// The store and its journal files live at the volume root, which may be
    /// the bag directory itself.
    fn is_catalog_file(&self, path: &Path) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|name| name.starts_with(self.registry.marker_file()))
    }
}

/// A file that vanished before we got to it is not an error.
fn stat(path: &Path) -> Result<Option<Item>, SyncError> {
    match Item::from_path(path) {
        Ok(item) => Ok(item),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::{RegistryOptions, StaticVolumes, volume_id};
    use std::time::Duration;

    struct Fixture {
        vol: tempfile::TempDir,
        bag_dir: PathBuf,
        id: VolumeId,
        registry: Arc<VolumeRegistry>,
        watcher: Arc<SyncWatcher>,
    }

    fn fixture() -> Fixture {
        fixture_with(Duration::ZERO)
    }

    fn fixture_with(settle: Duration) -> Fixture {
        let vol = tempfile::tempdir().unwrap();
        let bag_dir = vol.path().join("bag");
        std::fs::create_dir(&bag_dir).unwrap();
        let source = Arc::new(StaticVolumes::new(vec![vol.path().to_path_buf()]));
        let registry = Arc::new(VolumeRegistry::new(source, RegistryOptions::default()));
        let id = volume_id(vol.path());
        registry.create_volume(&id, Path::new("bag")).unwrap();
        registry.mount_all();

        let watcher = SyncWatcher::new(
            registry.clone(),
            Arc::new(MetaPipeline::new(settle)),
            Handle::current(),
        );
        Fixture {
            vol,
            bag_dir,
            id,
            registry,
            watcher,
        }
    }

    impl Fixture {
        fn catalog(&self) -> Arc<crate::catalog::Catalog> {
            self.registry.mounted_volume(&self.id).unwrap().catalog
        }

        /// Close the catalog and slip a row in behind its back.
        fn tamper(&self) {
            self.registry.unmount(&self.id).unwrap();
            let store = self.vol.path().join(self.registry.marker_file());
            let conn = rusqlite::Connection::open(store).unwrap();
            conn.execute(
                "INSERT INTO Item (id, name, ext, size, attr, ct, lwt, lat)
                 VALUES ('planted.txt', 'planted', 'txt', 1, 0, 0, 0, 0)",
                [],
            )
            .unwrap();
        }
    }

    #[tokio::test]
    async fn test_apply_create_delete() {
        let fx = fixture();
        let path = fx.bag_dir.join("a.txt");
        std::fs::write(&path, b"hello").unwrap();

        fx.watcher.apply(&fx.id, BagChange::Created(path.clone()));
        let catalog = fx.catalog();
        assert_eq!(catalog.get_item("a.txt").unwrap().unwrap().size, 5);
        assert!(catalog.tag_exists("document").unwrap());
        assert!(catalog.verify_integrity().unwrap());

        std::fs::remove_file(&path).unwrap();
        fx.watcher.apply(&fx.id, BagChange::Deleted(path));
        assert!(catalog.get_item("a.txt").unwrap().is_none());
        assert!(!catalog.tag_exists("document").unwrap());
    }

    #[tokio::test]
    async fn test_apply_rename() {
        let fx = fixture();
        let old = fx.bag_dir.join("old.txt");
        let new = fx.bag_dir.join("new.mp3");
        std::fs::write(&old, b"x").unwrap();
        fx.watcher.apply(&fx.id, BagChange::Created(old.clone()));

        std::fs::rename(&old, &new).unwrap();
        fx.watcher.apply(
            &fx.id,
            BagChange::Renamed {
                from: old,
                to: new,
            },
        );

        let catalog = fx.catalog();
        assert!(catalog.get_item("old.txt").unwrap().is_none());
        assert!(catalog.get_item("new.mp3").unwrap().is_some());
        assert_eq!(catalog.items_matching_all(["music"]).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_apply_modify_refreshes_size() {
        let fx = fixture();
        let path = fx.bag_dir.join("a.txt");
        std::fs::write(&path, b"").unwrap();
        fx.watcher.apply(&fx.id, BagChange::Created(path.clone()));

        std::fs::write(&path, b"now longer").unwrap();
        fx.watcher.apply(&fx.id, BagChange::Modified(path));
        assert_eq!(fx.catalog().get_item("a.txt").unwrap().unwrap().size, 10);
    }

    #[tokio::test]
    async fn test_vanished_file_is_ignored() {
        let fx = fixture();
        fx.watcher
            .apply(&fx.id, BagChange::Created(fx.bag_dir.join("ghost.txt")));
        assert_eq!(fx.catalog().item_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_catalog_files_ignored() {
        let fx = fixture();
        let journal = fx.bag_dir.join("BagConf.sqlite-journal");
        std::fs::write(&journal, b"j").unwrap();
        fx.watcher.apply(&fx.id, BagChange::Created(journal));
        assert_eq!(fx.catalog().item_count().unwrap(), 0);
    }

    #[tokio::test]
    async fn test_start_stop_errors() {
        let fx = fixture();
        assert!(matches!(
            fx.watcher.start("nope"),
            Err(SyncError::NotRegistered(_))
        ));
        assert!(matches!(fx.watcher.stop(&fx.id), Err(SyncError::NotWatched(_))));

        fx.watcher.start(&fx.id).unwrap();
        fx.watcher.start(&fx.id).unwrap();
        assert_eq!(fx.watcher.watched(), vec![fx.id.clone()]);

        fx.watcher.stop(&fx.id).unwrap();
        assert!(!fx.watcher.is_watched(&fx.id));
    }

    #[tokio::test]
    async fn test_resynchronize_rebuilds() {
        let fx = fixture();
        std::fs::write(fx.bag_dir.join("a.pdf"), b"%PDF").unwrap();
        std::fs::write(fx.bag_dir.join("b.mp3"), b"ID3").unwrap();
        std::fs::create_dir(fx.bag_dir.join("nested")).unwrap();

        let catalog = fx.catalog();
        catalog
            .insert_item(&Item::from_path(&fx.bag_dir.join("a.pdf")).unwrap().unwrap())
            .unwrap();
        catalog.assign_tag("a.pdf", "stale").unwrap();

        fx.watcher.start(&fx.id).unwrap();
        assert_eq!(fx.watcher.resynchronize(&fx.id).unwrap(), 2);
        assert!(fx.watcher.is_watched(&fx.id));

        assert_eq!(catalog.item_count().unwrap(), 2);
        assert!(!catalog.tag_exists("stale").unwrap());
        let roots: Vec<String> = catalog.root_tags().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(roots, ["document", "music"]);
        assert!(catalog.verify_integrity().unwrap());
        fx.watcher.stop_all();
    }

    #[tokio::test]
    async fn test_resynchronize_missing_bag() {
        let fx = fixture();
        std::fs::remove_dir(&fx.bag_dir).unwrap();
        assert!(matches!(
            fx.watcher.resynchronize(&fx.id),
            Err(SyncError::BagMissing(_))
        ));
    }

    #[tokio::test]
    async fn test_reconcile_follows_registry() {
        let fx = fixture();
        assert_eq!(fx.watcher.reconcile(), 1);
        assert!(fx.watcher.is_watched(&fx.id));

        fx.registry.remove_volume(&fx.id).unwrap();
        assert_eq!(fx.watcher.reconcile(), 0);
        assert!(fx.watcher.watched().is_empty());
    }

    #[tokio::test]
    async fn test_tampered_catalog_stays_unmounted_through_events() {
        let fx = fixture();
        fx.tamper();
        assert_eq!(fx.registry.mount_all(), 0);
        let suspect = fx.registry.discovered_volume(&fx.id).unwrap().catalog;
        assert!(suspect.is_suspect());

        assert!(matches!(fx.watcher.start(&fx.id), Err(SyncError::Suspect(_))));
        assert_eq!(fx.watcher.start_all(), 0);

        let path = fx.bag_dir.join("a.txt");
        std::fs::write(&path, b"hello").unwrap();
        fx.watcher.apply(&fx.id, BagChange::Created(path));
        assert!(suspect.get_item("a.txt").unwrap().is_none());
        assert!(suspect.is_suspect());

        assert_eq!(fx.registry.mount_all(), 0);
        assert!(fx.registry.mounted_volume(&fx.id).is_none());

        assert_eq!(fx.watcher.resynchronize(&fx.id).unwrap(), 1);
        assert_eq!(fx.registry.mount_all(), 1);
        assert!(fx.catalog().get_item("planted.txt").unwrap().is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_stop_waits_for_change_in_flight() {
        let fx = fixture_with(Duration::from_millis(400));
        fx.watcher.start(&fx.id).unwrap();
        let catalog = fx.catalog();

        std::fs::write(fx.bag_dir.join("song.mp3"), [0u8; 64]).unwrap();
        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while catalog.get_item("song.mp3").unwrap().is_none() {
            assert!(std::time::Instant::now() < deadline, "change never arrived");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // The item row lands before the settle delay; its tags after.
        fx.watcher.stop(&fx.id).unwrap();
        assert!(catalog.tag_exists("music").unwrap());
        assert!(catalog.verify_integrity().unwrap());
    }
}
