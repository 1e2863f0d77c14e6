//! Live sync tests: real notify watchers on temp bag directories.

use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bagfs_kernel::volume::volume_id;
use bagfs_kernel::{
    BagVolume, MetaPipeline, RegistryOptions, Resolver, StaticVolumes, SyncError, SyncWatcher,
    VirtualEntry, VolumeRegistry,
};

const DEADLINE: Duration = Duration::from_secs(10);

async fn eventually<F: Fn() -> bool>(what: &str, check: F) {
    let start = Instant::now();
    while !check() {
        assert!(start.elapsed() < DEADLINE, "timed out waiting for {what}");
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn item_size(bag: &BagVolume, id: &str) -> Option<u64> {
    bag.catalog.get_item(id).ok().flatten().map(|item| item.size)
}

struct Setup {
    _vol: tempfile::TempDir,
    dir: std::path::PathBuf,
    id: String,
    registry: Arc<VolumeRegistry>,
    watcher: Arc<SyncWatcher>,
}

fn setup() -> Setup {
    let vol = tempfile::tempdir().unwrap();
    let dir = vol.path().join("bag");
    std::fs::create_dir(&dir).unwrap();
    let source = Arc::new(StaticVolumes::new(vec![vol.path().to_path_buf()]));
    let registry = Arc::new(VolumeRegistry::new(source, RegistryOptions::default()));
    let id = volume_id(vol.path());
    registry.create_volume(&id, Path::new("bag")).unwrap();
    registry.mount(&id).unwrap();
    let watcher = SyncWatcher::new(
        Arc::clone(&registry),
        Arc::new(MetaPipeline::new(Duration::ZERO)),
        tokio::runtime::Handle::current(),
    );
    Setup {
        _vol: vol,
        dir,
        id,
        registry,
        watcher,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_created_file_appears_in_catalog() {
    let s = setup();
    s.watcher.start(&s.id).unwrap();
    let bag = s.registry.mounted_volume(&s.id).unwrap();

    std::fs::write(s.dir.join("clip.mp4"), vec![7u8; 1234]).unwrap();
    eventually("clip.mp4 cataloged", || item_size(&bag, "clip.mp4") == Some(1234)).await;

    let resolver = Resolver::new(Arc::clone(&s.registry));
    eventually("videos tag listed", || {
        resolver
            .enumerate("\\videos")
            .iter()
            .any(|e| matches!(e, VirtualEntry::Item(item) if item.id == "clip.mp4"))
    })
    .await;

    std::fs::remove_file(s.dir.join("clip.mp4")).unwrap();
    eventually("clip.mp4 removed", || item_size(&bag, "clip.mp4").is_none()).await;
    eventually("clip.mp4 tags gone", || {
        bag.catalog.tags_for_item("clip.mp4").map(|t| t.is_empty()).unwrap_or(false)
    })
    .await;

    s.watcher.stop_all();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_rename_replaces_item() {
    let s = setup();
    std::fs::write(s.dir.join("draft.txt"), b"words").unwrap();
    assert_eq!(s.watcher.resynchronize(&s.id).unwrap(), 1);
    s.watcher.start(&s.id).unwrap();
    let bag = s.registry.mounted_volume(&s.id).unwrap();

    std::fs::rename(s.dir.join("draft.txt"), s.dir.join("final.txt")).unwrap();
    eventually("final.txt cataloged", || item_size(&bag, "final.txt") == Some(5)).await;
    eventually("draft.txt removed", || item_size(&bag, "draft.txt").is_none()).await;
    eventually("hash refreshed", || bag.catalog.verify_integrity().unwrap_or(false)).await;

    s.watcher.stop(&s.id).unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watch_lifecycle_errors() {
    let s = setup();
    assert!(matches!(s.watcher.stop(&s.id), Err(SyncError::NotWatched(_))));
    assert!(matches!(
        s.watcher.start("not-a-volume"),
        Err(SyncError::NotRegistered(_))
    ));

    s.watcher.start(&s.id).unwrap();
    s.watcher.start(&s.id).unwrap();
    assert_eq!(s.watcher.watched(), [s.id.clone()]);

    std::fs::remove_dir_all(&s.dir).unwrap();
    assert!(matches!(
        s.watcher.resynchronize(&s.id),
        Err(SyncError::BagMissing(_))
    ));
    s.watcher.stop_all();
    assert!(s.watcher.watched().is_empty());
}
