//! Discovery, mounting and unmounting of bag volumes.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;

use super::source::{Volume, VolumeId, VolumeSource};
use crate::catalog::{Catalog, CatalogError, CatalogResult};
use crate::constants::{DEFAULT_BUSY_TIMEOUT, DEFAULT_MARKER_FILE};
use crate::driver::{BagDriver, DriveHost, DriverOptions, HostError};
use crate::vfs::Resolver;

/// Registry error type.
#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("volume has no registered bag: {0}")]
    NotRegistered(VolumeId),

    #[error("volume is not mounted: {0}")]
    NotMounted(VolumeId),

    #[error("no such volume: {0}")]
    UnknownVolume(VolumeId),

    #[error("volume already carries a bag: {0}")]
    BagAlreadyExists(VolumeId),

    #[error("bag directory does not exist: {0}")]
    BagLocationMissing(PathBuf),

    #[error("bag directory is outside its volume: {0}")]
    BagOutsideVolume(PathBuf),

    #[error("catalog failed its integrity check: {0}")]
    Suspect(VolumeId),

    #[error("primary filesystem is already mounted")]
    PrimaryAlreadyMounted,

    #[error("primary filesystem is not mounted")]
    PrimaryNotMounted,

    #[error("no free drive id")]
    NoFreeDrive,

    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    #[error("drive host error: {0}")]
    Host(#[from] HostError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Registry tunables.
#[derive(Debug, Clone)]
pub struct RegistryOptions {
    pub marker_file: String,
    pub busy_timeout: Duration,
    pub verify_integrity: bool,
}

impl Default for RegistryOptions {
    fn default() -> Self {
        Self {
            marker_file: DEFAULT_MARKER_FILE.to_string(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
            verify_integrity: true,
        }
    }
}

/// A volume paired with its open catalog.
#[derive(Debug, Clone)]
pub struct BagVolume {
    pub volume: Volume,
    pub catalog: Arc<Catalog>,
}

impl BagVolume {
    pub fn new(volume: Volume, catalog: Arc<Catalog>) -> Self {
        Self { volume, catalog }
    }

    pub fn id(&self) -> &str {
        &self.volume.id
    }

    /// Concrete bag directory: volume root joined with the stored location.
    pub fn bag_dir(&self) -> CatalogResult<PathBuf> {
        let location = self.catalog.location()?;
        Ok(location
            .split('/')
            .filter(|segment| !segment.is_empty())
            .fold(self.volume.root.clone(), |path, segment| path.join(segment)))
    }
}

/// Owns every catalog connection.
///
/// `discovered` holds every volume found with a readable marker; `mounted`
/// is the subset the virtual drive serves. Readers get cloned snapshots and
/// never hold a lock across catalog calls.
pub struct VolumeRegistry {
    source: Arc<dyn VolumeSource>,
    options: RegistryOptions,
    discovered: RwLock<BTreeMap<VolumeId, BagVolume>>,
    mounted: RwLock<BTreeMap<VolumeId, BagVolume>>,
    rescan: Mutex<()>,
    primary_mounted: AtomicBool,
    primary_drive: Mutex<Option<String>>,
}

impl VolumeRegistry {
    pub fn new(source: Arc<dyn VolumeSource>, options: RegistryOptions) -> Self {
        Self {
            source,
            options,
            discovered: RwLock::new(BTreeMap::new()),
            mounted: RwLock::new(BTreeMap::new()),
            rescan: Mutex::new(()),
            primary_mounted: AtomicBool::new(false),
            primary_drive: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &RegistryOptions {
        &self.options
    }

    pub fn marker_file(&self) -> &str {
        &self.options.marker_file
    }

    /// Volumes the source reports right now, with or without a bag.
    pub fn attached(&self) -> std::io::Result<Vec<Volume>> {
        self.source.volumes()
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn mounted(&self) -> BTreeMap<VolumeId, BagVolume> {
        self.mounted.read().clone()
    }

    pub fn discovered(&self) -> BTreeMap<VolumeId, BagVolume> {
        self.discovered.read().clone()
    }

    pub fn mounted_volume(&self, id: &str) -> Option<BagVolume> {
        self.mounted.read().get(id).cloned()
    }

    pub fn discovered_volume(&self, id: &str) -> Option<BagVolume> {
        self.discovered.read().get(id).cloned()
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Rescan every volume for a bag marker.
    ///
    /// Healthy catalogs already open are reused. A volume whose marker cannot
    /// be read or whose catalog cannot be opened is logged and left out;
    /// one whose hash does not verify is kept but flagged suspect.
    pub fn discover_volumes(&self) -> BTreeMap<VolumeId, BagVolume> {
        let _rescan = self.rescan.lock();
        self.scan()
    }

    fn scan(&self) -> BTreeMap<VolumeId, BagVolume> {
        let volumes = match self.source.volumes() {
            Ok(volumes) => volumes,
            Err(e) => {
                tracing::warn!(error = %e, "failed to enumerate volumes");
                Vec::new()
            }
        };

        let previous = self.discovered();
        let mut found = BTreeMap::new();

        for volume in volumes {
            if let Some(existing) = previous.get(&volume.id) {
                let marker = volume.root.join(&self.options.marker_file);
                if existing.catalog.is_open() && !existing.catalog.is_suspect() && marker.is_file() {
                    found.insert(volume.id.clone(), existing.clone());
                    continue;
                }
            }

            match self.inspect(&volume) {
                Ok(Some(bag)) => {
                    tracing::debug!(volume = %volume.id, "discovered bag volume");
                    found.insert(volume.id.clone(), bag);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(volume = %volume.id, error = %e, "skipping volume");
                }
            }
        }

        let mounted = self.mounted();
        for (id, old) in &previous {
            let kept = found
                .get(id)
                .is_some_and(|bag| Arc::ptr_eq(&bag.catalog, &old.catalog));
            let serving = mounted
                .get(id)
                .is_some_and(|bag| Arc::ptr_eq(&bag.catalog, &old.catalog));
            if !kept && !serving {
                close_quietly(id, &old.catalog);
            }
        }

        *self.discovered.write() = found.clone();
        found
    }

    /// Open the catalog on one volume, if it carries a marker.
    fn inspect(&self, volume: &Volume) -> Result<Option<BagVolume>, RegistryError> {
        let marker = volume.root.join(&self.options.marker_file);
        match std::fs::metadata(&marker) {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let catalog = Catalog::open_with_timeout(&marker, self.options.busy_timeout)?;
        if self.options.verify_integrity && !catalog.verify_integrity()? {
            tracing::warn!(volume = %volume.id, "catalog hash mismatch, volume held back");
            catalog.mark_suspect();
        }
        Ok(Some(BagVolume::new(volume.clone(), Arc::new(catalog))))
    }

    // ========================================================================
    // Mounting
    // ========================================================================

    /// Replace the mounted set with every healthy discovered bag.
    ///
    /// Idempotent. Catalogs whose volume vanished are closed. Returns the
    /// number of mounted volumes.
    pub fn mount_all(&self) -> usize {
        let _rescan = self.rescan.lock();
        let discovered = self.scan();

        let next: BTreeMap<VolumeId, BagVolume> = discovered
            .iter()
            .filter(|(_, bag)| !bag.catalog.is_suspect())
            .map(|(id, bag)| (id.clone(), bag.clone()))
            .collect();
        let count = next.len();

        let previous = std::mem::replace(&mut *self.mounted.write(), next);
        for (id, bag) in previous {
            let still_known = discovered
                .get(&id)
                .is_some_and(|d| Arc::ptr_eq(&d.catalog, &bag.catalog));
            if !still_known {
                tracing::info!(volume = %id, "bag volume gone");
                close_quietly(&id, &bag.catalog);
            }
        }

        tracing::info!(count, "mounted bag volumes");
        count
    }

    /// Mount one discovered volume, reopening its catalog if it was closed.
    pub fn mount(&self, id: &str) -> Result<BagVolume, RegistryError> {
        let bag = self
            .discovered_volume(id)
            .ok_or_else(|| RegistryError::NotRegistered(id.to_string()))?;
        if bag.catalog.is_suspect() {
            return Err(RegistryError::Suspect(id.to_string()));
        }

        let bag = if bag.catalog.is_open() {
            bag
        } else {
            let reopened = self
                .inspect(&bag.volume)?
                .ok_or_else(|| RegistryError::NotRegistered(id.to_string()))?;
            if reopened.catalog.is_suspect() {
                return Err(RegistryError::Suspect(id.to_string()));
            }
            self.discovered.write().insert(id.to_string(), reopened.clone());
            reopened
        };

        self.mounted.write().insert(id.to_string(), bag.clone());
        tracing::info!(volume = %id, "mounted bag volume");
        Ok(bag)
    }

    /// Close a mounted catalog and stop serving it.
    pub fn unmount(&self, id: &str) -> Result<(), RegistryError> {
        let bag = self
            .mounted
            .write()
            .remove(id)
            .ok_or_else(|| RegistryError::NotMounted(id.to_string()))?;
        close_quietly(id, &bag.catalog);
        tracing::info!(volume = %id, "unmounted bag volume");
        Ok(())
    }

    // ========================================================================
    // Bag lifecycle
    // ========================================================================

    /// Turn `bag_path` into the bag of volume `id`.
    ///
    /// `bag_path` may be absolute or relative to the volume root; only the
    /// relative form is stored, so the bag survives a changed mount point.
    pub fn create_volume(&self, id: &str, bag_path: &Path) -> Result<BagVolume, RegistryError> {
        let volume = self
            .source
            .volumes()?
            .into_iter()
            .find(|v| v.id == id)
            .ok_or_else(|| RegistryError::UnknownVolume(id.to_string()))?;

        let marker = volume.root.join(&self.options.marker_file);
        if marker.exists() {
            return Err(RegistryError::BagAlreadyExists(id.to_string()));
        }

        let bag_dir = if bag_path.is_absolute() {
            bag_path.to_path_buf()
        } else {
            volume.root.join(bag_path)
        };
        if !bag_dir.is_dir() {
            return Err(RegistryError::BagLocationMissing(bag_dir));
        }
        let location = relative_location(&volume.root, &bag_dir)?;

        let catalog = Catalog::create_with_timeout(&marker, &location, self.options.busy_timeout)?;
        let bag = BagVolume::new(volume, Arc::new(catalog));
        self.discovered.write().insert(id.to_string(), bag.clone());
        tracing::info!(volume = %id, location = %location, "created bag");
        Ok(bag)
    }

    /// Forget a bag: unmount, close, delete its marker.
    pub fn remove_volume(&self, id: &str) -> Result<(), RegistryError> {
        let bag = self
            .discovered
            .write()
            .remove(id)
            .ok_or_else(|| RegistryError::NotRegistered(id.to_string()))?;
        self.mounted.write().remove(id);
        close_quietly(id, &bag.catalog);

        let marker = bag.volume.root.join(&self.options.marker_file);
        match std::fs::remove_file(&marker) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        tracing::info!(volume = %id, "removed bag");
        Ok(())
    }

    /// Close every catalog and clear both maps.
    pub fn shutdown(&self) {
        let _rescan = self.rescan.lock();
        let mounted = std::mem::take(&mut *self.mounted.write());
        let discovered = std::mem::take(&mut *self.discovered.write());
        for (id, bag) in mounted.iter().chain(discovered.iter()) {
            close_quietly(id, &bag.catalog);
        }
    }

    // ========================================================================
    // Primary filesystem
    // ========================================================================

    /// Expose the mounted bags as one virtual drive through `host`.
    ///
    /// Blocks until the host unmounts the drive. Allowed once per registry.
    pub fn mount_primary_filesystem(
        self: &Arc<Self>,
        host: &dyn DriveHost,
        options: DriverOptions,
    ) -> Result<(), RegistryError> {
        if self.primary_mounted.swap(true, Ordering::SeqCst) {
            return Err(RegistryError::PrimaryAlreadyMounted);
        }
        let Some(drive) = host.free_drive_ids().into_iter().next() else {
            self.primary_mounted.store(false, Ordering::SeqCst);
            return Err(RegistryError::NoFreeDrive);
        };

        *self.primary_drive.lock() = Some(drive.clone());
        let driver = Arc::new(BagDriver::new(Resolver::new(Arc::clone(self)), options));
        tracing::info!(drive = %drive, "mounting primary filesystem");

        let result = host.mount(&drive, driver);
        *self.primary_drive.lock() = None;
        if let Err(e) = result {
            self.primary_mounted.store(false, Ordering::SeqCst);
            return Err(e.into());
        }
        tracing::info!(drive = %drive, "primary filesystem unmounted");
        Ok(())
    }

    pub fn unmount_primary_filesystem(&self, host: &dyn DriveHost) -> Result<(), RegistryError> {
        let drive = self
            .primary_drive
            .lock()
            .clone()
            .ok_or(RegistryError::PrimaryNotMounted)?;
        host.unmount(&drive)?;
        Ok(())
    }

    pub fn primary_drive(&self) -> Option<String> {
        self.primary_drive.lock().clone()
    }
}

fn close_quietly(id: &str, catalog: &Catalog) {
    if let Err(e) = catalog.close() {
        tracing::warn!(volume = %id, error = %e, "failed to close catalog cleanly");
    }
}

/// `bag_dir` relative to `root`, `/`-separated.
fn relative_location(root: &Path, bag_dir: &Path) -> Result<String, RegistryError> {
    let root = dunce::canonicalize(root)?;
    let bag_dir = dunce::canonicalize(bag_dir)?;
    let relative = bag_dir
        .strip_prefix(&root)
        .map_err(|_| RegistryError::BagOutsideVolume(bag_dir.clone()))?;
    Ok(relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::volume::StaticVolumes;

    fn registry_with(roots: &[&Path]) -> (Arc<StaticVolumes>, VolumeRegistry) {
        let source = Arc::new(StaticVolumes::new(
            roots.iter().map(|p| p.to_path_buf()).collect(),
        ));
        let registry = VolumeRegistry::new(source.clone(), RegistryOptions::default());
        (source, registry)
    }

    #[test]
    fn test_relative_location() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("a").join("b")).unwrap();
        assert_eq!(
            relative_location(dir.path(), &dir.path().join("a").join("b")).unwrap(),
            "a/b"
        );
        assert_eq!(relative_location(dir.path(), dir.path()).unwrap(), "");

        let other = tempfile::tempdir().unwrap();
        assert!(matches!(
            relative_location(dir.path(), other.path()),
            Err(RegistryError::BagOutsideVolume(_))
        ));
    }

    #[test]
    fn test_create_then_mount() {
        let vol = tempfile::tempdir().unwrap();
        std::fs::create_dir(vol.path().join("bag")).unwrap();
        let (_, registry) = registry_with(&[vol.path()]);
        let id = crate::volume::volume_id(vol.path());

        let bag = registry.create_volume(&id, Path::new("bag")).unwrap();
        assert_eq!(bag.catalog.location().unwrap(), "bag");
        assert_eq!(bag.bag_dir().unwrap(), vol.path().join("bag"));
        assert!(registry.mounted().is_empty());

        assert_eq!(registry.mount_all(), 1);
        assert!(registry.mounted_volume(&id).is_some());
        assert_eq!(registry.mount_all(), 1);
    }

    #[test]
    fn test_create_twice_fails() {
        let vol = tempfile::tempdir().unwrap();
        let (_, registry) = registry_with(&[vol.path()]);
        let id = crate::volume::volume_id(vol.path());

        registry.create_volume(&id, vol.path()).unwrap();
        assert!(matches!(
            registry.create_volume(&id, vol.path()),
            Err(RegistryError::BagAlreadyExists(_))
        ));
    }

    #[test]
    fn test_create_requires_directory() {
        let vol = tempfile::tempdir().unwrap();
        let (_, registry) = registry_with(&[vol.path()]);
        let id = crate::volume::volume_id(vol.path());

        assert!(matches!(
            registry.create_volume(&id, Path::new("missing")),
            Err(RegistryError::BagLocationMissing(_))
        ));
        assert!(matches!(
            registry.create_volume("nowhere", Path::new("bag")),
            Err(RegistryError::UnknownVolume(_))
        ));
    }

    #[test]
    fn test_unmount_unknown_volume() {
        let (_, registry) = registry_with(&[]);
        assert!(matches!(
            registry.unmount("Q:\\"),
            Err(RegistryError::NotMounted(_))
        ));
    }

    #[test]
    fn test_unmount_closes_and_mount_reopens() {
        let vol = tempfile::tempdir().unwrap();
        let (_, registry) = registry_with(&[vol.path()]);
        let id = crate::volume::volume_id(vol.path());
        registry.create_volume(&id, vol.path()).unwrap();
        registry.mount_all();

        let bag = registry.mounted_volume(&id).unwrap();
        registry.unmount(&id).unwrap();
        assert!(!bag.catalog.is_open());
        assert!(registry.mounted().is_empty());
        assert!(matches!(registry.unmount(&id), Err(RegistryError::NotMounted(_))));

        let bag = registry.mount(&id).unwrap();
        assert!(bag.catalog.is_open());
    }

    #[test]
    fn test_detached_volume_disappears() {
        let vol = tempfile::tempdir().unwrap();
        let (source, registry) = registry_with(&[vol.path()]);
        let id = crate::volume::volume_id(vol.path());
        registry.create_volume(&id, vol.path()).unwrap();
        registry.mount_all();
        let bag = registry.mounted_volume(&id).unwrap();

        source.detach(vol.path());
        assert_eq!(registry.mount_all(), 0);
        assert!(!bag.catalog.is_open());
        assert!(registry.discovered().is_empty());
    }

    #[test]
    fn test_incompatible_volume_is_skipped() {
        let good = tempfile::tempdir().unwrap();
        let bad = tempfile::tempdir().unwrap();
        let (_, registry) = registry_with(&[good.path(), bad.path()]);
        registry
            .create_volume(&crate::volume::volume_id(good.path()), good.path())
            .unwrap();
        {
            let conn = rusqlite::Connection::open(bad.path().join(DEFAULT_MARKER_FILE)).unwrap();
            conn.execute_batch(
                "CREATE TABLE Config (location TEXT, version INTEGER, hash TEXT);
                 INSERT INTO Config VALUES ('', 1, NULL);",
            )
            .unwrap();
        }

        assert_eq!(registry.mount_all(), 1);
        assert!(registry
            .mounted()
            .contains_key(&crate::volume::volume_id(good.path())));
    }

    #[test]
    fn test_tampered_catalog_held_back() {
        let vol = tempfile::tempdir().unwrap();
        let (_, registry) = registry_with(&[vol.path()]);
        let id = crate::volume::volume_id(vol.path());
        let bag = registry.create_volume(&id, vol.path()).unwrap();
        bag.catalog.close().unwrap();
        {
            let conn = rusqlite::Connection::open(vol.path().join(DEFAULT_MARKER_FILE)).unwrap();
            conn.execute("UPDATE Config SET location = 'elsewhere'", []).unwrap();
        }

        assert_eq!(registry.mount_all(), 0);
        assert!(registry.discovered_volume(&id).unwrap().catalog.is_suspect());
        assert!(matches!(registry.mount(&id), Err(RegistryError::Suspect(_))));
    }

    #[test]
    fn test_remove_volume_deletes_marker() {
        let vol = tempfile::tempdir().unwrap();
        let (_, registry) = registry_with(&[vol.path()]);
        let id = crate::volume::volume_id(vol.path());
        registry.create_volume(&id, vol.path()).unwrap();
        registry.mount_all();

        registry.remove_volume(&id).unwrap();
        assert!(!vol.path().join(DEFAULT_MARKER_FILE).exists());
        assert!(registry.mounted().is_empty());
        assert!(matches!(
            registry.remove_volume(&id),
            Err(RegistryError::NotRegistered(_))
        ));
    }
}
