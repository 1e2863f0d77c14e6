//! Administrative commands over a running [`Bagfs`].
//!
//! Each command returns the text to show the operator. The same commands
//! back the one-shot CLI subcommands and the serving console.

use std::fmt::Write as _;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bagfs_kernel::{RegistryError, Resolver, SyncError, VirtualEntry, Volume};
use thiserror::Error;

use crate::app::Bagfs;

#[derive(Debug, Error)]
pub enum AdminError {
    #[error("{0}")]
    Registry(#[from] RegistryError),

    #[error("{0}")]
    Sync(#[from] SyncError),

    #[error("no attached volume contains {0}")]
    NoVolumeFor(PathBuf),

    #[error("usage: {0}")]
    Usage(&'static str),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type AdminResult = Result<String, AdminError>;

/// Command surface handed to the CLI and the console.
#[derive(Clone)]
pub struct Admin {
    app: Arc<Bagfs>,
}

impl Admin {
    pub fn new(app: Arc<Bagfs>) -> Self {
        Self { app }
    }

    pub fn app(&self) -> &Arc<Bagfs> {
        &self.app
    }

    /// Every discovered bag, one per line.
    pub fn volumes(&self) -> String {
        let registry = self.app.registry();
        let discovered = registry.discovered();
        if discovered.is_empty() {
            return "no bag volumes\n".to_string();
        }

        let mounted = registry.mounted();
        let mut out = String::new();
        for (id, bag) in &discovered {
            let state = if bag.catalog.is_suspect() {
                "suspect"
            } else if mounted.contains_key(id) {
                "mounted"
            } else {
                "unmounted"
            };
            let sync = if self.app.watcher().is_watched(id) { "sync" } else { "-" };
            let location = bag.catalog.location().unwrap_or_else(|_| "?".to_string());
            let _ = writeln!(out, "{id}\t{state}\t{sync}\t/{location}");
        }
        out
    }

    pub fn stat(&self, id: &str) -> AdminResult {
        let bag = self
            .app
            .registry()
            .discovered_volume(id)
            .ok_or_else(|| RegistryError::NotRegistered(id.to_string()))?;
        let catalog = &bag.catalog;
        let integrity = match catalog.verify_integrity() {
            Ok(true) => "ok",
            Ok(false) => "mismatch",
            Err(_) => "unknown",
        };

        let mut out = String::new();
        let _ = writeln!(out, "volume:    {id}");
        let _ = writeln!(out, "root:      {}", bag.volume.root.display());
        let _ = writeln!(out, "bag:       {}", bag.bag_dir().map_err(RegistryError::from)?.display());
        let _ = writeln!(out, "catalog:   {}", catalog.path().display());
        let _ = writeln!(out, "version:   {}", catalog.version());
        let _ = writeln!(
            out,
            "mounted:   {}",
            self.app.registry().mounted_volume(id).is_some()
        );
        let _ = writeln!(out, "sync:      {}", self.app.watcher().is_watched(id));
        let _ = writeln!(out, "items:     {}", catalog.item_count().map_err(RegistryError::from)?);
        let _ = writeln!(out, "tags:      {}", catalog.tag_count().map_err(RegistryError::from)?);
        let _ = writeln!(out, "integrity: {integrity}");
        Ok(out)
    }

    /// Make `bag_dir` a bag on whichever attached volume contains it, then
    /// catalog its contents and mount it.
    pub fn add(&self, bag_dir: &Path) -> AdminResult {
        let bag_dir = dunce::canonicalize(bag_dir)?;
        let volume = self.containing_volume(&bag_dir)?;
        let registry = self.app.registry();

        registry.create_volume(&volume.id, &bag_dir)?;
        let count = self.app.watcher().resynchronize(&volume.id)?;
        registry.mount(&volume.id)?;
        if self.app.is_serving() {
            self.app.watcher().start(&volume.id)?;
        }
        Ok(format!(
            "created bag {} on {} with {count} items\n",
            bag_dir.display(),
            volume.id
        ))
    }

    pub fn remove(&self, id: &str) -> AdminResult {
        match self.app.watcher().stop(id) {
            Ok(()) | Err(SyncError::NotWatched(_)) => {}
            Err(e) => return Err(e.into()),
        }
        self.app.registry().remove_volume(id)?;
        Ok(format!("removed bag on {id}\n"))
    }

    pub fn set_sync(&self, id: &str, on: bool) -> AdminResult {
        if on {
            self.app.watcher().start(id)?;
            Ok(format!("sync on for {id}\n"))
        } else {
            self.app.watcher().stop(id)?;
            Ok(format!("sync off for {id}\n"))
        }
    }

    pub fn resync(&self, id: &str) -> AdminResult {
        let count = self.app.watcher().resynchronize(id)?;
        Ok(format!("resynchronized {id}: {count} items\n"))
    }

    /// One virtual directory, directories first.
    pub fn browse(&self, virtual_dir: &str) -> String {
        let resolver = Resolver::new(Arc::clone(self.app.registry()));
        let entries = resolver.enumerate(virtual_dir);
        if entries.is_empty() {
            return "(empty)\n".to_string();
        }
        let mut out = String::new();
        for entry in entries {
            match entry {
                VirtualEntry::Tag(tag) => {
                    let _ = writeln!(out, "{:>12}  {}", "<DIR>", tag.id);
                }
                VirtualEntry::Folder(name) => {
                    let _ = writeln!(out, "{:>12}  {}", "<DIR>", name);
                }
                VirtualEntry::Item(item) => {
                    let _ = writeln!(out, "{:>12}  {}", item.size, item.id);
                }
            }
        }
        out
    }

    /// Run one console line. `None` when the line is not an admin command.
    pub fn execute(&self, line: &str) -> Option<AdminResult> {
        let words: Vec<&str> = line.split_whitespace().collect();
        let result = match words.as_slice() {
            ["volumes"] => Ok(self.volumes()),
            ["stat", id] => self.stat(id),
            ["stat", ..] => Err(AdminError::Usage("stat <volume>")),
            ["add", path] => self.add(Path::new(path)),
            ["add", ..] => Err(AdminError::Usage("add <directory>")),
            ["remove", id] => self.remove(id),
            ["remove", ..] => Err(AdminError::Usage("remove <volume>")),
            ["sync", id, "on"] => self.set_sync(id, true),
            ["sync", id, "off"] => self.set_sync(id, false),
            ["sync", ..] => Err(AdminError::Usage("sync <volume> on|off")),
            ["resync", id] => self.resync(id),
            ["resync", ..] => Err(AdminError::Usage("resync <volume>")),
            ["browse"] => Ok(self.browse("\\")),
            ["browse", path] => Ok(self.browse(path)),
            _ => return None,
        };
        Some(result)
    }

    /// Attached volume whose root is the longest prefix of `path`.
    fn containing_volume(&self, path: &Path) -> Result<Volume, AdminError> {
        self.app
            .registry()
            .attached()?
            .into_iter()
            .filter_map(|volume| {
                let root = dunce::canonicalize(&volume.root).ok()?;
                path.starts_with(&root).then_some((root, volume))
            })
            .max_by_key(|(root, _)| root.as_os_str().len())
            .map(|(_, volume)| volume)
            .ok_or_else(|| AdminError::NoVolumeFor(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bagfs_kernel::{BagfsConfig, StaticVolumes};

    struct Fixture {
        _vol: tempfile::TempDir,
        root: PathBuf,
        admin: Admin,
    }

    fn fixture() -> Fixture {
        let vol = tempfile::tempdir().unwrap();
        let root = dunce::canonicalize(vol.path()).unwrap();
        let bag = root.join("bag");
        std::fs::create_dir(&bag).unwrap();
        std::fs::write(bag.join("report.pdf"), b"%PDF").unwrap();
        std::fs::write(bag.join("song.mp3"), [0u8; 32]).unwrap();

        let source = Arc::new(StaticVolumes::new(vec![root.clone()]));
        let app = Bagfs::with_source(
            BagfsConfig::default(),
            source,
            tokio::runtime::Handle::current(),
        );
        Fixture {
            _vol: vol,
            root,
            admin: Admin::new(app),
        }
    }

    #[tokio::test]
    async fn test_add_then_browse() {
        let fx = fixture();
        let out = fx.admin.add(&fx.root.join("bag")).unwrap();
        assert!(out.contains("2 items"), "{out}");

        let listing = fx.admin.browse("\\");
        assert!(listing.contains("document"));
        assert!(listing.contains("music"));
        assert!(fx.admin.browse("\\music").contains("song.mp3"));

        let id = bagfs_kernel::volume::volume_id(&fx.root);
        assert!(fx.admin.volumes().contains("mounted"));
        let stat = fx.admin.stat(&id).unwrap();
        assert!(stat.contains("items:     2"), "{stat}");
        assert!(stat.contains("integrity: ok"), "{stat}");
    }

    #[tokio::test]
    async fn test_add_outside_any_volume() {
        let fx = fixture();
        let elsewhere = tempfile::tempdir().unwrap();
        assert!(matches!(
            fx.admin.add(elsewhere.path()),
            Err(AdminError::NoVolumeFor(_))
        ));
    }

    #[tokio::test]
    async fn test_execute_dispatch() {
        let fx = fixture();
        assert!(fx.admin.execute("ls \\").is_none());
        assert!(matches!(
            fx.admin.execute("sync only-one-arg"),
            Some(Err(AdminError::Usage(_)))
        ));
        assert!(matches!(
            fx.admin.execute("remove nope"),
            Some(Err(AdminError::Registry(RegistryError::NotRegistered(_))))
        ));
        assert_eq!(
            fx.admin.execute("volumes").unwrap().unwrap(),
            "no bag volumes\n"
        );
    }

    #[tokio::test]
    async fn test_sync_toggle_and_remove() {
        let fx = fixture();
        fx.admin.add(&fx.root.join("bag")).unwrap();
        let id = bagfs_kernel::volume::volume_id(&fx.root);

        fx.admin.set_sync(&id, true).unwrap();
        assert!(fx.admin.app().watcher().is_watched(&id));
        fx.admin.set_sync(&id, false).unwrap();
        assert!(matches!(
            fx.admin.set_sync(&id, false),
            Err(AdminError::Sync(SyncError::NotWatched(_)))
        ));

        fx.admin.remove(&id).unwrap();
        assert!(!fx.root.join(bagfs_kernel::constants::DEFAULT_MARKER_FILE).exists());
        assert_eq!(fx.admin.volumes(), "no bag volumes\n");
    }
}
