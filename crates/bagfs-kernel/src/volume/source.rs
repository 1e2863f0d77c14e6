//! Where candidate volumes come from.

use std::io;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

/// Normalized mount-point string, e.g. `X:\` or `/media/usb`.
pub type VolumeId = String;

/// A mounted volume that might carry a bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Volume {
    pub id: VolumeId,
    pub root: PathBuf,
}

impl Volume {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            id: volume_id(&root),
            root,
        }
    }
}

pub fn volume_id(root: &Path) -> VolumeId {
    root.to_string_lossy().into_owned()
}

/// Enumerates the volumes currently attached to the machine.
pub trait VolumeSource: Send + Sync {
    fn volumes(&self) -> io::Result<Vec<Volume>>;
}

/// Every disk the OS reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemVolumes;

impl VolumeSource for SystemVolumes {
    fn volumes(&self) -> io::Result<Vec<Volume>> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        Ok(disks
            .list()
            .iter()
            .map(|disk| Volume::new(disk.mount_point()))
            .collect())
    }
}

/// A fixed list of roots. Roots that are not directories right now are
/// reported as detached.
#[derive(Debug, Default)]
pub struct StaticVolumes {
    roots: RwLock<Vec<PathBuf>>,
}

impl StaticVolumes {
    pub fn new(roots: Vec<PathBuf>) -> Self {
        Self {
            roots: RwLock::new(roots),
        }
    }

    pub fn attach(&self, root: impl Into<PathBuf>) {
        let root = root.into();
        let mut roots = self.roots.write();
        if !roots.contains(&root) {
            roots.push(root);
        }
    }

    pub fn detach(&self, root: &Path) {
        self.roots.write().retain(|r| r != root);
    }
}

impl VolumeSource for StaticVolumes {
    fn volumes(&self) -> io::Result<Vec<Volume>> {
        Ok(self
            .roots
            .read()
            .iter()
            .filter(|root| root.is_dir())
            .map(|root| Volume::new(root.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_volumes_skip_missing_roots() {
        let dir = tempfile::tempdir().unwrap();
        let source = StaticVolumes::new(vec![dir.path().to_path_buf()]);
        source.attach(dir.path().join("not-there"));
        source.attach(dir.path());

        let volumes = source.volumes().unwrap();
        assert_eq!(volumes.len(), 1);
        assert_eq!(volumes[0].root, dir.path());

        source.detach(dir.path());
        assert!(source.volumes().unwrap().is_empty());
    }
}
