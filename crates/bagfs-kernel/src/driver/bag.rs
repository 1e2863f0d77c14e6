//! The driver the primary filesystem mounts.

use std::fs::{self, File, FileTimes};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use super::{DriverOps, DriverOptions, DriverResult, DriverStatus, FileContext, OpenFile};
use crate::catalog::FileAttributes;
use crate::vfs::{
    DiskSpace, FileInformation, OpenFlags, Resolver, VolumeInformation, file_name, is_root,
};

const SERIAL_NUMBER: u32 = 0x4241_4746;
const MAX_COMPONENT_LENGTH: u32 = 255;

/// Answers host callbacks from the tag namespace.
///
/// Stateless across calls: everything it knows comes from the resolver's
/// registry snapshot or from the per-handle [`FileContext`].
pub struct BagDriver {
    resolver: Resolver,
    options: DriverOptions,
}

impl BagDriver {
    pub fn new(resolver: Resolver, options: DriverOptions) -> Self {
        Self { resolver, options }
    }

    pub fn resolver(&self) -> &Resolver {
        &self.resolver
    }

    pub fn options(&self) -> &DriverOptions {
        &self.options
    }

    /// The open handle, or a fresh one on the resolved file.
    fn handle(&self, path: &str, ctx: &FileContext, write: bool) -> DriverResult<OpenFile> {
        if let Some(open) = ctx.get() {
            return Ok(open);
        }
        let concrete = self.resolver.resolve(path).ok_or(DriverStatus::FileNotFound)?;
        let file = File::options()
            .read(true)
            .write(write)
            .open(&concrete)
            .map_err(|e| io_status(path, e))?;
        Ok(OpenFile::new(concrete, file))
    }

    fn resolved(&self, path: &str) -> DriverResult<PathBuf> {
        self.resolver.resolve(path).ok_or(DriverStatus::FileNotFound)
    }

    fn open_into(&self, concrete: PathBuf, flags: OpenFlags, ctx: &FileContext) -> DriverResult<()> {
        let writable = flags.write || flags.append;
        let file = File::options()
            .read(true)
            .write(writable && !flags.append)
            .append(flags.append)
            .truncate(flags.truncate && writable && !flags.append)
            .open(&concrete)
            .map_err(|e| io_status(&concrete.to_string_lossy(), e))?;
        ctx.set(OpenFile::new(concrete, file));
        Ok(())
    }
}

impl DriverOps for BagDriver {
    fn create_file(&self, path: &str, flags: OpenFlags, ctx: &FileContext) -> DriverResult<()> {
        if is_root(path) {
            ctx.set_directory(true);
            return Ok(());
        }
        if let Some(concrete) = self.resolver.resolve(path) {
            if flags.directory {
                return Err(DriverStatus::PathNotFound);
            }
            ctx.set_directory(false);
            return self.open_into(concrete, flags, ctx);
        }
        if self.resolver.is_directory(path) {
            ctx.set_directory(true);
            return Ok(());
        }
        if flags.create {
            // New files enter a bag through its real directory.
            return Err(DriverStatus::AccessDenied);
        }
        Err(DriverStatus::FileNotFound)
    }

    fn cleanup(&self, path: &str, ctx: &FileContext) {
        ctx.clear();
        if !ctx.delete_on_close() || ctx.is_directory() {
            return;
        }
        ctx.set_delete_on_close(false);
        let Some(concrete) = self.resolver.resolve(path) else {
            return;
        };
        match fs::remove_file(&concrete) {
            Ok(()) => tracing::info!(path, concrete = %concrete.display(), "deleted on close"),
            Err(e) => tracing::warn!(path, error = %e, "delete on close failed"),
        }
    }

    fn close_file(&self, _path: &str, ctx: &FileContext) {
        ctx.clear();
    }

    fn read_file(
        &self,
        path: &str,
        buf: &mut [u8],
        offset: u64,
        ctx: &FileContext,
    ) -> DriverResult<usize> {
        let open = match self.handle(path, ctx, false) {
            Ok(open) => open,
            // Unresolved reads succeed empty; hosts query paths freely.
            Err(DriverStatus::FileNotFound) => return Ok(0),
            Err(status) => return Err(status),
        };
        open.read_at(offset, buf).map_err(|e| io_status(path, e))
    }

    fn write_file(
        &self,
        path: &str,
        data: &[u8],
        offset: u64,
        ctx: &FileContext,
    ) -> DriverResult<usize> {
        let open = self.handle(path, ctx, true)?;
        open.write_at(offset, data).map_err(|e| io_status(path, e))
    }

    fn flush_file_buffers(&self, path: &str, ctx: &FileContext) -> DriverResult<()> {
        let Some(open) = ctx.get() else {
            return Ok(());
        };
        open.flush().map_err(|e| {
            tracing::warn!(path, error = %e, "flush failed");
            DriverStatus::DiskFull
        })
    }

    fn set_end_of_file(&self, path: &str, length: u64, ctx: &FileContext) -> DriverResult<()> {
        let open = self.handle(path, ctx, true)?;
        open.set_len(length).map_err(|e| {
            tracing::warn!(path, length, error = %e, "set_len failed");
            DriverStatus::DiskFull
        })
    }

    fn set_allocation_size(&self, path: &str, length: u64, ctx: &FileContext) -> DriverResult<()> {
        self.set_end_of_file(path, length, ctx)
    }

    fn get_file_information(&self, path: &str, _ctx: &FileContext) -> DriverResult<FileInformation> {
        let Some(name) = file_name(path) else {
            return Ok(FileInformation::directory("\\"));
        };
        if let Some(concrete) = self.resolver.resolve(path) {
            let meta = fs::metadata(&concrete).map_err(|e| io_status(path, e))?;
            return Ok(FileInformation::from_metadata(name, &meta));
        }
        if self.resolver.is_directory(path) {
            return Ok(FileInformation::directory(name));
        }
        Err(DriverStatus::FileNotFound)
    }

    fn find_files(&self, path: &str, _ctx: &FileContext) -> DriverResult<Vec<FileInformation>> {
        Ok(self
            .resolver
            .enumerate(path)
            .iter()
            .map(|entry| entry.information())
            .collect())
    }

    fn set_file_attributes(
        &self,
        path: &str,
        attributes: FileAttributes,
        _ctx: &FileContext,
    ) -> DriverResult<()> {
        let concrete = self.resolved(path)?;
        let mut perms = fs::metadata(&concrete)
            .map_err(|e| io_status(path, e))?
            .permissions();
        perms.set_readonly(attributes.contains(FileAttributes::READONLY));
        fs::set_permissions(&concrete, perms).map_err(|e| io_status(path, e))
    }

    fn set_file_time(
        &self,
        path: &str,
        created: Option<DateTime<Utc>>,
        accessed: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
        _ctx: &FileContext,
    ) -> DriverResult<()> {
        let concrete = self.resolved(path)?;
        let mut times = FileTimes::new();
        if let Some(at) = accessed {
            times = times.set_accessed(SystemTime::from(at));
        }
        if let Some(at) = modified {
            times = times.set_modified(SystemTime::from(at));
        }
        #[cfg(windows)]
        if let Some(at) = created {
            use std::os::windows::fs::FileTimesExt;
            times = times.set_created(SystemTime::from(at));
        }
        #[cfg(not(windows))]
        if created.is_some() {
            tracing::trace!(path, "creation time is not settable on this platform");
        }

        let file = File::options()
            .write(true)
            .open(&concrete)
            .map_err(|e| io_status(path, e))?;
        file.set_times(times).map_err(|e| io_status(path, e))
    }

    fn delete_file(&self, path: &str, ctx: &FileContext) -> DriverResult<()> {
        if ctx.is_directory() {
            return Err(DriverStatus::AccessDenied);
        }
        let concrete = self.resolved(path)?;
        let meta = fs::metadata(&concrete).map_err(|e| io_status(path, e))?;
        if meta.permissions().readonly() {
            return Err(DriverStatus::AccessDenied);
        }
        ctx.set_delete_on_close(true);
        Ok(())
    }

    /// Tag directories are derived from items and cannot be removed.
    fn delete_directory(&self, _path: &str, _ctx: &FileContext) -> DriverResult<()> {
        Err(DriverStatus::AccessDenied)
    }

    /// Renames within the owning bag directory. The sync watcher turns the
    /// rename into delete plus create, so the item is re-tagged.
    fn move_file(&self, from: &str, to: &str, replace: bool, ctx: &FileContext) -> DriverResult<()> {
        ctx.clear();
        if ctx.is_directory() {
            return Err(DriverStatus::AccessDenied);
        }
        let (_, source) = self.resolver.locate(from).ok_or(DriverStatus::FileNotFound)?;
        let target_name = file_name(to).ok_or(DriverStatus::PathNotFound)?;
        let target = sibling(&source, target_name).ok_or(DriverStatus::PathNotFound)?;
        if target == source {
            return Ok(());
        }

        if target.exists() {
            if !replace {
                return Err(DriverStatus::FileExists);
            }
            if target.is_dir() {
                return Err(DriverStatus::AccessDenied);
            }
            fs::remove_file(&target).map_err(|e| io_status(to, e))?;
        }
        fs::rename(&source, &target).map_err(|e| io_status(from, e))?;
        tracing::info!(from, to, "moved file");
        Ok(())
    }

    fn get_volume_information(&self) -> DriverResult<VolumeInformation> {
        Ok(VolumeInformation {
            label: self.options.volume_label.clone(),
            filesystem_name: self.options.filesystem_name.clone(),
            serial_number: SERIAL_NUMBER,
            max_component_length: MAX_COMPONENT_LENGTH,
        })
    }

    /// Capacity summed over the disks holding the mounted bags, each disk
    /// counted once.
    fn get_disk_free_space(&self) -> DriverResult<DiskSpace> {
        let disks = sysinfo::Disks::new_with_refreshed_list();
        let mut seen: Vec<&Path> = Vec::new();
        let mut space = DiskSpace::default();

        for bag in self.resolver.registry().mounted().values() {
            let root = &bag.volume.root;
            let Some(disk) = disks
                .list()
                .iter()
                .filter(|d| root.starts_with(d.mount_point()))
                .max_by_key(|d| d.mount_point().as_os_str().len())
            else {
                tracing::debug!(volume = %bag.id(), "no disk found for volume");
                continue;
            };
            if seen.contains(&disk.mount_point()) {
                continue;
            }
            seen.push(disk.mount_point());
            space.free_bytes_available += disk.available_space();
            space.total_free_bytes += disk.available_space();
            space.total_bytes += disk.total_space();
        }
        Ok(space)
    }
}

/// `name` next to `path`, refusing names that would leave the directory.
fn sibling(path: &Path, name: &str) -> Option<PathBuf> {
    if name == "." || name == ".." {
        return None;
    }
    path.parent().map(|dir| dir.join(name))
}

fn io_status(path: &str, e: io::Error) -> DriverStatus {
    let status = DriverStatus::from(&e);
    tracing::debug!(path, error = %e, %status, "callback I/O error");
    status
}
