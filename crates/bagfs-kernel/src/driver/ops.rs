//! The callback contract between the OS host and the virtual filesystem.
//!
//! Calls arrive concurrently, one thread per in-flight request. Everything
//! is path-based; per-handle state lives in the [`FileContext`] the host
//! passes back on every call for the same handle.

use chrono::{DateTime, Utc};

use super::{DriverResult, DriverStatus, FileContext};
use crate::catalog::FileAttributes;
use crate::vfs::{DiskSpace, FileInformation, OpenFlags, VolumeInformation};

/// Filesystem callbacks answered by the driver.
///
/// Every method returns a [`DriverStatus`] on failure; nothing panics and
/// no internal error type crosses this boundary.
pub trait DriverOps: Send + Sync {
    // ========================================================================
    // Handles
    // ========================================================================

    /// Open or create `path`, populating `ctx` for later calls.
    fn create_file(&self, path: &str, flags: OpenFlags, ctx: &FileContext) -> DriverResult<()>;

    /// Last user handle closed. Pending delete-on-close happens here.
    fn cleanup(&self, path: &str, ctx: &FileContext);

    /// Handle released by the OS.
    fn close_file(&self, path: &str, ctx: &FileContext);

    // ========================================================================
    // Data
    // ========================================================================

    /// Read into `buf` at `offset`. Returns the byte count; short at EOF.
    fn read_file(
        &self,
        path: &str,
        buf: &mut [u8],
        offset: u64,
        ctx: &FileContext,
    ) -> DriverResult<usize>;

    fn write_file(&self, path: &str, data: &[u8], offset: u64, ctx: &FileContext)
    -> DriverResult<usize>;

    fn flush_file_buffers(&self, path: &str, ctx: &FileContext) -> DriverResult<()>;

    fn set_end_of_file(&self, path: &str, length: u64, ctx: &FileContext) -> DriverResult<()>;

    fn set_allocation_size(&self, path: &str, length: u64, ctx: &FileContext) -> DriverResult<()>;

    // ========================================================================
    // Metadata
    // ========================================================================

    fn get_file_information(&self, path: &str, ctx: &FileContext) -> DriverResult<FileInformation>;

    /// List a directory.
    fn find_files(&self, path: &str, ctx: &FileContext) -> DriverResult<Vec<FileInformation>>;

    /// Filtered listing. Hosts fall back to [`find_files`](Self::find_files)
    /// on `NotImplemented`.
    fn find_files_with_pattern(
        &self,
        _path: &str,
        _pattern: &str,
        _ctx: &FileContext,
    ) -> DriverResult<Vec<FileInformation>> {
        Err(DriverStatus::NotImplemented)
    }

    /// Alternate data streams are not supported.
    fn find_streams(&self, _path: &str, _ctx: &FileContext) -> DriverResult<Vec<FileInformation>> {
        Err(DriverStatus::NotImplemented)
    }

    fn set_file_attributes(
        &self,
        path: &str,
        attributes: FileAttributes,
        ctx: &FileContext,
    ) -> DriverResult<()>;

    /// `None` leaves that timestamp unchanged.
    fn set_file_time(
        &self,
        path: &str,
        created: Option<DateTime<Utc>>,
        accessed: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
        ctx: &FileContext,
    ) -> DriverResult<()>;

    // ========================================================================
    // Namespace
    // ========================================================================

    /// Check whether `path` may be deleted and mark it delete-on-close.
    fn delete_file(&self, path: &str, ctx: &FileContext) -> DriverResult<()>;

    fn delete_directory(&self, path: &str, ctx: &FileContext) -> DriverResult<()>;

    fn move_file(&self, from: &str, to: &str, replace: bool, ctx: &FileContext) -> DriverResult<()>;

    /// Byte-range locks pass through.
    fn lock_file(&self, _path: &str, _offset: u64, _length: u64, _ctx: &FileContext) -> DriverResult<()> {
        Ok(())
    }

    fn unlock_file(&self, _path: &str, _offset: u64, _length: u64, _ctx: &FileContext) -> DriverResult<()> {
        Ok(())
    }

    // ========================================================================
    // Volume
    // ========================================================================

    fn get_volume_information(&self) -> DriverResult<VolumeInformation>;

    fn get_disk_free_space(&self) -> DriverResult<DiskSpace>;

    fn mounted(&self) -> DriverResult<()> {
        Ok(())
    }

    fn unmounted(&self) -> DriverResult<()> {
        Ok(())
    }
}
