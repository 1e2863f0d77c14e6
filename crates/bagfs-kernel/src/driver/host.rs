//! The OS integration layer, seen from the inside.

use std::io;
use std::sync::Arc;

use thiserror::Error;

use super::DriverOps;

/// Errors raised by a [`DriveHost`].
#[derive(Debug, Error)]
pub enum HostError {
    #[error("drive already in use: {0}")]
    DriveInUse(String),

    #[error("drive not mounted: {0}")]
    NotMounted(String),

    #[error("mount failed: {0}")]
    Mount(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

/// Registers a driver as a mountable drive and dispatches callbacks into it.
pub trait DriveHost: Send + Sync {
    /// Drive ids available for mounting, best first.
    fn free_drive_ids(&self) -> Vec<String>;

    /// Serve `driver` on `drive`. Blocks until the drive is unmounted.
    fn mount(&self, drive: &str, driver: Arc<dyn DriverOps>) -> Result<(), HostError>;

    /// Ask a running [`mount`](Self::mount) to return.
    fn unmount(&self, drive: &str) -> Result<(), HostError>;
}

/// Drive letters `C:\` through `Z:\` not present in `in_use`.
///
/// `in_use` entries are matched on their first character, case-insensitively.
pub fn free_drive_letters<S: AsRef<str>>(in_use: &[S]) -> Vec<String> {
    let taken: Vec<char> = in_use
        .iter()
        .filter_map(|d| d.as_ref().chars().next())
        .map(|c| c.to_ascii_uppercase())
        .collect();
    ('C'..='Z')
        .filter(|letter| !taken.contains(letter))
        .map(|letter| format!("{letter}:\\"))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_free_drive_letters() {
        let free = free_drive_letters(&["C:\\", "d:\\", "Z:\\"]);
        assert_eq!(free.first().map(String::as_str), Some("E:\\"));
        assert_eq!(free.len(), 21);
        assert!(!free.iter().any(|d| d.starts_with('Z')));

        let none: [&str; 0] = [];
        assert_eq!(free_drive_letters(&none).len(), 24);
    }
}
