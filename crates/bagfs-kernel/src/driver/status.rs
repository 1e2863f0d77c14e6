//! Fixed status vocabulary returned to the OS host.

use std::io;

use strum::{Display, EnumIter};

/// Callback outcome. The host maps these onto its native status codes;
/// [`code`](Self::code) gives the NT status value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumIter)]
pub enum DriverStatus {
    Success,
    FileNotFound,
    PathNotFound,
    AccessDenied,
    DiskFull,
    NotImplemented,
    FileExists,
    /// Anything without a better match.
    Unsuccessful,
}

impl DriverStatus {
    pub fn is_success(self) -> bool {
        self == DriverStatus::Success
    }

    pub fn code(self) -> u32 {
        match self {
            DriverStatus::Success => 0x0000_0000,
            DriverStatus::FileNotFound => 0xC000_0034,
            DriverStatus::PathNotFound => 0xC000_003A,
            DriverStatus::AccessDenied => 0xC000_0022,
            DriverStatus::DiskFull => 0xC000_007F,
            DriverStatus::NotImplemented => 0xC000_0002,
            DriverStatus::FileExists => 0xC000_0035,
            DriverStatus::Unsuccessful => 0xC000_0001,
        }
    }

    /// `Ok(())` for success, the status itself otherwise.
    pub fn into_result(self) -> DriverResult<()> {
        if self.is_success() { Ok(()) } else { Err(self) }
    }
}

impl From<&io::Error> for DriverStatus {
    fn from(e: &io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => DriverStatus::FileNotFound,
            io::ErrorKind::NotADirectory => DriverStatus::PathNotFound,
            io::ErrorKind::PermissionDenied | io::ErrorKind::ReadOnlyFilesystem => {
                DriverStatus::AccessDenied
            }
            io::ErrorKind::AlreadyExists => DriverStatus::FileExists,
            io::ErrorKind::StorageFull | io::ErrorKind::QuotaExceeded => DriverStatus::DiskFull,
            io::ErrorKind::Unsupported => DriverStatus::NotImplemented,
            _ => DriverStatus::Unsuccessful,
        }
    }
}

impl From<io::Error> for DriverStatus {
    fn from(e: io::Error) -> Self {
        DriverStatus::from(&e)
    }
}

/// Driver result type.
pub type DriverResult<T> = Result<T, DriverStatus>;
