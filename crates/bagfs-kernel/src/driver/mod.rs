//! Driver callback adapter.
//!
//! [`BagDriver`] answers the OS host's filesystem callbacks from the
//! resolver. Internal errors are mapped onto the small [`DriverStatus`]
//! vocabulary before they cross the boundary.

mod bag;
mod context;
mod host;
mod ops;
mod status;

pub use bag::BagDriver;
pub use context::{FileContext, OpenFile};
pub use host::{DriveHost, HostError, free_drive_letters};
pub use ops::DriverOps;
pub use status::{DriverResult, DriverStatus};

use crate::constants::{DEFAULT_FILESYSTEM_NAME, DEFAULT_VOLUME_LABEL};

/// Identity the virtual drive reports to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverOptions {
    pub volume_label: String,
    pub filesystem_name: String,
}

impl Default for DriverOptions {
    fn default() -> Self {
        Self {
            volume_label: DEFAULT_VOLUME_LABEL.to_string(),
            filesystem_name: DEFAULT_FILESYSTEM_NAME.to_string(),
        }
    }
}
