//! Kernel defaults.
//!
//! Centralizes hardcoded values; most can be overridden through
//! [`BagfsConfig`](crate::config::BagfsConfig).

use std::time::Duration;

/// Filename at a volume root that marks the volume as carrying a bag.
pub const DEFAULT_MARKER_FILE: &str = "BagConf.sqlite";

/// The only catalog schema version this build can serve.
pub const SUPPORTED_SCHEMA_VERSION: i64 = 3;

/// Quiescence window before a burst of device-change events triggers a rescan.
pub const DEFAULT_HOTPLUG_DEBOUNCE: Duration = Duration::from_secs(3);

/// Delay before content extractors read a freshly created file.
///
/// Files arriving in a bag are usually still being copied.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_millis(500);

/// How long a catalog statement waits on a locked store before failing.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(2);

/// Label reported for the virtual drive.
pub const DEFAULT_VOLUME_LABEL: &str = "DefaultBag";

/// Filesystem name reported for the virtual drive.
pub const DEFAULT_FILESYSTEM_NAME: &str = "BagFS";
