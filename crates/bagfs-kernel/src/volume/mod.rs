//! Volume discovery and lifecycle.

mod debounce;
mod hotplug;
mod registry;
mod source;

pub use debounce::Debouncer;
pub use hotplug::{DeviceEvent, HotplugMonitor, HotplugSender, RescanHook};
pub use registry::{BagVolume, RegistryError, RegistryOptions, VolumeRegistry};
pub use source::{StaticVolumes, SystemVolumes, Volume, VolumeId, VolumeSource, volume_id};
