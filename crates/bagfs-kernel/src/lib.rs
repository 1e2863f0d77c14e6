//! # bagfs-kernel
//!
//! Core of a tag-organized virtual filesystem backed by removable "bag"
//! volumes.
//!
//! A bag is a directory of real files on one volume. Its metadata and tag
//! associations live in a SQLite catalog stored at the volume root under a
//! well-known marker filename. The kernel:
//!
//! - Discovers, mounts and unmounts catalog-backed volumes ([`VolumeRegistry`])
//! - Keeps each catalog in step with its bag directory ([`SyncWatcher`])
//! - Classifies newly observed files and derives tags ([`MetaPipeline`])
//! - Answers virtual path lookups and directory listings ([`Resolver`])
//! - Adapts all of that to a fixed OS callback contract ([`BagDriver`])
//!
//! Virtual paths are tag paths: `\document\2024\report.pdf` names the file
//! `report.pdf` carrying both the `document` and `2024` tags.

pub mod catalog;
pub mod config;
pub mod constants;
pub mod driver;
pub mod meta;
pub mod sync;
pub mod vfs;
pub mod volume;

pub use catalog::{
    Catalog, CatalogError, FileAttributes, Item, MetaAlias, MetaRecord, MetaTable, Tag,
};
pub use config::{BagfsConfig, ConfigError};
pub use driver::{
    BagDriver, DriveHost, DriverOps, DriverOptions, DriverResult, DriverStatus, FileContext, HostError,
};
pub use meta::{Category, Extraction, Extractor, MetaPipeline, ProcessReport};
pub use sync::{BagChange, SyncError, SyncWatcher};
pub use vfs::{FileInformation, OpenFlags, Resolver, VirtualEntry};
pub use volume::{
    BagVolume, Debouncer, DeviceEvent, HotplugMonitor, HotplugSender, RegistryError,
    RegistryOptions, StaticVolumes, SystemVolumes, Volume, VolumeId, VolumeRegistry, VolumeSource,
};
