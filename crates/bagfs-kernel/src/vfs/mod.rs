//! Virtual namespace over the mounted bags.
//!
//! - [`Resolver`] - maps virtual paths to concrete files and lists tag
//!   directories
//! - [`VirtualEntry`] / [`FileInformation`] - what a listing or lookup yields

mod resolver;
mod types;

pub use resolver::{Resolver, file_name, is_root, split_tags};
pub use types::{DiskSpace, FileInformation, FileType, OpenFlags, VirtualEntry, VolumeInformation};
