//! Types exchanged between the resolver, the driver and the OS host.

use std::fs::Metadata;
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use crate::catalog::{FileAttributes, Item, Tag};

/// File type enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    File,
    Directory,
}

impl FileType {
    pub fn is_file(&self) -> bool {
        matches!(self, FileType::File)
    }

    pub fn is_dir(&self) -> bool {
        matches!(self, FileType::Directory)
    }
}

/// One entry of a virtual directory listing.
///
/// Built fresh on every call; nothing here is cached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VirtualEntry {
    /// Rendered as a directory.
    Tag(Tag),
    /// An alias folder or one of its values; also a directory.
    Folder(String),
    /// Rendered as a file.
    Item(Item),
}

impl VirtualEntry {
    pub fn name(&self) -> &str {
        match self {
            VirtualEntry::Tag(tag) => &tag.id,
            VirtualEntry::Folder(name) => name,
            VirtualEntry::Item(item) => &item.id,
        }
    }

    pub fn kind(&self) -> FileType {
        match self {
            VirtualEntry::Tag(_) | VirtualEntry::Folder(_) => FileType::Directory,
            VirtualEntry::Item(_) => FileType::File,
        }
    }

    pub fn information(&self) -> FileInformation {
        match self {
            VirtualEntry::Tag(tag) => FileInformation::directory(&tag.id),
            VirtualEntry::Folder(name) => FileInformation::directory(name),
            VirtualEntry::Item(item) => FileInformation::from_item(item),
        }
    }
}

/// What the OS sees for one path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileInformation {
    pub file_name: String,
    pub kind: FileType,
    pub attributes: FileAttributes,
    pub size: u64,
    pub created: DateTime<Utc>,
    pub accessed: DateTime<Utc>,
    pub modified: DateTime<Utc>,
}

impl FileInformation {
    /// A synthetic directory: the root or a tag.
    pub fn directory(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            file_name: name.into(),
            kind: FileType::Directory,
            attributes: FileAttributes::DIRECTORY,
            size: 0,
            created: now,
            accessed: now,
            modified: now,
        }
    }

    /// From catalog data, without touching the disk.
    pub fn from_item(item: &Item) -> Self {
        Self {
            file_name: item.id.clone(),
            kind: FileType::File,
            attributes: item.attributes,
            size: item.size,
            created: item.created_at,
            accessed: item.accessed_at,
            modified: item.modified_at,
        }
    }

    /// From the backing file's live metadata.
    pub fn from_metadata(name: impl Into<String>, meta: &Metadata) -> Self {
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        Self {
            file_name: name.into(),
            kind: if meta.is_dir() {
                FileType::Directory
            } else {
                FileType::File
            },
            attributes: FileAttributes::from_metadata(meta),
            size: meta.len(),
            created: meta.created().unwrap_or(modified).into(),
            accessed: meta.accessed().unwrap_or(modified).into(),
            modified: modified.into(),
        }
    }

    pub fn is_dir(&self) -> bool {
        self.kind.is_dir()
    }
}

/// Open file flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpenFlags {
    /// Read access requested.
    pub read: bool,
    /// Write access requested.
    pub write: bool,
    /// Append mode.
    pub append: bool,
    /// Create if not exists.
    pub create: bool,
    /// Truncate on open.
    pub truncate: bool,
    /// The caller expects a directory.
    pub directory: bool,
}

impl Default for OpenFlags {
    fn default() -> Self {
        Self {
            read: true,
            write: false,
            append: false,
            create: false,
            truncate: false,
            directory: false,
        }
    }
}

impl OpenFlags {
    /// Read-only access.
    pub fn read() -> Self {
        Self::default()
    }

    /// Write access (also enables read).
    pub fn write() -> Self {
        Self {
            write: true,
            ..Default::default()
        }
    }

    /// Create with write access.
    pub fn create() -> Self {
        Self {
            write: true,
            create: true,
            ..Default::default()
        }
    }

    /// Open a directory.
    pub fn directory() -> Self {
        Self {
            directory: true,
            ..Default::default()
        }
    }
}

/// Volume identity reported to the OS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeInformation {
    pub label: String,
    pub filesystem_name: String,
    pub serial_number: u32,
    pub max_component_length: u32,
}

/// Capacity figures reported to the OS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskSpace {
    pub free_bytes_available: u64,
    pub total_bytes: u64,
    pub total_free_bytes: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_rendering() {
        let tag = VirtualEntry::Tag(Tag::new("Music", true));
        assert_eq!(tag.name(), "music");
        assert!(tag.information().is_dir());
        assert_eq!(tag.information().attributes, FileAttributes::DIRECTORY);

        let folder = VirtualEntry::Folder("By Artist".into());
        assert_eq!(folder.name(), "By Artist");
        assert!(folder.kind().is_dir());
    }

    #[test]
    fn test_information_from_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a.txt");
        std::fs::write(&path, b"abc").unwrap();
        let info = FileInformation::from_metadata("a.txt", &std::fs::metadata(&path).unwrap());
        assert_eq!(info.size, 3);
        assert!(info.kind.is_file());
    }
}
