//! Catalog row types.

use std::collections::BTreeMap;
use std::fs::Metadata;
use std::io;
use std::path::Path;
use std::time::SystemTime;

use bitflags::bitflags;
use chrono::{DateTime, TimeZone, Utc};
use strum::{AsRefStr, Display, EnumIter, EnumString, IntoEnumIterator};

bitflags! {
    /// File attribute bitmask using the Windows bit values.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct FileAttributes: u32 {
        const READONLY = 0x0001;
        const HIDDEN = 0x0002;
        const SYSTEM = 0x0004;
        const DIRECTORY = 0x0010;
        const ARCHIVE = 0x0020;
        const NORMAL = 0x0080;
        const TEMPORARY = 0x0100;
    }
}

impl FileAttributes {
    #[cfg(windows)]
    pub fn from_metadata(meta: &Metadata) -> Self {
        use std::os::windows::fs::MetadataExt;
        Self::from_bits_retain(meta.file_attributes())
    }

    #[cfg(not(windows))]
    pub fn from_metadata(meta: &Metadata) -> Self {
        let mut attrs = Self::empty();
        if meta.is_dir() {
            attrs |= Self::DIRECTORY;
        }
        if meta.permissions().readonly() {
            attrs |= Self::READONLY;
        }
        if attrs.is_empty() {
            attrs = Self::NORMAL;
        }
        attrs
    }
}

/// One cataloged file. `id` is the on-disk file name inside the bag.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Item {
    pub id: String,
    pub display_name: String,
    pub extension: String,
    pub size: u64,
    pub attributes: FileAttributes,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub accessed_at: DateTime<Utc>,
}

impl Item {
    /// Build an item from a file name and its metadata.
    pub fn from_metadata(file_name: &str, meta: &Metadata) -> Self {
        let path = Path::new(file_name);
        let display_name = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| file_name.to_string());
        let extension = path
            .extension()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);

        Self {
            id: file_name.to_string(),
            display_name,
            extension,
            size: meta.len(),
            attributes: FileAttributes::from_metadata(meta),
            created_at: meta.created().unwrap_or(modified).into(),
            modified_at: modified.into(),
            accessed_at: meta.accessed().unwrap_or(modified).into(),
        }
    }

    /// Stat a concrete file. Directories and nameless paths yield `None`.
    pub fn from_path(path: &Path) -> io::Result<Option<Self>> {
        let meta = std::fs::metadata(path)?;
        if !meta.is_file() {
            return Ok(None);
        }
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return Ok(None);
        };
        Ok(Some(Self::from_metadata(name, &meta)))
    }

    /// Lower-cased extension used for classification.
    pub fn extension_key(&self) -> String {
        self.extension.to_ascii_lowercase()
    }
}

/// A tag node. Ids are stored trimmed and lower-cased.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Tag {
    pub id: String,
    pub root_visible: bool,
}

impl Tag {
    pub fn new(id: impl AsRef<str>, root_visible: bool) -> Self {
        Self {
            id: Self::normalize(id.as_ref()),
            root_visible,
        }
    }

    pub fn normalize(raw: &str) -> String {
        raw.trim().to_lowercase()
    }
}

/// Specialization tables an extractor may write to.
///
/// Table and column names come only from this closed set, so values are the
/// only caller-supplied part of a meta insert.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Display, AsRefStr, EnumString, EnumIter,
)]
pub enum MetaTable {
    PictureMeta,
    PictureJpegMeta,
    MusicMeta,
    MusicExtMeta,
    VideoMeta,
    DocumentMeta,
    MiscMeta,
}

impl MetaTable {
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            MetaTable::PictureMeta | MetaTable::MusicMeta => &[],
            MetaTable::PictureJpegMeta => &["model", "iso", "fstop", "artist", "year"],
            MetaTable::MusicExtMeta => &["title", "artist", "album", "year"],
            MetaTable::VideoMeta | MetaTable::DocumentMeta | MetaTable::MiscMeta => &["year"],
        }
    }

    pub fn has_column(self, column: &str) -> bool {
        self.columns().contains(&column)
    }

    /// Base table this one specializes, if any.
    pub fn extends(self) -> Option<MetaTable> {
        match self {
            MetaTable::PictureJpegMeta => Some(MetaTable::PictureMeta),
            MetaTable::MusicExtMeta => Some(MetaTable::MusicMeta),
            _ => None,
        }
    }

    /// This table followed by every table extending it.
    pub fn family(self) -> Vec<MetaTable> {
        std::iter::once(self)
            .chain(MetaTable::iter().filter(|t| t.extends() == Some(self)))
            .collect()
    }
}

/// Prefix of the folder that sorts a category by one alias.
pub const ALIAS_FOLDER_PREFIX: &str = "By ";

/// A meta column exposed as a "By <alias>" folder under its category.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct MetaAlias {
    pub alias: String,
    pub table: MetaTable,
    pub column: String,
}

impl MetaAlias {
    pub fn folder_name(&self) -> String {
        format!("{ALIAS_FOLDER_PREFIX}{}", self.alias)
    }

    /// Alias named by a folder, if it carries the prefix.
    pub fn parse_folder(name: &str) -> Option<&str> {
        let prefix = name.get(..ALIAS_FOLDER_PREFIX.len())?;
        if !prefix.eq_ignore_ascii_case(ALIAS_FOLDER_PREFIX) {
            return None;
        }
        let alias = name[ALIAS_FOLDER_PREFIX.len()..].trim();
        (!alias.is_empty()).then_some(alias)
    }
}

/// A tag derived by an extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DerivedTag {
    pub id: String,
    pub root_visible: bool,
}

impl DerivedTag {
    pub fn plain(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            root_visible: false,
        }
    }

    pub fn root(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            root_visible: true,
        }
    }
}

/// Output of one extractor: a specialization row plus the tags it implies.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetaRecord {
    pub table: MetaTable,
    pub columns: BTreeMap<String, String>,
    pub tags: Vec<DerivedTag>,
}

impl MetaRecord {
    pub fn new(table: MetaTable) -> Self {
        Self {
            table,
            columns: BTreeMap::new(),
            tags: Vec::new(),
        }
    }

    pub fn with_column(mut self, column: &str, value: impl Into<String>) -> Self {
        self.columns.insert(column.to_string(), value.into());
        self
    }

    pub fn with_tag(mut self, tag: DerivedTag) -> Self {
        self.tags.push(tag);
        self
    }
}

pub(crate) fn to_unix(ts: &DateTime<Utc>) -> i64 {
    ts.timestamp()
}

pub(crate) fn from_unix(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0)
        .single()
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_item_from_path_splits_name() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.final.PDF");
        std::fs::write(&path, b"hello").unwrap();

        let item = Item::from_path(&path).unwrap().unwrap();
        assert_eq!(item.id, "report.final.PDF");
        assert_eq!(item.display_name, "report.final");
        assert_eq!(item.extension, "PDF");
        assert_eq!(item.extension_key(), "pdf");
        assert_eq!(item.size, 5);
    }

    #[test]
    fn test_item_from_directory_is_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Item::from_path(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_tag_normalization() {
        let tag = Tag::new("  Holiday ", true);
        assert_eq!(tag.id, "holiday");
        assert_eq!(Tag::normalize("MUSIC"), "music");
    }

    #[test]
    fn test_meta_table_whitelist() {
        assert!(MetaTable::MusicExtMeta.has_column("album"));
        assert!(!MetaTable::MusicExtMeta.has_column("model"));
        assert_eq!(MetaTable::PictureJpegMeta.as_ref(), "PictureJpegMeta");
    }

    #[test]
    fn test_unix_roundtrip_truncates_subsecond() {
        let ts = from_unix(1_700_000_000);
        assert_eq!(to_unix(&ts), 1_700_000_000);
    }

    #[test]
    fn test_meta_table_family() {
        assert_eq!(
            MetaTable::MusicMeta.family(),
            [MetaTable::MusicMeta, MetaTable::MusicExtMeta]
        );
        assert_eq!(MetaTable::DocumentMeta.family(), [MetaTable::DocumentMeta]);
        assert_eq!(MetaTable::PictureJpegMeta.extends(), Some(MetaTable::PictureMeta));
    }

    #[test]
    fn test_alias_folder_names() {
        assert_eq!(MetaAlias::parse_folder("By Artist"), Some("Artist"));
        assert_eq!(MetaAlias::parse_folder("by year"), Some("year"));
        assert_eq!(MetaAlias::parse_folder("By "), None);
        assert_eq!(MetaAlias::parse_folder("Bypass"), None);
        assert_eq!(MetaAlias::parse_folder("music"), None);
    }
}
