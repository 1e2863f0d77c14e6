//! Top-level file categories.

use strum::{AsRefStr, Display, EnumIter, EnumString};

use crate::catalog::MetaTable;

/// Category assigned to every item from its extension. The category tag is
/// the root-visible entry point into the virtual drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr, EnumString, EnumIter)]
#[strum(serialize_all = "lowercase", ascii_case_insensitive)]
pub enum Category {
    Document,
    Videos,
    Music,
    Picture,
    Miscellaneous,
}

const DOCUMENT_EXTENSIONS: &[&str] = &[
    "doc", "docx", "odp", "odf", "fodt", "fodp", "osd", "fods", "7z", "iso", "ppt", "pptx", "xls",
    "xlsx", "rar", "zip", "docm", "docxml", "docz", "txt", "pdf", "cvs", "csv", "rtf", "xml",
    "xaml", "html", "ini", "js", "conf", "css", "info", "inf",
];

const PICTURE_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "bmp", "dng", "raw", "psd", "pdn", "odg", "fodg", "svg", "ico",
    "tif", "tiff", "dxf",
];

const VIDEO_EXTENSIONS: &[&str] = &["mp4", "flv", "mov", "mpg", "avi", "wmv", "3gp"];

const MUSIC_EXTENSIONS: &[&str] = &["mp3", "wav", "aac", "midi", "flac", "wma"];

impl Category {
    /// Categories with an extension list seeded into every new store.
    pub const SEEDED: [Category; 4] = [
        Category::Document,
        Category::Picture,
        Category::Videos,
        Category::Music,
    ];

    pub fn extensions(&self) -> &'static [&'static str] {
        match self {
            Category::Document => DOCUMENT_EXTENSIONS,
            Category::Videos => VIDEO_EXTENSIONS,
            Category::Music => MUSIC_EXTENSIONS,
            Category::Picture => PICTURE_EXTENSIONS,
            Category::Miscellaneous => &[],
        }
    }

    /// Built-in classification, used when a store has no mapping.
    pub fn for_extension(ext: &str) -> Self {
        let ext = ext.trim_start_matches('.').to_ascii_lowercase();
        Self::SEEDED
            .into_iter()
            .find(|category| category.extensions().contains(&ext.as_str()))
            .unwrap_or(Category::Miscellaneous)
    }

    pub fn meta_table(&self) -> MetaTable {
        match self {
            Category::Document => MetaTable::DocumentMeta,
            Category::Videos => MetaTable::VideoMeta,
            Category::Music => MetaTable::MusicMeta,
            Category::Picture => MetaTable::PictureMeta,
            Category::Miscellaneous => MetaTable::MiscMeta,
        }
    }

    /// Pictures and music get their year from embedded metadata instead of
    /// the file's creation time.
    pub fn carries_year(&self) -> bool {
        !matches!(self, Category::Picture | Category::Music)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_extension() {
        assert_eq!(Category::for_extension("PDF"), Category::Document);
        assert_eq!(Category::for_extension(".mp3"), Category::Music);
        assert_eq!(Category::for_extension("jpeg"), Category::Picture);
        assert_eq!(Category::for_extension("mov"), Category::Videos);
        assert_eq!(Category::for_extension("exe"), Category::Miscellaneous);
        assert_eq!(Category::for_extension(""), Category::Miscellaneous);
    }

    #[test]
    fn test_parse_is_case_insensitive() {
        assert_eq!("MUSIC".parse::<Category>().unwrap(), Category::Music);
        assert_eq!(Category::Videos.to_string(), "videos");
        assert_eq!(Category::Miscellaneous.as_ref(), "miscellaneous");
    }

    #[test]
    fn test_no_extension_in_two_categories() {
        for a in Category::SEEDED {
            for b in Category::SEEDED {
                if a == b {
                    continue;
                }
                for ext in a.extensions() {
                    assert!(!b.extensions().contains(ext), "{ext} in {a} and {b}");
                }
            }
        }
    }
}
