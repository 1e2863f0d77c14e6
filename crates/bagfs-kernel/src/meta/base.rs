//! Category and creation-year classification applied to every item.

use chrono::Datelike;

use super::{Category, Extraction};
use crate::catalog::{DerivedTag, Item, MetaRecord};

pub(super) fn extract(item: &Item, category: Category) -> Extraction {
    let mut record =
        MetaRecord::new(category.meta_table()).with_tag(DerivedTag::root(category.to_string()));

    if category.carries_year() {
        let year = item.created_at.year().to_string();
        record = record
            .with_column("year", year.clone())
            .with_tag(DerivedTag::plain(year));
    }

    Extraction::Record(record)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{FileAttributes, MetaTable};
    use chrono::{TimeZone, Utc};

    fn item(id: &str, ext: &str) -> Item {
        let ts = Utc.with_ymd_and_hms(2021, 6, 1, 12, 0, 0).unwrap();
        Item {
            id: id.into(),
            display_name: id.into(),
            extension: ext.into(),
            size: 1,
            attributes: FileAttributes::NORMAL,
            created_at: ts,
            modified_at: ts,
            accessed_at: ts,
        }
    }

    #[test]
    fn test_document_gets_year() {
        let Extraction::Record(record) = extract(&item("a.pdf", "pdf"), Category::Document) else {
            panic!("expected a record");
        };
        assert_eq!(record.table, MetaTable::DocumentMeta);
        assert_eq!(record.columns.get("year").map(String::as_str), Some("2021"));
        assert_eq!(
            record.tags,
            vec![DerivedTag::root("document"), DerivedTag::plain("2021")]
        );
    }

    #[test]
    fn test_music_has_no_creation_year() {
        let Extraction::Record(record) = extract(&item("a.mp3", "mp3"), Category::Music) else {
            panic!("expected a record");
        };
        assert_eq!(record.table, MetaTable::MusicMeta);
        assert!(record.columns.is_empty());
        assert_eq!(record.tags, vec![DerivedTag::root("music")]);
    }
}
