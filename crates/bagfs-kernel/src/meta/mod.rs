//! Metadata extraction pipeline.
//!
//! Every new item runs through [`Extractor::Base`] (category and creation
//! year) and then through each extractor registered for its extension. An
//! extractor yields a [`MetaRecord`] or a skip; one extractor failing never
//! stops the others.

mod base;
mod category;
mod exif;
mod music;

pub use category::Category;

use std::collections::HashMap;
use std::io;
use std::path::Path;
use std::time::Duration;

use strum::{AsRefStr, Display};
use thiserror::Error;

use crate::catalog::{Catalog, CatalogError, CatalogResult, Item, MetaRecord};
use crate::constants::DEFAULT_SETTLE_DELAY;

/// Errors raised while reading a file's embedded metadata.
#[derive(Debug, Error)]
pub enum MetaError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("EXIF error: {0}")]
    Exif(#[from] ::exif::Error),

    #[error("audio tag error: {0}")]
    Audio(#[from] lofty::error::LoftyError),
}

/// The closed set of extractors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, AsRefStr)]
#[strum(serialize_all = "lowercase")]
pub enum Extractor {
    /// Category tag plus creation year. Always runs.
    Base,
    /// Camera model and capture year from EXIF.
    Exif,
    /// Title, artist, album and year from whatever tag format the audio
    /// container carries.
    Music,
}

/// Outcome of one extractor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Extraction {
    Record(MetaRecord),
    Skip(String),
}

/// What a pipeline run did for one item.
#[derive(Debug, Clone)]
pub struct ProcessReport {
    pub category: Category,
    pub records: Vec<Extractor>,
    pub tags: Vec<String>,
    pub skipped: Vec<(Extractor, String)>,
}

impl ProcessReport {
    fn new(category: Category) -> Self {
        Self {
            category,
            records: Vec::new(),
            tags: Vec::new(),
            skipped: Vec::new(),
        }
    }
}

/// Extension-keyed extractor registry.
#[derive(Debug, Clone)]
pub struct MetaPipeline {
    by_extension: HashMap<String, Vec<Extractor>>,
    settle_delay: Duration,
}

impl Default for MetaPipeline {
    fn default() -> Self {
        Self::new(DEFAULT_SETTLE_DELAY)
    }
}

impl MetaPipeline {
    /// Pipeline with the built-in content extractors registered.
    pub fn new(settle_delay: Duration) -> Self {
        let mut pipeline = Self::empty(settle_delay);
        pipeline.register(Extractor::Exif, &["jpg", "jpeg", "tif", "tiff"]);
        pipeline.register(Extractor::Music, Category::Music.extensions());
        pipeline
    }

    /// Pipeline that only runs [`Extractor::Base`].
    pub fn empty(settle_delay: Duration) -> Self {
        Self {
            by_extension: HashMap::new(),
            settle_delay,
        }
    }

    /// Run `extractor` for each of `extensions`. Several extractors may share
    /// an extension; all of them run, in registration order.
    pub fn register(&mut self, extractor: Extractor, extensions: &[&str]) {
        if extractor == Extractor::Base {
            return;
        }
        for ext in extensions {
            let key = ext.trim_start_matches('.').to_ascii_lowercase();
            let list = self.by_extension.entry(key).or_default();
            if !list.contains(&extractor) {
                list.push(extractor);
            }
        }
    }

    pub fn extractors_for(&self, ext: &str) -> &[Extractor] {
        self.by_extension
            .get(&ext.trim_start_matches('.').to_ascii_lowercase())
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn settle_delay(&self) -> Duration {
        self.settle_delay
    }

    /// Classify an item that already exists on disk.
    pub fn process(&self, item: &Item, catalog: &Catalog, source: &Path) -> CatalogResult<ProcessReport> {
        self.run(item, catalog, source, false)
    }

    /// Classify a file that just appeared. Content readers wait for the
    /// settle delay first, since the writer may still be copying it in.
    pub fn process_fresh(
        &self,
        item: &Item,
        catalog: &Catalog,
        source: &Path,
    ) -> CatalogResult<ProcessReport> {
        self.run(item, catalog, source, true)
    }

    /// Only structural catalog errors escape; everything else is recorded in
    /// the report as a skip.
    fn run(
        &self,
        item: &Item,
        catalog: &Catalog,
        source: &Path,
        settle: bool,
    ) -> CatalogResult<ProcessReport> {
        let ext = item.extension_key();
        let category = self.category_for(catalog, &ext)?;
        let mut report = ProcessReport::new(category);

        let content = self.extractors_for(&ext);
        if settle && !content.is_empty() && !self.settle_delay.is_zero() {
            std::thread::sleep(self.settle_delay);
        }

        let base = base::extract(item, category);
        self.apply(item, catalog, Extractor::Base, Ok(base), &mut report)?;

        for &extractor in content {
            let outcome = match extractor {
                Extractor::Base => continue,
                Extractor::Exif => exif::extract(source),
                Extractor::Music => music::extract(source),
            };
            self.apply(item, catalog, extractor, outcome, &mut report)?;
        }

        tracing::debug!(
            item = %item.id,
            category = %category,
            records = report.records.len(),
            skipped = report.skipped.len(),
            "processed item metadata"
        );
        Ok(report)
    }

    fn category_for(&self, catalog: &Catalog, ext: &str) -> CatalogResult<Category> {
        match catalog.default_tag_for_extension(ext) {
            Ok(Some(tag)) => Ok(tag.parse().unwrap_or_else(|_| Category::for_extension(ext))),
            Ok(None) => Ok(Category::for_extension(ext)),
            Err(e) if e.is_structural() => Err(e),
            Err(e) => {
                tracing::warn!(ext, error = %e, "extension lookup failed, using built-in category");
                Ok(Category::for_extension(ext))
            }
        }
    }

    fn apply(
        &self,
        item: &Item,
        catalog: &Catalog,
        extractor: Extractor,
        outcome: Result<Extraction, MetaError>,
        report: &mut ProcessReport,
    ) -> CatalogResult<()> {
        let record = match outcome {
            Ok(Extraction::Record(record)) => record,
            Ok(Extraction::Skip(reason)) => {
                report.skipped.push((extractor, reason));
                return Ok(());
            }
            Err(e) => {
                tracing::debug!(item = %item.id, %extractor, error = %e, "extractor failed");
                report.skipped.push((extractor, e.to_string()));
                return Ok(());
            }
        };

        if let Err(e) = catalog.insert_meta_record(&item.id, &record) {
            skip_or_escalate(e, extractor, report)?;
            return Ok(());
        }
        report.records.push(extractor);

        for tag in &record.tags {
            let assigned = if tag.root_visible {
                catalog
                    .ensure_tag(&tag.id, true)
                    .and_then(|_| catalog.assign_tag(&item.id, &tag.id))
            } else {
                catalog.assign_tag(&item.id, &tag.id)
            };
            match assigned {
                Ok(()) => report.tags.push(tag.id.to_lowercase()),
                Err(e) => skip_or_escalate(e, extractor, report)?,
            }
        }
        Ok(())
    }
}

fn skip_or_escalate(
    e: CatalogError,
    extractor: Extractor,
    report: &mut ProcessReport,
) -> CatalogResult<()> {
    if e.is_structural() {
        return Err(e);
    }
    tracing::warn!(%extractor, error = %e, "failed to store extractor output");
    report.skipped.push((extractor, e.to_string()));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MetaTable;
    use std::collections::BTreeSet;

    fn stored(catalog: &Catalog, dir: &Path, name: &str, bytes: &[u8]) -> (Item, std::path::PathBuf) {
        let path = dir.join(name);
        std::fs::write(&path, bytes).unwrap();
        let item = Item::from_path(&path).unwrap().unwrap();
        catalog.insert_item(&item).unwrap();
        (item, path)
    }

    fn tag_ids(catalog: &Catalog, id: &str) -> BTreeSet<String> {
        catalog
            .tags_for_item(id)
            .unwrap()
            .into_iter()
            .map(|t| t.id)
            .collect()
    }

    #[test]
    fn test_register_dedupes_and_ignores_base() {
        let mut pipeline = MetaPipeline::empty(Duration::ZERO);
        pipeline.register(Extractor::Exif, &["JPG", ".jpg"]);
        pipeline.register(Extractor::Base, &["jpg"]);
        pipeline.register(Extractor::Music, &["jpg"]);
        assert_eq!(pipeline.extractors_for("jpg"), [Extractor::Exif, Extractor::Music]);
        assert!(pipeline.extractors_for("txt").is_empty());
    }

    #[test]
    fn test_music_extractor_covers_every_music_extension() {
        let pipeline = MetaPipeline::default();
        for ext in ["mp3", "wav", "aac", "midi", "flac", "wma"] {
            assert_eq!(pipeline.extractors_for(ext), [Extractor::Music], "{ext}");
        }
    }

    #[test]
    fn test_document_gets_category_and_year() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::in_memory().unwrap();
        let (item, path) = stored(&catalog, dir.path(), "report.pdf", b"%PDF-1.4");

        let report = MetaPipeline::default().process(&item, &catalog, &path).unwrap();
        assert_eq!(report.category, Category::Document);
        assert_eq!(report.records, [Extractor::Base]);

        let year = chrono::Datelike::year(&item.created_at).to_string();
        let expected: BTreeSet<String> = ["document".to_string(), year].into_iter().collect();
        assert_eq!(tag_ids(&catalog, "report.pdf"), expected);

        let roots: Vec<String> = catalog.root_tags().unwrap().into_iter().map(|t| t.id).collect();
        assert_eq!(roots, ["document"]);
    }

    #[test]
    fn test_untagged_music_still_categorized() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::in_memory().unwrap();
        let (item, path) = stored(&catalog, dir.path(), "song.mp3", &[0u8; 16]);

        let report = MetaPipeline::default().process(&item, &catalog, &path).unwrap();
        assert_eq!(report.category, Category::Music);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.skipped[0].0, Extractor::Music);
        assert_eq!(
            tag_ids(&catalog, "song.mp3"),
            ["music".to_string()].into_iter().collect()
        );
    }

    #[test]
    fn test_music_tags_assigned() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::in_memory().unwrap();
        let bytes = music::tagged_mp3(&[
            ("TIT2", "Song"),
            ("TPE1", "The Band"),
            ("TALB", "First"),
            ("TDRC", "1999"),
        ]);
        let (item, path) = stored(&catalog, dir.path(), "song.mp3", &bytes);

        let report = MetaPipeline::new(Duration::ZERO)
            .process_fresh(&item, &catalog, &path)
            .unwrap();
        assert_eq!(report.records, [Extractor::Base, Extractor::Music]);

        let tags = tag_ids(&catalog, "song.mp3");
        for expected in ["music", "the band", "first", "1999"] {
            assert!(tags.contains(expected), "missing {expected}");
        }
        assert_eq!(
            catalog.items_matching_all(["music", "1999"]).unwrap().len(),
            1
        );
    }

    #[test]
    fn test_picture_exif_stored_and_tagged() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::in_memory().unwrap();
        let bytes = exif::tagged_jpeg("Pixel 7", "2019:07:14 10:00:00");
        let (item, path) = stored(&catalog, dir.path(), "photo.jpg", &bytes);

        let report = MetaPipeline::default().process(&item, &catalog, &path).unwrap();
        assert_eq!(report.category, Category::Picture);
        assert_eq!(report.records, [Extractor::Base, Extractor::Exif]);

        let expected: BTreeSet<String> = ["picture", "pixel 7", "2019"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(tag_ids(&catalog, "photo.jpg"), expected);
        assert_eq!(
            catalog
                .meta_value(MetaTable::PictureJpegMeta, "photo.jpg", "model")
                .unwrap()
                .as_deref(),
            Some("Pixel 7")
        );
        assert_eq!(
            catalog
                .meta_value(MetaTable::PictureJpegMeta, "photo.jpg", "year")
                .unwrap()
                .as_deref(),
            Some("2019")
        );
    }

    #[test]
    fn test_unknown_extension_is_miscellaneous() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::in_memory().unwrap();
        let (item, path) = stored(&catalog, dir.path(), "blob.bin", b"data");

        let report = MetaPipeline::default().process(&item, &catalog, &path).unwrap();
        assert_eq!(report.category, Category::Miscellaneous);
        assert!(tag_ids(&catalog, "blob.bin").contains("miscellaneous"));
    }

    #[test]
    fn test_closed_catalog_escalates() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = Catalog::in_memory().unwrap();
        let (item, path) = stored(&catalog, dir.path(), "a.txt", b"x");
        catalog.close().unwrap();

        assert!(matches!(
            MetaPipeline::default().process(&item, &catalog, &path),
            Err(CatalogError::StaleHandle)
        ));
    }
}
