//! Music tags read through `lofty`.
//!
//! Covers ID3v2, ID3v1, Vorbis comments, APE and RIFF INFO. The album artist
//! wins over the track artist when both are present.

use std::path::Path;

use lofty::error::ErrorKind;
use lofty::file::TaggedFileExt;
use lofty::tag::{Accessor, ItemKey, Tag};

use super::{Extraction, MetaError};
use crate::catalog::{DerivedTag, MetaRecord, MetaTable};

const YEAR_KEYS: [ItemKey; 3] = [ItemKey::Year, ItemKey::RecordingDate, ItemKey::OriginalReleaseDate];

pub(super) fn extract(path: &Path) -> Result<Extraction, MetaError> {
    let tagged = match lofty::read_from_path(path) {
        Ok(tagged) => tagged,
        Err(e) if matches!(e.kind(), ErrorKind::UnknownFormat) => {
            return Ok(Extraction::Skip("unsupported audio format".into()));
        }
        Err(e) => return Err(e.into()),
    };

    let Some(tag) = tagged.primary_tag().or_else(|| tagged.first_tag()) else {
        return Ok(Extraction::Skip("no music tags".into()));
    };

    let mut record = MetaRecord::new(MetaTable::MusicExtMeta);
    if let Some(title) = text(tag.title()) {
        record = record.with_column("title", title);
    }
    let artist = tag
        .get_string(&ItemKey::AlbumArtist)
        .and_then(|a| text(Some(a.into())))
        .or_else(|| text(tag.artist()));
    for (column, value) in [("artist", artist), ("album", text(tag.album())), ("year", year(tag))] {
        if let Some(value) = value {
            record = record
                .with_column(column, value.clone())
                .with_tag(DerivedTag::plain(value));
        }
    }

    if record.columns.is_empty() {
        return Ok(Extraction::Skip("music tags are blank".into()));
    }
    Ok(Extraction::Record(record))
}

fn text(value: Option<std::borrow::Cow<'_, str>>) -> Option<String> {
    let value = value?;
    let trimmed = value.trim_matches(|c: char| c.is_whitespace() || c == '\0');
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn year(tag: &Tag) -> Option<String> {
    YEAR_KEYS
        .iter()
        .filter_map(|key| tag.get_string(key))
        .find_map(|value| {
            let digits = value.trim().get(..4)?;
            digits
                .chars()
                .all(|c| c.is_ascii_digit())
                .then(|| digits.to_string())
        })
}

/// An MPEG file with an ID3v2.4 tag made of UTF-8 text frames.
#[cfg(test)]
pub(crate) fn tagged_mp3(frames: &[(&str, &str)]) -> Vec<u8> {
    fn syncsafe(n: usize) -> [u8; 4] {
        [(n >> 21) as u8 & 0x7f, (n >> 14) as u8 & 0x7f, (n >> 7) as u8 & 0x7f, n as u8 & 0x7f]
    }

    let mut body = Vec::new();
    for (id, value) in frames {
        body.extend_from_slice(id.as_bytes());
        body.extend_from_slice(&syncsafe(value.len() + 1));
        body.extend_from_slice(&[0, 0, 3]);
        body.extend_from_slice(value.as_bytes());
    }

    let mut bytes = b"ID3\x04\x00\x00".to_vec();
    bytes.extend_from_slice(&syncsafe(body.len()));
    bytes.extend_from_slice(&body);
    // MPEG-1 layer III, 128 kbit/s, 44.1 kHz: 417-byte frames.
    for _ in 0..4 {
        bytes.extend_from_slice(&[0xFF, 0xFB, 0x90, 0x00]);
        bytes.extend_from_slice(&[0u8; 413]);
    }
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record_for(name: &str, bytes: &[u8]) -> MetaRecord {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(name);
        std::fs::write(&path, bytes).unwrap();
        match extract(&path).unwrap() {
            Extraction::Record(record) => record,
            Extraction::Skip(reason) => panic!("skipped: {reason}"),
        }
    }

    #[test]
    fn test_id3v2_frames() {
        let record = record_for(
            "song.mp3",
            &tagged_mp3(&[
                ("TIT2", "Song"),
                ("TPE1", "The Band"),
                ("TALB", "First"),
                ("TDRC", "1999-04-01"),
            ]),
        );
        assert_eq!(record.table, MetaTable::MusicExtMeta);
        assert_eq!(record.columns["title"], "Song");
        assert_eq!(record.columns["year"], "1999");
        let tags: Vec<&str> = record.tags.iter().map(|t| t.id.as_str()).collect();
        assert_eq!(tags, ["The Band", "First", "1999"]);
    }

    #[test]
    fn test_album_artist_preferred() {
        let record = record_for(
            "track.mp3",
            &tagged_mp3(&[("TPE1", "Guest"), ("TPE2", "Foo")]),
        );
        assert_eq!(record.columns["artist"], "Foo");
        assert_eq!(record.tags, [DerivedTag::plain("Foo")]);
    }

    #[test]
    fn test_untagged_mp3_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bare.mp3");
        std::fs::write(&path, &tagged_mp3(&[])[10..]).unwrap();
        assert!(matches!(extract(&path).unwrap(), Extraction::Skip(_)));
    }

    #[test]
    fn test_unsupported_container_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tune.mid");
        std::fs::write(&path, b"MThd\x00\x00\x00\x06").unwrap();
        assert!(matches!(extract(&path).unwrap(), Extraction::Skip(_)));
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        assert!(extract(&dir.path().join("gone.flac")).is_err());
    }
}
