//! Camera metadata from EXIF blocks.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use exif::{In, Tag, Value};

use super::{Extraction, MetaError};
use crate::catalog::{DerivedTag, MetaRecord, MetaTable};

pub(super) fn extract(path: &Path) -> Result<Extraction, MetaError> {
    let mut reader = BufReader::new(File::open(path)?);
    let data = match exif::Reader::new().read_from_container(&mut reader) {
        Ok(data) => data,
        Err(exif::Error::NotFound(_) | exif::Error::NotSupported(_) | exif::Error::BlankValue(_)) => {
            return Ok(Extraction::Skip("no EXIF data".into()));
        }
        Err(e) => return Err(e.into()),
    };

    let mut record = MetaRecord::new(MetaTable::PictureJpegMeta);

    if let Some(model) = ascii(&data, Tag::Model) {
        record = record
            .with_column("model", model.clone())
            .with_tag(DerivedTag::plain(model));
    }
    if let Some(artist) = ascii(&data, Tag::Artist) {
        record = record.with_column("artist", artist);
    }
    if let Some(iso) = data
        .get_field(Tag::PhotographicSensitivity, In::PRIMARY)
        .and_then(|field| field.value.get_uint(0))
    {
        record = record.with_column("iso", iso.to_string());
    }
    if let Some(fstop) = data
        .get_field(Tag::FNumber, In::PRIMARY)
        .and_then(|field| match &field.value {
            Value::Rational(values) => values.first().map(|r| r.to_f64()),
            _ => None,
        })
    {
        record = record.with_column("fstop", format!("{fstop:.1}"));
    }

    let year = [Tag::DateTimeDigitized, Tag::DateTimeOriginal, Tag::DateTime]
        .into_iter()
        .find_map(|tag| capture_year(&data, tag));
    if let Some(year) = year {
        record = record
            .with_column("year", year.clone())
            .with_tag(DerivedTag::plain(year));
    }

    if record.columns.is_empty() {
        return Ok(Extraction::Skip("EXIF block has no usable fields".into()));
    }
    Ok(Extraction::Record(record))
}

fn ascii(data: &exif::Exif, tag: Tag) -> Option<String> {
    let field = data.get_field(tag, In::PRIMARY)?;
    let Value::Ascii(values) = &field.value else {
        return None;
    };
    let text = String::from_utf8_lossy(values.first()?);
    let text = text.trim_matches(|c: char| c == '\0' || c.is_whitespace());
    (!text.is_empty()).then(|| text.to_string())
}

fn capture_year(data: &exif::Exif, tag: Tag) -> Option<String> {
    let field = data.get_field(tag, In::PRIMARY)?;
    let Value::Ascii(values) = &field.value else {
        return None;
    };
    let stamp = exif::DateTime::from_ascii(values.first()?).ok()?;
    (stamp.year > 0).then(|| stamp.year.to_string())
}

/// A bare JPEG carrying an EXIF block with the camera model and the
/// original capture time.
#[cfg(test)]
pub(crate) fn tagged_jpeg(model: &str, taken: &str) -> Vec<u8> {
    use exif::Field;
    use exif::experimental::Writer;

    let fields = [
        Field {
            tag: Tag::Model,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![model.as_bytes().to_vec()]),
        },
        Field {
            tag: Tag::DateTimeOriginal,
            ifd_num: In::PRIMARY,
            value: Value::Ascii(vec![taken.as_bytes().to_vec()]),
        },
    ];
    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut tiff = std::io::Cursor::new(Vec::new());
    writer.write(&mut tiff, false).unwrap();
    let tiff = tiff.into_inner();

    let mut jpeg = vec![0xFF, 0xD8, 0xFF, 0xE1];
    let segment_len = u16::try_from(2 + 6 + tiff.len()).unwrap();
    jpeg.extend_from_slice(&segment_len.to_be_bytes());
    jpeg.extend_from_slice(b"Exif\0\0");
    jpeg.extend_from_slice(&tiff);
    jpeg.extend_from_slice(&[0xFF, 0xD9]);
    jpeg
}
