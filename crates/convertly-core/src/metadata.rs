//! Standalone EXIF inspection. Not part of the conversion pipeline.

use std::io::Cursor;
use std::path::Path;

use exif::{In, Reader, Tag};
use serde::Serialize;
use tracing::debug;

use crate::error::{Error, Result};

pub const NO_METADATA_MESSAGE: &str = "No EXIF metadata found in this image.";
pub const UNREADABLE_MESSAGE: &str =
    "Could not read metadata from this file. It might be corrupted or not a supported image format.";

/// One displayable tag.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TagEntry {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "detail", rename_all = "camelCase")]
pub enum MetadataReport {
    Tags(Vec<TagEntry>),
    NoMetadata,
    /// Carries the decoder's reason, for logs.
    Unreadable(String),
}

impl MetadataReport {
    /// User-facing text for the non-tabular outcomes.
    pub fn message(&self) -> Option<&'static str> {
        match self {
            MetadataReport::Tags(_) => None,
            MetadataReport::NoMetadata => Some(NO_METADATA_MESSAGE),
            MetadataReport::Unreadable(_) => Some(UNREADABLE_MESSAGE),
        }
    }
}

fn is_thumbnail_field(ifd: In, tag: Tag) -> bool {
    ifd == In::THUMBNAIL
        || tag == Tag::JPEGInterchangeFormat
        || tag == Tag::JPEGInterchangeFormatLength
}

/// Extract embedded tags from raw image bytes, leaving out the thumbnail.
pub fn inspect(bytes: &[u8]) -> MetadataReport {
    let exif = match Reader::new().read_from_container(&mut Cursor::new(bytes)) {
        Ok(exif) => exif,
        Err(exif::Error::NotFound(container)) => {
            debug!(container, "no exif block");
            return MetadataReport::NoMetadata;
        }
        Err(e) => return MetadataReport::Unreadable(e.to_string()),
    };

    let tags: Vec<TagEntry> = exif
        .fields()
        .filter(|f| !is_thumbnail_field(f.ifd_num, f.tag))
        .map(|f| TagEntry {
            name: f.tag.to_string(),
            value: f.display_value().with_unit(&exif).to_string(),
        })
        .collect();

    if tags.is_empty() {
        MetadataReport::NoMetadata
    } else {
        MetadataReport::Tags(tags)
    }
}

pub fn inspect_file(path: &Path) -> Result<MetadataReport> {
    let bytes = std::fs::read(path).map_err(|e| Error::io(path, e))?;
    Ok(inspect(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::tests::sample_png;

    /// Big-endian TIFF block: IFD0 holds Make="Canon", IFD1 (thumbnail)
    /// holds Compression=6.
    fn tiff_block() -> Vec<u8> {
        let mut t = Vec::new();
        t.extend_from_slice(b"MM\x00\x2a\x00\x00\x00\x08");
        // IFD0 at 8
        t.extend_from_slice(&1u16.to_be_bytes());
        t.extend_from_slice(&[0x01, 0x0f, 0x00, 0x02]);
        t.extend_from_slice(&6u32.to_be_bytes());
        t.extend_from_slice(&26u32.to_be_bytes());
        t.extend_from_slice(&32u32.to_be_bytes());
        // string at 26
        t.extend_from_slice(b"Canon\x00");
        // IFD1 at 32
        t.extend_from_slice(&1u16.to_be_bytes());
        t.extend_from_slice(&[0x01, 0x03, 0x00, 0x03]);
        t.extend_from_slice(&1u32.to_be_bytes());
        t.extend_from_slice(&[0x00, 0x06, 0x00, 0x00]);
        t.extend_from_slice(&0u32.to_be_bytes());
        t
    }

    fn jpeg_with_exif() -> Vec<u8> {
        let img = image::load_from_memory(&sample_png(4, 4)).unwrap();
        let mut jpeg = Vec::new();
        img.to_rgb8()
            .write_with_encoder(image::codecs::jpeg::JpegEncoder::new(&mut jpeg))
            .unwrap();

        let mut payload = b"Exif\x00\x00".to_vec();
        payload.extend(tiff_block());
        let mut app1 = vec![0xff, 0xe1];
        app1.extend_from_slice(&((payload.len() + 2) as u16).to_be_bytes());
        app1.extend(payload);

        let mut out = jpeg[..2].to_vec();
        out.extend(app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }

    #[test]
    fn test_tags_listed_without_thumbnail() {
        let MetadataReport::Tags(tags) = inspect(&jpeg_with_exif()) else {
            panic!("expected tags");
        };
        assert_eq!(tags.len(), 1);
        assert_eq!(tags[0].name, "Make");
        assert!(tags[0].value.contains("Canon"));
        assert!(tags.iter().all(|t| t.name != "Compression"));
    }

    #[test]
    fn test_image_without_exif() {
        let report = inspect(&sample_png(4, 4));
        assert_eq!(report, MetadataReport::NoMetadata);
        assert_eq!(report.message(), Some(NO_METADATA_MESSAGE));
    }

    #[test]
    fn test_garbage_is_unreadable() {
        let report = inspect(b"this is not an image at all");
        assert!(matches!(report, MetadataReport::Unreadable(_)));
        assert_eq!(report.message(), Some(UNREADABLE_MESSAGE));
    }

    #[test]
    fn test_inspect_missing_file() {
        let err = inspect_file(Path::new("/definitely/not/here.jpg")).unwrap_err();
        assert!(matches!(err, Error::Io { .. }));
    }
}
