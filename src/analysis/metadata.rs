//! Best-effort EXIF, IPTC, XMP and ICC extraction

use exif::{Context, Field, In, Reader, Tag, Value};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ImageFormat;
use crate::processing::formats::MetadataBlocks;

const EXIF_HEADER: &[u8] = b"Exif\0\0";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockInfo {
    pub size_bytes: usize,
}

/// Parsed subset of the EXIF block
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ExifSummary {
    pub size_bytes: usize,
    pub make: Option<String>,
    pub model: Option<String>,
    pub date_time: Option<String>,
    pub orientation: Option<u32>,
    pub exposure_time: Option<String>,
    pub f_number: Option<f64>,
    pub iso: Option<u32>,
    pub has_gps: bool,
    pub field_count: usize,
    /// Set when the block is present but could not be parsed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parse_error: Option<String>,
}

/// Which metadata blocks the file carries; absent blocks are simply `None`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetadataReport {
    pub exif: Option<ExifSummary>,
    pub iptc: Option<BlockInfo>,
    pub xmp: Option<BlockInfo>,
    pub icc: Option<BlockInfo>,
}

impl MetadataReport {
    pub fn has_exif(&self) -> bool {
        self.exif.is_some()
    }

    pub fn is_empty(&self) -> bool {
        self.exif.is_none() && self.iptc.is_none() && self.xmp.is_none() && self.icc.is_none()
    }

    /// Bytes spent on metadata blocks
    pub fn total_bytes(&self) -> usize {
        self.exif.as_ref().map_or(0, |e| e.size_bytes)
            + self.iptc.map_or(0, |b| b.size_bytes)
            + self.xmp.map_or(0, |b| b.size_bytes)
            + self.icc.map_or(0, |b| b.size_bytes)
    }
}

pub fn extract_metadata(data: &[u8], format: ImageFormat) -> MetadataReport {
    let blocks = MetadataBlocks::read(data, format);
    let info = |block: &img_parts::Bytes| BlockInfo {
        size_bytes: block.len(),
    };
    let report = MetadataReport {
        exif: blocks.exif.as_deref().map(summarize_exif),
        iptc: blocks.iptc.as_ref().map(info),
        xmp: blocks.xmp.as_ref().map(info),
        icc: blocks.icc.as_ref().map(info),
    };
    debug!(
        exif = report.exif.is_some(),
        iptc = report.iptc.is_some(),
        xmp = report.xmp.is_some(),
        icc = report.icc.is_some(),
        "metadata extracted"
    );
    report
}

pub fn summarize_exif(raw: &[u8]) -> ExifSummary {
    let tiff = raw.strip_prefix(EXIF_HEADER).unwrap_or(raw);
    let mut summary = ExifSummary {
        size_bytes: raw.len(),
        ..ExifSummary::default()
    };

    let exif = match Reader::new().read_raw(tiff.to_vec()) {
        Ok(exif) => exif,
        Err(e) => {
            summary.parse_error = Some(e.to_string());
            return summary;
        }
    };

    let field = |tag: Tag| exif.get_field(tag, In::PRIMARY);
    summary.make = field(Tag::Make).and_then(ascii);
    summary.model = field(Tag::Model).and_then(ascii);
    summary.date_time = field(Tag::DateTimeOriginal)
        .or_else(|| field(Tag::DateTime))
        .and_then(ascii);
    summary.orientation = field(Tag::Orientation).and_then(|f| f.value.get_uint(0));
    summary.exposure_time = field(Tag::ExposureTime).map(|f| f.display_value().to_string());
    summary.f_number = field(Tag::FNumber).and_then(|f| match &f.value {
        Value::Rational(values) => values.first().map(|r| r.to_f64()),
        _ => None,
    });
    summary.iso = field(Tag::PhotographicSensitivity).and_then(|f| f.value.get_uint(0));
    summary.has_gps = exif.fields().any(|f| f.tag.context() == Context::Gps);
    summary.field_count = exif.fields().count();
    summary
}

fn ascii(field: &Field) -> Option<String> {
    match &field.value {
        Value::Ascii(parts) => parts
            .first()
            .map(|bytes| String::from_utf8_lossy(bytes).trim_end_matches('\0').trim().to_string())
            .filter(|s| !s.is_empty()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::processing::formats::encode;
    use image::{DynamicImage, ImageBuffer, Rgb};
    use img_parts::jpeg::{markers, Jpeg, JpegSegment};
    use img_parts::{Bytes, ImageEXIF};

    /// Little-endian TIFF with one IFD holding Make = "Acme"
    fn tiff_with_make() -> Vec<u8> {
        let mut tiff = b"II*\0".to_vec();
        tiff.extend_from_slice(&8u32.to_le_bytes());
        tiff.extend_from_slice(&1u16.to_le_bytes());
        tiff.extend_from_slice(&0x010fu16.to_le_bytes()); // Make
        tiff.extend_from_slice(&2u16.to_le_bytes()); // ASCII
        tiff.extend_from_slice(&5u32.to_le_bytes());
        tiff.extend_from_slice(&26u32.to_le_bytes());
        tiff.extend_from_slice(&0u32.to_le_bytes()); // no next IFD
        tiff.extend_from_slice(b"Acme\0");
        tiff
    }

    fn jpeg() -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(16, 16, Rgb([90, 120, 200])));
        encode(&img, ImageFormat::Jpeg, 85).unwrap()
    }

    #[test]
    fn test_plain_image_has_no_metadata() {
        let report = extract_metadata(&jpeg(), ImageFormat::Jpeg);
        assert!(report.is_empty());
        assert_eq!(report.total_bytes(), 0);
    }

    #[test]
    fn test_exif_is_found_and_parsed() {
        let mut parts = Jpeg::from_bytes(Bytes::from(jpeg())).unwrap();
        parts.set_exif(Some(Bytes::from(tiff_with_make())));
        let tagged = parts.encoder().bytes().to_vec();

        let report = extract_metadata(&tagged, ImageFormat::Jpeg);
        let exif = report.exif.as_ref().expect("exif block");
        assert_eq!(exif.make.as_deref(), Some("Acme"));
        assert!(exif.parse_error.is_none());
        assert!(!exif.has_gps);
        assert!(report.has_exif());
    }

    #[test]
    fn test_unparseable_exif_is_reported_not_fatal() {
        let summary = summarize_exif(b"Exif\0\0garbage");
        assert!(summary.parse_error.is_some());
        assert_eq!(summary.size_bytes, 13);
    }

    #[test]
    fn test_iptc_and_xmp_blocks_are_sized() {
        let mut parts = Jpeg::from_bytes(Bytes::from(jpeg())).unwrap();
        let iptc = b"Photoshop 3.0\08BIM\x04\x04\0\0\0\0\0\0".to_vec();
        let mut xmp = b"http://ns.adobe.com/xap/1.0/\0".to_vec();
        xmp.extend_from_slice(b"<x:xmpmeta/>");
        parts
            .segments_mut()
            .insert(1, JpegSegment::new_with_contents(markers::APP13, Bytes::from(iptc.clone())));
        parts
            .segments_mut()
            .insert(1, JpegSegment::new_with_contents(markers::APP1, Bytes::from(xmp)));
        let tagged = parts.encoder().bytes().to_vec();

        let report = extract_metadata(&tagged, ImageFormat::Jpeg);
        assert_eq!(report.iptc, Some(BlockInfo { size_bytes: iptc.len() }));
        assert_eq!(report.xmp, Some(BlockInfo { size_bytes: 12 }));
        assert!(!report.is_empty());
    }
}
