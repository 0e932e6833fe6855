//! Image format detection, decoding and encoding

use std::io::Cursor;
use std::path::Path;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilterType, PngEncoder};
use image::{DynamicImage, ImageError, RgbImage};
use img_parts::jpeg::{markers, Jpeg, JpegSegment};
use img_parts::png::{Png, PngChunk};
use img_parts::riff::{RiffChunk, RiffContent};
use img_parts::webp::{
    WebP, CHUNK_ALPH, CHUNK_ANIM, CHUNK_EXIF, CHUNK_ICCP, CHUNK_VP8L, CHUNK_VP8X, CHUNK_XMP,
};
use img_parts::{Bytes, ImageEXIF, ImageICC};
use tracing::{debug, warn};

use crate::config::{Color, ImageFormat};
use crate::error::{PressError, Result};

/// AVIF encoder speed, 1 (slowest) to 10
const AVIF_SPEED: u8 = 6;

/// Detect image format from the leading bytes, falling back to the filename
pub fn sniff_format(data: &[u8], filename: Option<&str>) -> Result<ImageFormat> {
    if data.is_empty() {
        return Err(PressError::decode("empty input buffer"));
    }

    if let Some(kind) = infer::get(data) {
        return ImageFormat::from_mime_type(kind.mime_type())
            .ok_or_else(|| PressError::unsupported_format(kind.mime_type()));
    }

    filename
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .and_then(ImageFormat::from_extension)
        .ok_or_else(|| PressError::decode("unrecognized image data"))
}

impl From<ImageFormat> for image::ImageFormat {
    fn from(format: ImageFormat) -> Self {
        match format {
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::WebP => image::ImageFormat::WebP,
            ImageFormat::Gif => image::ImageFormat::Gif,
            ImageFormat::Tiff => image::ImageFormat::Tiff,
            ImageFormat::Bmp => image::ImageFormat::Bmp,
            ImageFormat::Avif => image::ImageFormat::Avif,
        }
    }
}

/// Map decoder failures onto the error taxonomy
fn decode_error(format: ImageFormat, err: ImageError) -> PressError {
    match err {
        ImageError::Unsupported(_) => PressError::unsupported_format(format.to_string()),
        other => PressError::decode(other.to_string()),
    }
}

/// Read width and height from the header without decoding pixels
pub fn read_dimensions(data: &[u8], format: ImageFormat) -> Result<(u32, u32)> {
    let mut reader = image::ImageReader::new(Cursor::new(data));
    reader.set_format(format.into());
    reader
        .into_dimensions()
        .map_err(|e| decode_error(format, e))
}

/// Fully decode an image
pub fn decode(data: &[u8], format: ImageFormat) -> Result<DynamicImage> {
    image::load_from_memory_with_format(data, format.into()).map_err(|e| decode_error(format, e))
}

/// Get supported input formats
pub fn supported_input_formats() -> &'static [&'static str] {
    &["jpg", "jpeg", "png", "webp", "gif", "tiff", "tif", "bmp"]
}

/// Get supported output formats
pub fn supported_output_formats() -> &'static [&'static str] {
    &["jpeg", "png", "webp", "avif", "tiff"]
}

/// Check if a file extension is supported for input
pub fn is_supported_input_format(extension: &str) -> bool {
    supported_input_formats()
        .iter()
        .any(|&fmt| fmt.eq_ignore_ascii_case(extension))
}

/// PNG is lossless, so quality selects how hard the deflate stage works
fn png_compression(quality: u8) -> CompressionType {
    match quality {
        1..=60 => CompressionType::Best,
        61..=90 => CompressionType::Default,
        _ => CompressionType::Fast,
    }
}

/// Composite onto a solid background, dropping alpha
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn flatten(img: &DynamicImage, background: Color) -> RgbImage {
    if !img.color().has_alpha() {
        return img.to_rgb8();
    }

    let rgba = img.to_rgba8();
    let mut out = RgbImage::new(rgba.width(), rgba.height());
    for (dst, src) in out.pixels_mut().zip(rgba.pixels()) {
        let alpha = f32::from(src[3]) / 255.0;
        let bg = [background.r, background.g, background.b];
        for c in 0..3 {
            let value = f32::from(src[c]) * alpha + f32::from(bg[c]) * (1.0 - alpha);
            dst[c] = value.round().clamp(0.0, 255.0) as u8;
        }
    }
    out
}

/// Encode into the given output format at the given quality (1-100)
pub fn encode(img: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>> {
    let quality = quality.clamp(1, 100);
    let mut buffer = Vec::new();

    match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality);
            let result = if matches!(img, DynamicImage::ImageLuma8(_)) {
                img.write_with_encoder(encoder)
            } else {
                DynamicImage::ImageRgb8(flatten(img, Color::WHITE)).write_with_encoder(encoder)
            };
            result.map_err(|e| PressError::encode("jpeg", e.to_string()))?;
        }
        ImageFormat::Png => {
            let encoder = PngEncoder::new_with_quality(
                &mut buffer,
                png_compression(quality),
                PngFilterType::Adaptive,
            );
            let normalized = normalize_8bit(img);
            normalized
                .write_with_encoder(encoder)
                .map_err(|e| PressError::encode("png", e.to_string()))?;
        }
        ImageFormat::WebP => {
            let (width, height) = (img.width(), img.height());
            let memory = if img.color().has_alpha() {
                let rgba = img.to_rgba8();
                webp::Encoder::from_rgba(rgba.as_raw(), width, height).encode(f32::from(quality))
            } else {
                let rgb = img.to_rgb8();
                webp::Encoder::from_rgb(rgb.as_raw(), width, height).encode(f32::from(quality))
            };
            if memory.is_empty() {
                return Err(PressError::encode("webp", "encoder produced no data"));
            }
            buffer.extend_from_slice(&memory);
        }
        ImageFormat::Avif => {
            buffer = encode_avif(img, quality)?;
        }
        ImageFormat::Tiff => {
            let mut cursor = Cursor::new(&mut buffer);
            normalize_8bit(img)
                .write_to(&mut cursor, image::ImageFormat::Tiff)
                .map_err(|e| PressError::encode("tiff", e.to_string()))?;
        }
        other => return Err(PressError::unsupported_format(other.to_string())),
    }

    debug!(format = %format, quality, bytes = buffer.len(), "encoded image");
    Ok(buffer)
}

/// 16-bit and float buffers are written as 8-bit
fn normalize_8bit(img: &DynamicImage) -> DynamicImage {
    match img {
        DynamicImage::ImageLuma8(_)
        | DynamicImage::ImageLumaA8(_)
        | DynamicImage::ImageRgb8(_)
        | DynamicImage::ImageRgba8(_) => img.clone(),
        _ if img.color().has_alpha() => DynamicImage::ImageRgba8(img.to_rgba8()),
        _ => DynamicImage::ImageRgb8(img.to_rgb8()),
    }
}

fn encode_avif(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let width = img.width() as usize;
    let height = img.height() as usize;
    let encoder = ravif::Encoder::new()
        .with_quality(f32::from(quality))
        .with_speed(AVIF_SPEED);

    let encoded = if img.color().has_alpha() {
        let rgba = img.to_rgba8();
        let pixels: Vec<rgb::RGBA8> = rgba
            .as_raw()
            .chunks_exact(4)
            .map(|p| rgb::RGBA8::new(p[0], p[1], p[2], p[3]))
            .collect();
        encoder.encode_rgba(ravif::Img::new(pixels.as_slice(), width, height))
    } else {
        let rgb_img = img.to_rgb8();
        let pixels: Vec<rgb::RGB8> = rgb_img
            .as_raw()
            .chunks_exact(3)
            .map(|p| rgb::RGB8::new(p[0], p[1], p[2]))
            .collect();
        encoder.encode_rgb(ravif::Img::new(pixels.as_slice(), width, height))
    };

    encoded
        .map(|avif| avif.avif_file)
        .map_err(|e| PressError::encode("avif", e.to_string()))
}

/// Signature that opens an XMP packet inside a JPEG APP1 segment
const XMP_JPEG_HEADER: &[u8] = b"http://ns.adobe.com/xap/1.0/\0";

/// iTXt keyword of an XMP packet in PNG
const XMP_PNG_KEYWORD: &[u8] = b"XML:com.adobe.xmp";

/// Largest payload a JPEG marker segment can hold
const JPEG_SEGMENT_MAX: usize = 65533;

/// PNG ancillary chunks that hold metadata rather than pixels
const PNG_METADATA_CHUNKS: [[u8; 4]; 6] = [*b"eXIf", *b"iCCP", *b"tEXt", *b"zTXt", *b"iTXt", *b"tIME"];

const PNG_ITXT: [u8; 4] = *b"iTXt";

const VP8X_ICC: u8 = 0x20;
const VP8X_ALPHA: u8 = 0x10;
const VP8X_EXIF: u8 = 0x08;
const VP8X_XMP: u8 = 0x04;
const VP8X_ANIMATION: u8 = 0x02;

/// EXIF, ICC, XMP and IPTC blocks lifted from a source container
#[derive(Debug, Clone, Default)]
pub struct MetadataBlocks {
    pub exif: Option<Bytes>,
    pub icc: Option<Bytes>,
    /// Raw XMP packet without any container header
    pub xmp: Option<Bytes>,
    /// Photoshop APP13 resource data, JPEG only
    pub iptc: Option<Bytes>,
}

impl MetadataBlocks {
    /// Read the blocks from a JPEG, PNG or WebP source; other containers yield nothing
    pub fn read(data: &[u8], format: ImageFormat) -> Self {
        let bytes = Bytes::copy_from_slice(data);
        match format {
            ImageFormat::Jpeg => Jpeg::from_bytes(bytes)
                .map(|img| Self::from_jpeg(&img))
                .unwrap_or_default(),
            ImageFormat::Png => Png::from_bytes(bytes)
                .map(|img| Self::from_png(&img))
                .unwrap_or_default(),
            ImageFormat::WebP => WebP::from_bytes(bytes)
                .map(|img| Self::from_webp(&img))
                .unwrap_or_default(),
            _ => Self::default(),
        }
    }

    fn from_jpeg(img: &Jpeg) -> Self {
        let xmp = img
            .segments_by_marker(markers::APP1)
            .find_map(|segment| segment.contents().strip_prefix(XMP_JPEG_HEADER))
            .map(Bytes::copy_from_slice);

        let iptc: Vec<u8> = img
            .segments_by_marker(markers::APP13)
            .flat_map(|segment| segment.contents().iter().copied())
            .collect();

        Self {
            exif: img.exif(),
            icc: img.icc_profile(),
            xmp,
            iptc: (!iptc.is_empty()).then(|| Bytes::from(iptc)),
        }
    }

    fn from_png(img: &Png) -> Self {
        Self {
            exif: img.exif(),
            icc: img.icc_profile(),
            xmp: img
                .chunks_by_type(PNG_ITXT)
                .find_map(|chunk| png_xmp_text(chunk.contents()))
                .map(Bytes::copy_from_slice),
            iptc: None,
        }
    }

    fn from_webp(img: &WebP) -> Self {
        Self {
            exif: img.exif(),
            icc: img.icc_profile(),
            xmp: img
                .chunk_by_id(CHUNK_XMP)
                .and_then(|chunk| chunk.content().data())
                .cloned(),
            iptc: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.exif.is_none() && self.icc.is_none() && self.xmp.is_none() && self.iptc.is_none()
    }
}

/// Text of an uncompressed XMP iTXt chunk
fn png_xmp_text(contents: &[u8]) -> Option<&[u8]> {
    let rest = contents.strip_prefix(XMP_PNG_KEYWORD)?.strip_prefix(b"\0")?;
    let (&compressed, rest) = rest.split_first()?;
    let (_method, rest) = rest.split_first()?;
    if compressed != 0 {
        return None;
    }
    let language_end = rest.iter().position(|&b| b == 0)?;
    let rest = &rest[language_end + 1..];
    let translated_end = rest.iter().position(|&b| b == 0)?;
    Some(&rest[translated_end + 1..])
}

fn png_xmp_chunk(xmp: &[u8]) -> PngChunk {
    let mut contents = Vec::with_capacity(XMP_PNG_KEYWORD.len() + 5 + xmp.len());
    contents.extend_from_slice(XMP_PNG_KEYWORD);
    // null separator, uncompressed, method 0, empty language and translated keyword
    contents.extend_from_slice(&[0, 0, 0, 0, 0]);
    contents.extend_from_slice(xmp);
    PngChunk::new(PNG_ITXT, Bytes::from(contents))
}

/// Copy source metadata into a freshly encoded buffer.
///
/// JPEG to JPEG keeps every APPn segment except the JFIF header and the
/// Adobe transform marker, byte for byte. PNG to PNG keeps the metadata
/// chunks the same way. Across containers EXIF, ICC and XMP are rewritten
/// in the target's native form; IPTC survives only into JPEG.
/// Targets without a writable container (AVIF, TIFF) come back unchanged.
pub fn carry_metadata(
    source: &[u8],
    source_format: ImageFormat,
    encoded: Vec<u8>,
    target_format: ImageFormat,
) -> Vec<u8> {
    let rewritten = match (source_format, target_format) {
        (ImageFormat::Jpeg, ImageFormat::Jpeg) => copy_jpeg_segments(source, &encoded),
        (ImageFormat::Png, ImageFormat::Png) => copy_png_chunks(source, &encoded),
        (_, ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP) => {
            let blocks = MetadataBlocks::read(source, source_format);
            if blocks.is_empty() {
                return encoded;
            }
            match target_format {
                ImageFormat::Jpeg => write_jpeg_blocks(&blocks, &encoded),
                ImageFormat::Png => write_png_blocks(&blocks, &encoded),
                _ => write_webp_blocks(&blocks, &encoded),
            }
        }
        _ => return encoded,
    };

    match rewritten {
        Ok(Some(bytes)) => bytes.to_vec(),
        Ok(None) => encoded,
        Err(e) => {
            warn!(format = %target_format, "could not carry metadata through: {}", e);
            encoded
        }
    }
}

fn is_carried_jpeg_marker(marker: u8) -> bool {
    (markers::APP1..=markers::APP15).contains(&marker) && marker != markers::APP14
}

/// Index of the first segment after the leading APPn run
fn after_app_segments(jpeg: &Jpeg) -> usize {
    jpeg.segments()
        .iter()
        .position(|segment| !(markers::APP0..=markers::APP15).contains(&segment.marker()))
        .unwrap_or(jpeg.segments().len())
}

fn copy_jpeg_segments(source: &[u8], encoded: &[u8]) -> img_parts::Result<Option<Bytes>> {
    let source = Jpeg::from_bytes(Bytes::copy_from_slice(source))?;
    let carried: Vec<JpegSegment> = source
        .segments()
        .iter()
        .filter(|segment| is_carried_jpeg_marker(segment.marker()))
        .cloned()
        .collect();
    if carried.is_empty() {
        return Ok(None);
    }

    let mut target = Jpeg::from_bytes(Bytes::copy_from_slice(encoded))?;
    target
        .segments_mut()
        .retain(|segment| !is_carried_jpeg_marker(segment.marker()));
    let at = after_app_segments(&target);
    target.segments_mut().splice(at..at, carried);
    Ok(Some(target.encoder().bytes()))
}

fn copy_png_chunks(source: &[u8], encoded: &[u8]) -> img_parts::Result<Option<Bytes>> {
    let source = Png::from_bytes(Bytes::copy_from_slice(source))?;
    let carried: Vec<PngChunk> = source
        .chunks()
        .iter()
        .filter(|chunk| PNG_METADATA_CHUNKS.contains(&chunk.kind()))
        .cloned()
        .collect();
    if carried.is_empty() {
        return Ok(None);
    }

    let mut target = Png::from_bytes(Bytes::copy_from_slice(encoded))?;
    target
        .chunks_mut()
        .retain(|chunk| !PNG_METADATA_CHUNKS.contains(&chunk.kind()));
    // right after IHDR
    let at = target.chunks().len().min(1);
    target.chunks_mut().splice(at..at, carried);
    Ok(Some(target.encoder().bytes()))
}

fn write_jpeg_blocks(blocks: &MetadataBlocks, encoded: &[u8]) -> img_parts::Result<Option<Bytes>> {
    let mut jpeg = Jpeg::from_bytes(Bytes::copy_from_slice(encoded))?;
    if blocks.icc.is_some() {
        jpeg.set_icc_profile(blocks.icc.clone());
    }
    if blocks.exif.is_some() {
        jpeg.set_exif(blocks.exif.clone());
    }

    let mut extra = Vec::new();
    if let Some(xmp) = &blocks.xmp {
        if XMP_JPEG_HEADER.len() + xmp.len() <= JPEG_SEGMENT_MAX {
            let mut contents = Vec::with_capacity(XMP_JPEG_HEADER.len() + xmp.len());
            contents.extend_from_slice(XMP_JPEG_HEADER);
            contents.extend_from_slice(xmp);
            extra.push(JpegSegment::new_with_contents(markers::APP1, Bytes::from(contents)));
        } else {
            warn!(bytes = xmp.len(), "XMP packet does not fit one JPEG segment, dropped");
        }
    }
    if let Some(iptc) = &blocks.iptc {
        extra.extend(
            iptc.chunks(JPEG_SEGMENT_MAX)
                .map(|part| JpegSegment::new_with_contents(markers::APP13, Bytes::copy_from_slice(part))),
        );
    }

    let at = after_app_segments(&jpeg);
    jpeg.segments_mut().splice(at..at, extra);
    Ok(Some(jpeg.encoder().bytes()))
}

fn write_png_blocks(blocks: &MetadataBlocks, encoded: &[u8]) -> img_parts::Result<Option<Bytes>> {
    let mut png = Png::from_bytes(Bytes::copy_from_slice(encoded))?;
    if blocks.icc.is_some() {
        png.set_icc_profile(blocks.icc.clone());
    }
    if blocks.exif.is_some() {
        png.set_exif(blocks.exif.clone());
    }
    if let Some(xmp) = &blocks.xmp {
        // before IEND
        let at = png.chunks().len().saturating_sub(1);
        png.chunks_mut().insert(at, png_xmp_chunk(xmp));
    }
    if blocks.iptc.is_some() {
        debug!("PNG has no IPTC container, IPTC block dropped");
    }
    Ok(Some(png.encoder().bytes()))
}

fn write_webp_blocks(blocks: &MetadataBlocks, encoded: &[u8]) -> img_parts::Result<Option<Bytes>> {
    let mut webp = WebP::from_bytes(Bytes::copy_from_slice(encoded))?;
    if blocks.icc.is_some() {
        webp.set_icc_profile(blocks.icc.clone());
    }
    if blocks.exif.is_some() {
        webp.set_exif(blocks.exif.clone());
    }
    if let Some(xmp) = &blocks.xmp {
        webp.remove_chunks_by_id(CHUNK_XMP);
        webp.chunks_mut()
            .push(RiffChunk::new(CHUNK_XMP, RiffContent::Data(xmp.clone())));
    }
    if blocks.iptc.is_some() {
        debug!("WebP has no IPTC container, IPTC block dropped");
    }
    sync_vp8x_flags(&mut webp);
    Ok(Some(webp.encoder().bytes()))
}

/// Make the VP8X header agree with the chunks present, creating it when
/// metadata was added to a simple-format file
fn sync_vp8x_flags(webp: &mut WebP) {
    let mut flags = 0u8;
    for (id, bit) in [
        (CHUNK_ICCP, VP8X_ICC),
        (CHUNK_ALPH, VP8X_ALPHA),
        (CHUNK_EXIF, VP8X_EXIF),
        (CHUNK_XMP, VP8X_XMP),
        (CHUNK_ANIM, VP8X_ANIMATION),
    ] {
        if webp.has_chunk(id) {
            flags |= bit;
        }
    }
    if vp8l_has_alpha(webp) {
        flags |= VP8X_ALPHA;
    }

    let existing = webp
        .chunks_mut()
        .iter_mut()
        .find(|chunk| chunk.id() == CHUNK_VP8X);
    if let Some(chunk) = existing {
        if let RiffContent::Data(data) = chunk.content_mut() {
            let mut header = data.to_vec();
            if let Some(first) = header.first_mut() {
                *first = flags | (*first & VP8X_ALPHA);
            }
            *data = Bytes::from(header);
        }
        return;
    }

    if flags == 0 {
        return;
    }
    let Some((width, height)) = webp.dimensions() else {
        warn!("WebP dimensions unreadable, extended header not written");
        return;
    };

    let mut header = vec![flags, 0, 0, 0];
    header.extend_from_slice(&width.saturating_sub(1).to_le_bytes()[..3]);
    header.extend_from_slice(&height.saturating_sub(1).to_le_bytes()[..3]);
    webp.chunks_mut()
        .insert(0, RiffChunk::new(CHUNK_VP8X, RiffContent::Data(Bytes::from(header))));
}

/// Alpha bit of a lossless bitstream header
fn vp8l_has_alpha(webp: &WebP) -> bool {
    webp.chunk_by_id(CHUNK_VP8L)
        .and_then(|chunk| chunk.content().data())
        .and_then(|data| data.get(1..5))
        .and_then(|bits| <[u8; 4]>::try_from(bits).ok())
        .is_some_and(|bits| (u32::from_le_bytes(bits) >> 28) & 1 == 1)
}
