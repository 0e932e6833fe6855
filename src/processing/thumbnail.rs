//! Multi-size thumbnail generation from a single decode

use std::io::{Cursor, Write};
use std::path::Path;

use bytes::Bytes;
use image::DynamicImage;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use zip::write::{FileOptions, ZipWriter};
use zip::CompressionMethod;

use crate::config::{
    Color, FitMode, ImageFormat, PresetSize, PresetTable, TargetFormat, ThumbnailConfig,
};
use crate::error::{PressError, Result};
use crate::processing::formats::{decode, encode};
use crate::processing::resize::{ImageResizer, ResizeRequest};
use crate::processing::validation::ImageValidator;
use crate::processing::ImageInput;

/// One requested output size
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ThumbnailSize {
    /// Name looked up in the preset table
    Preset(String),
    Custom {
        width: u32,
        height: u32,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },
}

impl ThumbnailSize {
    pub fn preset<S: Into<String>>(name: S) -> Self {
        Self::Preset(name.into())
    }

    pub fn custom(width: u32, height: u32) -> Self {
        Self::Custom {
            width,
            height,
            name: None,
        }
    }

    /// Label used in results and archive entry names
    pub fn label(&self) -> String {
        match self {
            Self::Preset(name) => name.clone(),
            Self::Custom {
                name: Some(name), ..
            } => name.clone(),
            Self::Custom { width, height, .. } => format!("{width}x{height}"),
        }
    }

    fn kind(&self) -> ThumbnailKind {
        match self {
            Self::Preset(_) => ThumbnailKind::Preset,
            Self::Custom { .. } => ThumbnailKind::Custom,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThumbnailKind {
    Preset,
    Custom,
}

/// A set of sizes to derive from one source image
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailRequest {
    pub sizes: Vec<ThumbnailSize>,

    /// Falls back to the generator's configured fit mode
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitMode>,

    #[serde(alias = "preserveAspectRatio")]
    pub preserve_aspect_ratio: bool,

    pub background: Color,
    pub format: TargetFormat,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<u8>,

    #[serde(alias = "createArchive")]
    pub create_archive: bool,
}

impl Default for ThumbnailRequest {
    fn default() -> Self {
        Self {
            sizes: Vec::new(),
            fit: None,
            preserve_aspect_ratio: true,
            background: Color::WHITE,
            format: TargetFormat::Auto,
            quality: None,
            create_archive: false,
        }
    }
}

impl ThumbnailRequest {
    pub fn presets<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            sizes: names.into_iter().map(ThumbnailSize::preset).collect(),
            ..Self::default()
        }
    }

    pub fn size(mut self, size: ThumbnailSize) -> Self {
        self.sizes.push(size);
        self
    }

    pub fn fit(mut self, fit: FitMode) -> Self {
        self.fit = Some(fit);
        self
    }

    pub fn format(mut self, format: TargetFormat) -> Self {
        self.format = format;
        self
    }

    pub fn with_archive(mut self) -> Self {
        self.create_archive = true;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.sizes.is_empty() {
            return Err(PressError::invalid_parameters(
                "at least one thumbnail size is required",
            ));
        }
        if let Some(quality) = self.quality {
            if quality == 0 || quality > 100 {
                return Err(PressError::invalid_parameters(format!(
                    "Quality must be between 1-100, got {quality}"
                )));
            }
        }
        Ok(())
    }
}

/// One derivative; exactly one of `buffer` and `error` is set
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailOutput {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: ThumbnailKind,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub size_bytes: u64,
    #[serde(skip)]
    pub buffer: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ThumbnailOutput {
    pub fn is_ok(&self) -> bool {
        self.error.is_none() && self.buffer.is_some()
    }

    fn failed(size: &ThumbnailSize, format: ImageFormat, error: &PressError) -> Self {
        Self {
            name: size.label(),
            kind: size.kind(),
            width: 0,
            height: 0,
            format,
            size_bytes: 0,
            buffer: None,
            error: Some(error.user_message()),
        }
    }
}

/// Zip bundle of the successful thumbnails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailArchive {
    pub entries: Vec<String>,
    pub size_bytes: u64,
    #[serde(skip)]
    pub buffer: Option<Bytes>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThumbnailSet {
    pub thumbnails: Vec<ThumbnailOutput>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<ThumbnailArchive>,
}

impl ThumbnailSet {
    pub fn succeeded(&self) -> usize {
        self.thumbnails.iter().filter(|t| t.is_ok()).count()
    }

    pub fn failed(&self) -> usize {
        self.thumbnails.len() - self.succeeded()
    }
}

/// Decodes once and resizes/encodes every requested size in parallel
#[derive(Debug, Clone)]
pub struct ThumbnailGenerator {
    presets: PresetTable,
    default_fit: FitMode,
    default_quality: u8,
    resizer: ImageResizer,
    validator: ImageValidator,
}

impl Default for ThumbnailGenerator {
    fn default() -> Self {
        Self::from_config(&ThumbnailConfig::default())
    }
}

impl ThumbnailGenerator {
    pub fn from_config(config: &ThumbnailConfig) -> Self {
        Self {
            presets: config.presets.clone(),
            default_fit: config.fit,
            default_quality: config.quality,
            resizer: ImageResizer::new(),
            validator: ImageValidator::new(),
        }
    }

    pub fn with_validator(mut self, validator: ImageValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn with_presets(mut self, presets: PresetTable) -> Self {
        self.presets = presets;
        self
    }

    pub fn presets(&self) -> &PresetTable {
        &self.presets
    }

    /// A failing size never aborts its siblings; only a source that fails
    /// validation or decoding, or a malformed request, fails the whole call.
    pub fn generate(
        &self,
        input: &ImageInput,
        request: &ThumbnailRequest,
        cancel: Option<&CancellationToken>,
    ) -> Result<ThumbnailSet> {
        request.validate()?;
        let source_format = self.validator.validate(input)?.format;
        let image = decode(input.data(), source_format)?;
        let format = request.format.resolve(source_format);
        let quality = request.quality.unwrap_or(self.default_quality);

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(PressError::Cancelled);
        }

        let thumbnails: Vec<ThumbnailOutput> = request
            .sizes
            .par_iter()
            .map(|size| match self.render(&image, size, request, format, quality) {
                Ok(output) => output,
                Err(e) => {
                    warn!(thumbnail = %size.label(), "thumbnail failed: {}", e);
                    ThumbnailOutput::failed(size, format, &e)
                }
            })
            .collect();

        if cancel.is_some_and(CancellationToken::is_cancelled) {
            return Err(PressError::Cancelled);
        }

        let archive = request
            .create_archive
            .then(|| bundle(&input.filename, &thumbnails));

        debug!(
            filename = %input.filename,
            requested = request.sizes.len(),
            produced = thumbnails.iter().filter(|t| t.is_ok()).count(),
            "thumbnails generated"
        );
        Ok(ThumbnailSet {
            thumbnails,
            archive,
        })
    }

    fn target(&self, size: &ThumbnailSize) -> Result<PresetSize> {
        let target = match size {
            ThumbnailSize::Preset(name) => self.presets.resolve(name)?,
            ThumbnailSize::Custom { width, height, .. } => PresetSize::new(*width, *height),
        };
        target.validate()?;
        Ok(target)
    }

    fn render(
        &self,
        image: &DynamicImage,
        size: &ThumbnailSize,
        request: &ThumbnailRequest,
        format: ImageFormat,
        quality: u8,
    ) -> Result<ThumbnailOutput> {
        let target = self.target(size)?;
        let fit = target
            .fit
            .or(request.fit)
            .unwrap_or(self.default_fit);
        let resize = ResizeRequest::exact(target.width, target.height, fit)
            .background(request.background)
            .preserve_aspect_ratio(request.preserve_aspect_ratio);

        let resized = self.resizer.resize(image, &resize)?;
        let encoded = encode(&resized, format, quality)?;

        Ok(ThumbnailOutput {
            name: size.label(),
            kind: size.kind(),
            width: resized.width(),
            height: resized.height(),
            format,
            size_bytes: encoded.len() as u64,
            buffer: Some(Bytes::from(encoded)),
            error: None,
        })
    }
}

/// Archive entry name: `<stem>_<thumbnail name>.<ext>`
pub fn entry_name(source_filename: &str, thumbnail: &ThumbnailOutput) -> String {
    let stem = Path::new(source_filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("image");
    format!("{}_{}.{}", stem, thumbnail.name, thumbnail.format.extension())
}

/// Archive failures are reported on the archive itself, never on the thumbnails
fn bundle(source_filename: &str, thumbnails: &[ThumbnailOutput]) -> ThumbnailArchive {
    let mut entries = Vec::new();
    match write_zip(source_filename, thumbnails, &mut entries) {
        Ok(buffer) => ThumbnailArchive {
            entries,
            size_bytes: buffer.len() as u64,
            buffer: Some(Bytes::from(buffer)),
            error: None,
        },
        Err(e) => {
            warn!("thumbnail archive failed: {}", e);
            ThumbnailArchive {
                entries: Vec::new(),
                size_bytes: 0,
                buffer: None,
                error: Some(e.user_message()),
            }
        }
    }
}

fn write_zip(
    source_filename: &str,
    thumbnails: &[ThumbnailOutput],
    entries: &mut Vec<String>,
) -> Result<Vec<u8>> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    let options = FileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .unix_permissions(0o644);

    for thumbnail in thumbnails {
        let Some(buffer) = thumbnail.buffer.as_ref().filter(|_| thumbnail.error.is_none()) else {
            continue;
        };
        let name = entry_name(source_filename, thumbnail);
        zip.start_file(name.as_str(), options)?;
        zip.write_all(buffer)
            .map_err(|e| PressError::archive(format!("failed to write {name}: {e}")))?;
        entries.push(name);
    }

    let cursor = zip.finish()?;
    Ok(cursor.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};
    use std::io::Read;

    fn jpeg_input(width: u32, height: u32) -> ImageInput {
        let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, 128])
        }));
        ImageInput::new("holiday.jpg", encode(&img, ImageFormat::Jpeg, 90).unwrap())
    }

    #[test]
    fn test_presets_with_default_cover() {
        let request = ThumbnailRequest::presets(["thumbnail", "small"]);
        let set = ThumbnailGenerator::default()
            .generate(&jpeg_input(800, 400), &request, None)
            .unwrap();

        assert_eq!(set.thumbnails.len(), 2);
        assert_eq!(set.thumbnails[0].name, "thumbnail");
        assert_eq!((set.thumbnails[0].width, set.thumbnails[0].height), (150, 150));
        assert_eq!((set.thumbnails[1].width, set.thumbnails[1].height), (300, 300));
        assert!(set.thumbnails.iter().all(|t| t.format == ImageFormat::Jpeg));
        assert!(set.archive.is_none());
    }

    #[test]
    fn test_source_over_dimension_ceiling_is_rejected() {
        let generator = ThumbnailGenerator::default().with_validator(ImageValidator::with_limits(u64::MAX, 1000));
        let result = generator.generate(&jpeg_input(1200, 10), &ThumbnailRequest::presets(["small"]), None);
        assert!(matches!(result, Err(PressError::Dimension { .. })));
    }

    #[test]
    fn test_cover_thumbnail_of_thin_strip() {
        let request = ThumbnailRequest::presets(["thumbnail", "small"]).fit(FitMode::Cover);
        let set = ThumbnailGenerator::default()
            .generate(&jpeg_input(4000, 1), &request, None)
            .unwrap();
        assert_eq!(set.succeeded(), 2);
        assert_eq!((set.thumbnails[0].width, set.thumbnails[0].height), (150, 150));
        assert_eq!((set.thumbnails[1].width, set.thumbnails[1].height), (300, 300));
    }

    #[test]
    fn test_inside_never_upscales() {
        let request = ThumbnailRequest::presets(["large"]).fit(FitMode::Inside);
        let set = ThumbnailGenerator::default()
            .generate(&jpeg_input(400, 200), &request, None)
            .unwrap();
        assert_eq!((set.thumbnails[0].width, set.thumbnails[0].height), (400, 200));
    }

    #[test]
    fn test_custom_size_and_format() {
        let request = ThumbnailRequest::default()
            .size(ThumbnailSize::custom(64, 48))
            .fit(FitMode::Fill)
            .format(TargetFormat::Png);
        let set = ThumbnailGenerator::default()
            .generate(&jpeg_input(200, 200), &request, None)
            .unwrap();

        let thumb = &set.thumbnails[0];
        assert_eq!(thumb.name, "64x48");
        assert_eq!(thumb.kind, ThumbnailKind::Custom);
        assert_eq!((thumb.width, thumb.height), (64, 48));
        assert_eq!(thumb.format, ImageFormat::Png);
        assert_eq!(thumb.size_bytes, thumb.buffer.as_ref().unwrap().len() as u64);
    }

    #[test]
    fn test_partial_failure_excluded_from_archive() {
        let mut presets = PresetTable::default();
        presets.insert("medium", PresetSize::new(0, 0));
        let generator = ThumbnailGenerator::default().with_presets(presets);

        let request = ThumbnailRequest::presets(["small", "medium"]).with_archive();
        let set = generator.generate(&jpeg_input(640, 480), &request, None).unwrap();

        assert!(set.thumbnails[0].is_ok());
        assert_eq!(set.thumbnails[1].name, "medium");
        assert!(set.thumbnails[1].error.is_some());
        assert!(set.thumbnails[1].buffer.is_none());

        let archive = set.archive.unwrap();
        assert_eq!(archive.entries, vec!["holiday_small.jpg".to_string()]);

        let mut zip = zip::ZipArchive::new(Cursor::new(archive.buffer.unwrap().to_vec())).unwrap();
        assert_eq!(zip.len(), 1);
        let mut entry = zip.by_name("holiday_small.jpg").unwrap();
        let mut contents = Vec::new();
        entry.read_to_end(&mut contents).unwrap();
        assert_eq!(contents.len() as u64, set.thumbnails[0].size_bytes);
    }

    #[test]
    fn test_unknown_preset_is_item_error() {
        let request = ThumbnailRequest::presets(["small", "poster"]);
        let set = ThumbnailGenerator::default()
            .generate(&jpeg_input(100, 100), &request, None)
            .unwrap();
        assert_eq!(set.succeeded(), 1);
        assert_eq!(set.failed(), 1);
    }

    #[test]
    fn test_empty_request_rejected() {
        let result =
            ThumbnailGenerator::default().generate(&jpeg_input(10, 10), &ThumbnailRequest::default(), None);
        assert!(matches!(result, Err(PressError::InvalidParameters { .. })));
    }

    #[test]
    fn test_request_from_json() {
        let request: ThumbnailRequest = serde_json::from_str(
            r#"{"sizes": ["small", {"width": 32, "height": 32, "name": "icon"}], "createArchive": true}"#,
        )
        .unwrap();
        assert_eq!(request.sizes[0], ThumbnailSize::preset("small"));
        assert_eq!(request.sizes[1].label(), "icon");
        assert!(request.create_archive);
        assert!(request.preserve_aspect_ratio);
    }
}
