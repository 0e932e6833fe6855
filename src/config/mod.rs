//! Configuration management for imgpress

use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{PressError, Result};

pub mod presets;
pub use presets::*;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Defaults for single-image operations
    pub processing: ProcessingConfig,

    /// Retry, timeout and concurrency policy for batches
    pub batch: BatchOptions,

    /// Thumbnail presets
    pub thumbnails: ThumbnailConfig,

    /// Analysis defaults
    pub analysis: AnalysisOptions,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Global processing configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Output quality (1-100)
    pub quality: u8,

    /// Output format
    pub format: TargetFormat,

    /// Carry EXIF/ICC through re-encodes
    pub preserve_metadata: bool,

    /// Hard ceiling on source width and height
    pub max_dimension: u32,

    /// Maximum encoded input size in bytes
    pub max_input_bytes: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            quality: 80,
            format: TargetFormat::Auto,
            preserve_metadata: false,
            max_dimension: 8000,
            max_input_bytes: 100 * 1024 * 1024, // 100MB
        }
    }
}

/// Batch policy; the recognized keys accept their camelCase spelling too
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchOptions {
    /// Attempts per job before it is marked failed
    #[serde(alias = "maxRetries")]
    pub max_retries: u32,

    /// Base backoff; attempt `n` waits `retry_delay * n`
    #[serde(with = "duration_ms", alias = "retryDelay")]
    pub retry_delay: Duration,

    #[serde(with = "duration_ms", alias = "perItemTimeout")]
    pub per_item_timeout: Duration,

    #[serde(with = "duration_ms", alias = "batchTimeout")]
    pub batch_timeout: Duration,

    /// Jobs running at once
    pub concurrency: usize,

    /// Buffered events per subscriber before the slowest one lags
    #[serde(alias = "eventCapacity")]
    pub event_capacity: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            per_item_timeout: Duration::from_millis(60_000),
            batch_timeout: Duration::from_millis(300_000),
            concurrency: 5,
            event_capacity: 1024,
        }
    }
}

impl BatchOptions {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn per_item_timeout(mut self, timeout: Duration) -> Self {
        self.per_item_timeout = timeout;
        self
    }

    pub fn batch_timeout(mut self, timeout: Duration) -> Self {
        self.batch_timeout = timeout;
        self
    }

    pub fn concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency;
        self
    }

    /// Linear backoff before re-queueing after failed attempt `attempt`
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.retry_delay.saturating_mul(attempt.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(PressError::config("max_retries must be at least 1"));
        }
        if self.concurrency == 0 {
            return Err(PressError::config("concurrency must be greater than 0"));
        }
        if self.event_capacity == 0 {
            return Err(PressError::config("event_capacity must be greater than 0"));
        }
        if self.per_item_timeout.is_zero() || self.batch_timeout.is_zero() {
            return Err(PressError::config("timeouts must be greater than 0"));
        }
        Ok(())
    }
}

/// Thumbnail configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailConfig {
    pub presets: PresetTable,

    /// Fit mode when a request does not name one
    pub fit: FitMode,

    pub quality: u8,
}

impl Default for ThumbnailConfig {
    fn default() -> Self {
        Self {
            presets: PresetTable::default(),
            fit: FitMode::Cover,
            quality: 85,
        }
    }
}

/// Which analysis sections to compute, and k-means tuning
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnalysisOptions {
    pub include_metadata: bool,
    pub include_colors: bool,
    pub include_quality: bool,
    pub include_recommendations: bool,

    /// Number of k-means clusters
    pub color_count: usize,

    pub max_iterations: usize,

    /// Fixed seed for centroid initialization; random when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl Default for AnalysisOptions {
    fn default() -> Self {
        Self {
            include_metadata: true,
            include_colors: true,
            include_quality: true,
            include_recommendations: true,
            color_count: 8,
            max_iterations: 100,
            seed: None,
        }
    }
}

impl AnalysisOptions {
    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn color_count(mut self, k: usize) -> Self {
        self.color_count = k;
        self
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level or filter directive (trace, debug, info, warn, error)
    pub level: String,

    /// Enable JSON logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Resize strategy when both target dimensions are known
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Longest side bounded, never upscaled
    #[default]
    Inside,
    /// Scale to cover, then center crop
    Cover,
    /// Scale inside, then pad with the background color
    Fill,
}

/// Image formats recognized on input
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Jpeg,
    Png,
    WebP,
    Gif,
    Tiff,
    Bmp,
    Avif,
}

impl ImageFormat {
    /// Get file extension for this format
    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpeg => "jpg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Gif => "gif",
            Self::Tiff => "tiff",
            Self::Bmp => "bmp",
            Self::Avif => "avif",
        }
    }

    /// Get MIME type for this format
    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => "image/jpeg",
            Self::Png => "image/png",
            Self::WebP => "image/webp",
            Self::Gif => "image/gif",
            Self::Tiff => "image/tiff",
            Self::Bmp => "image/bmp",
            Self::Avif => "image/avif",
        }
    }

    pub fn from_mime_type(mime: &str) -> Option<Self> {
        match mime {
            "image/jpeg" => Some(Self::Jpeg),
            "image/png" => Some(Self::Png),
            "image/webp" => Some(Self::WebP),
            "image/gif" => Some(Self::Gif),
            "image/tiff" => Some(Self::Tiff),
            "image/bmp" => Some(Self::Bmp),
            "image/avif" => Some(Self::Avif),
            _ => None,
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_lowercase().as_str() {
            "jpg" | "jpeg" => Some(Self::Jpeg),
            "png" => Some(Self::Png),
            "webp" => Some(Self::WebP),
            "gif" => Some(Self::Gif),
            "tif" | "tiff" => Some(Self::Tiff),
            "bmp" => Some(Self::Bmp),
            "avif" => Some(Self::Avif),
            _ => None,
        }
    }

    /// Whether the pipeline can write this format
    pub fn is_encodable(self) -> bool {
        matches!(
            self,
            Self::Jpeg | Self::Png | Self::WebP | Self::Avif | Self::Tiff
        )
    }
}

impl fmt::Display for ImageFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Gif => "gif",
            Self::Tiff => "tiff",
            Self::Bmp => "bmp",
            Self::Avif => "avif",
        };
        f.write_str(name)
    }
}

/// Requested output format
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum TargetFormat {
    /// Keep jpeg/png/webp sources as they are, everything else becomes jpeg
    #[default]
    Auto,
    Jpeg,
    Png,
    WebP,
    Avif,
    Tiff,
}

impl TargetFormat {
    /// Concrete output format for a given source
    pub fn resolve(self, source: ImageFormat) -> ImageFormat {
        match self {
            Self::Auto => match source {
                ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP => source,
                _ => ImageFormat::Jpeg,
            },
            Self::Jpeg => ImageFormat::Jpeg,
            Self::Png => ImageFormat::Png,
            Self::WebP => ImageFormat::WebP,
            Self::Avif => ImageFormat::Avif,
            Self::Tiff => ImageFormat::Tiff,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Auto => "auto",
            Self::Jpeg => "jpeg",
            Self::Png => "png",
            Self::WebP => "webp",
            Self::Avif => "avif",
            Self::Tiff => "tiff",
        }
    }
}

impl FromStr for TargetFormat {
    type Err = PressError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "png" => Ok(Self::Png),
            "webp" => Ok(Self::WebP),
            "avif" => Ok(Self::Avif),
            "tiff" | "tif" => Ok(Self::Tiff),
            other => Err(PressError::unsupported_format(other)),
        }
    }
}

impl TryFrom<String> for TargetFormat {
    type Error = PressError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<TargetFormat> for String {
    fn from(format: TargetFormat) -> Self {
        format.as_str().to_string()
    }
}

impl fmt::Display for TargetFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// RGBA color, written as `#rrggbb`, `#rrggbbaa`, `#rgb` or a basic name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_rgba(self) -> image::Rgba<u8> {
        image::Rgba([self.r, self.g, self.b, self.a])
    }

    /// `#rrggbb`, or `#rrggbbaa` when not opaque
    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl FromStr for Color {
    type Err = PressError;

    fn from_str(s: &str) -> Result<Self> {
        let value = s.trim().to_lowercase();
        match value.as_str() {
            "white" => return Ok(Self::WHITE),
            "black" => return Ok(Self::BLACK),
            "transparent" => return Ok(Self::TRANSPARENT),
            _ => {}
        }

        let invalid = || PressError::invalid_parameters(format!("Invalid color '{s}'"));
        let hex = value.strip_prefix('#').ok_or_else(invalid)?;
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return Err(invalid());
        }
        let channel = |i: usize| u8::from_str_radix(&hex[i..i + 2], 16).map_err(|_| invalid());

        match hex.len() {
            3 => {
                let short = |i: usize| {
                    u8::from_str_radix(&hex[i..=i], 16)
                        .map(|v| v * 17)
                        .map_err(|_| invalid())
                };
                Ok(Self::rgb(short(0)?, short(1)?, short(2)?))
            }
            6 => Ok(Self::rgb(channel(0)?, channel(2)?, channel(4)?)),
            8 => Ok(Self::rgba(channel(0)?, channel(2)?, channel(4)?, channel(6)?)),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Color {
    type Error = PressError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

impl From<Color> for String {
    fn from(color: Color) -> Self {
        color.to_hex()
    }
}

impl Config {
    /// Load configuration from file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(&path).map_err(|e| {
            PressError::config(format!(
                "Failed to read config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        let extension = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        match extension.to_lowercase().as_str() {
            "toml" => toml::from_str(&content).map_err(Into::into),
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(Into::into),
            _ => Err(PressError::config(
                "Unsupported config file format. Use .toml or .yaml",
            )),
        }
    }

    /// Save configuration to file
    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let extension = path
            .as_ref()
            .extension()
            .and_then(|ext| ext.to_str())
            .unwrap_or("");

        let content = match extension.to_lowercase().as_str() {
            "toml" => toml::to_string_pretty(self)
                .map_err(|e| PressError::config(format!("TOML serialization failed: {e}")))?,
            "yaml" | "yml" => serde_yaml::to_string(self)
                .map_err(|e| PressError::config(format!("YAML serialization failed: {e}")))?,
            _ => {
                return Err(PressError::config(
                    "Unsupported config file format. Use .toml or .yaml",
                ))
            }
        };

        std::fs::write(&path, content).map_err(|e| {
            PressError::config(format!(
                "Failed to write config file {:?}: {}",
                path.as_ref(),
                e
            ))
        })?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.processing.quality == 0 || self.processing.quality > 100 {
            return Err(PressError::config(format!(
                "Quality must be between 1-100, got {}",
                self.processing.quality
            )));
        }
        if self.thumbnails.quality == 0 || self.thumbnails.quality > 100 {
            return Err(PressError::config(format!(
                "Thumbnail quality must be between 1-100, got {}",
                self.thumbnails.quality
            )));
        }
        if self.processing.max_dimension == 0 {
            return Err(PressError::config("max_dimension must be greater than 0"));
        }
        if self.analysis.color_count == 0 || self.analysis.max_iterations == 0 {
            return Err(PressError::config(
                "color_count and max_iterations must be greater than 0",
            ));
        }

        self.batch.validate()?;
        self.thumbnails.presets.validate()
    }

    /// Merge with another configuration (other takes precedence)
    pub fn merge(mut self, other: Config) -> Self {
        self.thumbnails.presets.extend(other.thumbnails.presets);
        self.thumbnails.fit = other.thumbnails.fit;
        self.thumbnails.quality = other.thumbnails.quality;
        self.processing = other.processing;
        self.batch = other.batch;
        self.analysis = other.analysis;
        self.logging = other.logging;
        self
    }
}

/// Durations as integer milliseconds
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let millis = u64::try_from(value.as_millis()).unwrap_or(u64::MAX);
        serializer.serialize_u64(millis)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
