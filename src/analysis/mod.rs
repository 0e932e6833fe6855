//! Image analysis: metadata, colors, quality and optimization advice
//!
//! Every section is computed independently. A section that fails carries a
//! typed error in place of its data; only an undecodable input fails the
//! whole report.

pub mod color;
pub mod metadata;
pub mod quality;
pub mod recommendations;

use std::time::Instant;

use image::{ColorType, DynamicImage};
use serde::{Deserialize, Serialize};
use tracing::{instrument, warn};
use uuid::Uuid;

use crate::config::{AnalysisOptions, ImageFormat};
use crate::error::{JobError, Result};
use crate::parallel::duration_ms;
use crate::processing::formats::decode;
use crate::processing::validation::ImageValidator;
use crate::processing::ImageInput;

pub use color::{ColorReport, DominantColor, Harmony, Histogram, Hsl, Mood, Temperature};
pub use metadata::{BlockInfo, ExifSummary, MetadataReport};
pub use quality::{QualityReport, QualityScore, Rating};
pub use recommendations::{
    ImageFacts, Priority, Recommendation, RecommendationKind, RecommendationSet, Savings,
};

/// Geometry and encoding facts read from the input
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BasicInfo {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub channels: u8,
    pub has_alpha: bool,
    pub bits_per_channel: u16,
    pub megapixels: f64,
    pub aspect_ratio: f64,
    pub file_size: u64,
    pub bytes_per_pixel: f64,
}

impl BasicInfo {
    #[allow(clippy::cast_precision_loss)]
    fn new(image: &DynamicImage, format: ImageFormat, file_size: u64) -> Self {
        let color = image.color();
        let (width, height) = (image.width(), image.height());
        let pixels = u64::from(width) * u64::from(height);
        Self {
            format,
            width,
            height,
            channels: color.channel_count(),
            has_alpha: color.has_alpha(),
            bits_per_channel: bits_per_channel(color),
            megapixels: pixels as f64 / 1_000_000.0,
            aspect_ratio: if height == 0 {
                0.0
            } else {
                f64::from(width) / f64::from(height)
            },
            file_size,
            bytes_per_pixel: if pixels == 0 {
                0.0
            } else {
                file_size as f64 / pixels as f64
            },
        }
    }
}

fn bits_per_channel(color: ColorType) -> u16 {
    let channels = u16::from(color.channel_count().max(1));
    color.bits_per_pixel() / channels
}

/// One report section: data on success, a typed error otherwise
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Section<T> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
}

impl<T> Section<T> {
    fn from_result(name: &str, result: Result<T>) -> Self {
        match result {
            Ok(data) => Self {
                data: Some(data),
                error: None,
            },
            Err(e) => {
                warn!(section = name, error = %e, "analysis section failed");
                Self {
                    data: None,
                    error: Some(JobError::new(&e, 0)),
                }
            }
        }
    }

    pub fn is_ok(&self) -> bool {
        self.data.is_some()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub id: Uuid,
    pub filename: String,
    pub basic: BasicInfo,
    /// `None` when the section was switched off
    pub metadata: Option<Section<MetadataReport>>,
    pub colors: Option<Section<ColorReport>>,
    pub quality: Option<Section<QualityReport>>,
    pub recommendations: Option<Section<RecommendationSet>>,
    /// Taken from the quality section when it succeeded
    pub overall_rating: Option<Rating>,
    pub processing_time_ms: u64,
}

impl AnalysisResult {
    pub fn recommendation_set(&self) -> Option<&RecommendationSet> {
        self.recommendations.as_ref().and_then(|s| s.data.as_ref())
    }
}

/// Produces `AnalysisResult`s; never mutates the input
#[derive(Debug, Clone)]
pub struct ImageAnalyzer {
    options: AnalysisOptions,
    validator: ImageValidator,
}

impl Default for ImageAnalyzer {
    fn default() -> Self {
        Self::new(AnalysisOptions::default())
    }
}

impl ImageAnalyzer {
    pub fn new(options: AnalysisOptions) -> Self {
        Self {
            options,
            validator: ImageValidator::new(),
        }
    }

    pub fn with_validator(mut self, validator: ImageValidator) -> Self {
        self.validator = validator;
        self
    }

    pub fn options(&self) -> &AnalysisOptions {
        &self.options
    }

    /// Analyze with the analyzer's own options
    pub fn analyze(&self, input: &ImageInput) -> Result<AnalysisResult> {
        self.analyze_with(input, &self.options)
    }

    #[instrument(skip(self, input, options), fields(filename = %input.filename))]
    pub fn analyze_with(
        &self,
        input: &ImageInput,
        options: &AnalysisOptions,
    ) -> Result<AnalysisResult> {
        let start = Instant::now();
        let validated = self.validator.validate(input)?;
        let image = decode(input.data(), validated.format)?;
        let basic = BasicInfo::new(&image, validated.format, input.len() as u64);

        let metadata = options.include_metadata.then(|| {
            Section::from_result(
                "metadata",
                Ok(metadata::extract_metadata(input.data(), validated.format)),
            )
        });

        let colors = options
            .include_colors
            .then(|| Section::from_result("colors", color::analyze_colors(&image, options)));

        let quality = options.include_quality.then(|| {
            Section::from_result(
                "quality",
                Ok(quality::assess_quality(&image, validated.format, basic.file_size)),
            )
        });

        let recommendations = options.include_recommendations.then(|| {
            // metadata and colors feed the rules even when their sections are hidden
            let has_exif = match metadata.as_ref() {
                Some(section) => section.data.as_ref().is_some_and(MetadataReport::has_exif),
                None => metadata::extract_metadata(input.data(), validated.format).has_exif(),
            };
            let mean_saturation = colors
                .as_ref()
                .and_then(|s| s.data.as_ref())
                .map(|c| c.mean_saturation);
            let facts = ImageFacts {
                format: basic.format,
                has_alpha: basic.has_alpha,
                file_size: basic.file_size,
                megapixels: basic.megapixels,
                bytes_per_pixel: basic.bytes_per_pixel,
                mean_saturation,
                has_exif,
            };
            Section::from_result("recommendations", Ok(recommendations::recommend(&facts)))
        });

        let overall_rating = quality
            .as_ref()
            .and_then(|s| s.data.as_ref())
            .map(|q| q.overall_rating);

        Ok(AnalysisResult {
            id: Uuid::new_v4(),
            filename: input.filename.clone(),
            basic,
            metadata,
            colors,
            quality,
            recommendations,
            overall_rating,
            processing_time_ms: duration_ms(start.elapsed()),
        })
    }
}

/// Convenience wrapper with default options
pub fn analyze(input: &ImageInput) -> Result<AnalysisResult> {
    ImageAnalyzer::default().analyze(input)
}
