//! Ordered geometric and tonal transforms applied before encoding

use image::{DynamicImage, Rgba, RgbaImage};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::TargetFormat;
use crate::error::{PressError, Result};
use crate::processing::resize::{ImageResizer, ResizeRequest};
use crate::watermark::{WatermarkEngine, WatermarkSpec};

/// Optional filters; every field at its default is a no-op
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSet {
    /// Gaussian blur sigma
    pub blur: Option<f32>,
    /// Unsharp-mask sigma
    pub sharpen: Option<f32>,
    pub grayscale: bool,
    /// Mirror top to bottom
    pub flip: bool,
    /// Mirror left to right
    pub flop: bool,
    /// Clockwise degrees
    pub rotate: Option<f32>,
    pub brightness: f32,
    pub contrast: f32,
    pub saturation: f32,
    pub gamma: f32,
}

impl Default for FilterSet {
    fn default() -> Self {
        Self {
            blur: None,
            sharpen: None,
            grayscale: false,
            flip: false,
            flop: false,
            rotate: None,
            brightness: 1.0,
            contrast: 1.0,
            saturation: 1.0,
            gamma: 1.0,
        }
    }
}

fn is_unit(value: f32) -> bool {
    (value - 1.0).abs() < f32::EPSILON
}

impl FilterSet {
    pub fn has_modulation(&self) -> bool {
        !(is_unit(self.brightness)
            && is_unit(self.contrast)
            && is_unit(self.saturation)
            && is_unit(self.gamma))
    }

    pub fn validate(&self) -> Result<()> {
        for (name, sigma) in [("blur", self.blur), ("sharpen", self.sharpen)] {
            if let Some(sigma) = sigma {
                if !(sigma > 0.0 && sigma <= 1000.0) {
                    return Err(PressError::invalid_parameters(format!(
                        "{name} sigma must be in (0, 1000], got {sigma}"
                    )));
                }
            }
        }
        for (name, value) in [
            ("brightness", self.brightness),
            ("contrast", self.contrast),
            ("saturation", self.saturation),
        ] {
            if !(value >= 0.0 && value.is_finite()) {
                return Err(PressError::invalid_parameters(format!(
                    "{name} must be a non-negative multiplier, got {value}"
                )));
            }
        }
        if !(self.gamma > 0.0 && self.gamma.is_finite()) {
            return Err(PressError::invalid_parameters(format!(
                "gamma must be positive, got {}",
                self.gamma
            )));
        }
        if let Some(degrees) = self.rotate {
            if !degrees.is_finite() {
                return Err(PressError::invalid_parameters("rotation must be finite"));
            }
        }
        Ok(())
    }
}

/// Parameters of a single-image re-encode
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizeParams {
    /// Output quality (1-100)
    pub quality: u8,
    pub format: TargetFormat,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub filters: FilterSet,
    pub watermark: Option<WatermarkSpec>,
    #[serde(alias = "preserveMetadata")]
    pub preserve_metadata: bool,
}

impl Default for OptimizeParams {
    fn default() -> Self {
        Self {
            quality: 80,
            format: TargetFormat::Auto,
            width: None,
            height: None,
            filters: FilterSet::default(),
            watermark: None,
            preserve_metadata: false,
        }
    }
}

impl OptimizeParams {
    pub fn quality(mut self, quality: u8) -> Self {
        self.quality = quality;
        self
    }

    pub fn format(mut self, format: TargetFormat) -> Self {
        self.format = format;
        self
    }

    pub fn resize(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.width = width;
        self.height = height;
        self
    }

    pub fn filters(mut self, filters: FilterSet) -> Self {
        self.filters = filters;
        self
    }

    pub fn watermark(mut self, watermark: WatermarkSpec) -> Self {
        self.watermark = Some(watermark);
        self
    }

    pub fn preserve_metadata(mut self, preserve: bool) -> Self {
        self.preserve_metadata = preserve;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.quality == 0 || self.quality > 100 {
            return Err(PressError::invalid_parameters(format!(
                "Quality must be between 1-100, got {}",
                self.quality
            )));
        }
        if self.width == Some(0) || self.height == Some(0) {
            return Err(PressError::invalid_parameters(
                "width and height must be greater than 0",
            ));
        }
        self.filters.validate()?;
        if let Some(watermark) = &self.watermark {
            watermark.validate()?;
        }
        Ok(())
    }
}

/// Cooperative cancellation point between stages
fn checkpoint(cancel: Option<&CancellationToken>) -> Result<()> {
    match cancel {
        Some(token) if token.is_cancelled() => Err(PressError::Cancelled),
        _ => Ok(()),
    }
}

/// Applies resize, filters, modulation and watermark in a fixed order
#[derive(Debug, Clone, Default)]
pub struct TransformPipeline {
    resizer: ImageResizer,
    watermarks: WatermarkEngine,
}

impl TransformPipeline {
    pub fn new(watermarks: WatermarkEngine) -> Self {
        Self {
            resizer: ImageResizer::new(),
            watermarks,
        }
    }

    pub fn watermarks(&self) -> &WatermarkEngine {
        &self.watermarks
    }

    /// Run every requested stage. Cancellation is only observed between
    /// stages; a stage that has started always runs to completion.
    pub fn apply(
        &self,
        mut image: DynamicImage,
        params: &OptimizeParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<DynamicImage> {
        let filters = &params.filters;

        if params.width.is_some() || params.height.is_some() {
            checkpoint(cancel)?;
            image = self
                .resizer
                .resize(&image, &ResizeRequest::inside(params.width, params.height))?;
        }
        if let Some(sigma) = filters.blur {
            checkpoint(cancel)?;
            debug!(sigma, "blur");
            image = image.blur(sigma);
        }
        if let Some(sigma) = filters.sharpen {
            checkpoint(cancel)?;
            debug!(sigma, "sharpen");
            image = image.unsharpen(sigma, 1);
        }
        if filters.grayscale {
            checkpoint(cancel)?;
            image = image.grayscale();
        }
        if filters.flip {
            image = image.flipv();
        }
        if filters.flop {
            image = image.fliph();
        }
        if let Some(degrees) = filters.rotate {
            checkpoint(cancel)?;
            image = rotate(image, degrees);
        }
        if filters.has_modulation() {
            checkpoint(cancel)?;
            image = modulate(&image, filters);
        }
        if let Some(spec) = &params.watermark {
            checkpoint(cancel)?;
            image = self.watermarks.apply(&image, spec)?;
        }
        checkpoint(cancel)?;
        Ok(image)
    }
}

/// Rotate clockwise; right angles are lossless, other angles grow the canvas
/// to the rotated bounding box (transparent with alpha, white without)
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn rotate(image: DynamicImage, degrees: f32) -> DynamicImage {
    let normalized = degrees.rem_euclid(360.0);
    let right_angle = (normalized / 90.0).round();
    if (normalized - right_angle * 90.0).abs() < 0.01 {
        return match right_angle as u32 % 4 {
            1 => image.rotate90(),
            2 => image.rotate180(),
            3 => image.rotate270(),
            _ => image,
        };
    }

    let has_alpha = image.color().has_alpha();
    let fill = if has_alpha {
        Rgba([0, 0, 0, 0])
    } else {
        Rgba([255, 255, 255, 255])
    };
    let rotated = rotate_expand(&image.to_rgba8(), normalized, fill);
    if has_alpha {
        DynamicImage::ImageRgba8(rotated)
    } else {
        DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(rotated).to_rgb8())
    }
}

/// Rotate an RGBA layer clockwise about its center onto a canvas large enough
/// to hold every corner
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn rotate_expand(image: &RgbaImage, degrees: f32, fill: Rgba<u8>) -> RgbaImage {
    let theta = degrees.to_radians();
    let (sin, cos) = (theta.sin().abs(), theta.cos().abs());
    let (w, h) = (image.width() as f32, image.height() as f32);
    let new_w = (w * cos + h * sin).ceil().max(1.0) as u32;
    let new_h = (w * sin + h * cos).ceil().max(1.0) as u32;

    let mut canvas = RgbaImage::from_pixel(new_w, new_h, fill);
    let x = i64::from((new_w.saturating_sub(image.width())) / 2);
    let y = i64::from((new_h.saturating_sub(image.height())) / 2);
    image::imageops::replace(&mut canvas, image, x, y);

    rotate_about_center(&canvas, theta, Interpolation::Bilinear, fill)
}

/// Brightness, contrast, saturation and gamma as multipliers (1.0 = no-op)
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn modulate(image: &DynamicImage, filters: &FilterSet) -> DynamicImage {
    let was_gray = matches!(
        image,
        DynamicImage::ImageLuma8(_) | DynamicImage::ImageLumaA8(_)
    );
    let has_alpha = image.color().has_alpha();
    let inverse_gamma = 1.0 / filters.gamma;

    let mut rgba = image.to_rgba8();
    for px in rgba.pixels_mut() {
        let mut rgb = [f32::from(px[0]), f32::from(px[1]), f32::from(px[2])];

        if !is_unit(filters.saturation) {
            let luma = 0.299 * rgb[0] + 0.587 * rgb[1] + 0.114 * rgb[2];
            for c in &mut rgb {
                *c = luma + (*c - luma) * filters.saturation;
            }
        }
        for c in &mut rgb {
            *c *= filters.brightness;
            *c = (*c - 128.0) * filters.contrast + 128.0;
            if !is_unit(filters.gamma) {
                *c = 255.0 * (c.clamp(0.0, 255.0) / 255.0).powf(inverse_gamma);
            }
        }
        for (channel, value) in px.0.iter_mut().zip(rgb) {
            *channel = value.round().clamp(0.0, 255.0) as u8;
        }
    }

    let out = DynamicImage::ImageRgba8(rgba);
    match (was_gray, has_alpha) {
        (true, false) => DynamicImage::ImageLuma8(out.to_luma8()),
        (true, true) => DynamicImage::ImageLumaA8(out.to_luma_alpha8()),
        (false, false) => DynamicImage::ImageRgb8(out.to_rgb8()),
        (false, true) => out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GenericImageView, ImageBuffer, Rgb};

    fn gradient(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x * 255 / width) as u8, (y * 255 / height) as u8, 90])
        }))
    }

    #[test]
    fn test_default_params_are_identity() {
        let image = gradient(40, 30);
        let out = TransformPipeline::default()
            .apply(image.clone(), &OptimizeParams::default(), None)
            .unwrap();
        assert_eq!(out.to_rgb8(), image.to_rgb8());
    }

    #[test]
    fn test_resize_never_upscales() {
        let params = OptimizeParams::default().resize(Some(1000), None);
        let out = TransformPipeline::default()
            .apply(gradient(40, 30), &params, None)
            .unwrap();
        assert_eq!(out.dimensions(), (40, 30));

        let params = OptimizeParams::default().resize(Some(20), Some(20));
        let out = TransformPipeline::default()
            .apply(gradient(40, 30), &params, None)
            .unwrap();
        assert_eq!(out.dimensions(), (20, 15));
    }

    #[test]
    fn test_flip_and_flop() {
        let image = gradient(10, 10);
        let mut filters = FilterSet::default();
        filters.flop = true;
        let out = TransformPipeline::default()
            .apply(image.clone(), &OptimizeParams::default().filters(filters), None)
            .unwrap();
        assert_eq!(out.get_pixel(0, 0), image.get_pixel(9, 0));

        let mut filters = FilterSet::default();
        filters.flip = true;
        let out = TransformPipeline::default()
            .apply(image.clone(), &OptimizeParams::default().filters(filters), None)
            .unwrap();
        assert_eq!(out.get_pixel(0, 0), image.get_pixel(0, 9));
    }

    #[test]
    fn test_rotation() {
        assert_eq!(rotate(gradient(40, 20), 90.0).dimensions(), (20, 40));
        assert_eq!(rotate(gradient(40, 20), -90.0).dimensions(), (20, 40));
        assert_eq!(rotate(gradient(40, 20), 360.0).dimensions(), (40, 20));

        let rotated = rotate(gradient(40, 20), 45.0);
        assert!(rotated.width() > 40 && rotated.height() > 20);
        assert!(!rotated.color().has_alpha());
        assert_eq!(rotated.to_rgb8().get_pixel(0, 0), &Rgb([255, 255, 255]));
    }

    #[test]
    fn test_grayscale_stays_gray_through_modulation() {
        let mut filters = FilterSet::default();
        filters.grayscale = true;
        filters.brightness = 1.2;
        let out = TransformPipeline::default()
            .apply(gradient(16, 16), &OptimizeParams::default().filters(filters), None)
            .unwrap();
        assert!(matches!(out, DynamicImage::ImageLuma8(_)));
    }

    #[test]
    fn test_modulation() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(2, 2, Rgb([100, 150, 200])));

        let mut filters = FilterSet::default();
        filters.brightness = 0.5;
        assert_eq!(modulate(&image, &filters).to_rgb8().get_pixel(0, 0), &Rgb([50, 75, 100]));

        let mut filters = FilterSet::default();
        filters.saturation = 0.0;
        let gray = modulate(&image, &filters).to_rgb8();
        let px = gray.get_pixel(0, 0);
        assert_eq!(px[0], px[1]);
        assert_eq!(px[1], px[2]);

        let mut filters = FilterSet::default();
        filters.contrast = 0.0;
        assert_eq!(modulate(&image, &filters).to_rgb8().get_pixel(0, 0), &Rgb([128, 128, 128]));
    }

    #[test]
    fn test_invalid_params() {
        assert!(OptimizeParams::default().quality(0).validate().is_err());
        assert!(OptimizeParams::default().resize(Some(0), None).validate().is_err());
        let mut filters = FilterSet::default();
        filters.gamma = 0.0;
        assert!(OptimizeParams::default().filters(filters).validate().is_err());
        assert!(OptimizeParams::default().validate().is_ok());
    }

    #[test]
    fn test_cancellation_between_stages() {
        let token = CancellationToken::new();
        token.cancel();
        let result = TransformPipeline::default().apply(
            gradient(10, 10),
            &OptimizeParams::default(),
            Some(&token),
        );
        assert!(matches!(result, Err(PressError::Cancelled)));
    }

    #[test]
    fn test_params_from_camel_case() {
        let params: OptimizeParams = serde_json::from_str(
            r#"{"quality": 70, "format": "webp", "width": 800, "preserveMetadata": true}"#,
        )
        .unwrap();
        assert_eq!(params.quality, 70);
        assert_eq!(params.format, TargetFormat::WebP);
        assert_eq!(params.width, Some(800));
        assert!(params.preserve_metadata);

        let bad: std::result::Result<OptimizeParams, _> =
            serde_json::from_str(r#"{"format": "gif"}"#);
        assert!(bad.is_err());
    }
}
