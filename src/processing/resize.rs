//! Resizing with inside/cover/fill fit modes

use image::{imageops, DynamicImage, RgbaImage};
use tracing::debug;

use crate::config::{Color, FitMode};
use crate::error::{PressError, Result};

/// Available resize filters
#[derive(Debug, Clone, Copy, Default)]
pub enum FilterType {
    /// Nearest neighbor (fastest, lowest quality)
    Nearest,
    /// Triangle (linear interpolation)
    Triangle,
    /// Catmull-Rom cubic spline
    CatmullRom,
    /// Lanczos with radius 3 (high quality, recommended)
    #[default]
    Lanczos3,
}

impl From<FilterType> for imageops::FilterType {
    fn from(filter: FilterType) -> Self {
        match filter {
            FilterType::Nearest => imageops::FilterType::Nearest,
            FilterType::Triangle => imageops::FilterType::Triangle,
            FilterType::CatmullRom => imageops::FilterType::CatmullRom,
            FilterType::Lanczos3 => imageops::FilterType::Lanczos3,
        }
    }
}

/// Target box and how to map the source onto it
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResizeRequest {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fit: FitMode,
    pub preserve_aspect_ratio: bool,
    /// Padding color for `FitMode::Fill`
    pub background: Color,
}

impl ResizeRequest {
    /// Bounded resize that never upscales
    pub fn inside(width: Option<u32>, height: Option<u32>) -> Self {
        Self {
            width,
            height,
            fit: FitMode::Inside,
            preserve_aspect_ratio: true,
            background: Color::WHITE,
        }
    }

    pub fn exact(width: u32, height: u32, fit: FitMode) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            fit,
            preserve_aspect_ratio: true,
            background: Color::WHITE,
        }
    }

    pub fn background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }

    pub fn preserve_aspect_ratio(mut self, preserve: bool) -> Self {
        self.preserve_aspect_ratio = preserve;
        self
    }

    pub fn is_noop(&self) -> bool {
        self.width.is_none() && self.height.is_none()
    }
}

/// High-quality image resizer
#[derive(Debug, Clone, Default)]
pub struct ImageResizer {
    filter: FilterType,
}

impl ImageResizer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a resizer with custom filter
    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }

    /// Resize an image according to the request
    pub fn resize(&self, image: &DynamicImage, request: &ResizeRequest) -> Result<DynamicImage> {
        if request.width == Some(0) || request.height == Some(0) {
            return Err(PressError::invalid_parameters(format!(
                "Target dimensions must be greater than 0, got {:?}x{:?}",
                request.width, request.height
            )));
        }
        if request.is_noop() {
            return Ok(image.clone());
        }

        let (src_w, src_h) = (image.width(), image.height());
        let filter: imageops::FilterType = self.filter.into();

        let resized = match (request.width, request.height) {
            (Some(width), Some(height)) if !request.preserve_aspect_ratio => {
                image.resize_exact(width, height, filter)
            }
            (Some(width), Some(height)) => match request.fit {
                FitMode::Inside => {
                    let (w, h) = fit_inside(src_w, src_h, width, height);
                    self.scale_to(image, w, h)
                }
                FitMode::Cover => self.resize_and_crop(image, width, height),
                FitMode::Fill => self.resize_and_pad(image, width, height, request.background),
            },
            (width, height) => {
                let (w, h) = single_edge(src_w, src_h, width, height, request.preserve_aspect_ratio);
                self.scale_to(image, w, h)
            }
        };

        debug!(
            "Resized {}x{} -> {}x{} ({:?})",
            src_w,
            src_h,
            resized.width(),
            resized.height(),
            request.fit
        );
        Ok(resized)
    }

    fn scale_to(&self, image: &DynamicImage, width: u32, height: u32) -> DynamicImage {
        if width == image.width() && height == image.height() {
            return image.clone();
        }
        image.resize_exact(width, height, self.filter.into())
    }

    /// Crop the centered region with the target aspect, then scale it to the
    /// box. No intermediate buffer is larger than the source or the target.
    fn resize_and_crop(&self, image: &DynamicImage, target_width: u32, target_height: u32) -> DynamicImage {
        let (crop_width, crop_height) =
            cover_region(image.width(), image.height(), target_width, target_height);
        let crop_x = (image.width() - crop_width) / 2;
        let crop_y = (image.height() - crop_height) / 2;
        let region = image.crop_imm(crop_x, crop_y, crop_width, crop_height);
        self.scale_to(&region, target_width, target_height)
    }

    /// Scale inside the box, then center on a background-filled canvas
    fn resize_and_pad(
        &self,
        image: &DynamicImage,
        target_width: u32,
        target_height: u32,
        background: Color,
    ) -> DynamicImage {
        let (w, h) = scale_inside(image.width(), image.height(), target_width, target_height);
        let scaled = self.scale_to(image, w, h).to_rgba8();

        let mut canvas = RgbaImage::from_pixel(target_width, target_height, background.to_rgba());
        let x = i64::from((target_width - w) / 2);
        let y = i64::from((target_height - h) / 2);
        imageops::overlay(&mut canvas, &scaled, x, y);

        if image.color().has_alpha() || background.a < 255 {
            DynamicImage::ImageRgba8(canvas)
        } else {
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8())
        }
    }
}

/// Largest size with the source aspect ratio that fits the box, upscaling allowed
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn scale_inside(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    let ratio = f64::min(
        f64::from(max_w) / f64::from(src_w),
        f64::from(max_h) / f64::from(src_h),
    );
    let w = (f64::from(src_w) * ratio).round().clamp(1.0, f64::from(max_w)) as u32;
    let h = (f64::from(src_h) * ratio).round().clamp(1.0, f64::from(max_h)) as u32;
    (w, h)
}

/// Largest source region with the aspect ratio of `target_w`x`target_h`
pub fn cover_region(src_w: u32, src_h: u32, target_w: u32, target_h: u32) -> (u32, u32) {
    let (sw, sh) = (u64::from(src_w), u64::from(src_h));
    let (tw, th) = (u64::from(target_w), u64::from(target_h));
    if sw * th > tw * sh {
        // Wider than the box: keep full height, trim the sides
        let width = ((sh * tw + th / 2) / th).clamp(1, sw);
        (u32::try_from(width).unwrap_or(src_w), src_h)
    } else {
        let height = ((sw * th + tw / 2) / tw).clamp(1, sh);
        (src_w, u32::try_from(height).unwrap_or(src_h))
    }
}

/// Like [`scale_inside`] but never enlarges the source
pub fn fit_inside(src_w: u32, src_h: u32, max_w: u32, max_h: u32) -> (u32, u32) {
    if src_w <= max_w && src_h <= max_h {
        return (src_w, src_h);
    }
    scale_inside(src_w, src_h, max_w, max_h)
}

/// Only one edge requested: derive the other, never enlarging
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn single_edge(
    src_w: u32,
    src_h: u32,
    width: Option<u32>,
    height: Option<u32>,
    preserve_aspect_ratio: bool,
) -> (u32, u32) {
    match (width, height) {
        (Some(width), _) => {
            let width = width.min(src_w);
            let height = if preserve_aspect_ratio {
                let h = f64::from(src_h) * f64::from(width) / f64::from(src_w);
                (h.round() as u32).max(1)
            } else {
                src_h
            };
            (width, height)
        }
        (None, Some(height)) => {
            let height = height.min(src_h);
            let width = if preserve_aspect_ratio {
                let w = f64::from(src_w) * f64::from(height) / f64::from(src_h);
                (w.round() as u32).max(1)
            } else {
                src_w
            };
            (width, height)
        }
        (None, None) => (src_w, src_h),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    fn create_test_image(width: u32, height: u32) -> DynamicImage {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x + y) % 256) as u8])
        });
        DynamicImage::ImageRgb8(img)
    }

    #[test]
    fn test_fit_inside_never_upscales() {
        assert_eq!(fit_inside(100, 50, 400, 400), (100, 50));
        assert_eq!(fit_inside(2000, 1000, 400, 400), (400, 200));
        assert_eq!(fit_inside(1000, 2000, 400, 400), (200, 400));
    }

    #[test]
    fn test_inside_resize() {
        let image = create_test_image(800, 600);
        let resized = ImageResizer::new()
            .resize(&image, &ResizeRequest::inside(Some(400), Some(400)))
            .unwrap();
        assert_eq!((resized.width(), resized.height()), (400, 300));

        let small = create_test_image(100, 80);
        let untouched = ImageResizer::new()
            .resize(&small, &ResizeRequest::inside(Some(400), None))
            .unwrap();
        assert_eq!((untouched.width(), untouched.height()), (100, 80));
    }

    #[test]
    fn test_single_edge_keeps_aspect() {
        let image = create_test_image(800, 600);
        let resized = ImageResizer::new()
            .resize(&image, &ResizeRequest::inside(None, Some(300)))
            .unwrap();
        assert_eq!((resized.width(), resized.height()), (400, 300));
    }

    #[test]
    fn test_cover_crops_to_exact_box() {
        let image = create_test_image(800, 400);
        let resized = ImageResizer::new()
            .resize(&image, &ResizeRequest::exact(200, 200, FitMode::Cover))
            .unwrap();
        assert_eq!((resized.width(), resized.height()), (200, 200));
    }

    #[test]
    fn test_cover_region_matches_target_aspect() {
        assert_eq!(cover_region(800, 400, 200, 200), (400, 400));
        assert_eq!(cover_region(400, 800, 200, 100), (400, 200));
        assert_eq!(cover_region(300, 300, 300, 300), (300, 300));
        assert_eq!(cover_region(4000, 1, 150, 150), (1, 1));
        assert_eq!(cover_region(1, 4000, 300, 300), (1, 1));
    }

    #[test]
    fn test_cover_extreme_aspect_stays_small() {
        let strip = create_test_image(4000, 1);
        for edge in [150, 300] {
            let resized = ImageResizer::new()
                .resize(&strip, &ResizeRequest::exact(edge, edge, FitMode::Cover))
                .unwrap();
            assert_eq!((resized.width(), resized.height()), (edge, edge));
        }
    }

    #[test]
    fn test_cover_keeps_center() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_fn(300, 100, |x, _| {
            if x < 100 || x >= 200 {
                Rgb([0, 0, 255])
            } else {
                Rgb([255, 0, 0])
            }
        }));
        let resized = ImageResizer::with_filter(FilterType::Nearest)
            .resize(&image, &ResizeRequest::exact(50, 50, FitMode::Cover))
            .unwrap()
            .to_rgb8();
        assert_eq!(resized.get_pixel(0, 0), &Rgb([255, 0, 0]));
        assert_eq!(resized.get_pixel(49, 49), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_fill_pads_with_background() {
        let image = create_test_image(400, 200);
        let request = ResizeRequest::exact(100, 100, FitMode::Fill).background(Color::rgb(255, 0, 0));
        let resized = ImageResizer::new().resize(&image, &request).unwrap();
        assert_eq!((resized.width(), resized.height()), (100, 100));
        let rgb = resized.to_rgb8();
        assert_eq!(rgb.get_pixel(50, 0), &Rgb([255, 0, 0]));
        assert_eq!(rgb.get_pixel(50, 99), &Rgb([255, 0, 0]));
    }

    #[test]
    fn test_fill_keeps_alpha_sources_transparent() {
        let image = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(40, 20, Rgba([0, 0, 255, 255])));
        let request = ResizeRequest::exact(20, 20, FitMode::Fill).background(Color::TRANSPARENT);
        let resized = ImageResizer::new().resize(&image, &request).unwrap();
        assert!(resized.color().has_alpha());
        assert_eq!(resized.to_rgba8().get_pixel(10, 0)[3], 0);
    }

    #[test]
    fn test_exact_without_aspect() {
        let image = create_test_image(300, 100);
        let request = ResizeRequest::exact(50, 50, FitMode::Inside).preserve_aspect_ratio(false);
        let resized = ImageResizer::new().resize(&image, &request).unwrap();
        assert_eq!((resized.width(), resized.height()), (50, 50));
    }

    #[test]
    fn test_invalid_parameters() {
        let image = create_test_image(100, 100);
        let result = ImageResizer::new().resize(&image, &ResizeRequest::inside(Some(0), None));
        assert!(result.is_err());
    }
}
