//! Watermark compositing
//!
//! A [`WatermarkSpec`] is either a line of text rendered from a system or
//! registered font, or an image scaled relative to the base width. Either way
//! the mark becomes an RGBA layer that is blended onto a copy of the base at
//! one of nine anchors. Diagonal text tiles the whole canvas instead.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use bytes::Bytes;
use image::{imageops, DynamicImage, GenericImageView, Rgba, RgbaImage};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Color;
use crate::error::{PressError, Result};
use crate::processing::formats::{decode, sniff_format};
use crate::processing::resize::scale_inside;
use crate::processing::transform::rotate_expand;

pub mod text;

pub use text::FontBook;
use text::{render_text, ShadowStyle, TextStyle};

/// Named placement of the mark on the base image
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Anchor {
    TopLeft,
    TopCenter,
    TopRight,
    CenterLeft,
    Center,
    CenterRight,
    BottomLeft,
    BottomCenter,
    #[default]
    BottomRight,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Align {
    Start,
    Middle,
    End,
}

impl Anchor {
    pub const ALL: [Anchor; 9] = [
        Anchor::TopLeft,
        Anchor::TopCenter,
        Anchor::TopRight,
        Anchor::CenterLeft,
        Anchor::Center,
        Anchor::CenterRight,
        Anchor::BottomLeft,
        Anchor::BottomCenter,
        Anchor::BottomRight,
    ];

    /// (horizontal, vertical) alignment
    fn axes(self) -> (Align, Align) {
        match self {
            Self::TopLeft => (Align::Start, Align::Start),
            Self::TopCenter => (Align::Middle, Align::Start),
            Self::TopRight => (Align::End, Align::Start),
            Self::CenterLeft => (Align::Start, Align::Middle),
            Self::Center => (Align::Middle, Align::Middle),
            Self::CenterRight => (Align::End, Align::Middle),
            Self::BottomLeft => (Align::Start, Align::End),
            Self::BottomCenter => (Align::Middle, Align::End),
            Self::BottomRight => (Align::End, Align::End),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::TopLeft => "top-left",
            Self::TopCenter => "top-center",
            Self::TopRight => "top-right",
            Self::CenterLeft => "center-left",
            Self::Center => "center",
            Self::CenterRight => "center-right",
            Self::BottomLeft => "bottom-left",
            Self::BottomCenter => "bottom-center",
            Self::BottomRight => "bottom-right",
        }
    }
}

impl FromStr for Anchor {
    type Err = PressError;

    fn from_str(s: &str) -> Result<Self> {
        let anchor = match s.trim().to_lowercase().replace('_', "-").as_str() {
            "top-left" => Self::TopLeft,
            "top-center" | "top" => Self::TopCenter,
            "top-right" => Self::TopRight,
            "center-left" | "left" => Self::CenterLeft,
            "center" | "middle" => Self::Center,
            "center-right" | "right" => Self::CenterRight,
            "bottom-left" => Self::BottomLeft,
            "bottom-center" | "bottom" => Self::BottomCenter,
            "bottom-right" => Self::BottomRight,
            other => {
                return Err(PressError::watermark(format!("unknown position '{other}'")));
            }
        };
        Ok(anchor)
    }
}

impl fmt::Display for Anchor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn align_offset(align: Align, canvas: u32, mark: u32, margin: u32) -> u32 {
    let room = canvas.saturating_sub(mark);
    match align {
        Align::Start => margin.min(room),
        Align::Middle => room / 2,
        Align::End => room.saturating_sub(margin),
    }
}

/// Top-left corner of the mark, clamped so the mark stays fully on canvas.
/// Margin insets from the anchored edges; centered axes ignore it.
pub fn resolve_position(
    anchor: Anchor,
    canvas: (u32, u32),
    mark: (u32, u32),
    margin: u32,
) -> (u32, u32) {
    let (horizontal, vertical) = anchor.axes();
    (
        align_offset(horizontal, canvas.0, mark.0, margin),
        align_offset(vertical, canvas.1, mark.1, margin),
    )
}

/// How mark colors combine with the base before the opacity mix
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BlendMode {
    #[default]
    Over,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
}

impl BlendMode {
    fn channel(self, base: f32, mark: f32) -> f32 {
        match self {
            Self::Over => mark,
            Self::Multiply => base * mark,
            Self::Screen => 1.0 - (1.0 - base) * (1.0 - mark),
            Self::Overlay => {
                if base < 0.5 {
                    2.0 * base * mark
                } else {
                    1.0 - 2.0 * (1.0 - base) * (1.0 - mark)
                }
            }
            Self::Darken => base.min(mark),
            Self::Lighten => base.max(mark),
        }
    }
}

/// Where and how strongly a mark is applied
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Placement {
    pub position: Anchor,
    /// 0.0 (invisible) to 1.0 (opaque)
    pub opacity: f32,
    /// Inset in pixels from the anchored edges
    pub margin: u32,
}

impl Default for Placement {
    fn default() -> Self {
        Self {
            position: Anchor::BottomRight,
            opacity: 0.5,
            margin: 20,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TextLayout {
    /// One mark at the anchor
    #[default]
    Normal,
    /// Rotated to the diagonal angle and tiled over the whole image
    Diagonal,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextShadow {
    pub color: Color,
    pub offset_x: i32,
    pub offset_y: i32,
    pub blur: f32,
}

impl Default for TextShadow {
    fn default() -> Self {
        Self {
            color: Color::rgba(0, 0, 0, 160),
            offset_x: 2,
            offset_y: 2,
            blur: 2.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TextWatermark {
    pub content: String,
    pub font_family: String,
    pub font_size: f32,
    pub color: Color,
    pub shadow: Option<TextShadow>,
    /// Clockwise degrees
    pub rotation: f32,
    pub style: TextLayout,
    /// Counter-clockwise degrees used by the diagonal layout
    pub diagonal_angle: f32,
    /// Gap between diagonal tiles; half the mark size when unset
    pub tile_spacing: Option<u32>,
    #[serde(flatten)]
    pub placement: Placement,
}

impl Default for TextWatermark {
    fn default() -> Self {
        Self {
            content: String::new(),
            font_family: "DejaVu Sans".to_string(),
            font_size: 48.0,
            color: Color::WHITE,
            shadow: None,
            rotation: 0.0,
            style: TextLayout::Normal,
            diagonal_angle: 30.0,
            tile_spacing: None,
            placement: Placement::default(),
        }
    }
}

impl TextWatermark {
    pub fn new<S: Into<String>>(content: S) -> Self {
        Self {
            content: content.into(),
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageWatermark {
    /// Encoded mark image; supplied programmatically, never serialized
    #[serde(skip)]
    pub source: Bytes,
    /// Mark width as a fraction of the base width
    pub size: f32,
    pub blend: BlendMode,
    #[serde(flatten)]
    pub placement: Placement,
}

impl Default for ImageWatermark {
    fn default() -> Self {
        Self {
            source: Bytes::new(),
            size: 0.2,
            blend: BlendMode::Over,
            placement: Placement::default(),
        }
    }
}

impl ImageWatermark {
    pub fn new<B: Into<Bytes>>(source: B) -> Self {
        Self {
            source: source.into(),
            ..Self::default()
        }
    }
}

/// Text or image watermark
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum WatermarkSpec {
    Text(TextWatermark),
    Image(ImageWatermark),
}

impl WatermarkSpec {
    pub fn placement(&self) -> &Placement {
        match self {
            Self::Text(text) => &text.placement,
            Self::Image(image) => &image.placement,
        }
    }

    /// Check the spec before any pixels are touched
    pub fn validate(&self) -> Result<()> {
        let placement = self.placement();
        if !(0.0..=1.0).contains(&placement.opacity) {
            return Err(PressError::watermark(format!(
                "opacity must be between 0 and 1, got {}",
                placement.opacity
            )));
        }

        match self {
            Self::Text(text) => {
                if text.content.trim().is_empty() {
                    return Err(PressError::watermark("text watermark content is empty"));
                }
                if !(text.font_size > 0.0 && text.font_size.is_finite()) {
                    return Err(PressError::watermark(format!(
                        "font size must be positive, got {}",
                        text.font_size
                    )));
                }
            }
            Self::Image(image) => {
                if image.source.is_empty() {
                    return Err(PressError::watermark("image watermark source is empty"));
                }
                if !(image.size > 0.0 && image.size <= 1.0) {
                    return Err(PressError::watermark(format!(
                        "size must be in (0, 1], got {}",
                        image.size
                    )));
                }
            }
        }
        Ok(())
    }
}

/// Composites watermarks onto images
#[derive(Debug, Clone, Default)]
pub struct WatermarkEngine {
    fonts: Arc<FontBook>,
}

impl WatermarkEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_fonts(fonts: Arc<FontBook>) -> Self {
        Self { fonts }
    }

    pub fn fonts(&self) -> &Arc<FontBook> {
        &self.fonts
    }

    /// Return a watermarked copy of `base`
    pub fn apply(&self, base: &DynamicImage, spec: &WatermarkSpec) -> Result<DynamicImage> {
        spec.validate()?;
        let mut canvas = base.to_rgba8();
        let canvas_size = canvas.dimensions();

        match spec {
            WatermarkSpec::Image(mark_spec) => {
                let mark = self.render_image_mark(mark_spec, canvas_size)?;
                let placement = &mark_spec.placement;
                let (x, y) = resolve_position(
                    placement.position,
                    canvas_size,
                    mark.dimensions(),
                    placement.margin,
                );
                debug!(x, y, w = mark.width(), h = mark.height(), "compositing image watermark");
                composite(&mut canvas, &mark, (i64::from(x), i64::from(y)), placement.opacity, mark_spec.blend);
            }
            WatermarkSpec::Text(text_spec) => {
                let layer = self.render_text_mark(text_spec)?;
                let placement = &text_spec.placement;
                match text_spec.style {
                    TextLayout::Normal => {
                        let rotated = if text_spec.rotation.abs() > f32::EPSILON {
                            rotate_expand(&layer, text_spec.rotation, Rgba([0, 0, 0, 0]))
                        } else {
                            layer
                        };
                        let mark = shrink_to_fit(rotated, canvas_size);
                        let (x, y) = resolve_position(
                            placement.position,
                            canvas_size,
                            mark.dimensions(),
                            placement.margin,
                        );
                        debug!(x, y, "compositing text watermark");
                        composite(&mut canvas, &mark, (i64::from(x), i64::from(y)), placement.opacity, BlendMode::Over);
                    }
                    TextLayout::Diagonal => {
                        let mark = rotate_expand(&layer, -text_spec.diagonal_angle, Rgba([0, 0, 0, 0]));
                        tile(&mut canvas, &mark, text_spec.tile_spacing, placement.opacity);
                    }
                }
            }
        }

        if base.color().has_alpha() {
            Ok(DynamicImage::ImageRgba8(canvas))
        } else {
            Ok(DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8()))
        }
    }

    #[allow(
        clippy::cast_precision_loss,
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss
    )]
    fn render_image_mark(&self, spec: &ImageWatermark, canvas: (u32, u32)) -> Result<RgbaImage> {
        let format = sniff_format(&spec.source, None)
            .map_err(|e| PressError::watermark(format!("watermark image unreadable: {e}")))?;
        let source = decode(&spec.source, format)
            .map_err(|e| PressError::watermark(format!("watermark image unreadable: {e}")))?;

        let target_width = ((canvas.0 as f32 * spec.size).round() as u32).max(1);
        let target_height = ((source.height() as f32 * target_width as f32 / source.width() as f32)
            .round() as u32)
            .max(1);
        let (w, h) = if target_width <= canvas.0 && target_height <= canvas.1 {
            (target_width, target_height)
        } else {
            scale_inside(source.width(), source.height(), canvas.0, canvas.1)
        };

        if (w, h) == source.dimensions() {
            return Ok(source.to_rgba8());
        }
        Ok(source
            .resize_exact(w, h, imageops::FilterType::Lanczos3)
            .to_rgba8())
    }

    fn render_text_mark(&self, spec: &TextWatermark) -> Result<RgbaImage> {
        let font = self.fonts.resolve(&spec.font_family)?;
        let style = TextStyle {
            size: spec.font_size,
            color: spec.color,
            shadow: spec.shadow.map(|shadow| ShadowStyle {
                color: shadow.color,
                offset_x: shadow.offset_x,
                offset_y: shadow.offset_y,
                blur: shadow.blur,
            }),
        };
        render_text(&font, &spec.content, &style)
    }
}

/// Downscale a mark that is larger than the canvas
fn shrink_to_fit(mark: RgbaImage, canvas: (u32, u32)) -> RgbaImage {
    if mark.width() <= canvas.0 && mark.height() <= canvas.1 {
        return mark;
    }
    let (w, h) = scale_inside(mark.width(), mark.height(), canvas.0, canvas.1);
    imageops::resize(&mark, w, h, imageops::FilterType::Triangle)
}

/// Repeat the mark over the canvas in staggered rows, clipping at the edges
fn tile(canvas: &mut RgbaImage, mark: &RgbaImage, spacing: Option<u32>, opacity: f32) {
    let (mark_w, mark_h) = (i64::from(mark.width()), i64::from(mark.height()));
    let gap = spacing.map_or((mark_w.min(mark_h) / 2).max(1), i64::from);
    let step_x = mark_w + gap;
    let step_y = mark_h + gap;
    let (canvas_w, canvas_h) = (i64::from(canvas.width()), i64::from(canvas.height()));

    let mut row = 0;
    let mut y = -mark_h / 2;
    while y < canvas_h {
        let stagger = if row % 2 == 1 { step_x / 2 } else { 0 };
        let mut x = -mark_w / 2 - stagger;
        while x < canvas_w {
            composite(canvas, mark, (x, y), opacity, BlendMode::Over);
            x += step_x;
        }
        y += step_y;
        row += 1;
    }
}

/// Blend `mark` onto `canvas` at `origin`. Only pixels under the mark are
/// written; parts of the mark outside the canvas are skipped.
pub fn composite(
    canvas: &mut RgbaImage,
    mark: &RgbaImage,
    origin: (i64, i64),
    opacity: f32,
    blend: BlendMode,
) {
    let opacity = opacity.clamp(0.0, 1.0);
    let (canvas_w, canvas_h) = canvas.dimensions();

    for (mx, my, mark_px) in mark.enumerate_pixels() {
        let x = u32::try_from(origin.0 + i64::from(mx));
        let y = u32::try_from(origin.1 + i64::from(my));
        let (Ok(x), Ok(y)) = (x, y) else {
            continue;
        };
        if x >= canvas_w || y >= canvas_h {
            continue;
        }
        let alpha = f32::from(mark_px[3]) / 255.0 * opacity;
        if alpha <= 0.0 {
            continue;
        }
        let base_px = canvas.get_pixel_mut(x, y);
        *base_px = blend_pixel(*base_px, *mark_px, alpha, blend);
    }
}

/// pixel = base * (1 - a) + blend(base, mark) * a
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn blend_pixel(base: Rgba<u8>, mark: Rgba<u8>, alpha: f32, blend: BlendMode) -> Rgba<u8> {
    let mut out = base;
    for c in 0..3 {
        let b = f32::from(base[c]) / 255.0;
        let m = f32::from(mark[c]) / 255.0;
        let mixed = b * (1.0 - alpha) + blend.channel(b, m) * alpha;
        out[c] = (mixed * 255.0).round().clamp(0.0, 255.0) as u8;
    }
    let base_alpha = f32::from(base[3]) / 255.0;
    let out_alpha = alpha + base_alpha * (1.0 - alpha);
    out[3] = (out_alpha * 255.0).round().clamp(0.0, 255.0) as u8;
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ImageFormat;
    use crate::processing::formats::encode;
    use image::{ImageBuffer, Rgb};

    fn base(width: u32, height: u32) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([0, 0, 255])))
    }

    #[test]
    fn test_composite_clips_at_every_edge() {
        let mark = RgbaImage::from_pixel(4, 4, Rgba([255, 0, 0, 255]));
        let blank = Rgba([0, 0, 0, 0]);

        let mut canvas = RgbaImage::from_pixel(6, 6, blank);
        composite(&mut canvas, &mark, (-2, -2), 1.0, BlendMode::Over);
        assert_eq!(canvas.get_pixel(1, 1)[0], 255);
        assert_eq!(canvas.get_pixel(2, 2), &blank);

        let mut canvas = RgbaImage::from_pixel(6, 6, blank);
        composite(&mut canvas, &mark, (4, 4), 1.0, BlendMode::Over);
        assert_eq!(canvas.get_pixel(5, 5)[0], 255);
        assert_eq!(canvas.get_pixel(3, 3), &blank);

        let untouched = RgbaImage::from_pixel(6, 6, blank);
        for origin in [(-10, 0), (0, -10), (6, 0), (i64::from(u32::MAX) + 1, 0)] {
            let mut canvas = untouched.clone();
            composite(&mut canvas, &mark, origin, 1.0, BlendMode::Over);
            assert_eq!(canvas, untouched, "origin {origin:?}");
        }
    }

    fn mark_png(width: u32, height: u32) -> Bytes {
        let mark = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(width, height, Rgb([255, 0, 0])));
        Bytes::from(encode(&mark, ImageFormat::Png, 80).unwrap())
    }

    #[test]
    fn test_bottom_right_with_margin() {
        assert_eq!(
            resolve_position(Anchor::BottomRight, (1000, 800), (100, 100), 20),
            (880, 680)
        );
    }

    #[test]
    fn test_all_anchors() {
        let canvas = (1000, 800);
        let mark = (100, 100);
        let expected = [
            (20, 20),
            (450, 20),
            (880, 20),
            (20, 350),
            (450, 350),
            (880, 350),
            (20, 680),
            (450, 680),
            (880, 680),
        ];
        for (anchor, expected) in Anchor::ALL.iter().zip(expected) {
            assert_eq!(resolve_position(*anchor, canvas, mark, 20), expected, "{anchor}");
        }
    }

    #[test]
    fn test_position_clamps_on_canvas() {
        // Margin larger than the free space
        assert_eq!(
            resolve_position(Anchor::BottomRight, (120, 120), (100, 100), 50),
            (0, 0)
        );
        assert_eq!(
            resolve_position(Anchor::TopLeft, (120, 120), (100, 100), 50),
            (20, 20)
        );
    }

    #[test]
    fn test_anchor_parsing() {
        assert_eq!("bottom-right".parse::<Anchor>().unwrap(), Anchor::BottomRight);
        assert_eq!("TOP_LEFT".parse::<Anchor>().unwrap(), Anchor::TopLeft);
        assert_eq!("center".parse::<Anchor>().unwrap(), Anchor::Center);
        assert!("somewhere".parse::<Anchor>().is_err());
    }

    #[test]
    fn test_image_watermark_region_only() {
        let engine = WatermarkEngine::new();
        let mut spec = ImageWatermark::new(mark_png(100, 100));
        spec.size = 0.1;
        spec.placement = Placement {
            position: Anchor::BottomRight,
            opacity: 0.5,
            margin: 20,
        };

        let out = engine
            .apply(&base(1000, 800), &WatermarkSpec::Image(spec))
            .unwrap()
            .to_rgb8();

        // Half red over blue inside the region
        let inside = out.get_pixel(900, 700);
        assert!((i32::from(inside[0]) - 128).abs() <= 1);
        assert!((i32::from(inside[2]) - 128).abs() <= 1);
        assert_eq!(out.get_pixel(880, 680)[0], inside[0]);

        // Untouched outside
        assert_eq!(out.get_pixel(879, 680), &Rgb([0, 0, 255]));
        assert_eq!(out.get_pixel(980, 780), &Rgb([0, 0, 255]));
        assert_eq!(out.get_pixel(0, 0), &Rgb([0, 0, 255]));
    }

    #[test]
    fn test_blend_modes() {
        let base_px = Rgba([100, 200, 50, 255]);
        let mark_px = Rgba([200, 100, 255, 255]);
        let multiply = blend_pixel(base_px, mark_px, 1.0, BlendMode::Multiply);
        assert_eq!(multiply[0], 78);
        let darken = blend_pixel(base_px, mark_px, 1.0, BlendMode::Darken);
        assert_eq!(darken, Rgba([100, 100, 50, 255]));
        let lighten = blend_pixel(base_px, mark_px, 1.0, BlendMode::Lighten);
        assert_eq!(lighten, Rgba([200, 200, 255, 255]));
        let untouched = blend_pixel(base_px, mark_px, 0.0, BlendMode::Over);
        assert_eq!(untouched, base_px);
    }

    #[test]
    fn test_invalid_specs() {
        let engine = WatermarkEngine::new();
        let empty_text = WatermarkSpec::Text(TextWatermark::new("   "));
        assert!(matches!(
            engine.apply(&base(10, 10), &empty_text),
            Err(PressError::InvalidWatermarkSpec { .. })
        ));

        let empty_image = WatermarkSpec::Image(ImageWatermark::default());
        assert!(matches!(
            engine.apply(&base(10, 10), &empty_image),
            Err(PressError::InvalidWatermarkSpec { .. })
        ));

        let garbage = WatermarkSpec::Image(ImageWatermark::new(Bytes::from_static(b"nope")));
        assert!(matches!(
            engine.apply(&base(10, 10), &garbage),
            Err(PressError::InvalidWatermarkSpec { .. })
        ));
    }

    #[test]
    fn test_spec_deserializes_as_tagged_union() {
        let spec: WatermarkSpec = serde_json::from_str(
            r##"{"type": "text", "content": "(c) ACME", "font_size": 24, "position": "top-left", "opacity": 0.8, "margin": 10}"##,
        )
        .unwrap();
        let WatermarkSpec::Text(text) = spec else {
            panic!("expected text watermark");
        };
        assert_eq!(text.content, "(c) ACME");
        assert_eq!(text.placement.position, Anchor::TopLeft);
        assert_eq!(text.placement.margin, 10);
        assert!((text.placement.opacity - 0.8).abs() < f32::EPSILON);
    }

    #[test]
    fn test_text_watermark_changes_only_corner() {
        let Some(font) = text::tests::any_font() else {
            eprintln!("no system font installed, skipping");
            return;
        };
        let fonts = FontBook::new();
        fonts.register("Test Sans", font.to_vec()).unwrap();
        let engine = WatermarkEngine::with_fonts(Arc::new(fonts));

        let mut spec = TextWatermark::new("SAMPLE");
        spec.font_family = "Test Sans".to_string();
        spec.font_size = 32.0;
        spec.placement.opacity = 1.0;
        spec.placement.position = Anchor::TopLeft;

        let out = engine
            .apply(&base(400, 300), &WatermarkSpec::Text(spec))
            .unwrap()
            .to_rgb8();
        assert_eq!(out.get_pixel(399, 299), &Rgb([0, 0, 255]));
        let changed = out.pixels().filter(|p| **p != Rgb([0, 0, 255])).count();
        assert!(changed > 0);
    }

    #[test]
    fn test_diagonal_tiles_across_image() {
        let Some(font) = text::tests::any_font() else {
            eprintln!("no system font installed, skipping");
            return;
        };
        let fonts = FontBook::new();
        fonts.register("Test Sans", font.to_vec()).unwrap();
        let engine = WatermarkEngine::with_fonts(Arc::new(fonts));

        let mut spec = TextWatermark::new("DRAFT");
        spec.font_family = "Test Sans".to_string();
        spec.font_size = 24.0;
        spec.style = TextLayout::Diagonal;
        spec.placement.opacity = 1.0;

        let out = engine
            .apply(&base(600, 600), &WatermarkSpec::Text(spec))
            .unwrap()
            .to_rgb8();
        let touched = |x0: u32, y0: u32| {
            (x0..x0 + 300)
                .flat_map(|x| (y0..y0 + 300).map(move |y| (x, y)))
                .any(|(x, y)| out.get_pixel(x, y) != &Rgb([0, 0, 255]))
        };
        assert!(touched(0, 0));
        assert!(touched(300, 0));
        assert!(touched(0, 300));
        assert!(touched(300, 300));
    }
}
