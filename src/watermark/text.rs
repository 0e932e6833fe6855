//! Font discovery and text rasterization for text watermarks

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use image::{imageops, Rgba, RgbaImage};
use once_cell::sync::Lazy;
use skrifa::instance::{LocationRef, Size};
use skrifa::outline::{DrawSettings, OutlinePen};
use skrifa::{FontRef, MetadataProvider};
use tracing::{debug, warn};
use walkdir::WalkDir;
use zeno::{Command, Mask};

use crate::config::Color;
use crate::error::{PressError, Result};

/// Families tried when the requested one is not installed
const FALLBACK_FAMILIES: &[&str] = &[
    "DejaVu Sans",
    "Liberation Sans",
    "Noto Sans",
    "Arial",
    "Helvetica",
    "FreeSans",
];

const FONT_EXTENSIONS: &[&str] = &["ttf", "otf", "ttc"];

/// Font files found under the usual system directories, scanned once
static SYSTEM_FONTS: Lazy<Vec<PathBuf>> = Lazy::new(scan_system_fonts);

fn font_dirs() -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = [
        "/usr/share/fonts",
        "/usr/local/share/fonts",
        "/Library/Fonts",
        "/System/Library/Fonts",
        "C:\\Windows\\Fonts",
    ]
    .iter()
    .map(PathBuf::from)
    .collect();

    if let Some(home) = std::env::var_os("HOME") {
        let home = PathBuf::from(home);
        dirs.push(home.join(".fonts"));
        dirs.push(home.join(".local/share/fonts"));
        dirs.push(home.join("Library/Fonts"));
    }
    dirs
}

fn scan_system_fonts() -> Vec<PathBuf> {
    let mut fonts: Vec<PathBuf> = font_dirs()
        .into_iter()
        .filter(|dir| dir.is_dir())
        .flat_map(|dir| {
            WalkDir::new(dir)
                .follow_links(true)
                .into_iter()
                .filter_map(|entry| entry.ok())
                .filter(|entry| entry.file_type().is_file())
                .map(|entry| entry.into_path())
                .filter(|path| {
                    path.extension()
                        .and_then(|ext| ext.to_str())
                        .is_some_and(|ext| {
                            FONT_EXTENSIONS.iter().any(|known| known.eq_ignore_ascii_case(ext))
                        })
                })
        })
        .collect();
    fonts.sort();
    debug!("found {} system font files", fonts.len());
    fonts
}

/// Lowercase alphanumerics only, so "DejaVu Sans" matches `DejaVuSans.ttf`
fn normalize_family(name: &str) -> String {
    name.chars()
        .filter(char::is_ascii_alphanumeric)
        .map(|c| c.to_ascii_lowercase())
        .collect()
}

fn file_key(path: &Path) -> String {
    path.file_stem()
        .and_then(|stem| stem.to_str())
        .map(normalize_family)
        .unwrap_or_default()
}

/// Resolves font family names to font bytes
#[derive(Debug, Default)]
pub struct FontBook {
    registered: RwLock<HashMap<String, Arc<Vec<u8>>>>,
    loaded: RwLock<HashMap<PathBuf, Arc<Vec<u8>>>>,
}

impl FontBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a font available under a family name, ahead of system fonts
    pub fn register<S: AsRef<str>>(&self, family: S, data: Vec<u8>) -> Result<()> {
        FontRef::from_index(&data, 0).map_err(|e| {
            PressError::watermark(format!("font '{}' is not a valid font: {e}", family.as_ref()))
        })?;
        let mut registered = self
            .registered
            .write()
            .map_err(|_| PressError::internal("font registry lock poisoned"))?;
        registered.insert(normalize_family(family.as_ref()), Arc::new(data));
        Ok(())
    }

    /// Find font bytes for a family, falling back to any usable font
    pub fn resolve(&self, family: &str) -> Result<Arc<Vec<u8>>> {
        let key = normalize_family(family);
        if let Some(data) = self.registered_font(&key) {
            return Ok(data);
        }

        if let Some(path) = find_system_font(&key) {
            return self.load(&path);
        }

        for fallback in FALLBACK_FAMILIES {
            let key = normalize_family(fallback);
            if let Some(data) = self.registered_font(&key) {
                return Ok(data);
            }
            if let Some(path) = find_system_font(&key) {
                debug!(requested = family, using = *fallback, "font fallback");
                return self.load(&path);
            }
        }

        // Anything registered, then anything installed
        if let Some(data) = self
            .registered
            .read()
            .ok()
            .and_then(|fonts| fonts.values().next().cloned())
        {
            return Ok(data);
        }
        for path in SYSTEM_FONTS.iter() {
            if let Ok(data) = self.load(path) {
                warn!(requested = family, using = %path.display(), "no matching font family");
                return Ok(data);
            }
        }

        Err(PressError::font_not_found(family))
    }

    fn registered_font(&self, key: &str) -> Option<Arc<Vec<u8>>> {
        self.registered.read().ok()?.get(key).cloned()
    }

    fn load(&self, path: &Path) -> Result<Arc<Vec<u8>>> {
        if let Some(data) = self.loaded.read().ok().and_then(|fonts| fonts.get(path).cloned()) {
            return Ok(data);
        }

        let data = std::fs::read(path)?;
        FontRef::from_index(&data, 0).map_err(|e| {
            PressError::watermark(format!("{} is not a usable font: {e}", path.display()))
        })?;
        let data = Arc::new(data);
        if let Ok(mut loaded) = self.loaded.write() {
            loaded.insert(path.to_path_buf(), Arc::clone(&data));
        }
        Ok(data)
    }
}

/// Exact stem match first, then a regular/book face of the family
fn find_system_font(key: &str) -> Option<PathBuf> {
    if key.is_empty() {
        return None;
    }
    let fonts = SYSTEM_FONTS.as_slice();
    fonts
        .iter()
        .find(|path| file_key(path) == key)
        .or_else(|| {
            fonts.iter().find(|path| {
                let stem = file_key(path);
                stem.strip_prefix(key)
                    .is_some_and(|style| matches!(style, "regular" | "book" | "roman" | "r"))
            })
        })
        .cloned()
}

/// Appearance of a rendered line of text
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TextStyle {
    pub size: f32,
    pub color: Color,
    pub shadow: Option<ShadowStyle>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShadowStyle {
    pub color: Color,
    pub offset_x: i32,
    pub offset_y: i32,
    pub blur: f32,
}

/// Collects a whole line of glyph outlines into one zeno path, flipping
/// font units (y up) into pixel rows (y down)
struct LinePen {
    commands: Vec<Command>,
    origin_x: f32,
    baseline: f32,
}

impl LinePen {
    fn point(&self, x: f32, y: f32) -> zeno::Vector {
        (self.origin_x + x, self.baseline - y).into()
    }
}

impl OutlinePen for LinePen {
    fn move_to(&mut self, x: f32, y: f32) {
        let p = self.point(x, y);
        self.commands.push(Command::MoveTo(p));
    }

    fn line_to(&mut self, x: f32, y: f32) {
        let p = self.point(x, y);
        self.commands.push(Command::LineTo(p));
    }

    fn quad_to(&mut self, cx: f32, cy: f32, x: f32, y: f32) {
        let (c, p) = (self.point(cx, cy), self.point(x, y));
        self.commands.push(Command::QuadTo(c, p));
    }

    fn curve_to(&mut self, cx0: f32, cy0: f32, cx1: f32, cy1: f32, x: f32, y: f32) {
        let (c0, c1, p) = (self.point(cx0, cy0), self.point(cx1, cy1), self.point(x, y));
        self.commands.push(Command::CurveTo(c0, c1, p));
    }

    fn close(&mut self) {
        self.commands.push(Command::Close);
    }
}

/// Rasterize one line of text into an 8-bit coverage mask
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn rasterize_line(font_data: &[u8], text: &str, size: f32) -> Result<(Vec<u8>, u32, u32)> {
    let font = FontRef::from_index(font_data, 0)
        .map_err(|e| PressError::watermark(format!("unreadable font: {e}")))?;
    let px = Size::new(size);
    let location = LocationRef::default();
    let metrics = font.metrics(px, location);
    let glyph_metrics = font.glyph_metrics(px, location);
    let charmap = font.charmap();
    let outlines = font.outline_glyphs();

    let ascent = metrics.ascent.ceil();
    let height = (metrics.ascent - metrics.descent).ceil().max(1.0);
    let mut pen = LinePen {
        commands: Vec::new(),
        origin_x: 0.0,
        baseline: ascent,
    };

    for ch in text.chars() {
        let Some(glyph_id) = charmap.map(ch).or_else(|| charmap.map('?')) else {
            pen.origin_x += size * 0.5;
            continue;
        };
        if let Some(glyph) = outlines.get(glyph_id) {
            let settings = DrawSettings::unhinted(px, location);
            glyph
                .draw(settings, &mut pen)
                .map_err(|e| PressError::watermark(format!("glyph outline failed: {e:?}")))?;
        }
        pen.origin_x += glyph_metrics
            .advance_width(glyph_id)
            .unwrap_or(size * 0.5);
    }

    let width = pen.origin_x.ceil().max(1.0) as u32;
    let height = height as u32;
    if pen.commands.is_empty() {
        return Ok((vec![0; (width * height) as usize], width, height));
    }

    let (mask, _placement) = Mask::new(&pen.commands).size(width, height).render();
    Ok((mask, width, height))
}

fn tint(mask: &[u8], width: u32, height: u32, color: Color) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let coverage = u32::from(mask[(y * width + x) as usize]);
        let alpha = u8::try_from(coverage * u32::from(color.a) / 255).unwrap_or(u8::MAX);
        Rgba([color.r, color.g, color.b, alpha])
    })
}

/// Render text with an optional blurred drop shadow onto a transparent layer
#[allow(clippy::cast_possible_truncation)]
pub fn render_text(font_data: &[u8], text: &str, style: &TextStyle) -> Result<RgbaImage> {
    if style.size <= 0.0 || !style.size.is_finite() {
        return Err(PressError::watermark(format!(
            "font size must be positive, got {}",
            style.size
        )));
    }
    let (mask, width, height) = rasterize_line(font_data, text, style.size)?;
    let fill = tint(&mask, width, height, style.color);

    let Some(shadow) = style.shadow else {
        return Ok(fill);
    };

    // Room for the offset plus the blur spread on every side
    let spread = (shadow.blur.max(0.0) * 3.0).ceil() as i64;
    let pad_left = spread + i64::from((-shadow.offset_x).max(0));
    let pad_top = spread + i64::from((-shadow.offset_y).max(0));
    let pad_right = spread + i64::from(shadow.offset_x.max(0));
    let pad_bottom = spread + i64::from(shadow.offset_y.max(0));
    let canvas_w = u32::try_from(i64::from(width) + pad_left + pad_right)
        .map_err(|_| PressError::watermark("shadow canvas too large"))?;
    let canvas_h = u32::try_from(i64::from(height) + pad_top + pad_bottom)
        .map_err(|_| PressError::watermark("shadow canvas too large"))?;

    // Transparent pixels carry the shadow color so the blur does not darken its edge
    let clear = Rgba([shadow.color.r, shadow.color.g, shadow.color.b, 0]);
    let mut shadow_layer = RgbaImage::from_pixel(canvas_w, canvas_h, clear);
    imageops::overlay(
        &mut shadow_layer,
        &tint(&mask, width, height, shadow.color),
        pad_left + i64::from(shadow.offset_x),
        pad_top + i64::from(shadow.offset_y),
    );
    if shadow.blur > 0.0 {
        shadow_layer = imageops::blur(&shadow_layer, shadow.blur);
    }

    imageops::overlay(&mut shadow_layer, &fill, pad_left, pad_top);
    Ok(shadow_layer)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Any installed font, or `None` on machines without one
    pub(crate) fn any_font() -> Option<Arc<Vec<u8>>> {
        FontBook::new().resolve("DejaVu Sans").ok()
    }

    #[test]
    fn test_normalize_family() {
        assert_eq!(normalize_family("DejaVu Sans"), "dejavusans");
        assert_eq!(normalize_family("Liberation-Sans_Bold"), "liberationsansbold");
    }

    #[test]
    fn test_register_rejects_garbage() {
        let book = FontBook::new();
        assert!(book.register("Broken", b"not a font".to_vec()).is_err());
    }

    #[test]
    fn test_registered_font_wins() {
        let Some(font) = any_font() else {
            eprintln!("no system font installed, skipping");
            return;
        };
        let book = FontBook::new();
        book.register("Brand Face", font.to_vec()).unwrap();
        let resolved = book.resolve("brand-face").unwrap();
        assert_eq!(resolved.len(), font.len());
    }

    #[test]
    fn test_rasterize_line_has_coverage() {
        let Some(font) = any_font() else {
            eprintln!("no system font installed, skipping");
            return;
        };
        let (mask, width, height) = rasterize_line(&font, "Hello", 32.0).unwrap();
        assert!(width > 40);
        assert!(height >= 32);
        assert_eq!(mask.len(), (width * height) as usize);
        assert!(mask.iter().any(|&v| v > 200));
    }

    #[test]
    fn test_shadow_extends_layer() {
        let Some(font) = any_font() else {
            eprintln!("no system font installed, skipping");
            return;
        };
        let plain = render_text(
            &font,
            "Mark",
            &TextStyle {
                size: 24.0,
                color: Color::WHITE,
                shadow: None,
            },
        )
        .unwrap();
        let shadowed = render_text(
            &font,
            "Mark",
            &TextStyle {
                size: 24.0,
                color: Color::WHITE,
                shadow: Some(ShadowStyle {
                    color: Color::BLACK,
                    offset_x: 3,
                    offset_y: 3,
                    blur: 1.0,
                }),
            },
        )
        .unwrap();
        assert!(shadowed.width() > plain.width());
        assert!(shadowed.height() > plain.height());
    }
}
