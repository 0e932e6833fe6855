//! Optimization suggestions derived from an analysis

use serde::{Deserialize, Serialize};

use crate::config::ImageFormat;

/// Megapixel count above which a web resize is suggested
const RESIZE_THRESHOLD_MP: f64 = 8.0;

/// Bytes per pixel above which a quality reduction is suggested
const HEAVY_BYTES_PER_PIXEL: f64 = 1.0;

/// Mean HSL saturation above which a bit-depth reduction is suggested
const HIGH_SATURATION: f64 = 0.7;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecommendationKind {
    Format,
    Quality,
    Resize,
    BitDepth,
    Metadata,
}

/// Ordered so that `High` sorts first
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    Medium,
    Low,
}

/// Expected savings as a percentage range of the current file size
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Savings {
    pub min_percent: u8,
    pub max_percent: u8,
}

impl Savings {
    const fn new(min_percent: u8, max_percent: u8) -> Self {
        Self {
            min_percent,
            max_percent,
        }
    }

    pub fn midpoint(&self) -> f64 {
        (f64::from(self.min_percent) + f64::from(self.max_percent)) / 2.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    #[serde(rename = "type")]
    pub kind: RecommendationKind,
    pub priority: Priority,
    pub savings: Savings,
    pub description: String,
    pub action: String,
}

/// Facts the rules look at
#[derive(Debug, Clone, Copy)]
pub struct ImageFacts {
    pub format: ImageFormat,
    pub has_alpha: bool,
    pub file_size: u64,
    pub megapixels: f64,
    pub bytes_per_pixel: f64,
    /// Unknown when color analysis was skipped or failed
    pub mean_saturation: Option<f64>,
    pub has_exif: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationSet {
    pub items: Vec<Recommendation>,
    pub original_size: u64,
    /// Original size with every applicable savings midpoint compounded on
    pub estimated_optimized_size: u64,
    pub estimated_savings_percent: f64,
}

impl RecommendationSet {
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn of_kind(&self, kind: RecommendationKind) -> Option<&Recommendation> {
        self.items.iter().find(|r| r.kind == kind)
    }
}

#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn recommend(facts: &ImageFacts) -> RecommendationSet {
    let mut items = Vec::new();

    if facts.format == ImageFormat::Png && !facts.has_alpha {
        items.push(Recommendation {
            kind: RecommendationKind::Format,
            priority: Priority::High,
            savings: Savings::new(20, 40),
            description: "PNG without transparency is usually larger than an equivalent JPEG".into(),
            action: "Convert to JPEG at quality 85".into(),
        });
    }

    if facts.format == ImageFormat::Jpeg {
        items.push(Recommendation {
            kind: RecommendationKind::Format,
            priority: Priority::Medium,
            savings: Savings::new(15, 25),
            description: "WebP compresses photographic content better than JPEG".into(),
            action: "Convert to WebP at quality 80".into(),
        });
    }

    if facts.bytes_per_pixel > HEAVY_BYTES_PER_PIXEL {
        items.push(Recommendation {
            kind: RecommendationKind::Quality,
            priority: Priority::Medium,
            savings: Savings::new(30, 50),
            description: format!(
                "File uses {:.2} bytes per pixel, which suggests light compression",
                facts.bytes_per_pixel
            ),
            action: "Re-encode at quality 75-85".into(),
        });
    }

    if facts.megapixels > RESIZE_THRESHOLD_MP {
        items.push(Recommendation {
            kind: RecommendationKind::Resize,
            priority: Priority::High,
            savings: Savings::new(40, 60),
            description: format!("{:.1}MP is more than web pages need", facts.megapixels),
            action: "Resize to at most 2048px on the longest edge".into(),
        });
    }

    if facts.mean_saturation.is_some_and(|s| s > HIGH_SATURATION) {
        items.push(Recommendation {
            kind: RecommendationKind::BitDepth,
            priority: Priority::Low,
            savings: Savings::new(5, 15),
            description: "Highly saturated palette may quantize well".into(),
            action: "Try an 8-bit palette or reduced color depth".into(),
        });
    }

    if facts.has_exif {
        items.push(Recommendation {
            kind: RecommendationKind::Metadata,
            priority: Priority::Low,
            savings: Savings::new(5, 10),
            description: "EXIF metadata is embedded in the file".into(),
            action: "Strip metadata unless camera details are needed".into(),
        });
    }

    // stable: rules of equal priority keep their order
    items.sort_by_key(|r| r.priority);

    let retained: f64 = items
        .iter()
        .map(|r| 1.0 - r.savings.midpoint() / 100.0)
        .product();
    let estimated_optimized_size = (facts.file_size as f64 * retained).round() as u64;

    RecommendationSet {
        estimated_savings_percent: (1.0 - retained) * 100.0,
        original_size: facts.file_size,
        estimated_optimized_size,
        items,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn facts(format: ImageFormat) -> ImageFacts {
        ImageFacts {
            format,
            has_alpha: false,
            file_size: 100_000,
            megapixels: 1.0,
            bytes_per_pixel: 0.1,
            mean_saturation: Some(0.2),
            has_exif: false,
        }
    }

    #[test]
    fn test_png_without_alpha_suggests_jpeg() {
        let set = recommend(&facts(ImageFormat::Png));
        let rec = set.of_kind(RecommendationKind::Format).unwrap();
        assert_eq!(rec.priority, Priority::High);
        assert!(rec.action.contains("JPEG"));
        assert_eq!(set.estimated_optimized_size, 70_000);
    }

    #[test]
    fn test_png_with_alpha_keeps_format() {
        let mut f = facts(ImageFormat::Png);
        f.has_alpha = true;
        let set = recommend(&f);
        assert!(set.is_empty());
        assert_eq!(set.estimated_optimized_size, f.file_size);
        assert_eq!(set.estimated_savings_percent, 0.0);
    }

    #[test]
    fn test_sorted_by_priority_and_compounded() {
        let f = ImageFacts {
            format: ImageFormat::Jpeg,
            has_alpha: false,
            file_size: 1_000_000,
            megapixels: 12.0,
            bytes_per_pixel: 1.5,
            mean_saturation: Some(0.9),
            has_exif: true,
        };
        let set = recommend(&f);
        let kinds: Vec<_> = set.items.iter().map(|r| r.kind).collect();
        assert_eq!(
            kinds,
            vec![
                RecommendationKind::Resize,
                RecommendationKind::Format,
                RecommendationKind::Quality,
                RecommendationKind::BitDepth,
                RecommendationKind::Metadata,
            ]
        );

        let expected: f64 = 1_000_000.0 * 0.8 * 0.6 * 0.5 * 0.9 * 0.925;
        assert_eq!(set.estimated_optimized_size, expected.round() as u64);
    }

    #[test]
    fn test_unknown_saturation_skips_bit_depth() {
        let mut f = facts(ImageFormat::WebP);
        f.mean_saturation = None;
        assert!(recommend(&f).of_kind(RecommendationKind::BitDepth).is_none());
    }
}
