//! Heuristic 0-10 quality scores

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage};
use serde::{Deserialize, Serialize};

use crate::config::ImageFormat;

/// Edge of the grayscale copy used for the sharpness estimate
const SHARPNESS_EDGE: u32 = 100;

/// Edge of the grayscale copy used for the noise estimate
const NOISE_EDGE: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Rating {
    Poor,
    Fair,
    Good,
    Excellent,
}

impl Rating {
    pub fn from_score(score: f64) -> Self {
        if score >= 8.0 {
            Self::Excellent
        } else if score >= 6.0 {
            Self::Good
        } else if score >= 4.0 {
            Self::Fair
        } else {
            Self::Poor
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityScore {
    pub score: u8,
    pub rating: Rating,
    pub recommendation: String,
    /// Raw measurement the score was derived from
    pub measured: f64,
}

impl QualityScore {
    fn new<S: Into<String>>(score: u8, measured: f64, recommendation: S) -> Self {
        Self {
            score,
            rating: Rating::from_score(f64::from(score)),
            recommendation: recommendation.into(),
            measured,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub resolution: QualityScore,
    pub format: QualityScore,
    pub compression: QualityScore,
    pub sharpness: QualityScore,
    pub noise: QualityScore,
    /// Mean of the five scores
    pub overall_score: f64,
    pub overall_rating: Rating,
}

#[allow(clippy::cast_precision_loss)]
pub fn assess_quality(image: &DynamicImage, format: ImageFormat, file_size: u64) -> QualityReport {
    let pixels = u64::from(image.width()) * u64::from(image.height());
    let megapixels = pixels as f64 / 1_000_000.0;
    let bytes_per_pixel = if pixels == 0 {
        0.0
    } else {
        file_size as f64 / pixels as f64
    };

    let resolution = resolution_score(megapixels);
    let format = format_score(format);
    let compression = compression_score(bytes_per_pixel);
    let sharpness = sharpness_score(laplacian_variance(&grayscale(image, SHARPNESS_EDGE)));
    let noise = noise_score(local_noise(&grayscale(image, NOISE_EDGE)));

    let overall_score = [&resolution, &format, &compression, &sharpness, &noise]
        .iter()
        .map(|s| f64::from(s.score))
        .sum::<f64>()
        / 5.0;

    QualityReport {
        resolution,
        format,
        compression,
        sharpness,
        noise,
        overall_score,
        overall_rating: Rating::from_score(overall_score),
    }
}

pub fn resolution_score(megapixels: f64) -> QualityScore {
    let score = match megapixels {
        mp if mp >= 12.0 => 10,
        mp if mp >= 8.0 => 9,
        mp if mp >= 5.0 => 8,
        mp if mp >= 2.0 => 7,
        mp if mp >= 1.0 => 6,
        mp if mp >= 0.5 => 4,
        _ => 2,
    };
    let advice = if score >= 8 {
        "Resolution is suitable for print and large displays"
    } else if score >= 6 {
        "Resolution is fine for web use"
    } else {
        "Low resolution; avoid displaying at large sizes"
    };
    QualityScore::new(score, megapixels, advice)
}

pub fn format_score(format: ImageFormat) -> QualityScore {
    let score = match format {
        ImageFormat::Tiff => 10,
        ImageFormat::Png => 9,
        ImageFormat::WebP | ImageFormat::Avif => 8,
        ImageFormat::Jpeg => 7,
        ImageFormat::Bmp => 5,
        ImageFormat::Gif => 4,
    };
    let advice = match format {
        ImageFormat::Tiff | ImageFormat::Bmp => "Lossless archival format; convert for delivery",
        ImageFormat::Png => "Lossless; best for graphics and transparency",
        ImageFormat::WebP | ImageFormat::Avif => "Modern format with efficient compression",
        ImageFormat::Jpeg => "Widely supported lossy format",
        ImageFormat::Gif => "Limited palette; prefer PNG or WebP",
    };
    QualityScore::new(score, f64::from(score), advice)
}

/// Scored on encoded bytes per pixel
pub fn compression_score(bytes_per_pixel: f64) -> QualityScore {
    let (score, advice) = match bytes_per_pixel {
        bpp if bpp <= 0.05 => (4, "Very aggressive compression; artifacts are likely"),
        bpp if bpp <= 0.5 => (9, "Well compressed"),
        bpp if bpp <= 1.0 => (8, "Good compression"),
        bpp if bpp <= 2.0 => (6, "Moderate compression; some savings available"),
        bpp if bpp <= 3.0 => (4, "Light compression; significant savings available"),
        _ => (2, "Barely compressed; re-encode to save space"),
    };
    QualityScore::new(score, bytes_per_pixel, advice)
}

pub fn sharpness_score(variance: f64) -> QualityScore {
    let (score, advice) = match variance {
        v if v > 500.0 => (10, "Very sharp"),
        v if v > 250.0 => (8, "Sharp"),
        v if v > 100.0 => (6, "Acceptable sharpness"),
        v if v > 50.0 => (4, "Slightly soft; consider sharpening"),
        _ => (2, "Blurry or low detail"),
    };
    QualityScore::new(score, variance, advice)
}

pub fn noise_score(mean_deviation: f64) -> QualityScore {
    let (score, advice) = match mean_deviation {
        d if d < 2.0 => (10, "Clean"),
        d if d < 5.0 => (8, "Low noise"),
        d if d < 10.0 => (6, "Moderate noise"),
        d if d < 20.0 => (4, "Noticeable noise; consider denoising"),
        _ => (2, "Heavy noise or dense texture"),
    };
    QualityScore::new(score, mean_deviation, advice)
}

fn grayscale(image: &DynamicImage, edge: u32) -> GrayImage {
    image.resize_exact(edge, edge, FilterType::Triangle).to_luma8()
}

/// Variance of the 4-neighbour Laplacian over interior pixels
#[allow(clippy::cast_precision_loss)]
pub fn laplacian_variance(img: &GrayImage) -> f64 {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;
    let at = |x: u32, y: u32| f64::from(img.get_pixel(x, y)[0]);

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let laplacian =
                at(x, y - 1) + at(x, y + 1) + at(x - 1, y) + at(x + 1, y) - 4.0 * at(x, y);
            sum += laplacian;
            sum_sq += laplacian * laplacian;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    (sum_sq / count as f64 - mean * mean).max(0.0)
}

/// Mean standard deviation of 3x3 neighbourhoods over interior pixels
#[allow(clippy::cast_precision_loss)]
pub fn local_noise(img: &GrayImage) -> f64 {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut total = 0.0f64;
    let mut count = 0u64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let mut sum = 0.0;
            let mut sum_sq = 0.0;
            for dy in 0..3 {
                for dx in 0..3 {
                    let v = f64::from(img.get_pixel(x + dx - 1, y + dy - 1)[0]);
                    sum += v;
                    sum_sq += v * v;
                }
            }
            let mean = sum / 9.0;
            total += (sum_sq / 9.0 - mean * mean).max(0.0).sqrt();
            count += 1;
        }
    }
    total / count as f64
}
