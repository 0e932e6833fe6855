//! Dominant colors, histograms and palette characterization

use image::{DynamicImage, GenericImageView};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::AnalysisOptions;
use crate::error::{PressError, Result};

/// Longest edge of the working copy used for color analysis
pub const SAMPLE_EDGE: u32 = 200;

/// Every n-th pixel of the working copy feeds the clustering
pub const SAMPLE_STRIDE: usize = 4;

/// Per-channel centroid movement below which k-means stops
pub const CONVERGENCE_EPSILON: f64 = 0.1;

/// CSS-style HSL: hue in degrees, saturation and lightness in percent
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Hsl {
    pub h: f64,
    pub s: f64,
    pub l: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DominantColor {
    pub rgb: [u8; 3],
    pub hex: String,
    pub hsl: Hsl,
    /// Share of sampled pixels in this cluster
    pub percentage: f64,
}

/// 256-bin histograms over the working copy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Histogram {
    pub red: Vec<u32>,
    pub green: Vec<u32>,
    pub blue: Vec<u32>,
    pub luminance: Vec<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Harmony {
    Single,
    Complementary,
    Analogous,
    Mixed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Temperature {
    Warm,
    Cool,
    Neutral,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mood {
    Vibrant,
    Muted,
    Dark,
    Bright,
    Balanced,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColorReport {
    /// Largest cluster first
    pub dominant_colors: Vec<DominantColor>,
    pub histogram: Histogram,
    /// Mean HSL lightness of the dominant colors (0-100)
    pub average_brightness: f64,
    /// Share-weighted HSL saturation of the dominant colors (0-1)
    pub mean_saturation: f64,
    pub harmony: Harmony,
    pub temperature: Temperature,
    pub mood: Mood,
    pub sampled_pixels: usize,
}

/// One k-means cluster
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Cluster {
    pub centroid: [f64; 3],
    pub size: usize,
}

#[allow(clippy::cast_precision_loss)]
pub fn analyze_colors(image: &DynamicImage, options: &AnalysisOptions) -> Result<ColorReport> {
    if options.color_count == 0 {
        return Err(PressError::invalid_parameters("color_count must be at least 1"));
    }

    let working = working_copy(image);
    let histogram = histogram(&working);
    let points = sample_points(&working);
    if points.is_empty() {
        return Err(PressError::invalid_parameters(
            "image has no opaque pixels to analyze",
        ));
    }

    let mut rng = match options.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    let clusters = kmeans(&points, options.color_count, options.max_iterations, &mut rng);
    let dominant_colors = to_dominant_colors(&clusters, points.len());

    let average_brightness = if dominant_colors.is_empty() {
        0.0
    } else {
        dominant_colors.iter().map(|c| c.hsl.l).sum::<f64>() / dominant_colors.len() as f64
    };
    let mean_saturation = dominant_colors
        .iter()
        .map(|c| c.hsl.s / 100.0 * c.percentage / 100.0)
        .sum::<f64>();

    let harmony = classify_harmony(&dominant_colors);
    let temperature = classify_temperature(&dominant_colors);
    let mood = classify_mood(mean_saturation, average_brightness / 100.0);

    debug!(
        colors = dominant_colors.len(),
        samples = points.len(),
        ?harmony,
        "color analysis done"
    );
    Ok(ColorReport {
        dominant_colors,
        histogram,
        average_brightness: round1(average_brightness),
        mean_saturation,
        harmony,
        temperature,
        mood,
        sampled_pixels: points.len(),
    })
}

fn working_copy(image: &DynamicImage) -> DynamicImage {
    let (w, h) = image.dimensions();
    if w > SAMPLE_EDGE || h > SAMPLE_EDGE {
        image.thumbnail(SAMPLE_EDGE, SAMPLE_EDGE)
    } else {
        image.clone()
    }
}

/// RGB points at a fixed stride, skipping mostly transparent pixels
pub fn sample_points(image: &DynamicImage) -> Vec<[f64; 3]> {
    image
        .to_rgba8()
        .pixels()
        .step_by(SAMPLE_STRIDE)
        .filter(|px| px[3] >= 128)
        .map(|px| [f64::from(px[0]), f64::from(px[1]), f64::from(px[2])])
        .collect()
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn histogram(image: &DynamicImage) -> Histogram {
    let mut hist = Histogram {
        red: vec![0; 256],
        green: vec![0; 256],
        blue: vec![0; 256],
        luminance: vec![0; 256],
    };
    for px in image.to_rgb8().pixels() {
        let [r, g, b] = px.0;
        hist.red[usize::from(r)] += 1;
        hist.green[usize::from(g)] += 1;
        hist.blue[usize::from(b)] += 1;
        let luma = 0.299 * f64::from(r) + 0.587 * f64::from(g) + 0.114 * f64::from(b);
        hist.luminance[(luma.round() as usize).min(255)] += 1;
    }
    hist
}

fn distance_sq(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    (0..3).map(|i| (a[i] - b[i]).powi(2)).sum()
}

/// Index of the nearest centroid; ties go to the lowest index
fn nearest(point: &[f64; 3], centroids: &[[f64; 3]]) -> usize {
    let mut best = 0;
    let mut best_distance = f64::INFINITY;
    for (i, centroid) in centroids.iter().enumerate() {
        let d = distance_sq(point, centroid);
        if d < best_distance {
            best = i;
            best_distance = d;
        }
    }
    best
}

/// k-means++ seeding: each further centroid is a sample point drawn with
/// probability proportional to its squared distance from the nearest
/// centroid so far. Stops early once every point sits on a centroid, so
/// there are never two identical seeds.
fn seed_centroids<R: Rng>(points: &[[f64; 3]], k: usize, rng: &mut R) -> Vec<[f64; 3]> {
    let first = points[rng.random_range(0..points.len())];
    let mut distances: Vec<f64> = points.iter().map(|p| distance_sq(p, &first)).collect();
    let mut centroids = vec![first];

    while centroids.len() < k {
        let total: f64 = distances.iter().sum();
        if total <= 0.0 {
            break;
        }
        let mut target = rng.random::<f64>() * total;
        let picked = distances
            .iter()
            .position(|&d| {
                if d > 0.0 && target < d {
                    true
                } else {
                    target -= d;
                    false
                }
            })
            .or_else(|| distances.iter().rposition(|&d| d > 0.0));
        let Some(index) = picked else { break };

        let centroid = points[index];
        for (d, point) in distances.iter_mut().zip(points) {
            *d = d.min(distance_sq(point, &centroid));
        }
        centroids.push(centroid);
    }
    centroids
}

/// Lloyd's k-means over k-means++ seeds. Returns at most as many clusters
/// as there are distinct points; empty clusters are dropped.
#[allow(clippy::cast_precision_loss)]
pub fn kmeans<R: Rng>(points: &[[f64; 3]], k: usize, max_iterations: usize, rng: &mut R) -> Vec<Cluster> {
    if points.is_empty() || k == 0 {
        return Vec::new();
    }
    let mut centroids = seed_centroids(points, k.min(points.len()), rng);
    let k = centroids.len();
    let mut assignments = vec![0usize; points.len()];

    for iteration in 0..max_iterations.max(1) {
        for (slot, point) in assignments.iter_mut().zip(points) {
            *slot = nearest(point, &centroids);
        }

        let mut sums = vec![[0.0f64; 3]; k];
        let mut counts = vec![0usize; k];
        for (point, &cluster) in points.iter().zip(&assignments) {
            for c in 0..3 {
                sums[cluster][c] += point[c];
            }
            counts[cluster] += 1;
        }

        let mut max_shift = 0.0f64;
        for i in 0..k {
            if counts[i] == 0 {
                continue;
            }
            let updated = [
                sums[i][0] / counts[i] as f64,
                sums[i][1] / counts[i] as f64,
                sums[i][2] / counts[i] as f64,
            ];
            for c in 0..3 {
                max_shift = max_shift.max((updated[c] - centroids[i][c]).abs());
            }
            centroids[i] = updated;
        }

        if max_shift < CONVERGENCE_EPSILON {
            debug!(iteration, "k-means converged");
            break;
        }
    }

    let mut counts = vec![0usize; k];
    for &cluster in &assignments {
        counts[cluster] += 1;
    }
    centroids
        .into_iter()
        .zip(counts)
        .filter(|(_, size)| *size > 0)
        .map(|(centroid, size)| Cluster { centroid, size })
        .collect()
}

/// Round centroids to RGB, merge clusters that land on the same color, and
/// sort by share
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn to_dominant_colors(clusters: &[Cluster], total: usize) -> Vec<DominantColor> {
    let mut merged: Vec<([u8; 3], usize)> = Vec::new();
    for cluster in clusters {
        let rgb = cluster.centroid.map(|c| c.round().clamp(0.0, 255.0) as u8);
        match merged.iter_mut().find(|(existing, _)| *existing == rgb) {
            Some((_, size)) => *size += cluster.size,
            None => merged.push((rgb, cluster.size)),
        }
    }
    merged.sort_by(|a, b| b.1.cmp(&a.1));

    let sizes: Vec<usize> = merged.iter().map(|(_, size)| *size).collect();
    merged
        .into_iter()
        .zip(shares(&sizes, total))
        .map(|((rgb, _), percentage)| DominantColor {
            rgb,
            hex: format!("#{:02x}{:02x}{:02x}", rgb[0], rgb[1], rgb[2]),
            hsl: rgb_to_hsl(rgb),
            percentage,
        })
        .collect()
}

/// Percent shares to one decimal, rounded by largest remainder so that
/// shares of a full partition add up to exactly 100
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
fn shares(sizes: &[usize], total: usize) -> Vec<f64> {
    if total == 0 {
        return vec![0.0; sizes.len()];
    }
    let exact: Vec<f64> = sizes
        .iter()
        .map(|&size| size as f64 * 1000.0 / total as f64)
        .collect();
    let mut tenths: Vec<usize> = exact.iter().map(|e| e.floor() as usize).collect();

    let assigned: usize = tenths.iter().sum();
    let mut by_remainder: Vec<usize> = (0..exact.len()).collect();
    by_remainder.sort_by(|&a, &b| (exact[b] - exact[b].floor()).total_cmp(&(exact[a] - exact[a].floor())));
    for &index in by_remainder.iter().take(1000usize.saturating_sub(assigned)) {
        tenths[index] += 1;
    }
    tenths.into_iter().map(|t| t as f64 / 10.0).collect()
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

pub fn rgb_to_hsl(rgb: [u8; 3]) -> Hsl {
    let [r, g, b] = rgb.map(|c| f64::from(c) / 255.0);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let l = (max + min) / 2.0;

    if (max - min).abs() < f64::EPSILON {
        return Hsl {
            h: 0.0,
            s: 0.0,
            l: round1(l * 100.0),
        };
    }

    let d = max - min;
    let s = if l > 0.5 {
        d / (2.0 - max - min)
    } else {
        d / (max + min)
    };
    let h = if max == r {
        (g - b) / d + if g < b { 6.0 } else { 0.0 }
    } else if max == g {
        (b - r) / d + 2.0
    } else {
        (r - g) / d + 4.0
    };

    Hsl {
        h: round1(h * 60.0),
        s: round1(s * 100.0),
        l: round1(l * 100.0),
    }
}

fn hue_distance(a: f64, b: f64) -> f64 {
    let d = (a - b).abs() % 360.0;
    d.min(360.0 - d)
}

pub fn classify_harmony(colors: &[DominantColor]) -> Harmony {
    if colors.len() < 2 {
        return Harmony::Single;
    }
    let pairs = || {
        colors.iter().enumerate().flat_map(move |(i, a)| {
            colors[i + 1..].iter().map(move |b| (a.hsl.h, b.hsl.h))
        })
    };
    if pairs().any(|(a, b)| (170.0..=190.0).contains(&(a - b).abs())) {
        Harmony::Complementary
    } else if pairs().any(|(a, b)| hue_distance(a, b) <= 30.0) {
        Harmony::Analogous
    } else {
        Harmony::Mixed
    }
}

/// Share-weighted warm vs cool hues; greys do not vote
pub fn classify_temperature(colors: &[DominantColor]) -> Temperature {
    let (mut warm, mut cool) = (0.0, 0.0);
    for color in colors.iter().filter(|c| c.hsl.s >= 10.0) {
        let h = color.hsl.h;
        let weight = color.percentage * color.hsl.s / 100.0;
        if h < 75.0 || h >= 330.0 {
            warm += weight;
        } else if (150.0..270.0).contains(&h) {
            cool += weight;
        }
    }
    if warm > cool * 1.2 && warm > 0.0 {
        Temperature::Warm
    } else if cool > warm * 1.2 && cool > 0.0 {
        Temperature::Cool
    } else {
        Temperature::Neutral
    }
}

/// `saturation` and `brightness` are 0-1
pub fn classify_mood(saturation: f64, brightness: f64) -> Mood {
    if brightness < 0.3 {
        Mood::Dark
    } else if brightness > 0.75 {
        Mood::Bright
    } else if saturation > 0.6 {
        Mood::Vibrant
    } else if saturation < 0.2 {
        Mood::Muted
    } else {
        Mood::Balanced
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb, Rgba};

    fn solid(r: u8, g: u8, b: u8) -> DynamicImage {
        DynamicImage::ImageRgb8(ImageBuffer::from_pixel(64, 64, Rgb([r, g, b])))
    }

    fn color_with_hue(h: f64, percentage: f64) -> DominantColor {
        DominantColor {
            rgb: [0, 0, 0],
            hex: "#000000".to_string(),
            hsl: Hsl { h, s: 80.0, l: 50.0 },
            percentage,
        }
    }

    #[test]
    fn test_solid_color_is_one_cluster_for_any_k() {
        for k in [1, 3, 8] {
            let options = AnalysisOptions::default().color_count(k);
            let report = analyze_colors(&solid(255, 0, 0), &options).unwrap();
            assert_eq!(report.dominant_colors.len(), 1, "k = {k}");
            let color = &report.dominant_colors[0];
            assert_eq!(color.rgb, [255, 0, 0]);
            assert_eq!(color.hex, "#ff0000");
            assert_eq!(color.percentage, 100.0);
        }
    }

    #[test]
    fn test_two_color_image_percentages() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_fn(100, 100, |x, _| {
            if x < 50 {
                Rgb([0, 0, 255])
            } else {
                Rgb([255, 255, 0])
            }
        }));
        for seed in 0..16 {
            let options = AnalysisOptions::default().color_count(2).seed(seed);
            let report = analyze_colors(&image, &options).unwrap();
            assert_eq!(report.dominant_colors.len(), 2, "seed {seed}");
            let total: f64 = report.dominant_colors.iter().map(|c| c.percentage).sum();
            assert!((total - 100.0).abs() < 1e-9, "seed {seed}: {total}");
        }
    }

    #[test]
    fn test_two_colors_with_spare_clusters() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_fn(120, 60, |x, _| {
            if x < 60 {
                Rgb([255, 0, 0])
            } else {
                Rgb([0, 0, 255])
            }
        }));
        for seed in 0..16 {
            let options = AnalysisOptions::default().color_count(8).seed(seed);
            let report = analyze_colors(&image, &options).unwrap();
            let mut hexes: Vec<&str> = report.dominant_colors.iter().map(|c| c.hex.as_str()).collect();
            hexes.sort_unstable();
            assert_eq!(hexes, ["#0000ff", "#ff0000"], "seed {seed}");
            let total: f64 = report.dominant_colors.iter().map(|c| c.percentage).sum();
            assert!((total - 100.0).abs() < 1e-9, "seed {seed}: {total}");
        }
    }

    #[test]
    fn test_shares_add_up_to_one_hundred() {
        let thirds = shares(&[1, 1, 1], 3);
        assert_eq!(thirds.iter().filter(|&&s| s == 33.4).count(), 1);
        assert!((thirds.iter().sum::<f64>() - 100.0).abs() < 1e-9);
        assert!(shares(&[], 0).is_empty());
    }

    #[test]
    fn test_seeded_runs_are_reproducible() {
        let image = DynamicImage::ImageRgb8(ImageBuffer::from_fn(120, 80, |x, y| {
            Rgb([(x * 2) as u8, (y * 3) as u8, ((x + y) % 256) as u8])
        }));
        let options = AnalysisOptions::default().seed(42);
        let a = analyze_colors(&image, &options).unwrap();
        let b = analyze_colors(&image, &options).unwrap();
        assert_eq!(a.dominant_colors, b.dominant_colors);
    }

    #[test]
    fn test_transparent_pixels_are_skipped() {
        let image = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(10, 10, Rgba([0, 0, 0, 0])));
        assert!(analyze_colors(&image, &AnalysisOptions::default()).is_err());
    }

    #[test]
    fn test_histogram_counts_every_pixel() {
        let hist = histogram(&solid(10, 20, 30));
        assert_eq!(hist.red[10], 64 * 64);
        assert_eq!(hist.green[20], 64 * 64);
        assert_eq!(hist.blue[30], 64 * 64);
        assert_eq!(hist.luminance.iter().sum::<u32>(), 64 * 64);
    }

    #[test]
    fn test_rgb_to_hsl() {
        assert_eq!(rgb_to_hsl([255, 0, 0]), Hsl { h: 0.0, s: 100.0, l: 50.0 });
        assert_eq!(rgb_to_hsl([0, 0, 255]), Hsl { h: 240.0, s: 100.0, l: 50.0 });
        assert_eq!(rgb_to_hsl([255, 255, 255]), Hsl { h: 0.0, s: 0.0, l: 100.0 });
        assert_eq!(rgb_to_hsl([0, 255, 0]).h, 120.0);
    }

    #[test]
    fn test_harmony() {
        assert_eq!(classify_harmony(&[color_with_hue(10.0, 100.0)]), Harmony::Single);
        assert_eq!(
            classify_harmony(&[color_with_hue(0.0, 50.0), color_with_hue(180.0, 50.0)]),
            Harmony::Complementary
        );
        assert_eq!(
            classify_harmony(&[color_with_hue(350.0, 50.0), color_with_hue(10.0, 50.0)]),
            Harmony::Analogous
        );
        assert_eq!(
            classify_harmony(&[color_with_hue(0.0, 50.0), color_with_hue(100.0, 50.0)]),
            Harmony::Mixed
        );
    }

    #[test]
    fn test_temperature_and_mood() {
        assert_eq!(classify_temperature(&[color_with_hue(20.0, 100.0)]), Temperature::Warm);
        assert_eq!(classify_temperature(&[color_with_hue(210.0, 100.0)]), Temperature::Cool);
        assert_eq!(classify_temperature(&[]), Temperature::Neutral);

        assert_eq!(classify_mood(0.9, 0.5), Mood::Vibrant);
        assert_eq!(classify_mood(0.1, 0.5), Mood::Muted);
        assert_eq!(classify_mood(0.5, 0.1), Mood::Dark);
        assert_eq!(classify_mood(0.5, 0.9), Mood::Bright);
        assert_eq!(classify_mood(0.4, 0.5), Mood::Balanced);
    }

    #[test]
    fn test_kmeans_never_exceeds_k() {
        let points: Vec<[f64; 3]> = (0..50).map(|i| [i as f64 * 5.0, 0.0, 0.0]).collect();
        let mut rng = StdRng::seed_from_u64(1);
        let clusters = kmeans(&points, 4, 100, &mut rng);
        assert!(!clusters.is_empty() && clusters.len() <= 4);
        assert_eq!(clusters.iter().map(|c| c.size).sum::<usize>(), 50);
    }

    #[test]
    fn test_kmeans_seeds_are_distinct() {
        let mut points = vec![[0.0, 0.0, 0.0]; 90];
        points.extend(vec![[255.0, 255.0, 255.0]; 10]);
        for seed in 0..16 {
            let mut rng = StdRng::seed_from_u64(seed);
            let clusters = kmeans(&points, 8, 50, &mut rng);
            assert_eq!(clusters.len(), 2, "seed {seed}");
        }
    }
}
