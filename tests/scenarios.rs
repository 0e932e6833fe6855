//! End-to-end behaviour of the public API

use std::io::Cursor;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, ImageBuffer, Rgb, Rgba};

use imgpress::analysis::color::analyze_colors;
use imgpress::analysis::RecommendationKind;
use imgpress::config::PresetSize;
use imgpress::parallel::JobContext;
use imgpress::processing::formats::encode;
use imgpress::processing::{compression_ratio, ThumbnailRequest};
use imgpress::watermark::{resolve_position, Anchor, ImageWatermark, WatermarkEngine, WatermarkSpec};
use imgpress::{
    AnalysisOptions, BatchEvent, BatchOptions, BatchOrchestrator, BatchStatus, Config, ImageFormat,
    ImageInput, JobStatus, OptimizeParams, PressError, ProcessingEngine, Result, TargetFormat,
};

fn png_input(name: &str, img: &DynamicImage) -> ImageInput {
    ImageInput::new(name, encode(img, ImageFormat::Png, 90).unwrap())
}

fn fast_batch() -> BatchOptions {
    BatchOptions::default()
        .retry_delay(Duration::from_millis(2))
        .per_item_timeout(Duration::from_secs(10))
        .batch_timeout(Duration::from_secs(30))
}

#[tokio::test]
async fn failing_item_emits_one_error_per_attempt() {
    let orchestrator = BatchOrchestrator::new(fast_batch().max_retries(2));
    let items = vec![
        ("one".to_string(), 1u32),
        ("two".to_string(), 2),
        ("three".to_string(), 3),
    ];
    let mut handle = orchestrator
        .submit(
            items,
            |_ctx: &JobContext, n: &u32| -> Result<u32> {
                if *n == 2 {
                    Err(PressError::internal("processor always throws"))
                } else {
                    Ok(*n)
                }
            },
            None,
        )
        .unwrap();

    let mut error_events = 0;
    let mut last_percentage = 0.0;
    loop {
        let event = handle.events().recv().await.unwrap();
        match &event {
            BatchEvent::Error { job_id, .. } => {
                assert_eq!(job_id, "two");
                error_events += 1;
            }
            BatchEvent::Progress { percentage, .. } => {
                assert!(*percentage >= last_percentage);
                last_percentage = *percentage;
            }
            _ => {}
        }
        if event.is_terminal() {
            break;
        }
    }
    let summary = handle.wait().await.unwrap();

    assert_eq!(error_events, 2);
    assert_eq!(summary.status, BatchStatus::Completed);
    assert_eq!(summary.completed, 2);
    assert_eq!(summary.failed, 1);
    assert_eq!(summary.completed + summary.failed, summary.total);
    assert_eq!(summary.item("two").unwrap().status, JobStatus::Failed);
    assert_eq!(summary.item("one").unwrap().status, JobStatus::Completed);
    assert_eq!(summary.item("three").unwrap().status, JobStatus::Completed);
}

#[tokio::test]
async fn batch_timeout_leaves_no_live_items() {
    let options = fast_batch()
        .concurrency(2)
        .batch_timeout(Duration::from_millis(80));
    let orchestrator = BatchOrchestrator::new(options);
    let items = (0..5).map(|i| (format!("slow-{i}"), i)).collect();

    let handle = orchestrator
        .submit(
            items,
            |ctx: &JobContext, n: &u32| -> Result<u32> {
                for _ in 0..200 {
                    ctx.checkpoint()?;
                    std::thread::sleep(Duration::from_millis(5));
                }
                Ok(*n)
            },
            None,
        )
        .unwrap();

    let summary = handle.wait().await.unwrap();
    assert_eq!(summary.status, BatchStatus::Timeout);
    assert!(summary.items.iter().all(|item| item.status.is_terminal()));
    assert!(summary.items.iter().all(|item| item.status == JobStatus::Timeout));
}

#[tokio::test]
async fn white_png_analysis_recommends_jpeg() {
    let white = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(1000, 1000, Rgb([255, 255, 255])));
    let engine = ProcessingEngine::default();

    let result = engine
        .analyze(png_input("white.png", &white), Some(AnalysisOptions::default().seed(3)))
        .await
        .unwrap();

    let recommendations = result.recommendation_set().unwrap();
    let format = recommendations.of_kind(RecommendationKind::Format).unwrap();
    assert!(format.action.contains("JPEG"));
    assert!(format.savings.min_percent > 0);
    assert!(recommendations.estimated_optimized_size < recommendations.original_size);
}

#[test]
fn solid_color_is_one_cluster_for_any_k() {
    let red = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(120, 80, Rgb([255, 0, 0])));
    for k in [1, 2, 8, 16] {
        let report = analyze_colors(&red, &AnalysisOptions::default().color_count(k)).unwrap();
        assert_eq!(report.dominant_colors.len(), 1, "k = {k}");
        assert_eq!(report.dominant_colors[0].hex, "#ff0000");
        assert!((report.dominant_colors[0].percentage - 100.0).abs() < 1e-9);
    }
}

#[tokio::test]
async fn failing_thumbnail_is_left_out_of_archive() {
    let mut config = Config::default();
    config.thumbnails.presets.insert("medium", PresetSize::new(0, 0));
    let engine = ProcessingEngine::new(config);

    let photo = DynamicImage::ImageRgb8(ImageBuffer::from_fn(640, 480, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, 90])
    }));
    let input = ImageInput::new("photo.jpg", encode(&photo, ImageFormat::Jpeg, 90).unwrap());

    let set = engine
        .thumbnails(input, ThumbnailRequest::presets(["small", "medium"]).with_archive())
        .await
        .unwrap();

    assert_eq!(set.thumbnails.len(), 2);
    assert!(set.thumbnails[0].is_ok());
    assert_eq!(set.thumbnails[1].name, "medium");
    assert!(set.thumbnails[1].error.is_some());

    let archive = set.archive.unwrap();
    assert!(archive.error.is_none());
    let zip = zip::ZipArchive::new(Cursor::new(archive.buffer.unwrap().to_vec())).unwrap();
    let names: Vec<_> = zip.file_names().collect();
    assert_eq!(names, vec!["photo_small.jpg"]);
}

#[test]
fn bottom_right_watermark_lands_inside_margin() {
    assert_eq!(
        resolve_position(Anchor::BottomRight, (1000, 800), (100, 100), 20),
        (880, 680)
    );

    let base = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(1000, 800, Rgb([255, 255, 255])));
    let mark = DynamicImage::ImageRgba8(ImageBuffer::from_pixel(100, 100, Rgba([255, 0, 0, 255])));
    let mut spec = ImageWatermark::new(encode(&mark, ImageFormat::Png, 90).unwrap());
    spec.size = 0.1;
    spec.placement.opacity = 1.0;
    spec.placement.margin = 20;
    spec.placement.position = Anchor::BottomRight;

    let out = WatermarkEngine::new()
        .apply(&base, &WatermarkSpec::Image(spec))
        .unwrap();

    assert_eq!(out.dimensions(), (1000, 800));
    assert_eq!(out.get_pixel(880, 680).0[..3], [255, 0, 0]);
    assert_eq!(out.get_pixel(979, 779).0[..3], [255, 0, 0]);
    assert_eq!(out.get_pixel(879, 679).0[..3], [255, 255, 255]);
    assert_eq!(out.get_pixel(980, 780).0[..3], [255, 255, 255]);
}

#[tokio::test]
async fn compression_ratio_is_exact() {
    let engine = ProcessingEngine::default();
    let img = DynamicImage::ImageRgb8(ImageBuffer::from_fn(300, 200, |x, y| {
        Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
    }));

    for format in [TargetFormat::Jpeg, TargetFormat::Png, TargetFormat::WebP] {
        let result = engine
            .optimize(png_input("pattern.png", &img), OptimizeParams::default().format(format))
            .await
            .unwrap();
        let expected = (result.original_size as f64 - result.optimized_size as f64)
            / result.original_size as f64
            * 100.0;
        assert_eq!(result.compression_ratio, expected);
        assert_eq!(result.compression_ratio, compression_ratio(result.original_size, result.optimized_size));
    }
}

#[tokio::test]
async fn batch_manifest_covers_every_item() {
    let engine = ProcessingEngine::default();
    let img = DynamicImage::ImageRgb8(ImageBuffer::from_pixel(40, 40, Rgb([10, 20, 30])));
    let inputs = vec![
        png_input("a.png", &img),
        ImageInput::new("empty.png", Vec::new()),
        png_input("b.png", &img),
    ];

    let handle = engine
        .batch_optimize(inputs, OptimizeParams::default(), Some(fast_batch().max_retries(1)))
        .unwrap();
    let id = handle.id();
    let summary = handle.wait().await.unwrap();

    assert_eq!(summary.items.len(), 3);
    assert_eq!(summary.total_processed, 3);
    assert_eq!(summary.total_errors, 1);
    assert!(summary.item("empty.png").unwrap().error.is_some());
    assert_eq!(engine.status(id).unwrap().status, BatchStatus::Completed);
    assert_eq!(engine.cleanup(Duration::ZERO), 1);
    assert!(matches!(engine.status(id), Err(PressError::BatchNotFound { .. })));
}
