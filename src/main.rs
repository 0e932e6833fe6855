//! imgpress CLI - batch image optimization, watermarking, thumbnails and analysis
//!
//! The library works on in-memory buffers; this binary owns the file-system
//! side: discovering inputs, naming outputs and writing them.

use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand, ValueEnum};
use console::style;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use imgpress::analysis::{AnalysisResult, Section};
use imgpress::config::Color;
use imgpress::parallel::ConsoleProgressReporter;
use imgpress::processing::formats::is_supported_input_format;
use imgpress::processing::{entry_name, FilterSet, ThumbnailSet, ThumbnailSize};
use imgpress::watermark::{
    Anchor, BlendMode, FontBook, ImageWatermark, TextLayout, TextWatermark, WatermarkSpec,
};
use imgpress::{
    init_with_config, AnalysisOptions, BatchOptions, BatchSummary, Config, FitMode, ImageInput,
    JobOutput, OptimizeParams, OptimizeResult, ProcessingEngine, TargetFormat, ThumbnailRequest,
};

/// imgpress - Batch Image Optimization and Analysis
#[derive(Parser)]
#[command(
    name = "imgpress",
    version,
    about = "Optimize, watermark, thumbnail and analyze images in batches",
    long_about = "imgpress re-encodes, watermarks, thumbnails and analyzes images. Batches run \
                  with bounded concurrency, retries with linear backoff, per-item and per-batch \
                  timeouts, and a live progress bar."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file path (.toml or .yaml)
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Quiet mode (errors only)
    #[arg(short = 'Q', long, global = true, conflicts_with = "verbose")]
    quiet: bool,
}

/// Available subcommands
#[derive(Subcommand)]
enum Commands {
    /// Re-encode one image
    Optimize {
        input: PathBuf,
        /// Output file or directory
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
        #[command(flatten)]
        encode: EncodeArgs,
    },
    /// Composite a text or image watermark onto one image
    Watermark {
        input: PathBuf,
        /// Output file or directory
        #[arg(short, long, value_name = "PATH")]
        output: PathBuf,
        #[command(flatten)]
        mark: WatermarkArgs,
        #[command(flatten)]
        encode: EncodeArgs,
    },
    /// Generate thumbnails of one image
    Thumbnails {
        input: PathBuf,
        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: PathBuf,
        #[command(flatten)]
        thumbs: ThumbnailArgs,
    },
    /// Analyze one image
    Analyze {
        input: PathBuf,
        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// Run one operation over every image in a directory
    Batch {
        /// Input file or directory
        input: PathBuf,
        /// Output directory (not needed for analyze)
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
        #[arg(long, value_enum, default_value = "optimize")]
        operation: Operation,
        /// Process directories recursively
        #[arg(short = 'R', long)]
        recursive: bool,
        /// Concurrent jobs
        #[arg(long, value_name = "COUNT")]
        concurrency: Option<usize>,
        /// Attempts per item
        #[arg(long, value_name = "COUNT")]
        max_retries: Option<u32>,
        /// Per-item timeout in seconds
        #[arg(long, value_name = "SECONDS")]
        item_timeout: Option<u64>,
        /// Show a line per finished item
        #[arg(long)]
        details: bool,
        #[command(flatten)]
        encode: EncodeArgs,
        #[command(flatten)]
        mark: WatermarkArgs,
        #[command(flatten)]
        thumbs: ThumbnailArgs,
        #[command(flatten)]
        analysis: AnalysisArgs,
    },
    /// Generate example configuration file
    ExampleConfig {
        /// Output file path
        #[arg(short, long, default_value = "imgpress.toml")]
        output: PathBuf,
        /// Use YAML format instead of TOML
        #[arg(long)]
        yaml: bool,
    },
    /// Show system information and capabilities
    Info,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Operation {
    Optimize,
    Watermark,
    Thumbnails,
    Analyze,
}

/// CLI-compatible output format enum
#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliFormat {
    Auto,
    Jpeg,
    Png,
    Webp,
    Avif,
    Tiff,
}

impl From<CliFormat> for TargetFormat {
    fn from(format: CliFormat) -> Self {
        match format {
            CliFormat::Auto => TargetFormat::Auto,
            CliFormat::Jpeg => TargetFormat::Jpeg,
            CliFormat::Png => TargetFormat::Png,
            CliFormat::Webp => TargetFormat::WebP,
            CliFormat::Avif => TargetFormat::Avif,
            CliFormat::Tiff => TargetFormat::Tiff,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliFit {
    Inside,
    Cover,
    Fill,
}

impl From<CliFit> for FitMode {
    fn from(fit: CliFit) -> Self {
        match fit {
            CliFit::Inside => FitMode::Inside,
            CliFit::Cover => FitMode::Cover,
            CliFit::Fill => FitMode::Fill,
        }
    }
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum CliBlend {
    Over,
    Multiply,
    Screen,
    Overlay,
    Darken,
    Lighten,
}

impl From<CliBlend> for BlendMode {
    fn from(blend: CliBlend) -> Self {
        match blend {
            CliBlend::Over => BlendMode::Over,
            CliBlend::Multiply => BlendMode::Multiply,
            CliBlend::Screen => BlendMode::Screen,
            CliBlend::Overlay => BlendMode::Overlay,
            CliBlend::Darken => BlendMode::Darken,
            CliBlend::Lighten => BlendMode::Lighten,
        }
    }
}

/// Encode and transform options shared by optimize, watermark and batch
#[derive(Args, Clone, Debug)]
struct EncodeArgs {
    /// Output quality (1-100)
    #[arg(short, long, value_name = "QUALITY")]
    quality: Option<u8>,
    /// Output format
    #[arg(short, long, value_enum, value_name = "FORMAT")]
    format: Option<CliFormat>,
    /// Bound the width in pixels (never upscales)
    #[arg(short, long, value_name = "PIXELS")]
    width: Option<u32>,
    /// Bound the height in pixels (never upscales)
    #[arg(short = 'H', long, value_name = "PIXELS")]
    height: Option<u32>,
    /// Keep EXIF and ICC metadata
    #[arg(long)]
    preserve_metadata: bool,
    /// Gaussian blur sigma
    #[arg(long, value_name = "SIGMA")]
    blur: Option<f32>,
    /// Unsharp mask sigma
    #[arg(long, value_name = "SIGMA")]
    sharpen: Option<f32>,
    #[arg(long)]
    grayscale: bool,
    /// Mirror vertically
    #[arg(long)]
    flip: bool,
    /// Mirror horizontally
    #[arg(long)]
    flop: bool,
    /// Clockwise rotation in degrees
    #[arg(long, value_name = "DEGREES", allow_negative_numbers = true)]
    rotate: Option<f32>,
    /// Brightness multiplier (1.0 = unchanged)
    #[arg(long, value_name = "FACTOR")]
    brightness: Option<f32>,
    /// Contrast multiplier (1.0 = unchanged)
    #[arg(long, value_name = "FACTOR")]
    contrast: Option<f32>,
    /// Saturation multiplier (1.0 = unchanged)
    #[arg(long, value_name = "FACTOR")]
    saturation: Option<f32>,
    /// Gamma (1.0 = unchanged)
    #[arg(long, value_name = "GAMMA")]
    gamma: Option<f32>,
}

impl EncodeArgs {
    fn params(&self, defaults: OptimizeParams) -> OptimizeParams {
        let base = FilterSet::default();
        let filters = FilterSet {
            blur: self.blur,
            sharpen: self.sharpen,
            grayscale: self.grayscale,
            flip: self.flip,
            flop: self.flop,
            rotate: self.rotate,
            brightness: self.brightness.unwrap_or(base.brightness),
            contrast: self.contrast.unwrap_or(base.contrast),
            saturation: self.saturation.unwrap_or(base.saturation),
            gamma: self.gamma.unwrap_or(base.gamma),
        };

        let mut params = defaults
            .resize(self.width, self.height)
            .filters(filters);
        if let Some(quality) = self.quality {
            params = params.quality(quality);
        }
        if let Some(format) = self.format {
            params = params.format(format.into());
        }
        if self.preserve_metadata {
            params = params.preserve_metadata(true);
        }
        params
    }
}

#[derive(Args, Clone, Debug)]
struct WatermarkArgs {
    /// Text of the mark
    #[arg(long, value_name = "TEXT", conflicts_with = "mark_image")]
    text: Option<String>,
    /// Image file used as the mark
    #[arg(long, value_name = "FILE")]
    mark_image: Option<PathBuf>,
    /// top-left, top-center, ..., center, ..., bottom-right
    #[arg(long, default_value = "bottom-right", value_name = "ANCHOR")]
    position: Anchor,
    /// 0.0 to 1.0
    #[arg(long, default_value = "0.5")]
    opacity: f32,
    /// Inset from the anchored edges in pixels
    #[arg(long, default_value = "20")]
    margin: u32,
    /// Font family for text marks
    #[arg(long, value_name = "FAMILY")]
    font: Option<String>,
    /// Font file registered under the chosen family
    #[arg(long, value_name = "FILE")]
    font_file: Option<PathBuf>,
    #[arg(long, default_value = "48")]
    font_size: f32,
    /// Text color as #rrggbb or #rrggbbaa
    #[arg(long, default_value = "#ffffff")]
    color: Color,
    /// Tile the text diagonally across the image
    #[arg(long)]
    diagonal: bool,
    /// Image mark width as a fraction of the base width
    #[arg(long, default_value = "0.2", value_name = "FRACTION")]
    mark_size: f32,
    #[arg(long, value_enum, default_value = "over")]
    blend: CliBlend,
}

impl WatermarkArgs {
    /// Build the spec; `Ok(None)` when neither text nor image was given
    fn spec(&self, fonts: &FontBook) -> anyhow::Result<Option<WatermarkSpec>> {
        let mut text = match (&self.text, &self.mark_image) {
            (Some(text), _) => TextWatermark::new(text.clone()),
            (None, Some(path)) => {
                let source = std::fs::read(path)
                    .with_context(|| format!("reading watermark image {}", path.display()))?;
                let mut mark = ImageWatermark::new(source);
                mark.size = self.mark_size;
                mark.blend = self.blend.into();
                mark.placement.position = self.position;
                mark.placement.opacity = self.opacity;
                mark.placement.margin = self.margin;
                return Ok(Some(WatermarkSpec::Image(mark)));
            }
            (None, None) => return Ok(None),
        };

        if let Some(family) = &self.font {
            text.font_family = family.clone();
        }
        if let Some(path) = &self.font_file {
            let data = std::fs::read(path)
                .with_context(|| format!("reading font {}", path.display()))?;
            fonts.register(&text.font_family, data)?;
        }
        text.font_size = self.font_size;
        text.color = self.color;
        if self.diagonal {
            text.style = TextLayout::Diagonal;
        }
        text.placement.position = self.position;
        text.placement.opacity = self.opacity;
        text.placement.margin = self.margin;
        Ok(Some(WatermarkSpec::Text(text)))
    }
}

#[derive(Args, Clone, Debug)]
struct ThumbnailArgs {
    /// Preset names, comma separated
    #[arg(long, value_delimiter = ',', default_value = "thumbnail,small,medium,large")]
    presets: Vec<String>,
    /// Extra custom size as WIDTHxHEIGHT (repeatable)
    #[arg(long = "size", value_name = "WxH", value_parser = parse_dimensions)]
    sizes: Vec<(u32, u32)>,
    #[arg(long, value_enum)]
    fit: Option<CliFit>,
    /// Bundle the thumbnails into a zip archive
    #[arg(long)]
    archive: bool,
}

impl ThumbnailArgs {
    fn request(&self, format: Option<CliFormat>) -> ThumbnailRequest {
        let mut request = ThumbnailRequest::presets(self.presets.iter().cloned());
        for &(width, height) in &self.sizes {
            request = request.size(ThumbnailSize::custom(width, height));
        }
        if let Some(fit) = self.fit {
            request = request.fit(fit.into());
        }
        if let Some(format) = format {
            request = request.format(format.into());
        }
        if self.archive {
            request = request.with_archive();
        }
        request
    }
}

#[derive(Args, Clone, Debug)]
struct AnalysisArgs {
    /// Fixed k-means seed for reproducible colors
    #[arg(long)]
    seed: Option<u64>,
    /// Number of dominant colors
    #[arg(long, value_name = "COUNT")]
    colors: Option<usize>,
}

impl AnalysisArgs {
    fn options(&self, defaults: &AnalysisOptions) -> AnalysisOptions {
        let mut options = defaults.clone();
        if let Some(seed) = self.seed {
            options = options.seed(seed);
        }
        if let Some(k) = self.colors {
            options = options.color_count(k);
        }
        options
    }
}

/// Parse dimension string (e.g., "1920x1080")
fn parse_dimensions(s: &str) -> Result<(u32, u32), String> {
    let parts: Vec<&str> = s.split('x').collect();
    if parts.len() != 2 {
        return Err("Dimensions must be in format 'WIDTHxHEIGHT' (e.g., '300x200')".to_string());
    }

    let width = parts[0]
        .parse::<u32>()
        .map_err(|_| "Invalid width value".to_string())?;
    let height = parts[1]
        .parse::<u32>()
        .map_err(|_| "Invalid height value".to_string())?;

    if width == 0 || height == 0 {
        return Err("Width and height must be greater than 0".to_string());
    }

    Ok((width, height))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{}: {:#}", style("Error").red().bold(), e);
        process::exit(1);
    }
}

async fn run(cli: Cli) -> anyhow::Result<()> {
    let mut config = match &cli.config {
        Some(path) => {
            let config = Config::from_file(path)
                .with_context(|| format!("loading configuration from {}", path.display()))?;
            config.validate()?;
            config
        }
        None => Config::default(),
    };

    if cli.quiet {
        config.logging.level = "error".to_string();
    } else if cli.verbose {
        config.logging.level = "debug".to_string();
    } else if cli.config.is_none() {
        config.logging.level = "warn".to_string();
    }
    init_with_config(&config)?;
    if let Some(path) = &cli.config {
        info!("Loaded configuration from: {:?}", path);
    }

    let fonts = Arc::new(FontBook::new());
    let json = cli.json;

    match cli.command {
        Commands::Optimize {
            input,
            output,
            encode,
        } => {
            let engine = ProcessingEngine::with_fonts(config, fonts);
            let params = encode.params(engine.default_params());
            let result = engine.optimize(ImageInput::from_path(&input).await?, params).await?;
            let written = write_optimized(&result, &output)?;
            report_optimized(&result, &written, json)?;
        }
        Commands::Watermark {
            input,
            output,
            mark,
            encode,
        } => {
            let Some(spec) = mark.spec(&fonts)? else {
                bail!("a watermark needs --text or --mark-image");
            };
            let engine = ProcessingEngine::with_fonts(config, fonts);
            let params = encode.params(engine.default_params()).watermark(spec);
            let result = engine.optimize(ImageInput::from_path(&input).await?, params).await?;
            let written = write_optimized(&result, &output)?;
            report_optimized(&result, &written, json)?;
        }
        Commands::Thumbnails {
            input,
            output,
            thumbs,
        } => {
            let engine = ProcessingEngine::with_fonts(config, fonts);
            let source = ImageInput::from_path(&input).await?;
            let filename = source.filename.clone();
            let set = engine.thumbnails(source, thumbs.request(None)).await?;
            write_thumbnails(&filename, &set, &output)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&set)?);
            } else {
                print_thumbnails(&filename, &set);
            }
        }
        Commands::Analyze { input, analysis } => {
            let options = analysis.options(&config.analysis);
            let engine = ProcessingEngine::with_fonts(config, fonts);
            let result = engine
                .analyze(ImageInput::from_path(&input).await?, Some(options))
                .await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&result)?);
            } else {
                print_analysis(&result);
            }
        }
        Commands::Batch {
            input,
            output,
            operation,
            recursive,
            concurrency,
            max_retries,
            item_timeout,
            details,
            encode,
            mark,
            thumbs,
            analysis,
        } => {
            let mut options = config.batch.clone();
            if let Some(concurrency) = concurrency {
                options = options.concurrency(concurrency);
            }
            if let Some(max_retries) = max_retries {
                options = options.max_retries(max_retries);
            }
            if let Some(seconds) = item_timeout {
                options = options.per_item_timeout(Duration::from_secs(seconds));
            }
            let job = BatchJob {
                operation,
                output,
                options,
                show_progress: !json && !cli.quiet,
                details,
                json,
            };
            run_batch(&job, &input, recursive, config, fonts, &encode, &mark, &thumbs, &analysis).await?;
        }
        Commands::ExampleConfig { output, yaml } => {
            generate_example_config(&output, yaml)?;
        }
        Commands::Info => {
            show_system_info();
        }
    }
    Ok(())
}

struct BatchJob {
    operation: Operation,
    output: Option<PathBuf>,
    options: BatchOptions,
    show_progress: bool,
    details: bool,
    json: bool,
}

#[allow(clippy::too_many_arguments)]
async fn run_batch(
    job: &BatchJob,
    input: &Path,
    recursive: bool,
    config: Config,
    fonts: Arc<FontBook>,
    encode: &EncodeArgs,
    mark: &WatermarkArgs,
    thumbs: &ThumbnailArgs,
    analysis: &AnalysisArgs,
) -> anyhow::Result<()> {
    if !matches!(job.operation, Operation::Analyze) && job.output.is_none() {
        bail!("--output is required for {:?}", job.operation);
    }

    let files = discover_files(input, recursive)?;
    if files.is_empty() {
        bail!("No supported image files found in {}", input.display());
    }
    info!("Found {} files to process", files.len());

    let inputs = futures::future::join_all(files.iter().map(ImageInput::from_path))
        .await
        .into_iter()
        .collect::<Result<Vec<_>, _>>()?;
    let total = inputs.len();

    let analysis_options = analysis.options(&config.analysis);
    let spec = mark.spec(&fonts)?;
    let engine = ProcessingEngine::with_fonts(config, fonts);
    let options = Some(job.options.clone());

    let handle = match job.operation {
        Operation::Optimize => {
            let params = encode.params(engine.default_params());
            engine.batch_optimize(inputs, params, options)?
        }
        Operation::Watermark => {
            let Some(spec) = spec else {
                bail!("a watermark batch needs --text or --mark-image");
            };
            engine.batch_watermark(inputs, spec, options)?
        }
        Operation::Thumbnails => {
            engine.batch_thumbnails(inputs, thumbs.request(encode.format), options)?
        }
        Operation::Analyze => engine.batch_analyze(inputs, Some(analysis_options), options)?,
    };

    let (id, events, task) = handle.into_parts();
    debug!(batch = %id, total, "batch started");
    let reporter = if job.show_progress {
        ConsoleProgressReporter::new(total, job.details)
    } else {
        ConsoleProgressReporter::hidden()
    };
    let reported = reporter.run(events).await;
    let summary = match reported {
        Some(summary) => summary,
        None => task.await.context("batch coordinator failed")?,
    };

    if let Some(dir) = &job.output {
        write_batch_outputs(&summary, dir)?;
    }

    if job.json {
        println!("{}", serde_json::to_string_pretty(summary.as_ref())?);
    } else {
        print_batch_summary(&summary);
    }

    if summary.failed > 0 {
        warn!("{} of {} items failed", summary.failed, summary.total);
    }
    Ok(())
}

/// Discover input files
fn discover_files(input: &Path, recursive: bool) -> anyhow::Result<Vec<PathBuf>> {
    if input.is_file() {
        return Ok(vec![input.to_path_buf()]);
    }
    if !input.is_dir() {
        bail!("Input path does not exist: {}", input.display());
    }

    let max_depth = if recursive { usize::MAX } else { 1 };
    let mut files: Vec<PathBuf> = WalkDir::new(input)
        .max_depth(max_depth)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(walkdir::DirEntry::into_path)
        .filter(|path| {
            path.extension()
                .and_then(|e| e.to_str())
                .is_some_and(is_supported_input_format)
        })
        .collect();

    // Sort files for consistent processing order
    files.sort();
    Ok(files)
}

fn stem(filename: &str) -> &str {
    Path::new(filename)
        .file_stem()
        .and_then(|s| s.to_str())
        .filter(|s| !s.is_empty())
        .unwrap_or("image")
}

/// Write into `output`, or into `output/<stem>.<ext>` when it is a directory
fn write_optimized(result: &OptimizeResult, output: &Path) -> anyhow::Result<PathBuf> {
    let path = if output.is_dir() {
        output.join(format!("{}.{}", stem(&result.filename), result.format.extension()))
    } else {
        if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        output.to_path_buf()
    };
    std::fs::write(&path, &result.buffer).with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

fn write_thumbnails(filename: &str, set: &ThumbnailSet, dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    for thumbnail in &set.thumbnails {
        if let Some(buffer) = &thumbnail.buffer {
            let path = dir.join(entry_name(filename, thumbnail));
            std::fs::write(&path, buffer).with_context(|| format!("writing {}", path.display()))?;
        }
    }
    if let Some(buffer) = set.archive.as_ref().and_then(|a| a.buffer.as_ref()) {
        let path = dir.join(format!("{}_thumbnails.zip", stem(filename)));
        std::fs::write(&path, buffer).with_context(|| format!("writing {}", path.display()))?;
    }
    Ok(())
}

fn write_batch_outputs(summary: &BatchSummary<JobOutput>, dir: &Path) -> anyhow::Result<()> {
    std::fs::create_dir_all(dir)?;
    for item in &summary.items {
        let Some(output) = item.result.as_deref() else {
            continue;
        };
        match output {
            JobOutput::Optimized(result) | JobOutput::Watermarked(result) => {
                write_optimized(result, dir)?;
            }
            JobOutput::Thumbnails(set) => write_thumbnails(&item.id, set, dir)?,
            JobOutput::Analysis(result) => {
                let path = dir.join(format!("{}.analysis.json", stem(&result.filename)));
                std::fs::write(&path, serde_json::to_vec_pretty(result.as_ref())?)?;
            }
        }
    }
    Ok(())
}

#[allow(clippy::cast_precision_loss)]
fn report_optimized(result: &OptimizeResult, written: &Path, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(result)?);
        return Ok(());
    }
    println!(
        "{} {} ({}x{}, {})",
        style("✓").green(),
        written.display(),
        result.width,
        result.height,
        result.format
    );
    println!(
        "  {}: {:.1}KB → {:.1}KB ({:.1}% saved)",
        style("Size").cyan(),
        result.original_size as f64 / 1024.0,
        result.optimized_size as f64 / 1024.0,
        result.compression_ratio
    );
    println!("  {}: {}ms", style("Time").blue(), result.processing_time_ms);
    Ok(())
}

fn print_thumbnails(filename: &str, set: &ThumbnailSet) {
    println!("{}", style("Thumbnails:").bold());
    for thumbnail in &set.thumbnails {
        match &thumbnail.error {
            None => println!(
                "  {} {} {}x{} ({} bytes)",
                style("✓").green(),
                entry_name(filename, thumbnail),
                thumbnail.width,
                thumbnail.height,
                thumbnail.size_bytes
            ),
            Some(error) => println!("  {} {}: {}", style("✗").red(), thumbnail.name, error),
        }
    }
    if let Some(archive) = &set.archive {
        match &archive.error {
            None => println!(
                "  {} archive with {} entries ({} bytes)",
                style("✓").green(),
                archive.entries.len(),
                archive.size_bytes
            ),
            Some(error) => println!("  {} archive: {}", style("✗").red(), error),
        }
    }
}

fn print_section_error<T>(name: &str, section: &Option<Section<T>>) {
    if let Some(error) = section.as_ref().and_then(|s| s.error.as_ref()) {
        println!("  {} {}: {}", style("!").yellow(), name, error.message);
    }
}

fn print_analysis(result: &AnalysisResult) {
    let basic = &result.basic;
    println!("{}", style(&result.filename).bold());
    println!(
        "  {}: {} {}x{} ({:.2}MP, {} channels{})",
        style("Image").cyan(),
        basic.format,
        basic.width,
        basic.height,
        basic.megapixels,
        basic.channels,
        if basic.has_alpha { ", alpha" } else { "" }
    );
    println!(
        "  {}: {} bytes ({:.2} bytes/pixel)",
        style("Size").cyan(),
        basic.file_size,
        basic.bytes_per_pixel
    );

    if let Some(metadata) = result.metadata.as_ref().and_then(|s| s.data.as_ref()) {
        let exif = metadata.exif.as_ref();
        println!(
            "  {}: exif={} iptc={} xmp={} icc={}",
            style("Metadata").cyan(),
            exif.map_or("no".to_string(), |e| format!("{} bytes", e.size_bytes)),
            metadata.iptc.map_or("no".to_string(), |b| format!("{} bytes", b.size_bytes)),
            metadata.xmp.map_or("no".to_string(), |b| format!("{} bytes", b.size_bytes)),
            metadata.icc.map_or("no".to_string(), |b| format!("{} bytes", b.size_bytes)),
        );
        if let Some(camera) = exif.and_then(|e| e.model.as_deref()) {
            println!("    camera: {camera}");
        }
    }
    print_section_error("metadata", &result.metadata);

    if let Some(colors) = result.colors.as_ref().and_then(|s| s.data.as_ref()) {
        let palette: Vec<String> = colors
            .dominant_colors
            .iter()
            .map(|c| format!("{} {:.0}%", c.hex, c.percentage))
            .collect();
        println!("  {}: {}", style("Colors").cyan(), palette.join(", "));
        println!(
            "    harmony={:?} temperature={:?} mood={:?} brightness={:.1}",
            colors.harmony, colors.temperature, colors.mood, colors.average_brightness
        );
    }
    print_section_error("colors", &result.colors);

    if let Some(quality) = result.quality.as_ref().and_then(|s| s.data.as_ref()) {
        println!(
            "  {}: {:.1}/10 ({:?})",
            style("Quality").cyan(),
            quality.overall_score,
            quality.overall_rating
        );
        for (name, score) in [
            ("resolution", &quality.resolution),
            ("format", &quality.format),
            ("compression", &quality.compression),
            ("sharpness", &quality.sharpness),
            ("noise", &quality.noise),
        ] {
            println!("    {name}: {} - {}", score.score, score.recommendation);
        }
    }
    print_section_error("quality", &result.quality);

    if let Some(set) = result.recommendation_set() {
        println!(
            "  {}: ~{} bytes after optimization ({:.0}% smaller)",
            style("Recommendations").cyan(),
            set.estimated_optimized_size,
            set.estimated_savings_percent
        );
        for rec in &set.items {
            println!(
                "    [{:?}] {} ({}-{}%)",
                rec.priority, rec.action, rec.savings.min_percent, rec.savings.max_percent
            );
        }
    }
    print_section_error("recommendations", &result.recommendations);
}

/// Print processing summary
#[allow(clippy::cast_precision_loss)]
fn print_batch_summary(summary: &BatchSummary<JobOutput>) {
    println!();
    println!("{}", style("Batch Summary:").bold());
    println!("  {}: {}", style("Status").bold(), summary.status);
    println!("  {}: {}", style("Completed").green(), summary.completed);
    if summary.failed > 0 {
        println!("  {}: {}", style("Failed").red(), summary.failed);
        for item in summary.items.iter().filter(|i| i.status.is_failure()) {
            let reason = item.error.as_ref().map_or("", |e| e.message.as_str());
            println!("    {} ({}): {}", item.id, item.status, reason);
        }
    }
    println!(
        "  {}: {:.2}s",
        style("Duration").blue(),
        summary.duration_ms as f64 / 1000.0
    );

    let (original, optimized) = summary
        .results()
        .filter_map(|(_, output)| output.as_optimized())
        .fold((0u64, 0u64), |(o, n), r| (o + r.original_size, n + r.optimized_size));
    if original > 0 {
        println!(
            "  {}: {:.2}MB → {:.2}MB ({:.1}% saved)",
            style("Size").cyan(),
            original as f64 / 1024.0 / 1024.0,
            optimized as f64 / 1024.0 / 1024.0,
            imgpress::processing::compression_ratio(original, optimized)
        );
    }
}

/// Generate example configuration file
fn generate_example_config(output_path: &Path, use_yaml: bool) -> anyhow::Result<()> {
    let mut path = output_path.to_path_buf();
    let has_yaml_ext = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("yaml") || e.eq_ignore_ascii_case("yml"));
    if use_yaml && !has_yaml_ext {
        path.set_extension("yaml");
    }

    Config::default().to_file(&path)?;

    let format = if use_yaml { "YAML" } else { "TOML" };
    println!(
        "{}: Generated example {} configuration: {}",
        style("Success").green().bold(),
        format,
        path.display()
    );
    Ok(())
}

/// Show system information
#[allow(clippy::cast_precision_loss)]
fn show_system_info() {
    use sysinfo::{CpuExt, System, SystemExt};

    println!("{}", style("imgpress System Information").bold());
    println!();
    println!("{}: {}", style("Version").bold(), imgpress::VERSION);
    println!();

    let mut system = System::new_all();
    system.refresh_all();

    println!("{}", style("System:").bold());
    if let Some(name) = system.name() {
        println!("  OS: {name}");
    }
    if let Some(version) = system.os_version() {
        println!("  Version: {version}");
    }
    println!("  CPUs: {}", system.cpus().len());
    if let Some(cpu) = system.cpus().first() {
        println!("  CPU: {} ({:.2} GHz)", cpu.brand(), cpu.frequency() as f64 / 1000.0);
    }
    println!(
        "  Memory: {:.2} GB total, {:.2} GB available",
        system.total_memory() as f64 / 1024.0 / 1024.0 / 1024.0,
        system.available_memory() as f64 / 1024.0 / 1024.0 / 1024.0
    );
    println!();

    println!("{}", style("Supported Formats:").bold());
    println!(
        "  Input: {}",
        imgpress::processing::formats::supported_input_formats().join(", ")
    );
    println!(
        "  Output: {}",
        imgpress::processing::formats::supported_output_formats().join(", ")
    );
    println!();

    let presets = imgpress::config::PresetTable::default();
    println!("{}", style("Thumbnail presets:").bold());
    for name in presets.names() {
        if let Ok(size) = presets.resolve(name) {
            println!("  {name}: {}x{}", size.width, size.height);
        }
    }
}
