//! Core image processing functionality
//!
//! [`ProcessingEngine`] is the public façade: single-image operations run on
//! the blocking pool, batch operations go through the [`BatchOrchestrator`].

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use serde::Serialize;
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::analysis::{AnalysisResult, ImageAnalyzer};
use crate::config::{AnalysisOptions, BatchOptions, Config, ImageFormat};
use crate::error::{PressError, Result};
use crate::parallel::{
    duration_ms, BatchHandle, BatchId, BatchOrchestrator, BatchProgress, BatchSummary,
    JobContext, JobProcessor, RetryTicket,
};
use crate::watermark::{FontBook, WatermarkEngine, WatermarkSpec};

pub mod formats;
pub mod resize;
pub mod thumbnail;
pub mod transform;
pub mod validation;

pub use formats::*;
pub use resize::*;
pub use thumbnail::*;
pub use transform::*;
pub use validation::*;

/// One encoded image plus the name it arrived under
#[derive(Debug, Clone)]
pub struct ImageInput {
    pub filename: String,
    data: Bytes,
}

impl ImageInput {
    pub fn new<S: Into<String>, B: Into<Bytes>>(filename: S, data: B) -> Self {
        Self {
            filename: filename.into(),
            data: data.into(),
        }
    }

    /// Read a file; the stored name is the file name without directories
    pub async fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let data = fs::read(path).await?;
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Self::new(filename, data))
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// Result of a single-image re-encode
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OptimizeResult {
    pub id: Uuid,
    pub filename: String,
    pub original_size: u64,
    pub optimized_size: u64,
    /// Percent saved; negative when the output grew
    pub compression_ratio: f64,
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
    pub processing_time_ms: u64,
    #[serde(skip)]
    pub buffer: Bytes,
}

/// `(original - optimized) / original * 100`, zero for an empty original
#[allow(clippy::cast_precision_loss)]
pub fn compression_ratio(original_size: u64, optimized_size: u64) -> f64 {
    if original_size == 0 {
        return 0.0;
    }
    (original_size as f64 - optimized_size as f64) / original_size as f64 * 100.0
}

/// Per-item output of any batch operation
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", content = "result", rename_all = "snake_case")]
pub enum JobOutput {
    Optimized(OptimizeResult),
    Watermarked(OptimizeResult),
    Thumbnails(ThumbnailSet),
    Analysis(Box<AnalysisResult>),
}

impl JobOutput {
    pub fn as_optimized(&self) -> Option<&OptimizeResult> {
        match self {
            Self::Optimized(result) | Self::Watermarked(result) => Some(result),
            _ => None,
        }
    }

    pub fn as_thumbnails(&self) -> Option<&ThumbnailSet> {
        match self {
            Self::Thumbnails(set) => Some(set),
            _ => None,
        }
    }

    pub fn as_analysis(&self) -> Option<&AnalysisResult> {
        match self {
            Self::Analysis(result) => Some(result),
            _ => None,
        }
    }
}

/// Stateless workers shared by single calls and batch jobs
#[derive(Debug)]
struct Workers {
    config: Config,
    validator: ImageValidator,
    pipeline: TransformPipeline,
    thumbnails: ThumbnailGenerator,
    analyzer: ImageAnalyzer,
}

impl Workers {
    fn new(config: Config, fonts: Arc<FontBook>) -> Self {
        let validator = ImageValidator::from_config(&config.processing);
        Self {
            pipeline: TransformPipeline::new(WatermarkEngine::with_fonts(fonts)),
            thumbnails: ThumbnailGenerator::from_config(&config.thumbnails)
                .with_validator(validator.clone()),
            analyzer: ImageAnalyzer::new(config.analysis.clone()).with_validator(validator.clone()),
            validator,
            config,
        }
    }

    /// validate, decode, transform, encode, then optionally carry metadata
    fn optimize(
        &self,
        input: &ImageInput,
        params: &OptimizeParams,
        cancel: Option<&CancellationToken>,
    ) -> Result<OptimizeResult> {
        let start = Instant::now();
        let validated = self.validator.validate(input)?;
        let image = decode(input.data(), validated.format)?;
        let image = self.pipeline.apply(image, params, cancel)?;

        let format = params.format.resolve(validated.format);
        let mut encoded = encode(&image, format, params.quality)?;
        if params.preserve_metadata {
            encoded = carry_metadata(input.data(), validated.format, encoded, format);
        }

        let original_size = input.len() as u64;
        let optimized_size = encoded.len() as u64;
        debug!(
            filename = %input.filename,
            from = %validated.format,
            to = %format,
            original_size,
            optimized_size,
            "optimized"
        );
        Ok(OptimizeResult {
            id: Uuid::new_v4(),
            filename: input.filename.clone(),
            original_size,
            optimized_size,
            compression_ratio: compression_ratio(original_size, optimized_size),
            format,
            width: image.width(),
            height: image.height(),
            processing_time_ms: duration_ms(start.elapsed()),
            buffer: Bytes::from(encoded),
        })
    }
}

/// What a batch does to each of its items
#[derive(Debug, Clone)]
enum Operation {
    Optimize(OptimizeParams),
    Watermark(OptimizeParams),
    Thumbnails(ThumbnailRequest),
    Analyze(AnalysisOptions),
}

struct BatchProcessor {
    workers: Arc<Workers>,
    operation: Operation,
}

impl JobProcessor<ImageInput, JobOutput> for BatchProcessor {
    fn validate(&self, input: &ImageInput) -> Result<()> {
        self.workers.validator.validate(input).map(|_| ())
    }

    fn process(&self, ctx: &JobContext, input: &ImageInput) -> Result<JobOutput> {
        ctx.checkpoint()?;
        let cancel = Some(&ctx.cancel);
        let output = match &self.operation {
            Operation::Optimize(params) => {
                JobOutput::Optimized(self.workers.optimize(input, params, cancel)?)
            }
            Operation::Watermark(params) => {
                JobOutput::Watermarked(self.workers.optimize(input, params, cancel)?)
            }
            Operation::Thumbnails(request) => {
                JobOutput::Thumbnails(self.workers.thumbnails.generate(input, request, cancel)?)
            }
            Operation::Analyze(options) => {
                JobOutput::Analysis(Box::new(self.workers.analyzer.analyze_with(input, options)?))
            }
        };
        ctx.checkpoint()?;
        Ok(output)
    }
}

/// Batch item ids are file names, suffixed `#2`, `#3`... on repeats
fn job_items(inputs: Vec<ImageInput>) -> Vec<(String, ImageInput)> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    inputs
        .into_iter()
        .map(|input| {
            let count = seen.entry(input.filename.clone()).or_insert(0);
            *count += 1;
            let id = if *count == 1 {
                input.filename.clone()
            } else {
                format!("{}#{}", input.filename, count)
            };
            (id, input)
        })
        .collect()
}

/// Public entry point for optimize, watermark, thumbnail and analysis work
pub struct ProcessingEngine {
    workers: Arc<Workers>,
    batches: BatchOrchestrator<ImageInput, JobOutput>,
}

impl Default for ProcessingEngine {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl ProcessingEngine {
    pub fn new(config: Config) -> Self {
        Self::with_fonts(config, Arc::new(FontBook::new()))
    }

    /// Engine whose text watermarks resolve fonts from `fonts`
    pub fn with_fonts(config: Config, fonts: Arc<FontBook>) -> Self {
        let batches = BatchOrchestrator::new(config.batch.clone());
        Self {
            workers: Arc::new(Workers::new(config, fonts)),
            batches,
        }
    }

    pub fn config(&self) -> &Config {
        &self.workers.config
    }

    pub fn orchestrator(&self) -> &BatchOrchestrator<ImageInput, JobOutput> {
        &self.batches
    }

    /// Defaults from the `processing` config section
    pub fn default_params(&self) -> OptimizeParams {
        let processing = &self.workers.config.processing;
        OptimizeParams::default()
            .quality(processing.quality)
            .format(processing.format)
            .preserve_metadata(processing.preserve_metadata)
    }

    /// Run blocking work under the per-item timeout
    async fn blocking<T, F>(&self, work: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Workers, &CancellationToken) -> Result<T> + Send + 'static,
    {
        let workers = Arc::clone(&self.workers);
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let limit = workers.config.batch.per_item_timeout;

        let task = tokio::task::spawn_blocking(move || work(&workers, &token));
        match tokio::time::timeout(limit, task).await {
            Ok(joined) => joined.map_err(|e| PressError::internal(format!("worker failed: {e}")))?,
            Err(_) => {
                cancel.cancel();
                Err(PressError::ProcessingTimeout {
                    timeout_ms: duration_ms(limit),
                })
            }
        }
    }

    /// Re-encode one image
    #[instrument(skip(self, input, params), fields(filename = %input.filename))]
    pub async fn optimize(&self, input: ImageInput, params: OptimizeParams) -> Result<OptimizeResult> {
        params.validate()?;
        self.blocking(move |workers, cancel| workers.optimize(&input, &params, Some(cancel)))
            .await
    }

    /// Composite a watermark and re-encode with the configured defaults
    pub async fn watermark(&self, input: ImageInput, spec: WatermarkSpec) -> Result<OptimizeResult> {
        self.optimize(input, self.default_params().watermark(spec)).await
    }

    pub async fn thumbnails(&self, input: ImageInput, request: ThumbnailRequest) -> Result<ThumbnailSet> {
        request.validate()?;
        self.blocking(move |workers, cancel| workers.thumbnails.generate(&input, &request, Some(cancel)))
            .await
    }

    /// Analyze with `options`, or the configured analysis defaults
    pub async fn analyze(
        &self,
        input: ImageInput,
        options: Option<AnalysisOptions>,
    ) -> Result<AnalysisResult> {
        let options = options.unwrap_or_else(|| self.workers.config.analysis.clone());
        self.blocking(move |workers, _| workers.analyzer.analyze_with(&input, &options))
            .await
    }

    fn submit(
        &self,
        inputs: Vec<ImageInput>,
        operation: Operation,
        options: Option<BatchOptions>,
    ) -> Result<BatchHandle<JobOutput>> {
        let processor = BatchProcessor {
            workers: Arc::clone(&self.workers),
            operation,
        };
        self.batches.submit(job_items(inputs), processor, options)
    }

    #[instrument(skip_all, fields(items = inputs.len()))]
    pub fn batch_optimize(
        &self,
        inputs: Vec<ImageInput>,
        params: OptimizeParams,
        options: Option<BatchOptions>,
    ) -> Result<BatchHandle<JobOutput>> {
        params.validate()?;
        self.submit(inputs, Operation::Optimize(params), options)
    }

    #[instrument(skip_all, fields(items = inputs.len()))]
    pub fn batch_watermark(
        &self,
        inputs: Vec<ImageInput>,
        spec: WatermarkSpec,
        options: Option<BatchOptions>,
    ) -> Result<BatchHandle<JobOutput>> {
        let params = self.default_params().watermark(spec);
        params.validate()?;
        self.submit(inputs, Operation::Watermark(params), options)
    }

    #[instrument(skip_all, fields(items = inputs.len()))]
    pub fn batch_thumbnails(
        &self,
        inputs: Vec<ImageInput>,
        request: ThumbnailRequest,
        options: Option<BatchOptions>,
    ) -> Result<BatchHandle<JobOutput>> {
        request.validate()?;
        self.submit(inputs, Operation::Thumbnails(request), options)
    }

    #[instrument(skip_all, fields(items = inputs.len()))]
    pub fn batch_analyze(
        &self,
        inputs: Vec<ImageInput>,
        analysis: Option<AnalysisOptions>,
        options: Option<BatchOptions>,
    ) -> Result<BatchHandle<JobOutput>> {
        let analysis = analysis.unwrap_or_else(|| self.workers.config.analysis.clone());
        self.submit(inputs, Operation::Analyze(analysis), options)
    }

    pub fn status(&self, id: BatchId) -> Result<BatchProgress> {
        self.batches.status(id)
    }

    pub fn summary(&self, id: BatchId) -> Result<BatchSummary<JobOutput>> {
        self.batches.summary(id)
    }

    pub fn cancel(&self, id: BatchId) -> Result<bool> {
        self.batches.cancel(id)
    }

    pub async fn retry(&self, id: BatchId, item_ids: Option<Vec<String>>) -> Result<RetryTicket<JobOutput>> {
        self.batches.retry(id, item_ids).await
    }

    pub fn cleanup(&self, max_age: Duration) -> usize {
        self.batches.cleanup(max_age)
    }
}
