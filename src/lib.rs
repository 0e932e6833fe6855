//! imgpress - Batch Image Optimization and Analysis
//!
//! Re-encodes, watermarks, thumbnails and analyzes images, one at a time or
//! in batches with bounded concurrency, retries, timeouts and cancellation.
//!
//! # Features
//!
//! - **Optimize**: resize, filters, tonal modulation and watermarking, then
//!   re-encode as JPEG, PNG, WebP, AVIF or TIFF
//! - **Watermarks**: text or image marks at nine anchors, six blend modes,
//!   diagonal tiling
//! - **Thumbnails**: many sizes from one decode, optional zip bundle
//! - **Analysis**: metadata, dominant colors, quality scores and savings
//!   recommendations
//! - **Batches**: progress events, per-item and per-batch timeouts, retry
//!   with linear backoff
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use imgpress::{ImageInput, OptimizeParams, ProcessingEngine, TargetFormat};
//!
//! # async fn run() -> imgpress::Result<()> {
//! let engine = ProcessingEngine::default();
//! let input = ImageInput::from_path("photo.png").await?;
//! let result = engine
//!     .optimize(input, OptimizeParams::default().format(TargetFormat::WebP).quality(80))
//!     .await?;
//!
//! println!("saved {:.1}%", result.compression_ratio);
//! # Ok(())
//! # }
//! ```

#![warn(clippy::all, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod analysis;
pub mod config;
pub mod error;
pub mod parallel;
pub mod processing;
pub mod watermark;

// Re-export commonly used types
pub use analysis::{AnalysisResult, ImageAnalyzer};
pub use config::{AnalysisOptions, BatchOptions, Config, FitMode, ImageFormat, TargetFormat};
pub use error::{JobError, PressError, Result};
pub use parallel::{BatchEvent, BatchId, BatchOrchestrator, BatchStatus, BatchSummary, JobStatus};
pub use processing::{
    ImageInput, JobOutput, OptimizeParams, OptimizeResult, ProcessingEngine, ThumbnailRequest,
};
pub use watermark::{WatermarkEngine, WatermarkSpec};

use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Install a subscriber filtered by `RUST_LOG` (default `info`).
///
/// Logs go to stderr. Safe to call more than once; only the first call
/// installs anything.
pub fn init() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let installed = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .is_ok();

    if installed {
        info!("imgpress v{} initialized", VERSION);
        log_system_resources();
    }
    Ok(())
}

/// Initialize logging from the `logging` config section
pub fn init_with_config(config: &Config) -> Result<()> {
    let filter = EnvFilter::try_new(&config.logging.level)
        .map_err(|e| PressError::config(format!("invalid log filter {:?}: {e}", config.logging.level)))?;

    let installed = if config.logging.json_format {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init()
            .is_ok()
    };

    if installed {
        info!("imgpress v{} initialized with custom config", VERSION);
        log_system_resources();
    }
    Ok(())
}

fn log_system_resources() {
    use sysinfo::{System, SystemExt};

    let mut system = System::new();
    system.refresh_memory();
    system.refresh_cpu();

    let available_memory = system.available_memory();
    const MIN_MEMORY_MB: u64 = 512;
    if available_memory < MIN_MEMORY_MB * 1024 * 1024 {
        warn!(
            "Low available memory: {}MB (recommended: >{}MB)",
            available_memory / (1024 * 1024),
            MIN_MEMORY_MB
        );
    }

    info!(
        cpus = system.cpus().len(),
        physical_cores = system.physical_core_count().unwrap_or(1),
        available_mb = available_memory / (1024 * 1024),
        "system resources"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_is_set() {
        assert!(!VERSION.is_empty());
        assert!(VERSION.contains('.'));
    }

    #[test]
    fn test_init() {
        // Should not fail on multiple calls
        assert!(init().is_ok());
        assert!(init().is_ok());
        assert!(init_with_config(&Config::default()).is_ok());
    }
}
