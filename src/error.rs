//! Error types and handling for imgpress

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for imgpress operations
pub type Result<T> = std::result::Result<T, PressError>;

/// Main error type for imgpress operations
#[derive(Debug, Error)]
pub enum PressError {
    /// Input bytes are not a readable image
    #[error("Decode error: {message}")]
    Decode { message: String },

    /// Format not supported for reading or as an output target
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: String },

    /// Source dimensions outside the accepted range
    #[error("Image dimensions {width}x{height} exceed limit of {limit}x{limit}")]
    Dimension { width: u32, height: u32, limit: u32 },

    /// Re-encoding failed
    #[error("Encode error ({format}): {message}")]
    Encode { format: String, message: String },

    /// Watermark specification cannot be applied
    #[error("Invalid watermark: {message}")]
    InvalidWatermarkSpec { message: String },

    /// No usable font for a text watermark
    #[error("Font not found: {family}")]
    FontNotFound { family: String },

    /// A single job ran past its time budget
    #[error("Processing timeout after {timeout_ms}ms")]
    ProcessingTimeout { timeout_ms: u64 },

    /// A whole batch ran past its time budget
    #[error("Batch timeout after {timeout_ms}ms")]
    BatchTimeout { timeout_ms: u64 },

    /// Work was cancelled before it finished
    #[error("Cancelled")]
    Cancelled,

    /// Every attempt failed; wraps the last error
    #[error("Retries exhausted after {attempts} attempts: {source}")]
    RetryExhausted {
        attempts: u32,
        #[source]
        source: Box<PressError>,
    },

    /// Invalid operation parameters
    #[error("Invalid parameters: {message}")]
    InvalidParameters { message: String },

    /// Thumbnail archive could not be written
    #[error("Archive error: {message}")]
    Archive { message: String },

    /// Unknown batch handle
    #[error("Batch not found: {id}")]
    BatchNotFound { id: String },

    /// Operation not legal in the batch's current state
    #[error("Batch {id} is {status}, operation not allowed")]
    InvalidBatchState { id: String, status: String },

    /// Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// I/O related errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serde(String),

    /// Orchestrator-internal fault (worker panic, closed channel)
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl PressError {
    pub fn decode<S: Into<String>>(message: S) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    pub fn unsupported_format<S: Into<String>>(format: S) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn dimension(width: u32, height: u32, limit: u32) -> Self {
        Self::Dimension {
            width,
            height,
            limit,
        }
    }

    pub fn encode<F: Into<String>, S: Into<String>>(format: F, message: S) -> Self {
        Self::Encode {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn watermark<S: Into<String>>(message: S) -> Self {
        Self::InvalidWatermarkSpec {
            message: message.into(),
        }
    }

    pub fn font_not_found<S: Into<String>>(family: S) -> Self {
        Self::FontNotFound {
            family: family.into(),
        }
    }

    pub fn invalid_parameters<S: Into<String>>(message: S) -> Self {
        Self::InvalidParameters {
            message: message.into(),
        }
    }

    pub fn archive<S: Into<String>>(message: S) -> Self {
        Self::Archive {
            message: message.into(),
        }
    }

    pub fn config<S: Into<String>>(message: S) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    pub fn internal<S: Into<String>>(message: S) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Wrap the last attempt's error once retries run out
    pub fn retry_exhausted(attempts: u32, last: PressError) -> Self {
        Self::RetryExhausted {
            attempts,
            source: Box::new(last),
        }
    }

    /// Stable machine-readable tag for this error
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode { .. } => "decode_error",
            Self::UnsupportedFormat { .. } => "unsupported_format",
            Self::Dimension { .. } => "dimension_error",
            Self::Encode { .. } => "encode_error",
            Self::InvalidWatermarkSpec { .. } => "invalid_watermark_spec",
            Self::FontNotFound { .. } => "font_not_found",
            Self::ProcessingTimeout { .. } => "processing_timeout",
            Self::BatchTimeout { .. } => "batch_timeout",
            Self::Cancelled => "cancelled",
            Self::RetryExhausted { .. } => "retry_exhausted",
            Self::InvalidParameters { .. } => "invalid_parameters",
            Self::Archive { .. } => "archive_error",
            Self::BatchNotFound { .. } => "batch_not_found",
            Self::InvalidBatchState { .. } => "invalid_batch_state",
            Self::Config { .. } => "config_error",
            Self::Io(_) => "io_error",
            Self::Serde(_) => "serde_error",
            Self::Internal { .. } => "internal_error",
        }
    }

    /// Whether another attempt of the same job could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            // Deadlines and cancellation are final for the job
            Self::ProcessingTimeout { .. }
            | Self::BatchTimeout { .. }
            | Self::Cancelled
            | Self::RetryExhausted { .. } => false,

            // Bad parameters fail the same way every time
            Self::InvalidParameters { .. }
            | Self::InvalidWatermarkSpec { .. }
            | Self::UnsupportedFormat { .. }
            | Self::Config { .. }
            | Self::Serde(_)
            | Self::BatchNotFound { .. }
            | Self::InvalidBatchState { .. } => false,

            Self::Decode { .. }
            | Self::Dimension { .. }
            | Self::Encode { .. }
            | Self::FontNotFound { .. }
            | Self::Archive { .. }
            | Self::Io(_)
            | Self::Internal { .. } => true,
        }
    }

    /// Get a user-friendly error message
    pub fn user_message(&self) -> String {
        match self {
            Self::Decode { .. } => {
                "The file could not be read as an image. It may be corrupt or truncated.".to_string()
            }
            Self::UnsupportedFormat { format } => {
                format!("Unsupported image format: {format}. Supported outputs: JPEG, PNG, WebP, AVIF, TIFF")
            }
            Self::Dimension {
                width,
                height,
                limit,
            } => format!("Image is too large ({width}x{height}). Maximum supported: {limit}x{limit}"),
            Self::ProcessingTimeout { timeout_ms } => format!(
                "Processing took too long (>{} seconds). Try a smaller image.",
                timeout_ms / 1000
            ),
            Self::RetryExhausted { attempts, source } => {
                format!("Failed after {attempts} attempts: {}", source.user_message())
            }
            other => other.to_string(),
        }
    }
}

impl From<toml::de::Error> for PressError {
    fn from(err: toml::de::Error) -> Self {
        Self::Serde(format!("TOML parsing error: {err}"))
    }
}

impl From<serde_yaml::Error> for PressError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Serde(format!("YAML parsing error: {err}"))
    }
}

impl From<serde_json::Error> for PressError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(format!("JSON error: {err}"))
    }
}

impl From<zip::result::ZipError> for PressError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::archive(err.to_string())
    }
}

/// Structured error entry attached to a job or analysis section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobError {
    pub kind: String,
    pub message: String,
    /// Attempt number the error belongs to (0 when not attempt-scoped)
    pub attempt: u32,
}

impl JobError {
    pub fn new(error: &PressError, attempt: u32) -> Self {
        Self {
            kind: error.kind().to_string(),
            message: error.to_string(),
            attempt,
        }
    }
}

impl From<&PressError> for JobError {
    fn from(error: &PressError) -> Self {
        Self::new(error, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_creation() {
        let err = PressError::config("test message");
        assert!(matches!(err, PressError::Config { .. }));
        assert_eq!(err.kind(), "config_error");
    }

    #[test]
    fn test_transient_errors() {
        assert!(PressError::decode("truncated").is_transient());
        assert!(PressError::encode("jpeg", "boom").is_transient());
        assert!(!PressError::ProcessingTimeout { timeout_ms: 10 }.is_transient());
        assert!(!PressError::Cancelled.is_transient());
        assert!(!PressError::watermark("empty text").is_transient());
    }

    #[test]
    fn test_retry_exhausted_wraps_last_error() {
        let err = PressError::retry_exhausted(3, PressError::decode("bad header"));
        assert_eq!(err.kind(), "retry_exhausted");
        assert!(err.to_string().contains("3 attempts"));
        assert!(err.to_string().contains("bad header"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_user_messages() {
        let err = PressError::unsupported_format("gif");
        let msg = err.user_message();
        assert!(msg.contains("Unsupported image format"));
        assert!(msg.contains("JPEG, PNG, WebP"));

        let err = PressError::dimension(9000, 100, 8000);
        assert!(err.user_message().contains("9000x100"));
    }

    #[test]
    fn test_job_error_entry() {
        let entry = JobError::new(&PressError::Cancelled, 2);
        assert_eq!(entry.kind, "cancelled");
        assert_eq!(entry.attempt, 2);
        assert_eq!(entry.message, "Cancelled");
    }
}
