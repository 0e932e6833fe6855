//! Batch events, item manifests and console progress reporting

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;

use crate::error::JobError;

/// Opaque handle of a batch in the orchestrator's arena
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BatchId(pub(crate) u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// Lifecycle of one job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Processing,
    /// Waiting out the backoff before going back to the queue
    Retrying,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }

    /// Terminal without a result; counted in `failed`
    pub fn is_failure(self) -> bool {
        matches!(self, Self::Failed | Self::Cancelled | Self::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Retrying => "retrying",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle of a batch; every state but `Processing` is final
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Processing,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Processing)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Manifest entry for one submitted item
#[derive(Debug, Clone, Serialize)]
pub struct JobRecord<O> {
    pub id: String,
    pub status: JobStatus,
    pub attempts: u32,
    /// One entry per failed attempt, oldest first
    pub errors: Vec<JobError>,
    /// Why the job ended without a result
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<JobError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Arc<O>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

/// Full manifest of a batch: one record per submitted item, in submission order
#[derive(Debug, Clone, Serialize)]
pub struct BatchSummary<O> {
    pub id: BatchId,
    pub status: BatchStatus,
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub total_processed: usize,
    pub total_errors: usize,
    pub duration_ms: u64,
    pub items: Vec<JobRecord<O>>,
}

impl<O> BatchSummary<O> {
    pub fn item(&self, id: &str) -> Option<&JobRecord<O>> {
        self.items.iter().find(|item| item.id == id)
    }

    /// Successful results in submission order
    pub fn results(&self) -> impl Iterator<Item = (&str, &O)> {
        self.items
            .iter()
            .filter_map(|item| item.result.as_deref().map(|r| (item.id.as_str(), r)))
    }

    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Completed && self.failed == 0
    }
}

/// Counters of a batch at one point in time
#[derive(Debug, Clone, Serialize)]
pub struct BatchProgress {
    pub id: BatchId,
    pub status: BatchStatus,
    pub total: usize,
    pub pending: usize,
    pub processing: usize,
    pub retrying: usize,
    pub completed: usize,
    pub failed: usize,
    pub percentage: f64,
    pub elapsed_ms: u64,
}

/// Events published on a batch's channel, in order of occurrence
#[derive(Debug, Clone)]
pub enum BatchEvent<O> {
    /// A job changed state
    Progress {
        batch_id: BatchId,
        job_id: String,
        status: JobStatus,
        processed: usize,
        total: usize,
        percentage: f64,
        result: Option<Arc<O>>,
        error: Option<JobError>,
    },
    /// One failed attempt
    Error {
        batch_id: BatchId,
        job_id: String,
        error: JobError,
    },
    Complete {
        summary: Arc<BatchSummary<O>>,
    },
    Failed {
        summary: Arc<BatchSummary<O>>,
        error: JobError,
    },
}

impl<O> BatchEvent<O> {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Complete { .. } | Self::Failed { .. })
    }

    pub fn job_id(&self) -> Option<&str> {
        match self {
            Self::Progress { job_id, .. } | Self::Error { job_id, .. } => Some(job_id),
            _ => None,
        }
    }
}

/// Completion percentage that never moves backwards within a run
#[derive(Debug, Clone, Copy, Default)]
pub struct ProgressTracker {
    total: usize,
    high_water: f64,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            high_water: 0.0,
        }
    }

    #[allow(clippy::cast_precision_loss)]
    pub fn update(&mut self, processed: usize) -> f64 {
        if self.total > 0 {
            let current = processed.min(self.total) as f64 / self.total as f64 * 100.0;
            self.high_water = self.high_water.max(current);
        }
        self.high_water
    }

    pub fn percentage(&self) -> f64 {
        self.high_water
    }
}

/// Drives an indicatif bar from a batch's event stream
pub struct ConsoleProgressReporter {
    bar: ProgressBar,
    show_details: bool,
}

impl ConsoleProgressReporter {
    pub fn new(total: usize, show_details: bool) -> Self {
        let bar = ProgressBar::new(total as u64);
        let template = "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}";
        if let Ok(progress_style) = ProgressStyle::default_bar().template(template) {
            bar.set_style(progress_style.progress_chars("#>-"));
        }
        bar.enable_steady_tick(Duration::from_millis(120));
        Self { bar, show_details }
    }

    /// Hidden bar for non-interactive output
    pub fn hidden() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            show_details: false,
        }
    }

    /// Consume events until the terminal one; returns its summary
    pub async fn run<O: Clone>(
        self,
        mut events: broadcast::Receiver<BatchEvent<O>>,
    ) -> Option<Arc<BatchSummary<O>>> {
        loop {
            match events.recv().await {
                Ok(BatchEvent::Progress {
                    job_id,
                    status,
                    processed,
                    ..
                }) => {
                    self.bar.set_position(processed as u64);
                    self.bar.set_message(format!("{job_id}: {status}"));
                    if self.show_details && status.is_terminal() {
                        let mark = if status == JobStatus::Completed {
                            style("✓").green()
                        } else {
                            style("✗").red()
                        };
                        self.bar.println(format!("{mark} {job_id} ({status})"));
                    }
                }
                Ok(BatchEvent::Error { job_id, error, .. }) => {
                    self.bar.println(format!(
                        "{} {} attempt {}: {}",
                        style("!").yellow(),
                        job_id,
                        error.attempt,
                        error.message
                    ));
                }
                Ok(BatchEvent::Complete { summary }) => {
                    self.bar.finish_with_message("done");
                    return Some(summary);
                }
                Ok(BatchEvent::Failed { summary, error }) => {
                    self.bar.abandon_with_message(error.message);
                    return Some(summary);
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "progress reporter lagged");
                }
                Err(broadcast::error::RecvError::Closed) => {
                    self.bar.abandon();
                    return None;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tracker_is_monotonic() {
        let mut tracker = ProgressTracker::new(4);
        assert_eq!(tracker.update(1), 25.0);
        assert_eq!(tracker.update(3), 75.0);
        // A retried item leaves the processed set without moving the bar back
        assert_eq!(tracker.update(2), 75.0);
        assert_eq!(tracker.update(4), 100.0);
        assert_eq!(tracker.update(9), 100.0);
    }

    #[test]
    fn test_empty_tracker() {
        let mut tracker = ProgressTracker::new(0);
        assert_eq!(tracker.update(0), 0.0);
    }

    #[test]
    fn test_status_classification() {
        assert!(JobStatus::Timeout.is_terminal());
        assert!(JobStatus::Cancelled.is_failure());
        assert!(!JobStatus::Completed.is_failure());
        assert!(!JobStatus::Retrying.is_terminal());
        assert!(!BatchStatus::Processing.is_terminal());
        assert_eq!(BatchId(7).to_string(), "batch-7");
    }

    #[tokio::test]
    async fn test_reporter_returns_terminal_summary() {
        let (tx, rx) = broadcast::channel(16);
        let summary = Arc::new(BatchSummary::<u32> {
            id: BatchId(1),
            status: BatchStatus::Completed,
            total: 1,
            completed: 1,
            failed: 0,
            total_processed: 1,
            total_errors: 0,
            duration_ms: 3,
            items: vec![JobRecord {
                id: "a".to_string(),
                status: JobStatus::Completed,
                attempts: 1,
                errors: Vec::new(),
                error: None,
                result: Some(Arc::new(5)),
                duration_ms: Some(3),
            }],
        });
        tx.send(BatchEvent::Complete {
            summary: summary.clone(),
        })
        .unwrap();

        let returned = ConsoleProgressReporter::hidden().run(rx).await.unwrap();
        assert!(returned.is_success());
        assert_eq!(returned.results().collect::<Vec<_>>(), vec![("a", &5)]);
    }
}
