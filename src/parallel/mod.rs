//! Concurrent batch orchestration with retry, timeouts and cancellation
//!
//! A [`BatchOrchestrator`] keeps every submitted batch in an arena keyed by
//! [`BatchId`]. Each batch is driven by one coordinator task (see
//! [`scheduler`]); callers observe it through the event channel on its
//! [`BatchHandle`] or by polling [`BatchOrchestrator::status`].
//!
//! Cancellation is cooperative. A job already inside a codec call runs to
//! completion; its result is discarded and the job is reported as cancelled.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::BatchOptions;
use crate::error::{JobError, PressError, Result};

pub mod progress;
pub mod scheduler;

pub use progress::*;

use scheduler::Control;

/// Whole milliseconds, saturating
pub(crate) fn duration_ms(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// What a job sees while it runs
#[derive(Debug, Clone)]
pub struct JobContext {
    pub job_id: String,
    /// 1-based attempt number
    pub attempt: u32,
    pub cancel: CancellationToken,
}

impl JobContext {
    /// Fresh context for work running outside a batch
    pub fn detached<S: Into<String>>(job_id: S) -> Self {
        Self {
            job_id: job_id.into(),
            attempt: 1,
            cancel: CancellationToken::new(),
        }
    }

    /// `Err(Cancelled)` once the batch was cancelled or the job timed out
    pub fn checkpoint(&self) -> Result<()> {
        if self.cancel.is_cancelled() {
            Err(PressError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Per-item work run by the orchestrator on the blocking pool
pub trait JobProcessor<I, O>: Send + Sync + 'static {
    /// Cheap pre-flight check run before any job of the batch is dispatched
    fn validate(&self, _input: &I) -> Result<()> {
        Ok(())
    }

    fn process(&self, ctx: &JobContext, input: &I) -> Result<O>;
}

impl<I, O, F> JobProcessor<I, O> for F
where
    F: Fn(&JobContext, &I) -> Result<O> + Send + Sync + 'static,
{
    fn process(&self, ctx: &JobContext, input: &I) -> Result<O> {
        self(ctx, input)
    }
}

pub(crate) struct JobState<O> {
    pub(crate) id: String,
    pub(crate) status: JobStatus,
    pub(crate) attempts: u32,
    pub(crate) errors: Vec<JobError>,
    pub(crate) error: Option<JobError>,
    pub(crate) result: Option<Arc<O>>,
    pub(crate) duration_ms: Option<u64>,
}

impl<O> JobState<O> {
    fn new(id: String) -> Self {
        Self {
            id,
            status: JobStatus::Pending,
            attempts: 0,
            errors: Vec::new(),
            error: None,
            result: None,
            duration_ms: None,
        }
    }

    fn record(&self) -> JobRecord<O> {
        JobRecord {
            id: self.id.clone(),
            status: self.status,
            attempts: self.attempts,
            errors: self.errors.clone(),
            error: self.error.clone(),
            result: self.result.clone(),
            duration_ms: self.duration_ms,
        }
    }
}

pub(crate) struct BatchState<O> {
    pub(crate) status: BatchStatus,
    pub(crate) jobs: Vec<JobState<O>>,
    pub(crate) completed: usize,
    pub(crate) failed: usize,
    /// Jobs of the current run that failed validation
    pub(crate) rejected: usize,
    pub(crate) started_at: Instant,
    pub(crate) ended_at: Option<Instant>,
    pub(crate) tracker: ProgressTracker,
}

impl<O> BatchState<O> {
    pub(crate) fn processed(&self) -> usize {
        self.completed + self.failed
    }

    pub(crate) fn progress_event(&mut self, batch_id: BatchId, index: usize) -> BatchEvent<O> {
        let processed = self.processed();
        let percentage = self.tracker.update(processed);
        let job = &self.jobs[index];
        BatchEvent::Progress {
            batch_id,
            job_id: job.id.clone(),
            status: job.status,
            processed,
            total: self.jobs.len(),
            percentage,
            result: job.result.clone(),
            error: job.error.clone(),
        }
    }

    /// Put matching `failed` jobs back to `pending` with a clean history
    pub(crate) fn reset_failed(&mut self, item_ids: Option<&[String]>) -> Vec<usize> {
        let mut reset = Vec::new();
        for (index, job) in self.jobs.iter_mut().enumerate() {
            let selected = item_ids.map_or(true, |ids| ids.iter().any(|id| *id == job.id));
            if job.status != JobStatus::Failed || !selected {
                continue;
            }
            job.status = JobStatus::Pending;
            job.attempts = 0;
            job.errors.clear();
            job.error = None;
            job.duration_ms = None;
            reset.push(index);
        }
        self.failed -= reset.len();
        reset
    }

    pub(crate) fn summary(&self, id: BatchId) -> BatchSummary<O> {
        let end = self.ended_at.unwrap_or_else(Instant::now);
        BatchSummary {
            id,
            status: self.status,
            total: self.jobs.len(),
            completed: self.completed,
            failed: self.failed,
            total_processed: self.processed(),
            total_errors: self.failed,
            duration_ms: duration_ms(end.duration_since(self.started_at)),
            items: self.jobs.iter().map(JobState::record).collect(),
        }
    }

    fn snapshot(&self, id: BatchId) -> BatchProgress {
        let count = |status: JobStatus| self.jobs.iter().filter(|j| j.status == status).count();
        let end = self.ended_at.unwrap_or_else(Instant::now);
        BatchProgress {
            id,
            status: self.status,
            total: self.jobs.len(),
            pending: count(JobStatus::Pending),
            processing: count(JobStatus::Processing),
            retrying: count(JobStatus::Retrying),
            completed: self.completed,
            failed: self.failed,
            percentage: self.tracker.percentage(),
            elapsed_ms: duration_ms(end.duration_since(self.started_at)),
        }
    }
}

/// Handles of the run currently driving a batch
struct RunControl {
    cancel: CancellationToken,
    control: mpsc::UnboundedSender<Control>,
}

pub(crate) struct BatchEntry<I, O> {
    pub(crate) id: BatchId,
    pub(crate) inputs: Vec<(String, Arc<I>)>,
    pub(crate) processor: Arc<dyn JobProcessor<I, O>>,
    pub(crate) options: BatchOptions,
    pub(crate) events: broadcast::Sender<BatchEvent<O>>,
    state: Mutex<BatchState<O>>,
    run: Mutex<RunControl>,
}

impl<I, O> BatchEntry<I, O> {
    pub(crate) fn lock_state(&self) -> MutexGuard<'_, BatchState<O>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_run(&self) -> MutexGuard<'_, RunControl> {
        self.run.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Caller's view of one run of a batch
pub struct BatchHandle<O> {
    id: BatchId,
    events: broadcast::Receiver<BatchEvent<O>>,
    task: JoinHandle<Arc<BatchSummary<O>>>,
}

impl<O> BatchHandle<O> {
    pub fn id(&self) -> BatchId {
        self.id
    }

    /// Event stream of this run, subscribed before the first event.
    ///
    /// The channel is bounded by `event_capacity`. A receiver that falls
    /// behind gets `RecvError::Lagged` and misses the overwritten events;
    /// it can keep receiving after that. The summary from [`Self::wait`] is
    /// complete regardless.
    pub fn events(&mut self) -> &mut broadcast::Receiver<BatchEvent<O>> {
        &mut self.events
    }

    pub fn into_parts(
        self,
    ) -> (
        BatchId,
        broadcast::Receiver<BatchEvent<O>>,
        JoinHandle<Arc<BatchSummary<O>>>,
    ) {
        (self.id, self.events, self.task)
    }

    /// Wait for the run to end and return its manifest
    pub async fn wait(self) -> Result<Arc<BatchSummary<O>>> {
        self.task
            .await
            .map_err(|e| PressError::internal(format!("batch coordinator failed: {e}")))
    }
}

/// Outcome of [`BatchOrchestrator::retry`]
pub struct RetryTicket<O> {
    /// Jobs moved back to `pending`
    pub reset: usize,
    /// New run when the batch had already finished; `None` when the jobs
    /// joined a run still in progress or nothing matched
    pub handle: Option<BatchHandle<O>>,
}

/// Arena of batches plus the policy they run under
pub struct BatchOrchestrator<I, O> {
    batches: RwLock<HashMap<BatchId, Arc<BatchEntry<I, O>>>>,
    next_id: AtomicU64,
    defaults: BatchOptions,
}

impl<I, O> Default for BatchOrchestrator<I, O>
where
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new(BatchOptions::default())
    }
}

impl<I, O> BatchOrchestrator<I, O>
where
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    pub fn new(defaults: BatchOptions) -> Self {
        Self {
            batches: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            defaults,
        }
    }

    pub fn defaults(&self) -> &BatchOptions {
        &self.defaults
    }

    /// Register a batch and start its coordinator. Must be called from
    /// within a tokio runtime.
    pub fn submit<P>(
        &self,
        items: Vec<(String, I)>,
        processor: P,
        options: Option<BatchOptions>,
    ) -> Result<BatchHandle<O>>
    where
        P: JobProcessor<I, O>,
    {
        self.submit_shared(items, Arc::new(processor), options)
    }

    pub fn submit_shared(
        &self,
        items: Vec<(String, I)>,
        processor: Arc<dyn JobProcessor<I, O>>,
        options: Option<BatchOptions>,
    ) -> Result<BatchHandle<O>> {
        let options = options.unwrap_or_else(|| self.defaults.clone());
        options.validate()?;
        if items.is_empty() {
            return Err(PressError::invalid_parameters(
                "a batch needs at least one item",
            ));
        }
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PressError::internal(format!("no async runtime: {e}")))?;

        let id = BatchId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let total = items.len();
        let jobs = items.iter().map(|(job_id, _)| JobState::new(job_id.clone())).collect();
        let inputs = items
            .into_iter()
            .map(|(job_id, input)| (job_id, Arc::new(input)))
            .collect();

        let (events, receiver) = broadcast::channel(options.event_capacity.max(1));
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        let entry = Arc::new(BatchEntry {
            id,
            inputs,
            processor,
            options,
            events,
            state: Mutex::new(BatchState {
                status: BatchStatus::Processing,
                jobs,
                completed: 0,
                failed: 0,
                rejected: 0,
                started_at: Instant::now(),
                ended_at: None,
                tracker: ProgressTracker::new(total),
            }),
            run: Mutex::new(RunControl {
                cancel: cancel.clone(),
                control: control_tx,
            }),
        });

        self.write_batches().insert(id, Arc::clone(&entry));
        info!(batch = %id, total, "batch submitted");

        let task = runtime.spawn(scheduler::run_batch(entry, control_rx, cancel));
        Ok(BatchHandle {
            id,
            events: receiver,
            task,
        })
    }

    /// Counters and status of a batch
    pub fn status(&self, id: BatchId) -> Result<BatchProgress> {
        let entry = self.entry(id)?;
        let state = entry.lock_state();
        Ok(state.snapshot(id))
    }

    /// Full manifest as of now
    pub fn summary(&self, id: BatchId) -> Result<BatchSummary<O>> {
        let entry = self.entry(id)?;
        let state = entry.lock_state();
        Ok(state.summary(id))
    }

    /// Additional receiver on a batch's event channel. Lossy for slow
    /// readers, like [`BatchHandle::events`].
    pub fn subscribe(&self, id: BatchId) -> Result<broadcast::Receiver<BatchEvent<O>>> {
        Ok(self.entry(id)?.events.subscribe())
    }

    /// Request cancellation. `Ok(true)` when this call requested it, `Ok(false)`
    /// when the batch is already cancelled or a cancel is in flight.
    pub fn cancel(&self, id: BatchId) -> Result<bool> {
        let entry = self.entry(id)?;
        let state = entry.lock_state();
        match state.status {
            BatchStatus::Processing => {
                let run = entry.lock_run();
                if run.cancel.is_cancelled() {
                    return Ok(false);
                }
                run.cancel.cancel();
                info!(batch = %id, "cancellation requested");
                Ok(true)
            }
            BatchStatus::Cancelled => Ok(false),
            status => Err(PressError::InvalidBatchState {
                id: id.to_string(),
                status: status.to_string(),
            }),
        }
    }

    /// Reset failed jobs (all, or those in `item_ids`) and run them again
    pub async fn retry(&self, id: BatchId, item_ids: Option<Vec<String>>) -> Result<RetryTicket<O>> {
        let entry = self.entry(id)?;

        let reply = {
            let state = entry.lock_state();
            match state.status {
                BatchStatus::Processing => {
                    let (reply_tx, reply_rx) = oneshot::channel();
                    let sent = entry
                        .lock_run()
                        .control
                        .send(Control::Retry {
                            item_ids: item_ids.clone(),
                            reply: reply_tx,
                        })
                        .is_ok();
                    sent.then_some(reply_rx)
                }
                BatchStatus::Completed | BatchStatus::Failed => None,
                status => {
                    return Err(PressError::InvalidBatchState {
                        id: id.to_string(),
                        status: status.to_string(),
                    })
                }
            }
        };

        if let Some(reply) = reply {
            if let Ok(reset) = reply.await {
                return Ok(RetryTicket {
                    reset,
                    handle: None,
                });
            }
            // The run finished before it saw the request
        }
        self.restart(&entry, item_ids.as_deref())
    }

    /// Start a new run of a finished batch with its failed jobs reset
    fn restart(&self, entry: &Arc<BatchEntry<I, O>>, item_ids: Option<&[String]>) -> Result<RetryTicket<O>> {
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| PressError::internal(format!("no async runtime: {e}")))?;

        let mut state = entry.lock_state();
        if !matches!(state.status, BatchStatus::Completed | BatchStatus::Failed) {
            return Err(PressError::InvalidBatchState {
                id: entry.id.to_string(),
                status: state.status.to_string(),
            });
        }

        let reset = state.reset_failed(item_ids);
        if reset.is_empty() {
            return Ok(RetryTicket {
                reset: 0,
                handle: None,
            });
        }

        state.status = BatchStatus::Processing;
        state.ended_at = None;
        state.started_at = Instant::now();
        let (total, processed) = (state.jobs.len(), state.processed());
        state.tracker = ProgressTracker::new(total);
        state.tracker.update(processed);

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        *entry.lock_run() = RunControl {
            cancel: cancel.clone(),
            control: control_tx,
        };
        let receiver = entry.events.subscribe();
        drop(state);

        info!(batch = %entry.id, reset = reset.len(), "batch re-activated for retry");
        let task = runtime.spawn(scheduler::run_batch(Arc::clone(entry), control_rx, cancel));
        Ok(RetryTicket {
            reset: reset.len(),
            handle: Some(BatchHandle {
                id: entry.id,
                events: receiver,
                task,
            }),
        })
    }

    /// Drop terminal batches that ended at least `max_age` ago
    pub fn cleanup(&self, max_age: Duration) -> usize {
        let mut batches = self.write_batches();
        let before = batches.len();
        batches.retain(|_, entry| {
            let state = entry.lock_state();
            !(state.status.is_terminal()
                && state.ended_at.is_some_and(|ended| ended.elapsed() >= max_age))
        });
        let removed = before - batches.len();
        if removed > 0 {
            debug!(removed, "cleaned up finished batches");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.read_batches().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: BatchId) -> Result<Arc<BatchEntry<I, O>>> {
        self.read_batches()
            .get(&id)
            .cloned()
            .ok_or_else(|| PressError::BatchNotFound { id: id.to_string() })
    }

    fn read_batches(
        &self,
    ) -> std::sync::RwLockReadGuard<'_, HashMap<BatchId, Arc<BatchEntry<I, O>>>> {
        self.batches.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_batches(
        &self,
    ) -> std::sync::RwLockWriteGuard<'_, HashMap<BatchId, Arc<BatchEntry<I, O>>>> {
        self.batches.write().unwrap_or_else(PoisonError::into_inner)
    }
}
