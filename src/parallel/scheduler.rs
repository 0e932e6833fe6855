//! Single-writer batch event loop: FIFO dispatch, backoff, timeouts
//!
//! Only the coordinator task mutates a running batch. Workers run the job
//! on the blocking pool and report back over a channel; the coordinator
//! applies the outcome, updates counters and publishes events. The batch
//! deadline is watched by the coordinator itself, so a worker stuck in a
//! codec call cannot delay it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::{mpsc, oneshot};
use tokio::time::sleep_until;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::error::{JobError, PressError, Result};
use crate::parallel::progress::{BatchEvent, BatchStatus, BatchSummary, JobStatus};
use crate::parallel::{duration_ms, BatchEntry, JobContext};

/// Requests delivered to a running coordinator
pub(crate) enum Control {
    Retry {
        item_ids: Option<Vec<String>>,
        reply: oneshot::Sender<usize>,
    },
}

enum WorkerMessage<O> {
    Finished {
        index: usize,
        attempt: u32,
        outcome: Result<O>,
        elapsed_ms: u64,
    },
    RetryReady {
        index: usize,
    },
}

struct Coordinator<I, O> {
    entry: Arc<BatchEntry<I, O>>,
    queue: VecDeque<usize>,
    in_flight: usize,
    backing_off: usize,
    cancel: CancellationToken,
    tx: mpsc::UnboundedSender<WorkerMessage<O>>,
}

/// Run a batch until every job is terminal or the batch is stopped
#[instrument(skip_all, fields(batch = %entry.id))]
pub(crate) async fn run_batch<I, O>(
    entry: Arc<BatchEntry<I, O>>,
    mut control: mpsc::UnboundedReceiver<Control>,
    cancel: CancellationToken,
) -> Arc<BatchSummary<O>>
where
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    let deadline = tokio::time::Instant::now() + entry.options.batch_timeout;
    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut coordinator = Coordinator {
        entry,
        queue: VecDeque::new(),
        in_flight: 0,
        backing_off: 0,
        cancel,
        tx,
    };

    coordinator.admit_pending();

    loop {
        coordinator.dispatch();
        if coordinator.is_idle() {
            return coordinator.finish();
        }

        tokio::select! {
            biased;
            _ = coordinator.cancel.cancelled() => {
                return coordinator.stop(JobStatus::Cancelled, BatchStatus::Cancelled, PressError::Cancelled);
            }
            _ = sleep_until(deadline) => {
                let timeout_ms = duration_ms(coordinator.entry.options.batch_timeout);
                warn!(timeout_ms, "batch deadline reached");
                return coordinator.stop(
                    JobStatus::Timeout,
                    BatchStatus::Timeout,
                    PressError::BatchTimeout { timeout_ms },
                );
            }
            Some(command) = control.recv() => coordinator.handle_control(command),
            Some(message) = rx.recv() => coordinator.handle_worker(message),
        }
    }
}

impl<I, O> Coordinator<I, O>
where
    I: Send + Sync + 'static,
    O: Clone + Send + Sync + 'static,
{
    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.in_flight == 0 && self.backing_off == 0
    }

    fn publish(&self, event: BatchEvent<O>) {
        // No receivers is fine; status stays pollable
        let _ = self.entry.events.send(event);
    }

    /// Validate pending jobs and queue the ones that pass, in submission order
    fn admit_pending(&mut self) {
        let mut events = Vec::new();
        {
            let mut state = self.entry.lock_state();
            state.rejected = 0;
            for index in 0..state.jobs.len() {
                if state.jobs[index].status != JobStatus::Pending {
                    continue;
                }
                let (_, input) = &self.entry.inputs[index];
                match self.entry.processor.validate(input) {
                    Ok(()) => self.queue.push_back(index),
                    Err(e) => {
                        warn!(job = %state.jobs[index].id, "rejected: {}", e);
                        let job_error = JobError::new(&e, 0);
                        state.rejected += 1;
                        state.failed += 1;
                        let job = &mut state.jobs[index];
                        job.status = JobStatus::Failed;
                        job.errors.push(job_error.clone());
                        job.error = Some(job_error.clone());
                        events.push(BatchEvent::Error {
                            batch_id: self.entry.id,
                            job_id: job.id.clone(),
                            error: job_error,
                        });
                        events.push(state.progress_event(self.entry.id, index));
                    }
                }
            }
        }
        for event in events {
            self.publish(event);
        }
    }

    /// Start queued jobs while slots are free
    fn dispatch(&mut self) {
        while self.in_flight < self.entry.options.concurrency {
            let Some(index) = self.queue.pop_front() else {
                break;
            };

            let (job_id, attempt, event) = {
                let mut state = self.entry.lock_state();
                let job = &mut state.jobs[index];
                job.status = JobStatus::Processing;
                job.attempts += 1;
                let (job_id, attempt) = (job.id.clone(), job.attempts);
                (job_id, attempt, state.progress_event(self.entry.id, index))
            };
            self.publish(event);
            debug!(job = %job_id, attempt, "dispatching");

            self.spawn_worker(index, job_id, attempt);
            self.in_flight += 1;
        }
    }

    fn spawn_worker(&self, index: usize, job_id: String, attempt: u32) {
        let input = Arc::clone(&self.entry.inputs[index].1);
        let processor = Arc::clone(&self.entry.processor);
        let per_item = self.entry.options.per_item_timeout;
        let job_token = self.cancel.child_token();
        let context = JobContext {
            job_id,
            attempt,
            cancel: job_token.clone(),
        };
        let tx = self.tx.clone();

        tokio::spawn(async move {
            let started = Instant::now();
            let task = tokio::task::spawn_blocking(move || processor.process(&context, &input));
            let outcome = match tokio::time::timeout(per_item, task).await {
                Ok(Ok(result)) => result,
                Ok(Err(join_error)) => Err(PressError::internal(format!(
                    "worker task failed: {join_error}"
                ))),
                Err(_) => {
                    // The blocking call keeps running; tell it to stop at its next checkpoint
                    job_token.cancel();
                    Err(PressError::ProcessingTimeout {
                        timeout_ms: duration_ms(per_item),
                    })
                }
            };
            let _ = tx.send(WorkerMessage::Finished {
                index,
                attempt,
                outcome,
                elapsed_ms: duration_ms(started.elapsed()),
            });
        });
    }

    fn handle_worker(&mut self, message: WorkerMessage<O>) {
        match message {
            WorkerMessage::Finished {
                index,
                attempt,
                outcome,
                elapsed_ms,
            } => {
                self.in_flight = self.in_flight.saturating_sub(1);
                self.finish_attempt(index, attempt, outcome, elapsed_ms);
            }
            WorkerMessage::RetryReady { index } => {
                self.backing_off = self.backing_off.saturating_sub(1);
                let event = {
                    let mut state = self.entry.lock_state();
                    if state.jobs[index].status != JobStatus::Retrying {
                        return;
                    }
                    state.jobs[index].status = JobStatus::Pending;
                    state.progress_event(self.entry.id, index)
                };
                self.publish(event);
                self.queue.push_back(index);
            }
        }
    }

    fn finish_attempt(&mut self, index: usize, attempt: u32, outcome: Result<O>, elapsed_ms: u64) {
        let max_attempts = self.entry.options.max_retries.max(1);
        let mut events = Vec::new();
        let mut backoff = None;
        {
            let mut state = self.entry.lock_state();
            if state.jobs[index].status != JobStatus::Processing {
                return;
            }
            state.jobs[index].duration_ms = Some(elapsed_ms);

            match outcome {
                Ok(result) => {
                    state.completed += 1;
                    let job = &mut state.jobs[index];
                    job.status = JobStatus::Completed;
                    job.result = Some(Arc::new(result));
                    debug!(job = %job.id, elapsed_ms, "completed");
                }
                Err(e) => {
                    let job_error = JobError::new(&e, attempt);
                    let job = &mut state.jobs[index];
                    job.errors.push(job_error.clone());
                    events.push(BatchEvent::Error {
                        batch_id: self.entry.id,
                        job_id: job.id.clone(),
                        error: job_error.clone(),
                    });

                    let terminal = match e {
                        PressError::ProcessingTimeout { .. } => Some((JobStatus::Timeout, job_error)),
                        PressError::Cancelled => Some((JobStatus::Cancelled, job_error)),
                        e if e.is_transient() && attempt < max_attempts => {
                            warn!(job = %job.id, attempt, "attempt failed, retrying: {}", e);
                            job.status = JobStatus::Retrying;
                            backoff = Some(self.entry.options.backoff(attempt));
                            None
                        }
                        e if e.is_transient() => {
                            let exhausted = PressError::retry_exhausted(attempt, e);
                            Some((JobStatus::Failed, JobError::new(&exhausted, attempt)))
                        }
                        _ => Some((JobStatus::Failed, job_error)),
                    };

                    if let Some((status, final_error)) = terminal {
                        error!(job = %job.id, attempt, %status, "job failed: {}", final_error.message);
                        job.status = status;
                        job.error = Some(final_error);
                        state.failed += 1;
                    }
                }
            }
            events.push(state.progress_event(self.entry.id, index));
        }

        for event in events {
            self.publish(event);
        }

        if let Some(delay) = backoff {
            self.backing_off += 1;
            let tx = self.tx.clone();
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = tx.send(WorkerMessage::RetryReady { index });
            });
        }
    }

    fn handle_control(&mut self, command: Control) {
        match command {
            Control::Retry { item_ids, reply } => {
                let reset = {
                    let mut state = self.entry.lock_state();
                    state.reset_failed(item_ids.as_deref())
                };
                info!(reset = reset.len(), "retrying failed jobs");
                for &index in &reset {
                    let event = self.entry.lock_state().progress_event(self.entry.id, index);
                    self.publish(event);
                }
                let count = reset.len();
                self.queue.extend(reset);
                let _ = reply.send(count);
            }
        }
    }

    /// Every job is terminal: close the batch normally
    fn finish(self) -> Arc<BatchSummary<O>> {
        let summary = {
            let mut state = self.entry.lock_state();
            let all_rejected = state.rejected > 0 && state.rejected == state.jobs.len();
            state.status = if all_rejected {
                BatchStatus::Failed
            } else {
                BatchStatus::Completed
            };
            state.ended_at = Some(Instant::now());
            Arc::new(state.summary(self.entry.id))
        };

        info!(
            completed = summary.completed,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            "batch {}",
            summary.status
        );

        if summary.status == BatchStatus::Failed {
            let error = JobError::new(
                &PressError::invalid_parameters("every item failed validation"),
                0,
            );
            self.publish(BatchEvent::Failed {
                summary: Arc::clone(&summary),
                error,
            });
        } else {
            self.publish(BatchEvent::Complete {
                summary: Arc::clone(&summary),
            });
        }
        summary
    }

    /// Cancellation or deadline: force every live job into `job_status`
    fn stop(self, job_status: JobStatus, batch_status: BatchStatus, cause: PressError) -> Arc<BatchSummary<O>> {
        // In-flight workers observe this at their next checkpoint
        self.cancel.cancel();

        let cause_error = JobError::new(&cause, 0);
        let mut events = Vec::new();
        let summary = {
            let mut state = self.entry.lock_state();
            for index in 0..state.jobs.len() {
                if state.jobs[index].status.is_terminal() {
                    continue;
                }
                state.failed += 1;
                let job = &mut state.jobs[index];
                job.status = job_status;
                job.error = Some(cause_error.clone());
                events.push(state.progress_event(self.entry.id, index));
            }
            state.status = batch_status;
            state.ended_at = Some(Instant::now());
            Arc::new(state.summary(self.entry.id))
        };

        for event in events {
            self.publish(event);
        }
        info!(
            completed = summary.completed,
            failed = summary.failed,
            "batch {}",
            batch_status
        );
        self.publish(BatchEvent::Failed {
            summary: Arc::clone(&summary),
            error: cause_error,
        });
        summary
    }
}
