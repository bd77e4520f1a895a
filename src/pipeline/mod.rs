//! Fast-ack write pipeline
//!
//! `submit` queues the write and answers at once. A small pool of workers
//! performs the real write with bounded retries. Delivery is best-effort and
//! at-most-once: a task that exhausts its attempts is logged and dropped, and
//! tasks still queued when the pipeline stops are abandoned. Every accepted
//! task ends in exactly one terminal event.

mod executor;
mod task;

pub use executor::{ResolvingWriteExecutor, WriteExecutor};
pub use task::{is_permanent, BackgroundWriteTask, NextStep, TaskState};

#[cfg(test)]
pub use executor::MockWriteExecutor;

use chrono::Utc;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::{Accepted, TenantId, WriteRequest};
use crate::infra::{Result, RetryConfig, ShutdownSignal, TenancyError};

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub workers: usize,
    /// Bounded queue; `submit` fails with `QueueFull` beyond it
    pub queue_capacity: usize,
    /// Budget for one attempt; a timeout counts as a retryable failure
    pub attempt_timeout: Duration,
    pub retry: RetryConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            queue_capacity: 1024,
            attempt_timeout: Duration::from_secs(30),
            retry: RetryConfig::background_write(),
        }
    }
}

impl PipelineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            workers: std::env::var("WRITE_PIPELINE_WORKERS")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.workers),
            queue_capacity: std::env::var("WRITE_PIPELINE_QUEUE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|n: &usize| *n > 0)
                .unwrap_or(defaults.queue_capacity),
            attempt_timeout: std::env::var("WRITE_ATTEMPT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .map(Duration::from_millis)
                .unwrap_or(defaults.attempt_timeout),
            retry: RetryConfig::from_env(),
        }
    }
}

/// Background write outcome, one stream per pipeline
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Succeeded {
        task_id: Uuid,
        tenant_id: TenantId,
        attempts: u32,
    },
    RetryScheduled {
        task_id: Uuid,
        tenant_id: TenantId,
        attempt: u32,
        delay_ms: u64,
        error: String,
    },
    Abandoned {
        task_id: Uuid,
        tenant_id: TenantId,
        attempts: u32,
        last_error: String,
    },
}

impl PipelineEvent {
    pub fn task_id(&self) -> Uuid {
        match self {
            PipelineEvent::Succeeded { task_id, .. }
            | PipelineEvent::RetryScheduled { task_id, .. }
            | PipelineEvent::Abandoned { task_id, .. } => *task_id,
        }
    }
}

#[derive(Default)]
struct Counters {
    accepted: AtomicU64,
    rejected: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    succeeded: AtomicU64,
    abandoned: AtomicU64,
}

/// Pipeline counters snapshot
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    pub accepted: u64,
    pub rejected: u64,
    pub attempts: u64,
    pub retries: u64,
    pub succeeded: u64,
    pub abandoned: u64,
    pub queued: usize,
    pub workers: usize,
}

/// State shared by every worker
struct Worker {
    executor: Arc<dyn WriteExecutor>,
    attempt_timeout: Duration,
    counters: Arc<Counters>,
    events: broadcast::Sender<PipelineEvent>,
    shutdown: ShutdownSignal,
}

impl Worker {
    async fn run(
        self: Arc<Self>,
        id: usize,
        queue: Arc<tokio::sync::Mutex<mpsc::Receiver<BackgroundWriteTask>>>,
    ) {
        debug!(worker = id, "write worker started");
        loop {
            let next = {
                let mut queue = queue.lock().await;
                tokio::select! {
                    biased;
                    _ = self.shutdown.wait() => None,
                    task = queue.recv() => task,
                }
            };
            let Some(task) = next else { break };
            self.process(task).await;
        }
        debug!(worker = id, "write worker stopped");
    }

    async fn process(&self, mut task: BackgroundWriteTask) {
        loop {
            let attempt = task.begin_attempt();
            self.counters.attempts.fetch_add(1, Ordering::Relaxed);

            let outcome = tokio::time::timeout(
                self.attempt_timeout,
                self.executor.execute(task.request()),
            )
            .await
            .unwrap_or_else(|_| {
                Err(TenancyError::Timeout {
                    operation: "background write",
                    elapsed: self.attempt_timeout,
                })
            });

            let error = match outcome {
                Ok(rows) => {
                    task.succeed();
                    self.counters.succeeded.fetch_add(1, Ordering::Relaxed);
                    info!(
                        task_id = %task.id(),
                        tenant_id = %task.tenant_id(),
                        attempt,
                        rows,
                        "background write succeeded"
                    );
                    self.emit(PipelineEvent::Succeeded {
                        task_id: task.id(),
                        tenant_id: task.tenant_id().clone(),
                        attempts: attempt,
                    });
                    return;
                }
                Err(e) => e,
            };

            match task.fail(&error) {
                NextStep::RetryAfter(delay) => {
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    warn!(
                        task_id = %task.id(),
                        tenant_id = %task.tenant_id(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "background write retry scheduled"
                    );
                    self.emit(PipelineEvent::RetryScheduled {
                        task_id: task.id(),
                        tenant_id: task.tenant_id().clone(),
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                        error: error.to_string(),
                    });

                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = self.shutdown.wait() => {
                            task.abandon(format!("shutting down after: {error}"));
                            self.abandoned(&task);
                            return;
                        }
                    }
                }
                NextStep::Abandon => {
                    self.abandoned(&task);
                    return;
                }
            }
        }
    }

    fn abandoned(&self, task: &BackgroundWriteTask) {
        self.counters.abandoned.fetch_add(1, Ordering::Relaxed);
        let err = task.abandonment();
        error!(
            task_id = %task.id(),
            tenant_id = %task.tenant_id(),
            attempt = task.attempt(),
            error = %err,
            "background write abandoned"
        );
        self.emit(PipelineEvent::Abandoned {
            task_id: task.id(),
            tenant_id: task.tenant_id().clone(),
            attempts: task.attempt(),
            last_error: task.last_error().unwrap_or_default().to_string(),
        });
    }

    fn emit(&self, event: PipelineEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }
}

/// Fast-ack front door plus its worker pool
pub struct WriteRetryPipeline {
    intake: Mutex<Option<mpsc::Sender<BackgroundWriteTask>>>,
    /// Held so a full queue reports `QueueFull` even after the workers stop,
    /// and drained on shutdown
    queue: Arc<tokio::sync::Mutex<mpsc::Receiver<BackgroundWriteTask>>>,
    worker: Arc<Worker>,
    retry: RetryConfig,
    queue_capacity: usize,
    counters: Arc<Counters>,
    events: broadcast::Sender<PipelineEvent>,
    workers: tokio::sync::Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    closed: AtomicBool,
}

impl WriteRetryPipeline {
    /// Spawn the workers. They stop when `shutdown` fires or after
    /// [`WriteRetryPipeline::shutdown`] once the queue is drained.
    pub fn start(
        config: PipelineConfig,
        executor: Arc<dyn WriteExecutor>,
        shutdown: ShutdownSignal,
    ) -> Self {
        let workers_n = config.workers.max(1);
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let queue = Arc::new(tokio::sync::Mutex::new(rx));
        let counters = Arc::new(Counters::default());
        let (events, _) = broadcast::channel(1024);

        let worker = Arc::new(Worker {
            executor,
            attempt_timeout: config.attempt_timeout,
            counters: counters.clone(),
            events: events.clone(),
            shutdown,
        });
        let handles = (0..workers_n)
            .map(|id| tokio::spawn(worker.clone().run(id, queue.clone())))
            .collect();

        info!(
            workers = workers_n,
            queue_capacity = config.queue_capacity,
            max_attempts = config.retry.max_attempts,
            "write pipeline started"
        );

        Self {
            intake: Mutex::new(Some(tx)),
            queue,
            worker,
            retry: config.retry,
            queue_capacity: config.queue_capacity.max(1),
            counters,
            events,
            workers: tokio::sync::Mutex::new(handles),
            worker_count: workers_n,
            closed: AtomicBool::new(false),
        }
    }

    /// Queue a write and acknowledge it.
    ///
    /// Only refuses when the queue is full or the pipeline is stopping; the
    /// write's own fate is never reported back.
    pub fn submit(&self, request: WriteRequest) -> Result<Accepted> {
        let sender = match self.sender() {
            Some(sender) if !self.closed.load(Ordering::SeqCst) => sender,
            _ => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                return Err(TenancyError::ShuttingDown);
            }
        };

        let task = BackgroundWriteTask::new(request, self.retry.clone());
        let accepted = Accepted {
            task_id: task.id(),
            accepted_at: Utc::now(),
        };
        let tenant_id = task.tenant_id().clone();

        match sender.try_send(task) {
            Ok(()) => {
                self.counters.accepted.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %accepted.task_id, tenant_id = %tenant_id, "background write queued");
                Ok(accepted)
            }
            Err(mpsc::error::TrySendError::Full(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                warn!(tenant_id = %tenant_id, "write queue full");
                Err(TenancyError::QueueFull)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.rejected.fetch_add(1, Ordering::Relaxed);
                Err(TenancyError::ShuttingDown)
            }
        }
    }

    fn sender(&self) -> Option<mpsc::Sender<BackgroundWriteTask>> {
        self.intake
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Subscribe to outcome events
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    pub fn stats(&self) -> PipelineStats {
        let queued = self
            .sender()
            .map(|s| self.queue_capacity.saturating_sub(s.capacity()))
            .unwrap_or(0);
        PipelineStats {
            accepted: self.counters.accepted.load(Ordering::Relaxed),
            rejected: self.counters.rejected.load(Ordering::Relaxed),
            attempts: self.counters.attempts.load(Ordering::Relaxed),
            retries: self.counters.retries.load(Ordering::Relaxed),
            succeeded: self.counters.succeeded.load(Ordering::Relaxed),
            abandoned: self.counters.abandoned.load(Ordering::Relaxed),
            queued,
            workers: self.worker_count,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Stop intake, wait for the workers to exit and abandon whatever is
    /// still queued.
    pub async fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.intake
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();

        let handles = std::mem::take(&mut *self.workers.lock().await);
        for handle in handles {
            if let Err(e) = handle.await {
                error!(error = %e, "write worker panicked");
            }
        }

        let mut queue = self.queue.lock().await;
        let mut dropped = 0usize;
        while let Ok(mut task) = queue.try_recv() {
            task.abandon("shutting down while queued");
            self.worker.abandoned(&task);
            dropped += 1;
        }
        if dropped > 0 {
            warn!(dropped, "queued background writes abandoned at shutdown");
        }
        info!("write pipeline stopped");
    }
}
