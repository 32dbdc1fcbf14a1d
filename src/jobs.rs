//! Priority job queue and worker pool serving one agent
//!
//! Jobs are deferred invocations of registry functions. The queue orders by
//! descending priority with FIFO among equal priorities; a fixed-size pool
//! of workers pops, executes through the agent's [`FunctionRegistry`], and
//! records the outcome. Every job has exactly one producer and at most one
//! worker at any time.

use crate::agent::StatsRecorder;
use crate::data::{AgentData, FunctionResult};
use crate::domain_types::{AgentId, JobId};
use crate::error::{AgentError, Result};
use crate::functions::{ExecutionContext, FunctionRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum JobStatus {
    /// Queued, not yet claimed by a worker
    Pending,
    /// Claimed and executing
    Running,
    /// Finished with a successful result
    Completed,
    /// Finished with a failed result
    Failed,
    /// Removed from the queue before execution, or stopped mid-queue
    Cancelled,
}

impl JobStatus {
    /// Whether this status is final
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A deferred function invocation owned by one agent
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job ID
    pub id: JobId,
    /// Function to invoke
    pub function_name: String,
    /// Invocation parameters
    pub params: AgentData,
    /// Scheduling priority; higher runs earlier
    pub priority: i32,
    /// Agent that requested the job, when known
    pub requester: Option<AgentId>,
    /// Current lifecycle state
    pub status: JobStatus,
    /// Outcome, present once the job is terminal
    pub result: Option<FunctionResult>,
    /// Submission time
    pub enqueued_at: DateTime<Utc>,
    /// Time a worker claimed the job
    pub started_at: Option<DateTime<Utc>>,
    /// Time the job reached a terminal status
    pub finished_at: Option<DateTime<Utc>>,
}

/// Queue and execution statistics for one agent's job manager
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobManagerStats {
    /// Jobs waiting in the queue
    pub pending: usize,
    /// Jobs currently executing
    pub running: usize,
    /// Total jobs completed successfully since start
    pub completed_total: u64,
    /// Total jobs failed since start
    pub failed_total: u64,
    /// Total jobs cancelled since start
    pub cancelled_total: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueuedJob {
    priority: i32,
    seq: u64,
    id: JobId,
}

impl Ord for QueuedJob {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // max-heap: higher priority first, then earlier submission
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueuedJob {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct JobRecord {
    job: Job,
    cancel: CancellationToken,
}

#[derive(Default)]
struct JobState {
    queue: BinaryHeap<QueuedJob>,
    jobs: HashMap<JobId, JobRecord>,
    terminal_order: VecDeque<JobId>,
    running: usize,
    next_seq: u64,
}

impl JobState {
    /// Pops the next runnable job, skipping entries cancelled while queued
    fn pop_pending(&mut self) -> Option<JobId> {
        while let Some(queued) = self.queue.pop() {
            if let Some(record) = self.jobs.get(&queued.id) {
                if record.job.status == JobStatus::Pending {
                    return Some(queued.id);
                }
            }
        }
        None
    }

    fn record_terminal(&mut self, id: JobId, retention: usize) {
        self.terminal_order.push_back(id);
        while self.terminal_order.len() > retention {
            if let Some(old) = self.terminal_order.pop_front() {
                self.jobs.remove(&old);
            }
        }
    }
}

/// Priority job queue paired with a fixed-size worker pool
pub struct JobManager {
    agent_id: AgentId,
    registry: Arc<FunctionRegistry>,
    stats_recorder: Arc<StatsRecorder>,
    state: Arc<Mutex<JobState>>,
    work_available: Arc<Notify>,
    shutdown: Mutex<CancellationToken>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    worker_count: usize,
    retention: usize,
    completed_total: Arc<AtomicU64>,
    failed_total: Arc<AtomicU64>,
    cancelled_total: Arc<AtomicU64>,
}

impl std::fmt::Debug for JobManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobManager")
            .field("agent_id", &self.agent_id)
            .field("worker_count", &self.worker_count)
            .field("retention", &self.retention)
            .finish()
    }
}

impl JobManager {
    /// Default number of terminal jobs retained for status/result queries
    pub const DEFAULT_RETENTION: usize = 1000;

    /// Creates a manager executing through `registry` with `worker_count`
    /// workers
    pub fn new(
        agent_id: AgentId,
        registry: Arc<FunctionRegistry>,
        stats_recorder: Arc<StatsRecorder>,
        worker_count: usize,
    ) -> Self {
        Self {
            agent_id,
            registry,
            stats_recorder,
            state: Arc::new(Mutex::new(JobState::default())),
            work_available: Arc::new(Notify::new()),
            shutdown: Mutex::new(CancellationToken::new()),
            workers: Mutex::new(Vec::new()),
            worker_count: worker_count.max(1),
            retention: Self::DEFAULT_RETENTION,
            completed_total: Arc::new(AtomicU64::new(0)),
            failed_total: Arc::new(AtomicU64::new(0)),
            cancelled_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Overrides the terminal-job retention window
    #[must_use]
    pub fn with_retention(mut self, retention: usize) -> Self {
        self.retention = retention.max(1);
        self
    }

    /// Spawns the worker pool; idempotent with a warn on a second call
    pub async fn start(&self) {
        let mut workers = self.workers.lock().await;
        if !workers.is_empty() {
            warn!(agent_id = %self.agent_id, "job manager already started");
            return;
        }

        // a stopped manager gets a fresh shutdown token on restart
        let mut shutdown = self.shutdown.lock().await;
        if shutdown.is_cancelled() {
            *shutdown = CancellationToken::new();
        }
        let token = shutdown.clone();
        drop(shutdown);

        for worker_index in 0..self.worker_count {
            workers.push(self.spawn_worker(worker_index, token.clone()));
        }
        info!(
            agent_id = %self.agent_id,
            workers = self.worker_count,
            "job manager started"
        );
    }

    fn spawn_worker(&self, worker_index: usize, shutdown: CancellationToken) -> JoinHandle<()> {
        let agent_id = self.agent_id;
        let registry = Arc::clone(&self.registry);
        let stats_recorder = Arc::clone(&self.stats_recorder);
        let state = Arc::clone(&self.state);
        let work_available = Arc::clone(&self.work_available);
        let retention = self.retention;
        let completed_total = Arc::clone(&self.completed_total);
        let failed_total = Arc::clone(&self.failed_total);

        tokio::spawn(async move {
            debug!(agent_id = %agent_id, worker_index, "job worker started");
            'worker: loop {
                // claim the next pending job, or park until one arrives
                let claimed = loop {
                    if shutdown.is_cancelled() {
                        break 'worker;
                    }
                    let mut guard = state.lock().await;
                    if let Some(id) = guard.pop_pending() {
                        guard.running += 1;
                        let record = guard
                            .jobs
                            .get_mut(&id)
                            .expect("queued job must have a record");
                        record.job.status = JobStatus::Running;
                        record.job.started_at = Some(Utc::now());
                        let claim = (
                            id,
                            record.job.function_name.clone(),
                            record.job.params.clone(),
                            record.cancel.clone(),
                        );
                        drop(guard);
                        break claim;
                    }
                    drop(guard);
                    tokio::select! {
                        () = shutdown.cancelled() => break 'worker,
                        () = work_available.notified() => {}
                    }
                };

                let (id, function_name, params, cancel) = claimed;
                let ctx = ExecutionContext {
                    agent_id,
                    cancellation: cancel,
                };
                let result = registry.dispatch(&function_name, params, &ctx).await;
                let elapsed_ms = result.execution_time_ms;
                let succeeded = result.success;

                let mut guard = state.lock().await;
                guard.running -= 1;
                if let Some(record) = guard.jobs.get_mut(&id) {
                    record.job.status = if succeeded {
                        JobStatus::Completed
                    } else {
                        JobStatus::Failed
                    };
                    record.job.finished_at = Some(Utc::now());
                    record.job.result = Some(result);
                    guard.record_terminal(id, retention);
                }
                drop(guard);

                if succeeded {
                    completed_total.fetch_add(1, Ordering::Relaxed);
                } else {
                    failed_total.fetch_add(1, Ordering::Relaxed);
                }
                stats_recorder.record_execution(elapsed_ms);
            }
            debug!(agent_id = %agent_id, worker_index, "job worker stopped");
        })
    }

    /// Queues a function invocation, returning its job ID
    ///
    /// # Errors
    ///
    /// Returns a state error when the manager is stopped.
    pub async fn submit(
        &self,
        function_name: impl Into<String>,
        params: AgentData,
        priority: i32,
        requester: Option<AgentId>,
    ) -> Result<JobId> {
        if self.shutdown.lock().await.is_cancelled() {
            return Err(AgentError::State(format!(
                "agent {} job manager is stopped",
                self.agent_id
            )));
        }

        let id = JobId::generate();
        let job = Job {
            id,
            function_name: function_name.into(),
            params,
            priority,
            requester,
            status: JobStatus::Pending,
            result: None,
            enqueued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        };

        let mut guard = self.state.lock().await;
        let seq = guard.next_seq;
        guard.next_seq += 1;
        guard.queue.push(QueuedJob { priority, seq, id });
        guard.jobs.insert(
            id,
            JobRecord {
                job,
                cancel: CancellationToken::new(),
            },
        );
        drop(guard);

        self.work_available.notify_one();
        debug!(agent_id = %self.agent_id, job_id = %id, priority, "job submitted");
        Ok(id)
    }

    /// Cancels a job
    ///
    /// A pending job transitions to `Cancelled` and the call returns `true`.
    /// A running job only has its cancellation flag raised (cooperative);
    /// the call returns `false` because no transition was applied.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown job IDs.
    pub async fn cancel(&self, job_id: JobId) -> Result<bool> {
        let mut guard = self.state.lock().await;
        let record = guard
            .jobs
            .get_mut(&job_id)
            .ok_or_else(|| AgentError::NotFound(format!("job {job_id}")))?;

        match record.job.status {
            JobStatus::Pending => {
                record.job.status = JobStatus::Cancelled;
                record.job.finished_at = Some(Utc::now());
                record.job.result = Some(FunctionResult::error("job cancelled"));
                guard.record_terminal(job_id, self.retention);
                drop(guard);
                self.cancelled_total.fetch_add(1, Ordering::Relaxed);
                Ok(true)
            }
            JobStatus::Running => {
                record.cancel.cancel();
                Ok(false)
            }
            _ => Ok(false),
        }
    }

    /// Fetches the current status of a job
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown job IDs.
    pub async fn status(&self, job_id: JobId) -> Result<JobStatus> {
        let guard = self.state.lock().await;
        guard
            .jobs
            .get(&job_id)
            .map(|record| record.job.status)
            .ok_or_else(|| AgentError::NotFound(format!("job {job_id}")))
    }

    /// Fetches the result of a terminal job
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown job IDs and a state error when
    /// the job has not yet reached a terminal status.
    pub async fn result(&self, job_id: JobId) -> Result<FunctionResult> {
        let guard = self.state.lock().await;
        let record = guard
            .jobs
            .get(&job_id)
            .ok_or_else(|| AgentError::NotFound(format!("job {job_id}")))?;
        if !record.job.status.is_terminal() {
            return Err(AgentError::State(format!(
                "job {job_id} has not finished (status {:?})",
                record.job.status
            )));
        }
        Ok(record.job.result.clone().unwrap_or_default())
    }

    /// Fetches a full job snapshot
    ///
    /// # Errors
    ///
    /// Returns a not-found error for unknown job IDs.
    pub async fn job(&self, job_id: JobId) -> Result<Job> {
        let guard = self.state.lock().await;
        guard
            .jobs
            .get(&job_id)
            .map(|record| record.job.clone())
            .ok_or_else(|| AgentError::NotFound(format!("job {job_id}")))
    }

    /// Current queue and execution statistics
    pub async fn stats(&self) -> JobManagerStats {
        let guard = self.state.lock().await;
        let pending = guard
            .jobs
            .values()
            .filter(|record| record.job.status == JobStatus::Pending)
            .count();
        let running = guard.running;
        drop(guard);

        JobManagerStats {
            pending,
            running,
            completed_total: self.completed_total.load(Ordering::Relaxed),
            failed_total: self.failed_total.load(Ordering::Relaxed),
            cancelled_total: self.cancelled_total.load(Ordering::Relaxed),
        }
    }

    /// Signals shutdown, joins workers within `grace`, then cancels the
    /// remaining pending jobs
    ///
    /// Workers exit on their next dequeue; a running job past the grace
    /// period is abandoned with a warning.
    pub async fn stop(&self, grace: Duration) {
        self.shutdown.lock().await.cancel();
        self.work_available.notify_waiters();

        let mut workers = self.workers.lock().await;
        let handles: Vec<JoinHandle<()>> = workers.drain(..).collect();
        drop(workers);

        for handle in handles {
            if tokio::time::timeout(grace, handle).await.is_err() {
                warn!(
                    agent_id = %self.agent_id,
                    "job worker did not stop within the grace period, abandoning"
                );
            }
        }

        let mut guard = self.state.lock().await;
        let pending: Vec<JobId> = guard
            .jobs
            .values()
            .filter(|record| record.job.status == JobStatus::Pending)
            .map(|record| record.job.id)
            .collect();
        for id in &pending {
            if let Some(record) = guard.jobs.get_mut(id) {
                record.job.status = JobStatus::Cancelled;
                record.job.finished_at = Some(Utc::now());
                record.job.result = Some(FunctionResult::error("job manager stopped"));
            }
            guard.record_terminal(*id, self.retention);
            self.cancelled_total.fetch_add(1, Ordering::Relaxed);
        }
        drop(guard);

        info!(agent_id = %self.agent_id, "job manager stopped");
    }
}
