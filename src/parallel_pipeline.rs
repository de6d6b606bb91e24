// THEORY:
// The `parallel_pipeline` module is the asynchronous front door for test suites that
// compare many screenshots at once. Jobs go into a single channel; a dispatcher hands
// them round-robin to a fixed set of async workers; each worker runs the comparison
// on a blocking thread and sends the report back through a one-shot channel.
//
// All comparisons share one `VisualComparator`, and therefore one rayon pool, so the
// total number of pixel-walking threads stays bounded no matter how many jobs are in
// flight. Jobs own their buffers through `Arc`s because they cross task boundaries.

use crate::core_modules::error::ProcessorError;
use crate::core_modules::pixel_buffer::PixelBuffer;
use crate::pipeline::{ComparisonConfig, ComparisonReport, VisualComparator};
use futures::future::join_all;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, warn};

const DEFAULT_WORKER_POOL_SIZE: usize = 4;

/// A pixel buffer that can be shared with a worker task.
pub type SharedBuffer = Arc<dyn PixelBuffer + Send>;

#[derive(Debug, Error)]
pub enum PoolError {
    #[error("comparison pool is shut down")]
    Closed,

    #[error("comparison worker stopped before replying")]
    WorkerDropped,

    #[error("comparison `{name}` failed: {source}")]
    Comparison {
        name: String,
        #[source]
        source: ProcessorError,
    },

    #[error("comparison task panicked or was cancelled: {0}")]
    Join(#[from] JoinError),
}

/// Configuration for a `ComparisonPool`.
#[derive(Debug, Clone, PartialEq)]
pub struct PoolConfig {
    /// Number of async workers receiving jobs.
    pub workers: usize,
    pub comparison: ComparisonConfig,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            workers: DEFAULT_WORKER_POOL_SIZE,
            comparison: ComparisonConfig::default(),
        }
    }
}

impl PoolConfig {
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_comparison(mut self, comparison: ComparisonConfig) -> Self {
        self.comparison = comparison;
        self
    }
}

/// One named baseline/current pair.
#[derive(Clone)]
pub struct ComparisonJob {
    pub name: String,
    pub baseline: SharedBuffer,
    pub current: SharedBuffer,
}

impl ComparisonJob {
    pub fn new<B, C>(name: impl Into<String>, baseline: B, current: C) -> Self
    where
        B: PixelBuffer + Send + 'static,
        C: PixelBuffer + Send + 'static,
    {
        Self::from_shared(name, Arc::new(baseline), Arc::new(current))
    }

    pub fn from_shared(name: impl Into<String>, baseline: SharedBuffer, current: SharedBuffer) -> Self {
        Self {
            name: name.into(),
            baseline,
            current,
        }
    }
}

impl fmt::Debug for ComparisonJob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComparisonJob")
            .field("name", &self.name)
            .field("baseline", &self.baseline.dimensions())
            .field("current", &self.current.dimensions())
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComparisonOutcome {
    pub name: String,
    pub report: ComparisonReport,
}

type JobResult = Result<ComparisonOutcome, PoolError>;

struct ComparisonTask {
    job: ComparisonJob,
    result_sender: oneshot::Sender<JobResult>,
}

/// Runs comparison jobs concurrently on a fixed set of async workers.
pub struct ComparisonPool {
    task_sender: mpsc::UnboundedSender<ComparisonTask>,
    dispatcher: JoinHandle<()>,
    workers: Vec<JoinHandle<()>>,
    comparator: Arc<VisualComparator>,
}

impl fmt::Debug for ComparisonPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComparisonPool")
            .field("workers", &self.workers.len())
            .field("comparator", &self.comparator)
            .finish()
    }
}

impl ComparisonPool {
    /// Starts the dispatcher and workers. Must be called from within a Tokio runtime.
    pub fn new(config: PoolConfig) -> Result<Self, ProcessorError> {
        let comparator = Arc::new(VisualComparator::new(config.comparison)?);
        let worker_count = config.workers.max(1);
        let (task_sender, mut task_receiver) = mpsc::unbounded_channel::<ComparisonTask>();

        let (worker_senders, worker_receivers): (Vec<_>, Vec<_>) = (0..worker_count)
            .map(|_| mpsc::unbounded_channel::<ComparisonTask>())
            .unzip();

        let dispatcher = tokio::spawn(async move {
            let mut worker_idx = 0;
            while let Some(task) = task_receiver.recv().await {
                if let Err(mpsc::error::SendError(task)) = worker_senders[worker_idx].send(task) {
                    warn!(worker = worker_idx, job = %task.job.name, "worker gone; rejecting job");
                    let _ = task.result_sender.send(Err(PoolError::WorkerDropped));
                }
                worker_idx = (worker_idx + 1) % worker_count;
            }
            debug!("dispatcher drained; closing workers");
        });

        let workers = worker_receivers
            .into_iter()
            .enumerate()
            .map(|(worker_idx, mut worker_receiver)| {
                let comparator = comparator.clone();
                tokio::spawn(async move {
                    while let Some(task) = worker_receiver.recv().await {
                        let result = Self::run_job(&comparator, task.job).await;
                        if task.result_sender.send(result).is_err() {
                            debug!(worker = worker_idx, "caller stopped waiting for result");
                        }
                    }
                })
            })
            .collect();

        Ok(Self {
            task_sender,
            dispatcher,
            workers,
            comparator,
        })
    }

    async fn run_job(comparator: &Arc<VisualComparator>, job: ComparisonJob) -> JobResult {
        let comparator = comparator.clone();
        let ComparisonJob { name, baseline, current } = job;
        debug!(job = %name, "starting comparison");

        let report = tokio::task::spawn_blocking(move || comparator.compare(&*baseline, &*current)).await?;
        match report {
            Ok(report) => Ok(ComparisonOutcome { name, report }),
            Err(source) => Err(PoolError::Comparison { name, source }),
        }
    }

    pub fn comparator(&self) -> &VisualComparator {
        &self.comparator
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Queues one job and waits for its report.
    pub async fn submit(&self, job: ComparisonJob) -> JobResult {
        let (result_sender, result_receiver) = oneshot::channel();
        self.task_sender
            .send(ComparisonTask { job, result_sender })
            .map_err(|_| PoolError::Closed)?;

        result_receiver.await.map_err(|_| PoolError::WorkerDropped)?
    }

    /// Queues every job at once; results come back in submission order.
    pub async fn submit_all<I>(&self, jobs: I) -> Vec<JobResult>
    where
        I: IntoIterator<Item = ComparisonJob>,
    {
        join_all(jobs.into_iter().map(|job| self.submit(job))).await
    }

    /// Stops accepting jobs, lets queued jobs finish, and joins every worker.
    pub async fn shutdown(self) -> Result<(), PoolError> {
        let Self {
            task_sender,
            dispatcher,
            workers,
            ..
        } = self;
        drop(task_sender);
        dispatcher.await?;

        let mut first_error = None;
        for joined in join_all(workers).await {
            if let Err(err) = joined {
                first_error.get_or_insert(err);
            }
        }
        match first_error {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }
}
