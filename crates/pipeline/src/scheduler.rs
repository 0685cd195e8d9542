//! Job scheduler for auto-cfr
//!
//! A fixed pool of worker tasks pulls jobs from a bounded queue and runs each
//! one end-to-end: claim the source, re-check its snapshot, call the encoder
//! (on the blocking pool) with bounded retries, then release the claim.
//!
//! Every admitted job comes back terminal. Jobs still queued when the stop
//! flag is raised are failed as `Cancelled` without touching the encoder.

use crate::claims::ClaimRegistry;
use crate::concurrency::ConcurrencyPlan;
use crate::encode::{EncoderGateway, TranscodeRequest};
use crate::job::{JobStateError, TranscodeJob};
use crate::retry::{FailureKind, RetryPolicy};
use crate::stability::{check_snapshot, StabilityResult};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

/// Jobs returned by [`JobScheduler::run`].
#[derive(Debug)]
pub struct ScheduleOutcome {
    /// Every admitted job, in a terminal state. Order is unspecified.
    pub jobs: Vec<TranscodeJob>,
    /// Jobs dropped at admission because their source was already admitted.
    pub duplicates: usize,
}

/// State shared by all workers.
#[derive(Clone)]
struct WorkerContext {
    gateway: Arc<dyn EncoderGateway>,
    claims: ClaimRegistry,
    retry: RetryPolicy,
    stop: Arc<AtomicBool>,
}

/// Bounded worker pool running transcode jobs.
pub struct JobScheduler {
    plan: ConcurrencyPlan,
    context: WorkerContext,
}

impl JobScheduler {
    /// Create a scheduler.
    ///
    /// # Arguments
    /// * `gateway` - Encoder used for every job
    /// * `claims` - In-flight registry shared with anything else running jobs
    /// * `plan` - Worker count and queue bound
    /// * `retry` - Retry bound for transient failures
    /// * `stop` - Raised to stop dispatching
    pub fn new(
        gateway: Arc<dyn EncoderGateway>,
        claims: ClaimRegistry,
        plan: ConcurrencyPlan,
        retry: RetryPolicy,
        stop: Arc<AtomicBool>,
    ) -> Self {
        Self {
            plan,
            context: WorkerContext {
                gateway,
                claims,
                retry,
                stop,
            },
        }
    }

    pub fn plan(&self) -> &ConcurrencyPlan {
        &self.plan
    }

    /// Run `jobs` to completion and return them all in a terminal state.
    pub async fn run<I>(&self, jobs: I) -> ScheduleOutcome
    where
        I: IntoIterator<Item = TranscodeJob>,
    {
        let workers = self.plan.workers.max(1) as usize;
        let capacity = self.plan.queue_capacity.max(1) as usize;
        let (tx, rx) = mpsc::channel::<TranscodeJob>(capacity);
        let rx = Arc::new(Mutex::new(rx));

        tracing::info!("Starting {} worker(s), queue capacity {}", workers, capacity);

        let (done_tx, mut done_rx) = mpsc::unbounded_channel::<TranscodeJob>();

        let handles: Vec<_> = (0..workers)
            .map(|worker| {
                let rx = Arc::clone(&rx);
                let done = done_tx.clone();
                let context = self.context.clone();
                tokio::spawn(worker_loop(worker, rx, done, context))
            })
            .collect();
        drop(done_tx);

        let mut finished = Vec::new();
        let mut admitted = HashSet::new();
        let mut duplicates = 0;

        for mut job in jobs {
            if !admitted.insert(job.source.path.clone()) {
                tracing::debug!("Dropping duplicate admission of {}", job.source.path.display());
                duplicates += 1;
                continue;
            }

            if self.context.stop.load(Ordering::SeqCst) {
                fail_job(&mut job, FailureKind::Cancelled, "pass cancelled before dispatch");
                finished.push(job);
                continue;
            }

            if let Err(mpsc::error::SendError(mut job)) = tx.send(job).await {
                fail_job(&mut job, FailureKind::Cancelled, "no worker available");
                finished.push(job);
            }
        }
        drop(tx);

        for handle in handles {
            if let Err(e) = handle.await {
                tracing::error!("Worker task failed: {}", e);
            }
        }

        while let Some(job) = done_rx.recv().await {
            finished.push(job);
        }

        // Left behind only if every worker died
        let mut queue = rx.lock().await;
        while let Ok(mut job) = queue.try_recv() {
            fail_job(&mut job, FailureKind::Cancelled, "no worker available");
            finished.push(job);
        }

        ScheduleOutcome {
            jobs: finished,
            duplicates,
        }
    }
}

async fn worker_loop(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<TranscodeJob>>>,
    done: mpsc::UnboundedSender<TranscodeJob>,
    context: WorkerContext,
) {
    loop {
        let next = rx.lock().await.recv().await;
        let Some(mut job) = next else {
            break;
        };

        if context.stop.load(Ordering::SeqCst) {
            fail_job(&mut job, FailureKind::Cancelled, "pass cancelled before dispatch");
        } else {
            tracing::debug!("Worker {} picked up {}", worker, job.source.path.display());
            job = run_isolated(&context, job).await;
        }

        if done.send(job).is_err() {
            tracing::error!("Scheduler stopped collecting results");
            break;
        }
    }
}

/// Run a job on its own task so a panic fails that job instead of losing it.
async fn run_isolated(context: &WorkerContext, job: TranscodeJob) -> TranscodeJob {
    let mut fallback = job.clone();
    let task_context = context.clone();
    let handle = tokio::spawn(async move {
        let mut job = job;
        run_job(&task_context, &mut job).await;
        job
    });

    match handle.await {
        Ok(job) => job,
        Err(e) => {
            let path = fallback.source.path.clone();
            tracing::error!("Job for {} failed unexpectedly: {}", path.display(), e);
            fail_job(&mut fallback, FailureKind::EncoderError, format!("job task failed: {}", e));
            if let Err(e) = context.claims.release(path.clone()).await {
                tracing::error!("Failed to release claim on {}: {}", path.display(), e);
            }
            fallback
        }
    }
}

fn fail_job(job: &mut TranscodeJob, kind: FailureKind, message: impl Into<String>) {
    if let Err(e) = job.fail(kind, message) {
        tracing::error!("{}", e);
    }
}

/// Run one job to a terminal state, holding its claim throughout.
async fn run_job(context: &WorkerContext, job: &mut TranscodeJob) {
    let path = job.source.path.clone();

    match context.claims.claim(path.clone()).await {
        Ok(true) => {}
        Ok(false) => {
            tracing::warn!("{} already has an active job", path.display());
            fail_job(job, FailureKind::AlreadyInFlight, "source already has an active job");
            return;
        }
        Err(e) => {
            fail_job(job, FailureKind::AlreadyInFlight, e.to_string());
            return;
        }
    }

    if let Err(e) = drive(context, job).await {
        tracing::error!("Job {} for {}: {}", job.id, path.display(), e);
        if !job.is_terminal() {
            fail_job(job, FailureKind::EncoderError, e.to_string());
        }
    }

    if let Err(e) = context.claims.release(path.clone()).await {
        tracing::error!("Failed to release claim on {}: {}", path.display(), e);
    }
}

async fn drive(context: &WorkerContext, job: &mut TranscodeJob) -> Result<(), JobStateError> {
    match check_snapshot(&job.source).await {
        Ok(StabilityResult::Stable) => {}
        Ok(StabilityResult::Changed {
            initial_size,
            current_size,
            ..
        }) => {
            tracing::warn!(
                "{} changed since it was catalogued ({} -> {} bytes), leaving it alone",
                job.source.path.display(),
                initial_size,
                current_size
            );
            return job.fail(FailureKind::SourceChanged, "source changed since it was catalogued");
        }
        Err(e) => {
            return job.fail(FailureKind::SourceChanged, format!("source no longer readable: {}", e));
        }
    }

    job.start()?;

    loop {
        let attempt = job.record_attempt()?;
        let request = TranscodeRequest {
            source: job.source.path.clone(),
            artifact_path: job.artifact_path.clone(),
        };

        tracing::info!("Transcoding {} (attempt {})", request.source.display(), attempt);

        let gateway = Arc::clone(&context.gateway);
        let result = match tokio::task::spawn_blocking(move || gateway.transcode(&request)).await {
            Ok(result) => result,
            Err(e) => return job.fail(FailureKind::EncoderError, format!("encoder task failed: {}", e)),
        };

        let Some((kind, message)) = result.failure else {
            tracing::info!(
                "Transcoded {} -> {} ({} bytes)",
                job.source.path.display(),
                result.artifact_path.display(),
                result.artifact_size
            );
            return job.succeed(result.artifact_size);
        };

        let stopping = context.stop.load(Ordering::SeqCst);
        if !stopping && context.retry.should_retry(kind, attempt) {
            tracing::warn!(
                "Attempt {} for {} failed ({}), retrying: {}",
                attempt,
                job.source.path.display(),
                kind,
                message
            );
            continue;
        }

        for line in &result.log {
            tracing::debug!("encoder: {}", line);
        }
        return job.fail(kind, message);
    }
}
