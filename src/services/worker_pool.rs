//! Bounded worker pool for sync jobs.
//!
//! Jobs go through a bounded channel: `submit` waits while the queue is full
//! instead of dropping work. A fixed number of workers pull from the shared
//! receiver, run one job at a time and pause for the configured delay between
//! jobs to stay gentle with the provider.
//!
//! Two tokens are involved. The pool token (usually a child of the
//! scheduler's) stops workers from picking up new jobs. Jobs themselves get a
//! separate token that is only cancelled when shutdown gives up waiting for
//! them.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::errors::AppError;
use crate::jobs::SyncJob;

#[derive(Debug, Default)]
struct PoolCounters {
    submitted: AtomicUsize,
    completed: AtomicUsize,
    failed: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStats {
    pub submitted: usize,
    pub completed: usize,
    pub failed: usize,
}

pub struct WorkerPool {
    config: WorkerPoolConfig,
    sender: Mutex<Option<mpsc::Sender<SyncJob>>>,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<SyncJob>>>,
    cancel: CancellationToken,
    job_cancel: CancellationToken,
    handles: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
    counters: Arc<PoolCounters>,
}

impl WorkerPool {
    pub fn new(config: WorkerPoolConfig, cancel: CancellationToken) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_capacity.max(1));
        Self {
            config,
            sender: Mutex::new(Some(sender)),
            receiver: Arc::new(tokio::sync::Mutex::new(receiver)),
            cancel,
            job_cancel: CancellationToken::new(),
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            counters: Arc::new(PoolCounters::default()),
        }
    }

    /// Spawns the workers. Calling it again is a no-op.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let workers = self.config.workers.max(1);
        info!(
            "🚀 Starting worker pool: {} workers, queue capacity {}, delay {:?}",
            workers, self.config.queue_capacity, self.config.job_delay
        );

        let mut handles = self.handles.lock();
        for worker_id in 0..workers {
            handles.push(tokio::spawn(run_worker(
                worker_id,
                self.receiver.clone(),
                self.cancel.clone(),
                self.job_cancel.clone(),
                self.config.job_delay,
                self.counters.clone(),
            )));
        }
    }

    /// Queues a job, waiting while the queue is full.
    pub async fn submit(&self, job: SyncJob) -> Result<(), AppError> {
        // Clone so the lock is not held while waiting for queue space.
        let sender = self.sender.lock().clone().ok_or(AppError::PoolClosed)?;
        sender.send(job).await.map_err(|_| AppError::PoolClosed)?;
        self.counters.submitted.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    /// Queues jobs in order. Jobs queued before a failure stay queued.
    pub async fn submit_batch(&self, jobs: Vec<SyncJob>) -> Result<usize, AppError> {
        let total = jobs.len();
        for job in jobs {
            self.submit(job).await?;
        }
        debug!("Queued batch of {} jobs", total);
        Ok(total)
    }

    pub fn is_closed(&self) -> bool {
        self.sender.lock().is_none()
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            submitted: self.counters.submitted.load(Ordering::SeqCst),
            completed: self.counters.completed.load(Ordering::SeqCst),
            failed: self.counters.failed.load(Ordering::SeqCst),
        }
    }

    /// Stops accepting jobs, lets the workers drain the queue and waits up to
    /// `timeout` for them. On timeout the remaining jobs are told to cancel
    /// and left running.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), AppError> {
        info!("🛑 Shutting down worker pool (timeout {:?})", timeout);
        self.sender.lock().take();

        let handles = std::mem::take(&mut *self.handles.lock());
        match tokio::time::timeout(timeout, join_all(handles)).await {
            Ok(results) => {
                for result in results {
                    if let Err(e) = result {
                        error!("Worker task ended abnormally: {}", e);
                    }
                }
                info!("✅ Worker pool stopped: {:?}", self.stats());
                Ok(())
            }
            Err(_) => {
                warn!("⏱️ Worker pool did not drain within {:?}, abandoning running jobs", timeout);
                self.cancel.cancel();
                self.job_cancel.cancel();
                Err(AppError::ShutdownTimeout(timeout))
            }
        }
    }
}

async fn run_worker(
    worker_id: usize,
    receiver: Arc<tokio::sync::Mutex<mpsc::Receiver<SyncJob>>>,
    cancel: CancellationToken,
    job_cancel: CancellationToken,
    delay: Duration,
    counters: Arc<PoolCounters>,
) {
    debug!("Worker {} started", worker_id);

    loop {
        if cancel.is_cancelled() {
            break;
        }

        let next = {
            let mut receiver = receiver.lock().await;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => None,
                job = receiver.recv() => job,
            }
        };
        let Some(job) = next else { break };

        let description = job.description();
        info!("🏃 Worker {} running {}", worker_id, description);
        match job.execute(&job_cancel).await {
            Ok(()) => {
                counters.completed.fetch_add(1, Ordering::SeqCst);
                info!("✅ {} completed", description);
            }
            Err(e) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                error!("❌ {} failed: {}", description, e);
            }
        }
        drop(job);

        if !delay.is_zero() {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    debug!("Worker {} stopped", worker_id);
}
