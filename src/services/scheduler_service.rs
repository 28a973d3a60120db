//! Daily sync scheduler.
//!
//! A loop wakes up once a minute, compares the wall-clock `HH:MM` with the
//! configured trigger times and, on a match, asks the job provider for a
//! batch of jobs that it hands to the worker pool. The provider call runs in
//! its own task so a slow provider or a full queue never delays the next tick.
//!
//! The last fired minute is remembered as `YYYY-MM-DD-HH:MM`, so a delayed or
//! doubled tick inside the same minute fires only once.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Local, NaiveDateTime, Timelike};
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{SchedulerConfig, WorkerPoolConfig};
use crate::errors::AppError;
use crate::jobs::SyncJob;
use crate::services::worker_pool::{PoolStats, WorkerPool};

/// Supplied by the host: decides which jobs run on a trigger. The token is
/// cancelled when the provider overruns its time budget or the scheduler stops.
pub type JobProvider =
    Arc<dyn Fn(CancellationToken) -> BoxFuture<'static, Result<Vec<SyncJob>, AppError>> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Created,
    Started,
    Running,
    ShuttingDown,
    Stopped,
}

pub struct SchedulerService {
    config: SchedulerConfig,
    pool: WorkerPool,
    provider: JobProvider,
    cancel: CancellationToken,
    state: Mutex<SchedulerState>,
    last_fired: Mutex<Option<String>>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl SchedulerService {
    /// `parent` cancels everything, the worker pool included. `shutdown`
    /// only stops the tick loop and then drains the pool.
    pub fn new(
        config: SchedulerConfig,
        pool_config: WorkerPoolConfig,
        provider: JobProvider,
        parent: &CancellationToken,
    ) -> Arc<Self> {
        Arc::new(Self {
            config,
            pool: WorkerPool::new(pool_config, parent.child_token()),
            provider,
            cancel: parent.child_token(),
            state: Mutex::new(SchedulerState::Created),
            last_fired: Mutex::new(None),
            loop_handle: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    pub fn pool_stats(&self) -> PoolStats {
        self.pool.stats()
    }

    pub fn start(self: &Arc<Self>) -> Result<(), AppError> {
        {
            let mut state = self.state.lock();
            if *state != SchedulerState::Created {
                return Err(AppError::Validation(format!("scheduler cannot start from {:?}", *state)));
            }
            *state = SchedulerState::Started;
        }

        let times: Vec<String> = self.config.schedule_times.iter().map(|t| t.to_string()).collect();
        info!("🚀 Starting sync scheduler, daily at [{}]", times.join(", "));

        if self.config.run_on_startup {
            info!("⚡ Running startup sync batch");
            self.spawn_run("startup");
        }

        self.pool.start();

        let this = self.clone();
        *self.loop_handle.lock() = Some(tokio::spawn(async move { this.run_loop().await }));
        *self.state.lock() = SchedulerState::Running;

        if let Some(next) = self.next_scheduled_time() {
            info!("⏰ Next scheduled sync at {}", next.format("%Y-%m-%d %H:%M"));
        }
        Ok(())
    }

    async fn run_loop(self: Arc<Self>) {
        loop {
            let delay = delay_until_next_tick(Local::now().naive_local(), self.config.tick_interval);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(delay) => {
                    self.tick_at(Local::now().naive_local());
                }
            }
        }
        debug!("Scheduler loop stopped");
    }

    /// Evaluates one tick. Returns the handle of the spawned run when `now`
    /// matches a trigger time that has not fired yet in this minute.
    pub fn tick_at(self: &Arc<Self>, now: NaiveDateTime) -> Option<JoinHandle<Result<usize, AppError>>> {
        if !self.config.schedule_times.iter().any(|t| t.matches(&now)) {
            return None;
        }

        let key = now.format("%Y-%m-%d-%H:%M").to_string();
        {
            let mut last = self.last_fired.lock();
            if last.as_deref() == Some(key.as_str()) {
                debug!("Trigger {} already fired", key);
                return None;
            }
            *last = Some(key);
        }

        info!("⏰ Scheduled sync triggered at {:02}:{:02}", now.hour(), now.minute());
        Some(self.spawn_run("schedule"))
    }

    /// Runs the job provider now, outside the schedule.
    pub fn trigger_now(self: &Arc<Self>) -> JoinHandle<Result<usize, AppError>> {
        info!("👆 Manual sync triggered");
        self.spawn_run("manual")
    }

    fn spawn_run(self: &Arc<Self>, reason: &'static str) -> JoinHandle<Result<usize, AppError>> {
        let this = self.clone();
        tokio::spawn(async move {
            let outcome = this.run_jobs(reason).await;
            if let Err(e) = &outcome {
                error!("❌ {} sync run skipped: {}", reason, e);
            }
            outcome
        })
    }

    async fn run_jobs(&self, reason: &str) -> Result<usize, AppError> {
        let budget = self.config.provider_timeout;
        let token = self.cancel.child_token();

        let jobs = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(AppError::Cancelled(format!("{} job listing", reason)));
            }
            listed = tokio::time::timeout(budget, (self.provider)(token.clone())) => match listed {
                Ok(jobs) => jobs?,
                Err(_) => {
                    token.cancel();
                    return Err(AppError::Timeout(budget));
                }
            },
        };

        info!("📋 {} sync run: {} jobs", reason, jobs.len());
        self.pool.submit_batch(jobs).await
    }

    /// Stops the tick loop, then drains the worker pool. Both waits share
    /// the `timeout` budget.
    pub async fn shutdown(&self, timeout: Duration) -> Result<(), AppError> {
        {
            let mut state = self.state.lock();
            match *state {
                SchedulerState::ShuttingDown | SchedulerState::Stopped => return Ok(()),
                _ => *state = SchedulerState::ShuttingDown,
            }
        }

        info!("🛑 Stopping sync scheduler");
        let started = Instant::now();
        self.cancel.cancel();

        let handle = self.loop_handle.lock().take();
        if let Some(handle) = handle {
            if tokio::time::timeout(timeout, handle).await.is_err() {
                warn!("Scheduler loop did not stop within {:?}", timeout);
            }
        }

        let remaining = timeout.saturating_sub(started.elapsed());
        let result = self.pool.shutdown(remaining).await;

        *self.state.lock() = SchedulerState::Stopped;
        info!("✅ Sync scheduler stopped");
        result
    }

    pub fn next_scheduled_time(&self) -> Option<NaiveDateTime> {
        self.next_scheduled_time_after(Local::now().naive_local())
    }

    /// Earliest trigger strictly after `now`, else the first trigger tomorrow.
    pub fn next_scheduled_time_after(&self, now: NaiveDateTime) -> Option<NaiveDateTime> {
        let today = now.date();
        let mut times: Vec<_> = self.config.schedule_times.iter().map(|t| t.to_naive_time()).collect();
        times.sort();

        if let Some(time) = times.iter().find(|t| **t > now.time()) {
            return Some(today.and_time(*time));
        }
        let first = times.first()?;
        today.succ_opt().map(|tomorrow| tomorrow.and_time(*first))
    }
}

fn delay_until_next_tick(now: NaiveDateTime, interval: Duration) -> Duration {
    let interval_ms = (interval.as_millis() as u64).max(1);
    let into_minute_ms = now.second() as u64 * 1_000 + (now.nanosecond() / 1_000_000) as u64 % 1_000;
    Duration::from_millis(interval_ms - into_minute_ms % interval_ms)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::test_support::FakeSyncers;
    use crate::models::ScheduleTime;
    use chrono::NaiveDate;
    use futures::FutureExt;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    fn at(day: u32, hour: u32, minute: u32, second: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2026, 3, day)
            .unwrap()
            .and_hms_opt(hour, minute, second)
            .unwrap()
    }

    fn scheduler_config(times: &str) -> SchedulerConfig {
        SchedulerConfig {
            schedule_times: ScheduleTime::parse_list(times).unwrap(),
            ..SchedulerConfig::default()
        }
    }

    fn pool_config() -> WorkerPoolConfig {
        WorkerPoolConfig {
            workers: 2,
            queue_capacity: 10,
            job_delay: Duration::ZERO,
        }
    }

    /// Provider yielding one user job per call, counting calls.
    fn counting_provider(fakes: &Arc<FakeSyncers>, calls: &Arc<AtomicUsize>) -> JobProvider {
        let ctx = fakes.context();
        let calls = calls.clone();
        Arc::new(move |_cancel: CancellationToken| {
            let ctx = ctx.clone();
            let calls = calls.clone();
            async move {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok::<_, AppError>(vec![ctx.user_job(Uuid::new_v4())])
            }
            .boxed()
        })
    }

    #[tokio::test]
    async fn test_double_tick_in_same_minute_fires_once() {
        let fakes = Arc::new(FakeSyncers::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = SchedulerService::new(
            scheduler_config("09:00"),
            pool_config(),
            counting_provider(&fakes, &calls),
            &CancellationToken::new(),
        );

        let first = scheduler.tick_at(at(10, 9, 0, 0)).expect("first tick fires");
        assert_eq!(first.await.unwrap().unwrap(), 1);
        assert!(scheduler.tick_at(at(10, 9, 0, 0)).is_none());
        assert!(scheduler.tick_at(at(10, 9, 0, 45)).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // Next day the same trigger fires again.
        scheduler.tick_at(at(11, 9, 0, 3)).unwrap().await.unwrap().unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_non_matching_minute_does_nothing() {
        let fakes = Arc::new(FakeSyncers::default());
        let calls = Arc::new(AtomicUsize::new(0));
        let scheduler = SchedulerService::new(
            scheduler_config("09:00"),
            pool_config(),
            counting_provider(&fakes, &calls),
            &CancellationToken::new(),
        );

        assert!(scheduler.tick_at(at(10, 9, 1, 0)).is_none());
        assert!(scheduler.tick_at(at(10, 8, 59, 59)).is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_next_scheduled_time() {
        let fakes = Arc::new(FakeSyncers::default());
        let scheduler = SchedulerService::new(
            scheduler_config("18:00,06:00"),
            pool_config(),
            counting_provider(&fakes, &Arc::new(AtomicUsize::new(0))),
            &CancellationToken::new(),
        );

        assert_eq!(scheduler.next_scheduled_time_after(at(10, 5, 0, 0)), Some(at(10, 6, 0, 0)));
        assert_eq!(scheduler.next_scheduled_time_after(at(10, 10, 0, 0)), Some(at(10, 18, 0, 0)));
        // Strictly after: a trigger at exactly now is not next.
        assert_eq!(scheduler.next_scheduled_time_after(at(10, 18, 0, 0)), Some(at(11, 6, 0, 0)));
        assert_eq!(
            scheduler.next_scheduled_time_after(at(31, 23, 0, 0)),
            NaiveDate::from_ymd_opt(2026, 4, 1).unwrap().and_hms_opt(6, 0, 0)
        );
    }

    #[tokio::test]
    async fn test_empty_schedule_has_no_next_time() {
        let fakes = Arc::new(FakeSyncers::default());
        let scheduler = SchedulerService::new(
            SchedulerConfig::default(),
            pool_config(),
            counting_provider(&fakes, &Arc::new(AtomicUsize::new(0))),
            &CancellationToken::new(),
        );
        assert!(scheduler.next_scheduled_time_after(at(10, 5, 0, 0)).is_none());
    }

    #[tokio::test]
    async fn test_provider_error_skips_the_run() {
        let provider: JobProvider = Arc::new(|_cancel: CancellationToken| {
            async { Err::<Vec<SyncJob>, _>(AppError::External("database unavailable".into())) }.boxed()
        });
        let scheduler = SchedulerService::new(
            scheduler_config("09:00"),
            pool_config(),
            provider,
            &CancellationToken::new(),
        );

        let result = scheduler.tick_at(at(10, 9, 0, 0)).unwrap().await.unwrap();
        assert!(matches!(result, Err(AppError::External(_))));
        assert_eq!(scheduler.pool_stats().submitted, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_provider_times_out_and_is_cancelled() {
        let provider: JobProvider = Arc::new(|cancel: CancellationToken| {
            async move {
                cancel.cancelled().await;
                Ok::<Vec<SyncJob>, AppError>(Vec::new())
            }
            .boxed()
        });
        let scheduler = SchedulerService::new(
            scheduler_config("09:00"),
            pool_config(),
            provider,
            &CancellationToken::new(),
        );

        let result = scheduler.trigger_now().await.unwrap();
        assert!(matches!(result, Err(AppError::Timeout(d)) if d == Duration::from_secs(300)));
    }

    #[tokio::test]
    async fn test_lifecycle_with_startup_run_and_manual_trigger() {
        let fakes = Arc::new(FakeSyncers::default());
        let calls = Arc::new(AtomicUsize::new(0));
        // No trigger times, so only the startup and manual runs fire.
        let config = SchedulerConfig {
            run_on_startup: true,
            ..SchedulerConfig::default()
        };
        let scheduler = SchedulerService::new(
            config,
            pool_config(),
            counting_provider(&fakes, &calls),
            &CancellationToken::new(),
        );
        assert_eq!(scheduler.state(), SchedulerState::Created);

        scheduler.start().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);
        assert!(scheduler.start().is_err());

        scheduler.trigger_now().await.unwrap().unwrap();
        // Let the startup run finish submitting as well.
        while calls.load(Ordering::SeqCst) < 2 || scheduler.pool_stats().submitted < 2 {
            tokio::task::yield_now().await;
        }

        scheduler.shutdown(Duration::from_secs(5)).await.unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert_eq!(fakes.calls(), (2, 2, 2));
        assert_eq!(scheduler.pool_stats().completed, 2);

        // Second shutdown is a no-op.
        scheduler.shutdown(Duration::from_secs(1)).await.unwrap();
    }

    #[test]
    fn test_delay_until_next_tick_aligns_to_minute() {
        let minute = Duration::from_secs(60);
        assert_eq!(delay_until_next_tick(at(10, 9, 0, 0), minute), minute);
        assert_eq!(delay_until_next_tick(at(10, 9, 0, 45), minute), Duration::from_secs(15));
    }
}
