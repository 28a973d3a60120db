use std::str::FromStr;
use std::time::Duration;

use crate::errors::AppError;
use crate::models::ScheduleTime;

#[derive(Debug, Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
}

#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub schedule_times: Vec<ScheduleTime>,
    pub run_on_startup: bool,
    pub tick_interval: Duration,
    pub provider_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            schedule_times: Vec::new(),
            run_on_startup: false,
            tick_interval: Duration::from_secs(60),
            provider_timeout: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerPoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub job_delay: Duration,
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            workers: 3,
            queue_capacity: 100,
            job_delay: Duration::from_millis(2000),
        }
    }
}

/// Upper bound for both sync windows, roughly ten years.
pub const MAX_SYNC_WINDOW_DAYS: i64 = 3650;

#[derive(Debug, Clone)]
pub struct SyncWindowConfig {
    pub incremental_days: i64,
    pub full_history_days: i64,
}

impl Default for SyncWindowConfig {
    fn default() -> Self {
        Self {
            incremental_days: 7,
            full_history_days: 365,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub database_max_connections: u32,
    pub provider_base_url: String,
    pub provider_client_id: String,
    pub provider_client_secret: String,
    pub provider_max_concurrent: usize,
    pub provider_requests_per_minute: u32,
    pub scheduler: SchedulerConfig,
    pub pool: WorkerPoolConfig,
    pub sync_window: SyncWindowConfig,
    pub reconciliation_workers: usize,
    pub shutdown_timeout: Duration,
    pub smtp: Option<SmtpConfig>,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, AppError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from any key lookup; `from_env` passes the process environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, AppError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| AppError::Validation(format!("{} must be set", key)))
        };

        let schedule_times = ScheduleTime::parse_list(
            &lookup("SYNC_SCHEDULE_TIMES").unwrap_or_else(|| "06:00,18:00".to_string()),
        )
        .map_err(|e| AppError::Validation(format!("SYNC_SCHEDULE_TIMES: {}", e)))?;

        let scheduler = SchedulerConfig {
            schedule_times,
            run_on_startup: parse_or(&lookup, "SYNC_RUN_ON_STARTUP", false)?,
            ..SchedulerConfig::default()
        };

        let pool = WorkerPoolConfig {
            workers: parse_or(&lookup, "SYNC_WORKERS", 3usize)?,
            queue_capacity: parse_or(&lookup, "SYNC_QUEUE_CAPACITY", 100usize)?,
            job_delay: Duration::from_millis(parse_or(&lookup, "SYNC_JOB_DELAY_MS", 2000u64)?),
        };
        if pool.workers == 0 || pool.queue_capacity == 0 {
            return Err(AppError::Validation(
                "SYNC_WORKERS and SYNC_QUEUE_CAPACITY must be greater than zero".to_string(),
            ));
        }

        let sync_window = SyncWindowConfig {
            incremental_days: parse_or(&lookup, "SYNC_INCREMENTAL_DAYS", 7i64)?,
            full_history_days: parse_or(&lookup, "SYNC_FULL_HISTORY_DAYS", 365i64)?,
        };
        if sync_window.incremental_days <= 0
            || sync_window.full_history_days < sync_window.incremental_days
            || sync_window.full_history_days > MAX_SYNC_WINDOW_DAYS
        {
            return Err(AppError::Validation(format!(
                "SYNC_FULL_HISTORY_DAYS must be between SYNC_INCREMENTAL_DAYS (> 0) and {}",
                MAX_SYNC_WINDOW_DAYS
            )));
        }

        let smtp = match lookup("SMTP_HOST").filter(|h| !h.trim().is_empty()) {
            Some(host) => Some(SmtpConfig {
                host,
                port: parse_or(&lookup, "SMTP_PORT", 587u16)?,
                username: required("SMTP_USERNAME")?,
                password: required("SMTP_PASSWORD")?,
                from_email: required("SMTP_FROM_EMAIL")?,
                from_name: lookup("SMTP_FROM_NAME").unwrap_or_else(|| "Finsync".to_string()),
            }),
            None => None,
        };

        Ok(Self {
            database_url: required("DATABASE_URL")?,
            database_max_connections: parse_or(&lookup, "DATABASE_MAX_CONNECTIONS", 10u32)?,
            provider_base_url: lookup("PROVIDER_BASE_URL")
                .unwrap_or_else(|| "https://api.pluggy.ai".to_string()),
            provider_client_id: required("PROVIDER_CLIENT_ID")?,
            provider_client_secret: required("PROVIDER_CLIENT_SECRET")?,
            provider_max_concurrent: parse_or(&lookup, "PROVIDER_MAX_CONCURRENT", 5usize)?,
            provider_requests_per_minute: parse_or(&lookup, "PROVIDER_REQUESTS_PER_MINUTE", 120u32)?,
            scheduler,
            pool,
            sync_window,
            reconciliation_workers: parse_or(&lookup, "RECONCILIATION_WORKERS", 4usize)?,
            shutdown_timeout: Duration::from_secs(parse_or(&lookup, "SYNC_SHUTDOWN_TIMEOUT_SECS", 30u64)?),
            smtp,
        })
    }
}

fn parse_or<F, T>(lookup: &F, key: &str, default: T) -> Result<T, AppError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        Some(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse()
            .map_err(|_| AppError::Validation(format!("{} has an invalid value: '{}'", key, raw))),
        _ => Ok(default),
    }
}
