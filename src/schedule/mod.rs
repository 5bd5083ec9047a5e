// db-backup-cli/src/schedule/mod.rs
//! Cron-driven repetition of backup jobs.
//!
//! Each registered task gets its own timer loop. A firing runs the task to
//! completion before the next fire time is computed, so one task never
//! overlaps with itself: fire times that pass while a run is still going are
//! skipped, not queued.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Local};
use croner::Cron;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::backup;
use crate::backup::history::{RunResult, Trigger};
use crate::backup::logic::BackupJob;
use crate::cli::ScheduleArgs;
use crate::config::AppConfig;
use crate::errors::BackupError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleKind {
    Daily,
    Weekly,
    Monthly,
    Custom,
}

impl ScheduleKind {
    /// Fixed expression for the presets; `None` for custom schedules.
    pub fn preset_expression(&self) -> Option<&'static str> {
        match self {
            ScheduleKind::Daily => Some("0 0 * * *"),
            ScheduleKind::Weekly => Some("0 0 * * 0"),
            ScheduleKind::Monthly => Some("0 0 1 * *"),
            ScheduleKind::Custom => None,
        }
    }
}

impl FromStr for ScheduleKind {
    type Err = BackupError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "daily" => Ok(ScheduleKind::Daily),
            "weekly" => Ok(ScheduleKind::Weekly),
            "monthly" => Ok(ScheduleKind::Monthly),
            "custom" => Ok(ScheduleKind::Custom),
            other => Err(BackupError::ScheduleInvalid(format!(
                "unknown schedule type '{}', use one of: daily, weekly, monthly, custom",
                other
            ))),
        }
    }
}

/// A validated five-field cron schedule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduleSpec {
    pub kind: ScheduleKind,
    pub cron_expression: String,
}

impl ScheduleSpec {
    /// Resolves a schedule type and optional custom expression, rejecting anything unparsable.
    pub fn resolve(kind: &str, custom_expression: Option<&str>) -> std::result::Result<Self, BackupError> {
        let kind: ScheduleKind = kind.parse()?;
        let cron_expression = match kind.preset_expression() {
            Some(preset) => {
                if custom_expression.is_some_and(|e| !e.trim().is_empty()) {
                    warn!("--cron is ignored for {:?} schedules, using [{}]", kind, preset);
                }
                preset.to_string()
            }
            None => {
                let expression = custom_expression.map(str::trim).unwrap_or_default();
                if expression.is_empty() {
                    return Err(BackupError::ScheduleInvalid(
                        "custom scheduling requires a cron expression via --cron".to_string(),
                    ));
                }
                expression.to_string()
            }
        };

        let spec = Self { kind, cron_expression };
        spec.cron()?;
        Ok(spec)
    }

    fn cron(&self) -> std::result::Result<Cron, BackupError> {
        Cron::new(&self.cron_expression).parse().map_err(|e| {
            BackupError::ScheduleInvalid(format!("invalid cron expression [{}]: {}", self.cron_expression, e))
        })
    }

    /// First fire time strictly after `after`.
    pub fn next_after(&self, after: &DateTime<Local>) -> std::result::Result<DateTime<Local>, BackupError> {
        self.cron()?.find_next_occurrence(after, false).map_err(|e| {
            BackupError::ScheduleInvalid(format!(
                "no upcoming time for cron expression [{}]: {}",
                self.cron_expression, e
            ))
        })
    }
}

impl fmt::Display for ScheduleSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cron_expression)
    }
}

/// Something the scheduler can fire.
#[async_trait]
pub trait ScheduledTask: Send + Sync {
    fn name(&self) -> String;
    async fn run_once(&self) -> RunResult;
}

#[async_trait]
impl ScheduledTask for BackupJob {
    fn name(&self) -> String {
        format!("{}:{}", self.request().db_kind, self.request().connection.db_name)
    }

    async fn run_once(&self) -> RunResult {
        self.run(Trigger::Scheduled).await.result
    }
}

/// Source of the current local time used to compute fire times.
pub type Clock = Arc<dyn Fn() -> DateTime<Local> + Send + Sync>;

pub struct Scheduler {
    cancel: CancellationToken,
    clock: Clock,
    entries: Vec<(ScheduleSpec, Arc<dyn ScheduledTask>)>,
}

impl Scheduler {
    pub fn new(cancel: CancellationToken) -> Self {
        Self::with_clock(cancel, Arc::new(Local::now))
    }

    pub fn with_clock(cancel: CancellationToken, clock: Clock) -> Self {
        Self { cancel, clock, entries: Vec::new() }
    }

    /// Adds a recurring task. Fails if the schedule never fires.
    pub fn register_recurring(
        &mut self,
        spec: ScheduleSpec,
        task: Arc<dyn ScheduledTask>,
    ) -> std::result::Result<(), BackupError> {
        let first = spec.next_after(&(self.clock)())?;
        info!("Registered {} with cron expression [{}], first run at {}", task.name(), spec, first);
        self.entries.push((spec, task));
        Ok(())
    }

    /// Runs every registered task until the cancellation token fires.
    /// In-flight runs are allowed to finish before this returns.
    pub async fn run(self) -> Result<()> {
        if self.entries.is_empty() {
            anyhow::bail!("No recurring tasks registered");
        }
        let mut loops = JoinSet::new();
        for (spec, task) in self.entries {
            loops.spawn(run_entry(spec, task, self.clock.clone(), self.cancel.clone()));
        }
        while let Some(joined) = loops.join_next().await {
            joined.context("Scheduler loop panicked")?;
        }
        info!("Scheduler stopped");
        Ok(())
    }
}

async fn run_entry(spec: ScheduleSpec, task: Arc<dyn ScheduledTask>, clock: Clock, cancel: CancellationToken) {
    let name = task.name();
    let mut last_fire: Option<DateTime<Local>> = None;

    loop {
        let now = clock();
        // Never fire the same slot twice, even if the wall clock lags the timer.
        let from = match last_fire {
            Some(previous) if previous > now => previous,
            _ => now,
        };
        let next = match spec.next_after(&from) {
            Ok(next) => next,
            Err(e) => {
                error!("Stopping schedule for {}: {}", name, e);
                return;
            }
        };
        if let Some(previous) = last_fire {
            if spec.next_after(&previous).is_ok_and(|missed| missed < next && missed <= now) {
                warn!("Skipped firing(s) of {} while the previous run was in progress", name);
            }
        }

        let wait = (next - now).to_std().unwrap_or(Duration::ZERO);
        info!("Next backup of {} at {}", name, next);
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(wait) => {}
        }

        last_fire = Some(next);
        let result = task.run_once().await;
        if result.success {
            info!(
                "Scheduled backup of {} completed successfully at {}",
                name,
                result.timestamp.with_timezone(&Local)
            );
        } else {
            error!(
                "Error during scheduled backup of {}: {}",
                name,
                result.error_message.as_deref().unwrap_or("unknown error")
            );
        }

        if cancel.is_cancelled() {
            break;
        }
    }
    info!("Schedule for {} cancelled", name);
}

/// Resolves when the process is asked to stop (Ctrl-C, or SIGTERM on unix).
async fn shutdown_signal() -> Result<()> {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};
        let mut terminate = signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;
        tokio::select! {
            result = tokio::signal::ctrl_c() => result.context("Failed to listen for Ctrl-C")?,
            _ = terminate.recv() => {}
        }
    }
    #[cfg(not(unix))]
    tokio::signal::ctrl_c().await.context("Failed to listen for Ctrl-C")?;
    Ok(())
}

/// Public entry point for the schedule command. Blocks until shutdown is requested.
pub async fn run_schedule_flow(app_config: &AppConfig, args: &ScheduleArgs) -> Result<()> {
    let spec = ScheduleSpec::resolve(&args.schedule_type, args.cron.as_deref())?;
    let job = backup::build_job(app_config, &args.backup)?;

    let cancel = CancellationToken::new();
    let mut scheduler = Scheduler::new(cancel.clone());
    scheduler.register_recurring(spec.clone(), Arc::new(job))?;

    println!("Scheduled backup with cron expression [{}]. Waiting for next run...", spec);
    let handle = tokio::spawn(scheduler.run());

    shutdown_signal().await?;
    println!("Shutdown requested, waiting for any running backup to finish...");
    cancel.cancel();
    handle.await.context("Scheduler task failed")?
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::request::DbKind;
    use chrono::{TimeZone, Timelike, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct CountingTask {
        runs: AtomicUsize,
        cancel_after: usize,
        cancel: CancellationToken,
        succeed: bool,
    }

    #[async_trait]
    impl ScheduledTask for CountingTask {
        fn name(&self) -> String {
            "counting".to_string()
        }

        async fn run_once(&self) -> RunResult {
            let runs = self.runs.fetch_add(1, Ordering::SeqCst) + 1;
            if runs >= self.cancel_after {
                self.cancel.cancel();
            }
            RunResult {
                run_id: Uuid::new_v4(),
                trigger: Trigger::Scheduled,
                db_kind: DbKind::Postgres,
                db_name: "shop".to_string(),
                success: self.succeed,
                error_kind: (!self.succeed).then(|| "DumpFailed".to_string()),
                error_message: (!self.succeed).then(|| "pg_dump failed".to_string()),
                stored_at: None,
                timestamp: Utc::now(),
                duration_ms: 1,
            }
        }
    }

    fn counting(cancel: &CancellationToken, cancel_after: usize, succeed: bool) -> Arc<CountingTask> {
        Arc::new(CountingTask { runs: AtomicUsize::new(0), cancel_after, cancel: cancel.clone(), succeed })
    }

    #[test]
    fn test_presets() -> anyhow::Result<()> {
        assert_eq!(ScheduleSpec::resolve("daily", None)?.cron_expression, "0 0 * * *");
        assert_eq!(ScheduleSpec::resolve("weekly", None)?.cron_expression, "0 0 * * 0");
        assert_eq!(ScheduleSpec::resolve("monthly", None)?.cron_expression, "0 0 1 * *");
        // A stray --cron does not override a preset.
        assert_eq!(ScheduleSpec::resolve("daily", Some("*/5 * * * *"))?.cron_expression, "0 0 * * *");
        Ok(())
    }

    #[test]
    fn test_custom_requires_valid_expression() -> anyhow::Result<()> {
        let spec = ScheduleSpec::resolve("custom", Some(" 30 2 * * 1-5 "))?;
        assert_eq!(spec.kind, ScheduleKind::Custom);
        assert_eq!(spec.cron_expression, "30 2 * * 1-5");

        for bad in [None, Some(""), Some("   "), Some("not a cron"), Some("61 * * * *")] {
            assert!(
                matches!(ScheduleSpec::resolve("custom", bad), Err(BackupError::ScheduleInvalid(_))),
                "{:?} should be rejected",
                bad
            );
        }
        Ok(())
    }

    #[test]
    fn test_unknown_kind() {
        assert!(matches!(ScheduleSpec::resolve("hourly", None), Err(BackupError::ScheduleInvalid(_))));
    }

    #[test]
    fn test_next_after() -> anyhow::Result<()> {
        let spec = ScheduleSpec::resolve("daily", None)?;
        let start = Local
            .with_ymd_and_hms(2026, 3, 14, 15, 30, 0)
            .single()
            .context("unambiguous local time")?;
        let next = spec.next_after(&start)?;
        assert_eq!((next.hour(), next.minute()), (0, 0));
        assert!(next > start);
        // A fire time is never returned twice.
        assert!(spec.next_after(&next)? > next);
        Ok(())
    }

    #[tokio::test]
    async fn test_invalid_custom_schedule_fails_before_start() -> anyhow::Result<()> {
        let args = ScheduleArgs {
            schedule_type: "custom".to_string(),
            cron: Some(String::new()),
            backup: crate::cli::BackupArgs {
                db_type: "mysql".to_string(),
                db_name: "shop".to_string(),
                ..Default::default()
            },
        };
        let err = run_schedule_flow(&AppConfig::default(), &args).await.unwrap_err();
        assert!(matches!(err.downcast_ref::<BackupError>(), Some(BackupError::ScheduleInvalid(_))));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_repeatedly_until_cancelled() -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let task = counting(&cancel, 3, false);
        let mut scheduler = Scheduler::new(cancel.clone());
        scheduler.register_recurring(ScheduleSpec::resolve("custom", Some("* * * * *"))?, task.clone())?;

        // Failed runs do not stop the loop; the third run cancels it.
        scheduler.run().await?;
        assert_eq!(task.runs.load(Ordering::SeqCst), 3);
        Ok(())
    }

    /// Local clock that starts at `start` and advances with tokio's (paused) timer.
    fn paused_clock(start: DateTime<Local>) -> Clock {
        let anchor = tokio::time::Instant::now();
        Arc::new(move || {
            let elapsed = tokio::time::Instant::now() - anchor;
            start + chrono::Duration::from_std(elapsed).unwrap_or_else(|_| chrono::Duration::zero())
        })
    }

    /// A task whose every run takes `run_time`, recording when runs start and how many overlap.
    struct SlowTask {
        clock: Clock,
        run_time: Duration,
        starts: std::sync::Mutex<Vec<DateTime<Local>>>,
        active: AtomicUsize,
        max_active: AtomicUsize,
        cancel_after: usize,
        cancel: CancellationToken,
    }

    #[async_trait]
    impl ScheduledTask for SlowTask {
        fn name(&self) -> String {
            "slow".to_string()
        }

        async fn run_once(&self) -> RunResult {
            let active = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_active.fetch_max(active, Ordering::SeqCst);
            let runs = {
                let mut starts = self.starts.lock().unwrap();
                starts.push((self.clock)());
                starts.len()
            };
            tokio::time::sleep(self.run_time).await;
            self.active.fetch_sub(1, Ordering::SeqCst);
            if runs >= self.cancel_after {
                self.cancel.cancel();
            }
            RunResult {
                run_id: Uuid::new_v4(),
                trigger: Trigger::Scheduled,
                db_kind: DbKind::Mysql,
                db_name: "shop".to_string(),
                success: true,
                error_kind: None,
                error_message: None,
                stored_at: Some("backups/full/shop_backup.sql".to_string()),
                timestamp: Utc::now(),
                duration_ms: self.run_time.as_millis() as u64,
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_runs_skip_missed_fire_times() -> anyhow::Result<()> {
        let start = Local
            .with_ymd_and_hms(2026, 1, 15, 12, 0, 30)
            .single()
            .context("unambiguous local time")?;
        let clock = paused_clock(start);
        let cancel = CancellationToken::new();
        // Fires every minute, each run takes two and a half minutes.
        let task = Arc::new(SlowTask {
            clock: clock.clone(),
            run_time: Duration::from_secs(150),
            starts: std::sync::Mutex::new(Vec::new()),
            active: AtomicUsize::new(0),
            max_active: AtomicUsize::new(0),
            cancel_after: 3,
            cancel: cancel.clone(),
        });
        let mut scheduler = Scheduler::with_clock(cancel.clone(), clock);
        scheduler.register_recurring(ScheduleSpec::resolve("custom", Some("* * * * *"))?, task.clone())?;
        scheduler.run().await?;

        let starts: Vec<String> = task
            .starts
            .lock()
            .unwrap()
            .iter()
            .map(|t| t.format("%H:%M:%S").to_string())
            .collect();
        // 12:02, 12:03, 12:05 and 12:06 pass during runs and are neither queued nor run.
        assert_eq!(starts, vec!["12:01:00", "12:04:00", "12:07:00"]);
        assert_eq!(task.max_active.load(Ordering::SeqCst), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_while_waiting() -> anyhow::Result<()> {
        let cancel = CancellationToken::new();
        let task = counting(&cancel, usize::MAX, true);
        let mut scheduler = Scheduler::new(cancel.clone());
        scheduler.register_recurring(ScheduleSpec::resolve("monthly", None)?, task.clone())?;

        cancel.cancel();
        scheduler.run().await?;
        assert_eq!(task.runs.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_run_without_tasks_fails() {
        let scheduler = Scheduler::new(CancellationToken::new());
        assert!(scheduler.run().await.is_err());
    }
}
