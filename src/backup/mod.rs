pub(crate) mod archive;
pub(crate) mod connection;
pub(crate) mod db_dump;
pub(crate) mod history;
pub(crate) mod logic;
pub(crate) mod request;

use anyhow::{Context, Result};

use crate::cli::{BackupArgs, HistoryArgs};
use crate::config::{
    AppConfig, process_env, resolve_job_settings, resolve_request, resolve_storage_settings,
};
use crate::errors::BackupError;
use history::{RunHistory, RunResult, Trigger};
use logic::BackupJob;

/// Builds a job from CLI flags and the loaded config.
pub fn build_job(app_config: &AppConfig, args: &BackupArgs) -> Result<BackupJob> {
    let request = resolve_request(args, app_config, &process_env)
        .context("Invalid backup parameters")?;
    let settings = resolve_job_settings(args, app_config);
    let storage_settings = resolve_storage_settings(args, app_config);
    Ok(BackupJob::new(request, &settings, &storage_settings))
}

/// Public entry point for a one-off backup. Runs on the calling task until done.
pub async fn run_backup_flow(app_config: &AppConfig, args: &BackupArgs) -> Result<RunResult> {
    let job = build_job(app_config, args)?;
    let outcome = job.run(Trigger::Manual).await;
    tracing::debug!("Backup run ended in state {:?}", outcome.final_state());
    outcome.into_result().context("Backup process failed")
}

/// Prints the most recent recorded runs.
pub async fn run_history_flow(app_config: &AppConfig, args: &HistoryArgs) -> Result<()> {
    let path = args
        .history_file
        .clone()
        .or_else(|| app_config.raw_json_config.history_file.clone())
        .ok_or_else(|| {
            BackupError::Config("no history file given; pass --history-file or set history_file in the config".to_string())
        })?;
    let runs = RunHistory::new(path.clone()).load().await?;
    if runs.is_empty() {
        println!("No backup runs recorded in {}", path.display());
        return Ok(());
    }

    let skip = runs.len().saturating_sub(args.limit);
    for run in &runs[skip..] {
        let status = if run.success { "✅" } else { "❌" };
        let detail = match (&run.stored_at, &run.error_message) {
            (Some(location), _) => location.as_str(),
            (None, Some(message)) => message.as_str(),
            (None, None) => "",
        };
        println!(
            "{} {} {:<9} {}:{} ({} ms) {}",
            status,
            run.timestamp.with_timezone(&chrono::Local).format("%Y-%m-%d %H:%M:%S"),
            format!("{:?}", run.trigger).to_lowercase(),
            run.db_kind,
            run.db_name,
            run.duration_ms,
            detail
        );
    }
    Ok(())
}
