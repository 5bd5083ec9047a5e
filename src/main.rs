//! Database Backup Tool
//!
//! Dumps MySQL, PostgreSQL and MongoDB databases with their native dump tools,
//! optionally zips the result and stores it locally or in S3, once or on a cron schedule.

// db-backup-cli/src/main.rs
mod backup;
mod cli;
mod config;
mod errors;
mod restore;
mod schedule;
mod storage;
mod utils;

use anyhow::{Context, Result};
use clap::Parser;
use cli::{Cli, Command};
use config::AppConfig;
use std::io::Write;
use std::process::ExitCode;

/// Main entry point for the backup tool
#[tokio::main]
async fn main() -> ExitCode {
    let result = run_app().await;
    if report(&mut std::io::stdout(), &result) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}

/// Writes the final status line (success or error) to `out`. Returns whether the run succeeded.
fn report(out: &mut impl Write, result: &Result<()>) -> bool {
    // A closed stdout leaves nothing else to report to.
    match result {
        Ok(_) => {
            let _ = writeln!(out, "✅ Operation completed successfully.");
            true
        }
        Err(e) => {
            let _ = writeln!(out, "❌ Error: {:#}", e);
            false
        }
    }
}

async fn run_app() -> Result<()> {
    let cli = Cli::parse();
    // Credentials may live in a .env file next to the config.
    dotenv::dotenv().ok();
    utils::setup_logging(cli.verbose, cli.log_file.as_deref())?;

    let app_config = AppConfig::load(cli.config.as_deref())
        .context("Failed to load application configuration")?;

    match &cli.command {
        Command::Backup(args) => {
            println!("🚀 Starting Backup Process...");
            let result = backup::run_backup_flow(&app_config, args).await?;
            println!(
                "Backup successful! Stored at {}",
                result.stored_at.as_deref().unwrap_or("(unknown)")
            );
        }
        Command::Restore => {
            println!("🔄 Starting Restore Process...");
            restore::run_restore_flow().await?;
        }
        Command::Schedule(args) => {
            println!("⏰ Starting Scheduler...");
            schedule::run_schedule_flow(&app_config, args).await?;
        }
        Command::History(args) => {
            backup::run_history_flow(&app_config, args).await?;
        }
    }
    Ok(())
}
