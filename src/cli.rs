// db-backup-cli/src/cli.rs
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "db-backup-cli",
    version,
    about = "A CLI utility for database backups",
    long_about = "CLI tool for backing up databases with local and cloud storage, and scheduling backups."
)]
pub struct Cli {
    /// JSON config file. Defaults to ./config.json when present.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable debug logging (RUST_LOG takes precedence).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Append detailed logs to this file instead of stderr.
    #[arg(long, global = true, env = "DB_BACKUP_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Performs a database backup
    Backup(BackupArgs),
    /// Restores a database from a backup (not implemented)
    Restore,
    /// Schedules automatic backups using predefined schedules or custom cron expressions
    Schedule(ScheduleArgs),
    /// Shows recorded backup runs
    History(HistoryArgs),
}

#[derive(Args, Debug, Clone, Default)]
pub struct BackupArgs {
    /// Database type (mysql, postgres, mongodb)
    #[arg(long = "db-type")]
    pub db_type: String,

    /// Database host
    #[arg(long)]
    pub host: Option<String>,

    /// Database port
    #[arg(long)]
    pub port: Option<u16>,

    /// Database user
    #[arg(long)]
    pub user: Option<String>,

    /// Database password
    #[arg(long)]
    pub password: Option<String>,

    /// Database name
    #[arg(long = "db-name")]
    pub db_name: String,

    /// Backup type (full, incremental, differential)
    #[arg(long = "backup-type", default_value = "full")]
    pub backup_type: String,

    /// Storage type (local, aws, gcp, azure)
    #[arg(long, default_value = "local")]
    pub storage: String,

    /// Compress backup file
    #[arg(long)]
    pub compress: bool,

    /// Directory where dump artifacts are written
    #[arg(long)]
    pub work_dir: Option<PathBuf>,

    /// Destination directory for local storage
    #[arg(long)]
    pub local_dir: Option<PathBuf>,

    /// Seconds before a running dump tool is killed
    #[arg(long)]
    pub dump_timeout: Option<u64>,

    /// Do not open a test connection before dumping
    #[arg(long)]
    pub skip_connection_check: bool,

    /// Append a JSON line per run to this file
    #[arg(long)]
    pub history_file: Option<PathBuf>,
}

#[derive(Args, Debug, Clone)]
pub struct ScheduleArgs {
    /// Type of schedule (daily, weekly, monthly, custom)
    #[arg(long = "schedule-type")]
    pub schedule_type: String,

    /// Cron expression for custom scheduling (required if schedule-type is 'custom')
    #[arg(long)]
    pub cron: Option<String>,

    #[command(flatten)]
    pub backup: BackupArgs,
}

#[derive(Args, Debug, Clone)]
pub struct HistoryArgs {
    /// Run history file written by --history-file
    #[arg(long)]
    pub history_file: Option<PathBuf>,

    /// Number of most recent runs to show
    #[arg(long, default_value_t = 20)]
    pub limit: usize,
}
