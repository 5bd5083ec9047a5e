// db-backup-cli/src/backup/db_dump.rs
use async_trait::async_trait;
use std::ffi::OsString;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::backup::request::{BackupArtifact, BackupRequest, BackupType, DbKind};
use crate::errors::{BackupError, Result};
use crate::utils::find_executable;

/// A fully prepared invocation of an external dump tool.
#[derive(Clone)]
pub struct DumpCommand {
    pub db_kind: DbKind,
    pub program: &'static str,
    pub args: Vec<OsString>,
    /// Extra environment for the child only. Carries passwords for mysqldump/pg_dump.
    pub envs: Vec<(String, String)>,
    pub artifact: BackupArtifact,
}

impl DumpCommand {
    /// Arguments with secrets masked, safe for logging.
    pub fn redacted_args(&self) -> Vec<String> {
        let mut redacted = Vec::with_capacity(self.args.len());
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                redacted.push("***".to_string());
                mask_next = false;
                continue;
            }
            let arg = arg.to_string_lossy().into_owned();
            mask_next = arg == "--password";
            redacted.push(arg);
        }
        redacted
    }
}

impl fmt::Debug for DumpCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpCommand")
            .field("db_kind", &self.db_kind)
            .field("program", &self.program)
            .field("args", &self.redacted_args())
            .field("envs", &self.envs.iter().map(|(k, _)| k.as_str()).collect::<Vec<_>>())
            .field("artifact", &self.artifact)
            .finish()
    }
}

/// Builds the dump tool invocation for a request. Output lands in `work_dir`.
pub fn build_dump_command(request: &BackupRequest, work_dir: &Path) -> DumpCommand {
    let conn = &request.connection;
    let artifact_path = work_dir.join(request.artifact_name());
    let mut args: Vec<OsString> = Vec::new();
    let mut envs = Vec::new();

    match request.db_kind {
        DbKind::Mysql => {
            args.push("-h".into());
            args.push(conn.host.clone().into());
            args.push("-P".into());
            args.push(conn.port.to_string().into());
            if let Some(user) = &conn.user {
                args.push("-u".into());
                args.push(user.clone().into());
            }
            let mut result_file = OsString::from("--result-file=");
            result_file.push(&artifact_path);
            args.push(result_file);
            args.push(conn.db_name.clone().into());
            if let Some(password) = &conn.password {
                envs.push(("MYSQL_PWD".to_string(), password.clone()));
            }
        }
        DbKind::Postgres => {
            args.push("-h".into());
            args.push(conn.host.clone().into());
            args.push("-p".into());
            args.push(conn.port.to_string().into());
            if let Some(user) = &conn.user {
                args.push("-U".into());
                args.push(user.clone().into());
            }
            args.push("-d".into());
            args.push(conn.db_name.clone().into());
            args.push("-f".into());
            args.push(artifact_path.clone().into());
            if let Some(password) = &conn.password {
                envs.push(("PGPASSWORD".to_string(), password.clone()));
            }
        }
        DbKind::Mongodb => {
            args.push("--host".into());
            args.push(conn.host.clone().into());
            args.push("--port".into());
            args.push(conn.port.to_string().into());
            if let Some(user) = &conn.user {
                args.push("--username".into());
                args.push(user.clone().into());
            }
            if let Some(password) = &conn.password {
                args.push("--password".into());
                args.push(password.clone().into());
                args.push("--authenticationDatabase".into());
                args.push("admin".into());
            }
            args.push("--db".into());
            args.push(conn.db_name.clone().into());
            args.push("--out".into());
            args.push(artifact_path.clone().into());
        }
    }

    let artifact = if request.db_kind.dumps_to_directory() {
        BackupArtifact::directory(artifact_path)
    } else {
        BackupArtifact::file(artifact_path)
    };

    DumpCommand {
        db_kind: request.db_kind,
        program: request.db_kind.dump_program(),
        args,
        envs,
        artifact,
    }
}

/// Executes dump commands. The process-backed runner is used outside of tests.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &DumpCommand, limit: Duration) -> Result<()>;
}

/// Runs the dump tool as a child process, killing it when `limit` elapses.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessRunner;

#[async_trait]
impl CommandRunner for ProcessRunner {
    async fn run(&self, command: &DumpCommand, limit: Duration) -> Result<()> {
        let program_path = find_executable(command.program).map_err(|e| BackupError::DumpFailed {
            db_kind: command.db_kind,
            message: format!("{:#}", e),
        })?;
        debug!(
            program = %program_path.display(),
            args = ?command.redacted_args(),
            "Spawning dump tool"
        );

        let mut child = Command::new(&program_path);
        child
            .args(&command.args)
            .envs(command.envs.iter().map(|(k, v)| (k, v)))
            .stdin(Stdio::null())
            .kill_on_drop(true);

        let output = match timeout(limit, child.output()).await {
            Ok(result) => result.map_err(|e| BackupError::DumpFailed {
                db_kind: command.db_kind,
                message: format!("failed to execute {}: {}", command.program, e),
            })?,
            Err(_) => {
                return Err(BackupError::DumpTimedOut {
                    db_kind: command.db_kind,
                    seconds: limit.as_secs(),
                });
            }
        };

        if !output.status.success() {
            return Err(BackupError::DumpFailed {
                db_kind: command.db_kind,
                message: format!(
                    "{} failed with status: {}\nStderr: {}",
                    command.program,
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                ),
            });
        }
        Ok(())
    }
}

/// Produces one dump artifact per call. Never retries.
pub struct DumpInvoker {
    runner: Arc<dyn CommandRunner>,
    work_dir: PathBuf,
    timeout: Duration,
}

impl DumpInvoker {
    pub fn new(runner: Arc<dyn CommandRunner>, work_dir: PathBuf, timeout: Duration) -> Self {
        Self { runner, work_dir, timeout }
    }

    pub async fn invoke(&self, request: &BackupRequest) -> Result<BackupArtifact> {
        let dump_failed = |message: String| BackupError::DumpFailed { db_kind: request.db_kind, message };

        tokio::fs::create_dir_all(&self.work_dir).await.map_err(|e| {
            dump_failed(format!("failed to create work directory {}: {}", self.work_dir.display(), e))
        })?;

        let command = build_dump_command(request, &self.work_dir);
        remove_stale_artifact(&command.artifact)
            .await
            .map_err(|e| dump_failed(format!("failed to remove previous artifact: {}", e)))?;

        if request.backup_type != BackupType::Full {
            warn!(
                "{} has no {} mode, taking a full dump instead",
                command.program, request.backup_type
            );
        }
        info!(
            "Dumping {} database {} with {} into {}",
            request.db_kind,
            request.connection.db_name,
            command.program,
            command.artifact.path.display()
        );

        self.runner.run(&command, self.timeout).await?;

        let produced = if command.artifact.is_directory {
            command.artifact.path.is_dir()
        } else {
            command.artifact.path.is_file()
        };
        if !produced {
            return Err(dump_failed(format!(
                "{} finished but did not produce {}",
                command.program,
                command.artifact.path.display()
            )));
        }

        info!("✓ {} dump written to {}", request.db_kind, command.artifact.path.display());
        Ok(command.artifact)
    }
}

async fn remove_stale_artifact(artifact: &BackupArtifact) -> std::io::Result<()> {
    let path = &artifact.path;
    if path.is_dir() {
        debug!("Removing previous dump directory {}", path.display());
        tokio::fs::remove_dir_all(path).await
    } else if path.exists() {
        debug!("Removing previous dump file {}", path.display());
        tokio::fs::remove_file(path).await
    } else {
        Ok(())
    }
}
