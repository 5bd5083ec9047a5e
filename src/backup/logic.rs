// db-backup-cli/src/backup/logic.rs
use chrono::Utc;
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::backup::archive::compress_artifact;
use crate::backup::connection::{ConnectionProbe, NetworkProbe, ParamsOnlyProbe};
use crate::backup::db_dump::{CommandRunner, DumpInvoker, ProcessRunner};
use crate::backup::history::{RunHistory, RunResult, Trigger};
use crate::backup::request::{BackupArtifact, BackupRequest};
use crate::config::{JobSettings, StorageSettings};
use crate::errors::{BackupError, Result};
use crate::storage::{Storage, build_storage};

/// Stages a backup run moves through. `Done` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobState {
    Idle,
    Connecting,
    Dumping,
    Compressing,
    Storing,
    Done,
    Failed,
}

/// Everything a caller learns about one run.
#[derive(Debug)]
pub struct JobOutcome {
    pub result: RunResult,
    /// Every state entered, starting with `Idle` and ending in a terminal state.
    pub states: Vec<JobState>,
    pub error: Option<BackupError>,
}

impl JobOutcome {
    pub fn final_state(&self) -> JobState {
        self.states.last().copied().unwrap_or(JobState::Idle)
    }

    pub fn into_result(self) -> Result<RunResult> {
        match self.error {
            Some(e) => Err(e),
            None => Ok(self.result),
        }
    }
}

/// Dump → (compress) → store for one database.
///
/// Every failure is terminal for the run and is reported through the returned
/// [`JobOutcome`]; nothing is retried. Artifacts produced by earlier stages
/// stay on disk when a later stage fails.
pub struct BackupJob {
    request: BackupRequest,
    probe: Arc<dyn ConnectionProbe>,
    invoker: DumpInvoker,
    storage: Arc<dyn Storage>,
    history: Option<RunHistory>,
}

impl BackupJob {
    /// Wires a job to the real probe, dump tools and storage backend.
    pub fn new(request: BackupRequest, settings: &JobSettings, storage_settings: &StorageSettings) -> Self {
        let probe: Arc<dyn ConnectionProbe> = if settings.check_connection {
            Arc::new(NetworkProbe)
        } else {
            Arc::new(ParamsOnlyProbe)
        };
        let storage = build_storage(request.storage_kind, storage_settings);
        Self::with_components(request, settings, probe, Arc::new(ProcessRunner), storage)
    }

    pub fn with_components(
        request: BackupRequest,
        settings: &JobSettings,
        probe: Arc<dyn ConnectionProbe>,
        runner: Arc<dyn CommandRunner>,
        storage: Arc<dyn Storage>,
    ) -> Self {
        Self {
            request,
            probe,
            invoker: DumpInvoker::new(runner, settings.work_dir.clone(), settings.dump_timeout),
            storage,
            history: settings.history_file.clone().map(RunHistory::new),
        }
    }

    pub fn request(&self) -> &BackupRequest {
        &self.request
    }

    /// Runs the job once to a terminal state.
    pub async fn run(&self, trigger: Trigger) -> JobOutcome {
        let started = Instant::now();
        let run_id = Uuid::new_v4();
        let mut states = vec![JobState::Idle];
        info!(
            %run_id,
            "Starting {:?} {} backup of {} database {}",
            trigger,
            self.request.backup_type,
            self.request.db_kind,
            self.request.connection.db_name
        );

        let outcome = self.drive(&mut states).await;
        let (stored_at, error) = match outcome {
            Ok(location) => {
                states.push(JobState::Done);
                info!(%run_id, "🎉 Backup completed successfully, stored at {}", location);
                (Some(location), None)
            }
            Err(e) => {
                let failed_in = states.last().copied().unwrap_or(JobState::Idle);
                states.push(JobState::Failed);
                error!(%run_id, "❌ Backup failed while {:?}: {}", failed_in, e);
                (None, Some(e))
            }
        };

        let result = RunResult {
            run_id,
            trigger,
            db_kind: self.request.db_kind,
            db_name: self.request.connection.db_name.clone(),
            success: error.is_none(),
            error_kind: error.as_ref().map(|e| e.kind().to_string()),
            error_message: error.as_ref().map(|e| e.to_string()),
            stored_at,
            timestamp: Utc::now(),
            duration_ms: u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
        };

        if let Some(history) = &self.history {
            if let Err(e) = history.append(&result).await {
                warn!("Could not record run in {}: {:#}", history.path().display(), e);
            }
        }

        JobOutcome { result, states, error }
    }

    async fn drive(&self, states: &mut Vec<JobState>) -> Result<String> {
        let request = &self.request;

        states.push(JobState::Connecting);
        self.probe.verify(request.db_kind, &request.connection).await?;

        states.push(JobState::Dumping);
        let mut artifact = self.invoker.invoke(request).await?;

        if request.compress {
            states.push(JobState::Compressing);
            let source = artifact.clone();
            let archive = tokio::task::spawn_blocking(move || compress_artifact(&source))
                .await
                .map_err(|e| BackupError::CompressionFailed(format!("compression task failed: {}", e)))??;
            artifact = BackupArtifact::file(archive);
        }

        states.push(JobState::Storing);
        info!("Storing {} via {} storage", artifact.path.display(), self.storage.kind());
        self.storage.store(&artifact, request.backup_type).await
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::backup::db_dump::tests::{FakeRunner, request};
    use crate::backup::request::{BackupType, ConnectionParams, DbKind, StorageKind};
    use crate::storage::LocalStorage;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) struct RecordingStorage {
        pub stored: Mutex<Vec<BackupArtifact>>,
    }

    impl RecordingStorage {
        pub(crate) fn new() -> Self {
            Self { stored: Mutex::new(Vec::new()) }
        }

        fn count(&self) -> usize {
            self.stored.lock().map(|s| s.len()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl Storage for RecordingStorage {
        fn kind(&self) -> StorageKind {
            StorageKind::Local
        }

        async fn store(&self, artifact: &BackupArtifact, _backup_type: BackupType) -> Result<String> {
            if let Ok(mut stored) = self.stored.lock() {
                stored.push(artifact.clone());
            }
            Ok(artifact.path.display().to_string())
        }
    }

    struct RefusingProbe;

    #[async_trait]
    impl ConnectionProbe for RefusingProbe {
        async fn verify(&self, db_kind: DbKind, _params: &ConnectionParams) -> Result<()> {
            Err(BackupError::Connection { db_kind, message: "connection refused".to_string() })
        }
    }

    pub(crate) fn settings(work_dir: &Path) -> JobSettings {
        JobSettings {
            work_dir: work_dir.to_path_buf(),
            dump_timeout: Duration::from_secs(5),
            check_connection: false,
            history_file: None,
        }
    }

    #[tokio::test]
    async fn test_mysql_local_backup_without_compression() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let backups = tempfile::tempdir()?;
        let runner = Arc::new(FakeRunner::succeeding());
        let storage = Arc::new(LocalStorage::new(backups.path().to_path_buf()));
        let job = BackupJob::with_components(
            request(DbKind::Mysql),
            &settings(work.path()),
            Arc::new(ParamsOnlyProbe),
            runner.clone(),
            storage,
        );

        let outcome = job.run(Trigger::Manual).await;

        assert!(outcome.result.success, "{:?}", outcome.error);
        assert_eq!(
            outcome.states,
            vec![JobState::Idle, JobState::Connecting, JobState::Dumping, JobState::Storing, JobState::Done]
        );
        assert!(!outcome.states.contains(&JobState::Compressing));
        assert!(work.path().join("shop_backup.sql").is_file());
        assert!(!work.path().join("shop_backup.zip").exists());
        assert!(backups.path().join("full").join("shop_backup.sql").is_file());
        assert_eq!(runner.call_count(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn test_compressed_backup_stores_archive() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let storage = Arc::new(RecordingStorage::new());
        let mut req = request(DbKind::Mongodb);
        req.compress = true;
        let job = BackupJob::with_components(
            req,
            &settings(work.path()),
            Arc::new(ParamsOnlyProbe),
            Arc::new(FakeRunner::succeeding()),
            storage.clone(),
        );

        let outcome = job.run(Trigger::Manual).await;

        assert_eq!(outcome.final_state(), JobState::Done);
        assert!(outcome.states.contains(&JobState::Compressing));
        let stored = storage.stored.lock().map(|s| s.clone()).unwrap_or_default();
        assert_eq!(stored, vec![BackupArtifact::file(work.path().join("shop_backup.zip"))]);
        // The uncompressed dump stays behind.
        assert!(work.path().join("shop_backup").is_dir());
        Ok(())
    }

    #[tokio::test]
    async fn test_dump_failure_never_reaches_storage() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let storage = Arc::new(RecordingStorage::new());
        let job = BackupJob::with_components(
            request(DbKind::Postgres),
            &settings(work.path()),
            Arc::new(ParamsOnlyProbe),
            Arc::new(FakeRunner::failing()),
            storage.clone(),
        );

        let outcome = job.run(Trigger::Manual).await;

        assert_eq!(outcome.final_state(), JobState::Failed);
        assert!(matches!(outcome.error, Some(BackupError::DumpFailed { db_kind: DbKind::Postgres, .. })));
        assert!(!outcome.states.contains(&JobState::Storing));
        assert_eq!(storage.count(), 0);
        assert!(!outcome.result.success);
        assert_eq!(outcome.result.error_kind.as_deref(), Some("DumpFailed"));
        Ok(())
    }

    #[tokio::test]
    async fn test_connection_failure_skips_dump() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let runner = Arc::new(FakeRunner::succeeding());
        let job = BackupJob::with_components(
            request(DbKind::Mysql),
            &settings(work.path()),
            Arc::new(RefusingProbe),
            runner.clone(),
            Arc::new(RecordingStorage::new()),
        );

        let outcome = job.run(Trigger::Manual).await;

        assert_eq!(outcome.states, vec![JobState::Idle, JobState::Connecting, JobState::Failed]);
        assert_eq!(runner.call_count(), 0);
        assert!(matches!(outcome.into_result(), Err(BackupError::Connection { .. })));
        Ok(())
    }

    #[tokio::test]
    async fn test_unimplemented_storage_fails_run() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let storage_settings = StorageSettings { local_backup_dir: work.path().join("backups"), s3: None };
        let job = BackupJob::with_components(
            request(DbKind::Mysql),
            &settings(work.path()),
            Arc::new(ParamsOnlyProbe),
            Arc::new(FakeRunner::succeeding()),
            build_storage(StorageKind::Gcp, &storage_settings),
        );

        let outcome = job.run(Trigger::Manual).await;

        assert_eq!(outcome.final_state(), JobState::Failed);
        assert!(outcome.states.contains(&JobState::Storing));
        assert!(matches!(outcome.error, Some(BackupError::NotImplemented(_))));
        // Dump output is left for inspection.
        assert!(work.path().join("shop_backup.sql").is_file());
        Ok(())
    }

    #[tokio::test]
    async fn test_runs_are_recorded_in_history() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let mut job_settings = settings(work.path());
        job_settings.history_file = Some(work.path().join("runs.jsonl"));
        let job = BackupJob::with_components(
            request(DbKind::Mysql),
            &job_settings,
            Arc::new(ParamsOnlyProbe),
            Arc::new(FakeRunner::succeeding()),
            Arc::new(RecordingStorage::new()),
        );

        let first = job.run(Trigger::Manual).await;
        let second = job.run(Trigger::Scheduled).await;

        let recorded = RunHistory::new(work.path().join("runs.jsonl")).load().await?;
        assert_eq!(recorded, vec![first.result, second.result]);
        assert_eq!(recorded[1].trigger, Trigger::Scheduled);
        Ok(())
    }
}
