// db-backup-cli/src/storage/mod.rs
pub(crate) mod s3_upload;

use async_trait::async_trait;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::backup::request::{BackupArtifact, BackupType, StorageKind};
use crate::config::StorageSettings;
use crate::errors::{BackupError, Result};
use s3_upload::S3Storage;

/// A place where finished backup artifacts end up.
#[async_trait]
pub trait Storage: Send + Sync {
    fn kind(&self) -> StorageKind;

    /// Persists the artifact and returns a human-readable location.
    async fn store(&self, artifact: &BackupArtifact, backup_type: BackupType) -> Result<String>;
}

/// Picks the backend for a storage kind.
pub fn build_storage(kind: StorageKind, settings: &StorageSettings) -> Arc<dyn Storage> {
    match kind {
        StorageKind::Local => Arc::new(LocalStorage::new(settings.local_backup_dir.clone())),
        StorageKind::Aws => Arc::new(S3Storage::new(settings.s3.clone())),
        StorageKind::Gcp | StorageKind::Azure => Arc::new(UnimplementedStorage { kind }),
    }
}

fn artifact_name(artifact: &BackupArtifact) -> Result<String> {
    artifact
        .path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| {
            BackupError::StorageFailed(format!("artifact has no file name: {}", artifact.path.display()))
        })
}

/// Copies artifacts into `<root>/<backup type>/`.
#[derive(Debug, Clone)]
pub struct LocalStorage {
    root: PathBuf,
}

impl LocalStorage {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

#[async_trait]
impl Storage for LocalStorage {
    fn kind(&self) -> StorageKind {
        StorageKind::Local
    }

    async fn store(&self, artifact: &BackupArtifact, backup_type: BackupType) -> Result<String> {
        let destination = self.root.join(backup_type.as_str()).join(artifact_name(artifact)?);
        info!("Storing backup locally at {}", destination.display());

        let source = artifact.clone();
        let target = destination.clone();
        tokio::task::spawn_blocking(move || copy_artifact(&source, &target))
            .await
            .map_err(|e| BackupError::StorageFailed(format!("copy task failed: {}", e)))?
            .map_err(|e| {
                BackupError::StorageFailed(format!(
                    "failed to copy {} to {}: {}",
                    artifact.path.display(),
                    destination.display(),
                    e
                ))
            })?;

        info!("✓ Backup stored at {}", destination.display());
        Ok(destination.display().to_string())
    }
}

/// Resolves a path that may not exist yet through its deepest existing ancestor.
fn resolve_path(path: &Path) -> std::io::Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    for ancestor in absolute.ancestors() {
        if ancestor.exists() {
            let rest = absolute.strip_prefix(ancestor).map_err(std::io::Error::other)?;
            return Ok(ancestor.canonicalize()?.join(rest));
        }
    }
    Ok(absolute)
}

fn copy_artifact(artifact: &BackupArtifact, destination: &Path) -> std::io::Result<()> {
    let source = artifact.path.canonicalize()?;
    let target = resolve_path(destination)?;
    if source == target {
        info!("{} is already in the backup directory, leaving it in place", source.display());
        return Ok(());
    }
    if target.starts_with(&source) || source.starts_with(&target) {
        return Err(std::io::Error::other(format!(
            "source {} and destination {} overlap",
            source.display(),
            target.display()
        )));
    }

    if let Some(parent) = destination.parent() {
        fs::create_dir_all(parent)?;
    }
    if !artifact.is_directory {
        fs::copy(&artifact.path, destination)?;
        return Ok(());
    }

    if destination.exists() {
        fs::remove_dir_all(destination)?;
    }
    for entry in WalkDir::new(&artifact.path) {
        let entry = entry.map_err(std::io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(&artifact.path)
            .map_err(std::io::Error::other)?;
        let target = destination.join(relative);
        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            debug!("Copying {} to {}", entry.path().display(), target.display());
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Backends that exist in the CLI surface but have no upload code yet.
#[derive(Debug, Clone, Copy)]
pub struct UnimplementedStorage {
    kind: StorageKind,
}

#[async_trait]
impl Storage for UnimplementedStorage {
    fn kind(&self) -> StorageKind {
        self.kind
    }

    async fn store(&self, artifact: &BackupArtifact, _backup_type: BackupType) -> Result<String> {
        Err(BackupError::NotImplemented(format!(
            "{} storage cannot upload {} yet",
            self.kind,
            artifact.path.display()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(root: &Path) -> StorageSettings {
        StorageSettings { local_backup_dir: root.to_path_buf(), s3: None }
    }

    #[tokio::test]
    async fn test_local_storage_copies_file() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let backups = tempfile::tempdir()?;
        let source = work.path().join("shop_backup.zip");
        std::fs::write(&source, b"zip bytes")?;

        let storage = build_storage(StorageKind::Local, &settings(backups.path()));
        assert_eq!(storage.kind(), StorageKind::Local);
        let location = storage.store(&BackupArtifact::file(&source), BackupType::Full).await?;

        let stored = backups.path().join("full").join("shop_backup.zip");
        assert_eq!(location, stored.display().to_string());
        assert_eq!(std::fs::read(&stored)?, b"zip bytes");
        assert!(source.exists());
        Ok(())
    }

    #[tokio::test]
    async fn test_local_storage_copies_directory() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let backups = tempfile::tempdir()?;
        let source = work.path().join("shop_backup");
        std::fs::create_dir_all(source.join("shop"))?;
        std::fs::write(source.join("shop").join("orders.bson"), b"bson")?;

        let storage = LocalStorage::new(backups.path().to_path_buf());
        storage.store(&BackupArtifact::directory(&source), BackupType::Incremental).await?;

        let stored = backups.path().join("incremental").join("shop_backup").join("shop").join("orders.bson");
        assert_eq!(std::fs::read(stored)?, b"bson");
        Ok(())
    }

    #[tokio::test]
    async fn test_local_storage_missing_artifact() -> anyhow::Result<()> {
        let backups = tempfile::tempdir()?;
        let storage = LocalStorage::new(backups.path().to_path_buf());
        let result = storage
            .store(&BackupArtifact::file(backups.path().join("nope.sql")), BackupType::Full)
            .await;
        assert!(matches!(result, Err(BackupError::StorageFailed(_))));
        Ok(())
    }

    #[tokio::test]
    async fn test_local_storage_keeps_file_already_in_place() -> anyhow::Result<()> {
        let backups = tempfile::tempdir()?;
        let source = backups.path().join("full").join("shop_backup.sql");
        std::fs::create_dir_all(backups.path().join("full"))?;
        std::fs::write(&source, b"dump contents")?;

        let storage = LocalStorage::new(backups.path().to_path_buf());
        storage.store(&BackupArtifact::file(&source), BackupType::Full).await?;
        assert_eq!(std::fs::read(&source)?, b"dump contents");

        // Same file reached through a `..` detour.
        let detour = backups.path().join("full").join("..").join("full").join("shop_backup.sql");
        storage.store(&BackupArtifact::file(&detour), BackupType::Full).await?;
        assert_eq!(std::fs::read(&source)?, b"dump contents");
        Ok(())
    }

    #[tokio::test]
    async fn test_local_storage_keeps_directory_already_in_place() -> anyhow::Result<()> {
        let backups = tempfile::tempdir()?;
        let source = backups.path().join("full").join("shop_backup");
        std::fs::create_dir_all(source.join("shop"))?;
        std::fs::write(source.join("shop").join("orders.bson"), b"bson")?;

        let storage = LocalStorage::new(backups.path().to_path_buf());
        storage.store(&BackupArtifact::directory(&source), BackupType::Full).await?;
        assert_eq!(std::fs::read(source.join("shop").join("orders.bson"))?, b"bson");
        Ok(())
    }

    #[tokio::test]
    async fn test_local_storage_rejects_destination_inside_source() -> anyhow::Result<()> {
        let work = tempfile::tempdir()?;
        let source = work.path().join("shop_backup");
        std::fs::create_dir_all(source.join("shop"))?;
        std::fs::write(source.join("shop").join("orders.bson"), b"bson")?;

        // Destination would be <source>/full/shop_backup.
        let storage = LocalStorage::new(source.clone());
        let result = storage.store(&BackupArtifact::directory(&source), BackupType::Full).await;
        assert!(matches!(result, Err(BackupError::StorageFailed(message)) if message.contains("overlap")));
        assert!(!source.join("full").exists());
        assert_eq!(std::fs::read(source.join("shop").join("orders.bson"))?, b"bson");
        Ok(())
    }

    #[tokio::test]
    async fn test_cloud_stubs_are_not_implemented() -> anyhow::Result<()> {
        let backups = tempfile::tempdir()?;
        for kind in [StorageKind::Gcp, StorageKind::Azure] {
            let storage = build_storage(kind, &settings(backups.path()));
            let result = storage.store(&BackupArtifact::file("shop_backup.zip"), BackupType::Full).await;
            assert!(matches!(result, Err(BackupError::NotImplemented(_))));
        }
        Ok(())
    }

    #[test]
    fn test_unknown_storage_kind_has_no_side_effects() -> anyhow::Result<()> {
        let backups = tempfile::tempdir()?;
        let root = backups.path().join("never-created");
        let result = "ftp".parse::<StorageKind>().map(|kind| build_storage(kind, &settings(&root)));
        assert!(matches!(result, Err(BackupError::UnsupportedStorage(name)) if name == "ftp"));
        assert!(!root.exists());
        Ok(())
    }
}
