// db-backup-cli/src/storage/s3_upload.rs
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_sdk_s3 as s3;
use s3::config::Region;
use s3::primitives::ByteStream;
use std::path::Path;
use tracing::info;
use walkdir::WalkDir;

use super::{Storage, artifact_name};
use crate::backup::request::{BackupArtifact, BackupType, StorageKind};
use crate::config::SpacesConfig;
use crate::errors::BackupError;

/// Object key for an upload: `[prefix/]<backup type>/<name>`.
pub fn object_key(folder_prefix: Option<&str>, backup_type: BackupType, name: &str) -> String {
    match folder_prefix.map(|p| p.trim_matches('/')).filter(|p| !p.is_empty()) {
        Some(prefix) => format!("{}/{}/{}", prefix, backup_type, name),
        None => format!("{}/{}", backup_type, name),
    }
}

/// Uploads artifacts to S3 or an S3-compatible service (DigitalOcean Spaces, MinIO).
#[derive(Debug, Clone)]
pub struct S3Storage {
    config: Option<SpacesConfig>,
}

impl S3Storage {
    pub fn new(config: Option<SpacesConfig>) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Storage for S3Storage {
    fn kind(&self) -> StorageKind {
        StorageKind::Aws
    }

    async fn store(
        &self,
        artifact: &BackupArtifact,
        backup_type: BackupType,
    ) -> crate::errors::Result<String> {
        let spaces_config = self.config.as_ref().ok_or_else(|| {
            BackupError::StorageFailed(
                "aws storage selected but s3_storage is not fully configured".to_string(),
            )
        })?;
        let name = artifact_name(artifact)?;
        let base_key = object_key(spaces_config.folder_prefix.as_deref(), backup_type, &name);

        upload_artifact(spaces_config, artifact, &base_key)
            .await
            .map_err(|e| BackupError::StorageFailed(format!("{:#}", e)))?;
        Ok(format!("s3://{}/{}", spaces_config.bucket_name, base_key))
    }
}

async fn upload_artifact(spaces_config: &SpacesConfig, artifact: &BackupArtifact, base_key: &str) -> Result<()> {
    let client = build_client(spaces_config).await;

    if !artifact.is_directory {
        return upload_file_to_s3(&client, spaces_config, &artifact.path, base_key).await;
    }

    for entry in WalkDir::new(&artifact.path) {
        let entry = entry.with_context(|| format!("Failed to walk directory: {}", artifact.path.display()))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let relative = entry.path().strip_prefix(&artifact.path).with_context(|| {
            format!("Failed to strip prefix {} from {}", artifact.path.display(), entry.path().display())
        })?;
        let relative = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        let key = format!("{}/{}", base_key, relative);
        upload_file_to_s3(&client, spaces_config, entry.path(), &key).await?;
    }
    Ok(())
}

async fn build_client(spaces_config: &SpacesConfig) -> s3::Client {
    let mut loader = aws_config::defaults(s3::config::BehaviorVersion::latest())
        .region(Region::new(spaces_config.region.clone()))
        .credentials_provider(s3::config::Credentials::new(
            &spaces_config.access_key_id,
            &spaces_config.secret_access_key,
            None, // session_token
            None, // expiry
            "Static",
        ));
    if let Some(endpoint) = &spaces_config.endpoint_url {
        loader = loader.endpoint_url(endpoint);
    }
    let sdk_config = loader.load().await;
    s3::Client::new(&sdk_config)
}

async fn upload_file_to_s3(
    client: &s3::Client,
    spaces_config: &SpacesConfig,
    file_path: &Path,
    s3_key: &str,
) -> Result<()> {
    info!(
        "Uploading {} to S3 bucket {} with key {}",
        file_path.display(),
        spaces_config.bucket_name,
        s3_key
    );

    let body = ByteStream::from_path(file_path)
        .await
        .with_context(|| format!("Failed to create ByteStream from file: {}", file_path.display()))?;

    client
        .put_object()
        .bucket(&spaces_config.bucket_name)
        .key(s3_key)
        .body(body)
        .send()
        .await
        .with_context(|| {
            format!(
                "Failed to upload file {} to S3 bucket {} with key {}",
                file_path.display(),
                spaces_config.bucket_name,
                s3_key
            )
        })?;

    info!("✅ Uploaded {} to s3://{}/{}", file_path.display(), spaces_config.bucket_name, s3_key);
    Ok(())
}
