// db-backup-cli/src/backup/archive.rs
use anyhow::{Context, Result};
use std::fs::File;
use std::io::{self, BufReader, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::info;
use walkdir::WalkDir;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::backup::request::BackupArtifact;
use crate::errors::BackupError;

/// Path of the archive for an artifact: `shop_backup.sql` and `shop_backup/` both map to `shop_backup.zip`.
pub fn archive_path_for(artifact: &BackupArtifact) -> PathBuf {
    // Only a file loses its extension; dots inside a directory name are part of the name.
    let stem = if artifact.is_directory {
        artifact.path.file_name()
    } else {
        artifact.path.file_stem()
    };
    let mut name = stem.map(|s| s.to_os_string()).unwrap_or_default();
    name.push(".zip");
    artifact.path.with_file_name(name)
}

/// Compresses a dump artifact into a zip archive next to it.
///
/// A single file becomes a single-entry archive. A directory is walked and
/// every regular file is stored under its path relative to the directory.
/// Every entry is deflated. The archive is assembled in a temporary file and
/// only moved into place once complete, so a failure leaves nothing behind.
///
/// # Returns
/// Path to the created archive file.
pub fn compress_artifact(artifact: &BackupArtifact) -> std::result::Result<PathBuf, BackupError> {
    let archive_dest_path = archive_path_for(artifact);
    write_archive(artifact, &archive_dest_path)
        .map_err(|e| BackupError::CompressionFailed(format!("{:#}", e)))?;
    Ok(archive_dest_path)
}

fn write_archive(artifact: &BackupArtifact, archive_dest_path: &Path) -> Result<()> {
    let parent = match archive_dest_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };

    info!(
        "Creating zip archive from {} to {}",
        artifact.path.display(),
        archive_dest_path.display()
    );

    let staging = NamedTempFile::new_in(&parent).with_context(|| {
        format!("Failed to create temporary archive file in {}", parent.display())
    })?;
    let mut zip = ZipWriter::new(staging);
    // Database dumps routinely exceed 4 GiB, so always write zip64 headers.
    let options = SimpleFileOptions::default()
        .compression_method(CompressionMethod::Deflated)
        .large_file(true);

    if artifact.is_directory {
        if !artifact.path.is_dir() {
            anyhow::bail!("Source for archival is not a directory: {}", artifact.path.display());
        }
        for entry in WalkDir::new(&artifact.path).sort_by_file_name() {
            let entry = entry
                .with_context(|| format!("Failed to walk directory: {}", artifact.path.display()))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let relative = path.strip_prefix(&artifact.path).with_context(|| {
                format!(
                    "Failed to strip prefix {} from {}",
                    artifact.path.display(),
                    path.display()
                )
            })?;
            add_file(&mut zip, path, &entry_name(relative), options)?;
        }
    } else {
        let name = artifact
            .path
            .file_name()
            .with_context(|| format!("Artifact has no file name: {}", artifact.path.display()))?
            .to_string_lossy()
            .into_owned();
        add_file(&mut zip, &artifact.path, &name, options)?;
    }

    let mut staging = zip
        .finish()
        .with_context(|| format!("Failed to finish zip archive: {}", archive_dest_path.display()))?;
    staging
        .flush()
        .with_context(|| format!("Failed to flush zip archive: {}", archive_dest_path.display()))?;
    staging
        .persist(archive_dest_path)
        .with_context(|| format!("Failed to move archive into place: {}", archive_dest_path.display()))?;

    info!("✓ Zip archive created successfully at {}", archive_dest_path.display());
    Ok(())
}

fn add_file<W: Write + io::Seek>(
    zip: &mut ZipWriter<W>,
    path: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> Result<()> {
    let file = File::open(path).with_context(|| format!("Failed to open file: {}", path.display()))?;
    zip.start_file(name, options)
        .with_context(|| format!("Failed to start archive entry {}", name))?;
    io::copy(&mut BufReader::new(file), zip)
        .with_context(|| format!("Failed to write {} to archive", path.display()))?;
    Ok(())
}

// Zip entry names always use forward slashes.
fn entry_name(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
