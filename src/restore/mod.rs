use anyhow::Result;

use crate::errors::BackupError;

/// Public entry point for the restore command. Restoring is not supported yet.
pub async fn run_restore_flow() -> Result<()> {
    Err(BackupError::NotImplemented(
        "restore is not supported yet; unpack the archive and load it with the database's own client tools".to_string(),
    )
    .into())
}
