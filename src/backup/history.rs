// db-backup-cli/src/backup/history.rs
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::backup::request::DbKind;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trigger {
    Manual,
    Scheduled,
}

/// Outcome of one backup run, manual or scheduled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: Uuid,
    pub trigger: Trigger,
    pub db_kind: DbKind,
    pub db_name: String,
    pub success: bool,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub stored_at: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub duration_ms: u64,
}

/// Append-only JSON-lines log of run results.
#[derive(Debug, Clone)]
pub struct RunHistory {
    path: PathBuf,
}

impl RunHistory {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn append(&self, result: &RunResult) -> Result<()> {
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create history directory {}", parent.display()))?;
        }
        let mut line = serde_json::to_string(result).context("Failed to serialize run result")?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .with_context(|| format!("Failed to open history file {}", self.path.display()))?;
        file.write_all(line.as_bytes())
            .await
            .with_context(|| format!("Failed to write history file {}", self.path.display()))?;
        file.flush().await?;
        Ok(())
    }

    /// Reads back every recorded run, oldest first. A missing file means no runs yet.
    pub async fn load(&self) -> Result<Vec<RunResult>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&self.path)
            .await
            .with_context(|| format!("Failed to read history file {}", self.path.display()))?;
        content
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str(line).with_context(|| {
                    format!("Invalid entry on line {} of {}", i + 1, self.path.display())
                })
            })
            .collect()
    }
}
