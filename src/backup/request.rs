// db-backup-cli/src/backup/request.rs
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::errors::BackupError;

/// Database engines with a supported external dump tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DbKind {
    Mysql,
    Postgres,
    Mongodb,
}

impl DbKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            DbKind::Mysql => "mysql",
            DbKind::Postgres => "postgres",
            DbKind::Mongodb => "mongodb",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            DbKind::Mysql => 3306,
            DbKind::Postgres => 5432,
            DbKind::Mongodb => 27017,
        }
    }

    /// Name of the dump utility that must be available on PATH.
    pub fn dump_program(&self) -> &'static str {
        match self {
            DbKind::Mysql => "mysqldump",
            DbKind::Postgres => "pg_dump",
            DbKind::Mongodb => "mongodump",
        }
    }

    /// MongoDB dumps into a directory, the SQL engines into a single file.
    pub fn dumps_to_directory(&self) -> bool {
        matches!(self, DbKind::Mongodb)
    }
}

impl fmt::Display for DbKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "mysql" => Ok(DbKind::Mysql),
            "postgres" => Ok(DbKind::Postgres),
            "mongodb" => Ok(DbKind::Mongodb),
            other => Err(BackupError::UnsupportedDatabase(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    Full,
    Incremental,
    Differential,
}

impl BackupType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackupType::Full => "full",
            BackupType::Incremental => "incremental",
            BackupType::Differential => "differential",
        }
    }
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for BackupType {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" => Ok(BackupType::Full),
            "incremental" => Ok(BackupType::Incremental),
            "differential" => Ok(BackupType::Differential),
            other => Err(BackupError::InvalidInput(format!(
                "unknown backup type '{}', expected one of: full, incremental, differential",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    Local,
    Aws,
    Gcp,
    Azure,
}

impl StorageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StorageKind::Local => "local",
            StorageKind::Aws => "aws",
            StorageKind::Gcp => "gcp",
            StorageKind::Azure => "azure",
        }
    }
}

impl fmt::Display for StorageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StorageKind {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(StorageKind::Local),
            "aws" => Ok(StorageKind::Aws),
            "gcp" => Ok(StorageKind::Gcp),
            "azure" => Ok(StorageKind::Azure),
            other => Err(BackupError::UnsupportedStorage(other.to_string())),
        }
    }
}

/// Resolved connection parameters for one database.
#[derive(Clone, PartialEq, Eq)]
pub struct ConnectionParams {
    pub host: String,
    pub port: u16,
    pub user: Option<String>,
    pub password: Option<String>,
    pub db_name: String,
}

// Keeps passwords out of logs and error chains.
impl fmt::Debug for ConnectionParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionParams")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .field("db_name", &self.db_name)
            .finish()
    }
}

/// Everything one backup run needs to know. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupRequest {
    pub db_kind: DbKind,
    pub connection: ConnectionParams,
    pub backup_type: BackupType,
    pub storage_kind: StorageKind,
    pub compress: bool,
}

impl BackupRequest {
    /// Deterministic name of the dump artifact: `{db}_backup.sql` or `{db}_backup`.
    pub fn artifact_name(&self) -> String {
        if self.db_kind.dumps_to_directory() {
            format!("{}_backup", self.connection.db_name)
        } else {
            format!("{}_backup.sql", self.connection.db_name)
        }
    }
}

/// A dump output on disk, before or after compression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackupArtifact {
    pub path: PathBuf,
    pub is_directory: bool,
}

impl BackupArtifact {
    pub fn file(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), is_directory: false }
    }

    pub fn directory(path: impl AsRef<Path>) -> Self {
        Self { path: path.as_ref().to_path_buf(), is_directory: true }
    }
}
