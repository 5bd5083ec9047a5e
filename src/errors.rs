use thiserror::Error;

use crate::backup::request::DbKind;

#[derive(Error, Debug)]
pub enum BackupError {
    #[error("Unsupported database type: {0}")]
    UnsupportedDatabase(String),

    #[error("Failed to connect to {db_kind} database: {message}")]
    Connection { db_kind: DbKind, message: String },

    #[error("{db_kind} dump failed: {message}")]
    DumpFailed { db_kind: DbKind, message: String },

    #[error("{db_kind} dump timed out after {seconds} seconds")]
    DumpTimedOut { db_kind: DbKind, seconds: u64 },

    #[error("Compression failed: {0}")]
    CompressionFailed(String),

    #[error("Storage operation failed: {0}")]
    StorageFailed(String),

    #[error("Unsupported storage type: {0}")]
    UnsupportedStorage(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Invalid schedule: {0}")]
    ScheduleInvalid(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl BackupError {
    /// Short machine-friendly name of the error kind, used in run history.
    pub fn kind(&self) -> &'static str {
        match self {
            BackupError::UnsupportedDatabase(_) => "UnsupportedDatabase",
            BackupError::Connection { .. } => "ConnectionError",
            BackupError::DumpFailed { .. } => "DumpFailed",
            BackupError::DumpTimedOut { .. } => "DumpTimedOut",
            BackupError::CompressionFailed(_) => "CompressionFailed",
            BackupError::StorageFailed(_) => "StorageFailed",
            BackupError::UnsupportedStorage(_) => "UnsupportedStorage",
            BackupError::NotImplemented(_) => "NotImplemented",
            BackupError::ScheduleInvalid(_) => "ScheduleInvalid",
            BackupError::Config(_) => "Config",
            BackupError::InvalidInput(_) => "InvalidInput",
            BackupError::Io(_) => "Io",
        }
    }
}

pub type Result<T> = std::result::Result<T, BackupError>;
