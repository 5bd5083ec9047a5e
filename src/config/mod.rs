// db-backup-cli/src/config/mod.rs
use anyhow::{Context, Result};
use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::backup::request::{
    BackupRequest, BackupType, ConnectionParams, DbKind, StorageKind,
};
use crate::cli::BackupArgs;
use crate::errors::BackupError;

pub const DEFAULT_CONFIG_FILE: &str = "config.json";
const DEFAULT_LOCAL_BACKUP_DIR: &str = "./backups";
const DEFAULT_WORK_DIR: &str = ".";
const DEFAULT_DUMP_TIMEOUT_SECS: u64 = 3600;

// Structs for deserializing config.json
#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonS3StorageConfig {
    pub bucket_name: Option<String>,
    pub region: Option<String>,
    pub access_key_id: Option<String>,
    pub secret_access_key: Option<String>,
    pub endpoint_url: Option<String>,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct JsonCredentials {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawJsonConfig {
    pub work_dir: Option<PathBuf>,
    pub local_backup_dir: Option<PathBuf>,
    pub dump_timeout_secs: Option<u64>,
    pub check_connection: Option<bool>,
    pub history_file: Option<PathBuf>,
    /// Keyed by engine name: "mysql", "postgres", "mongodb".
    #[serde(default)]
    pub credentials: HashMap<DbKind, JsonCredentials>,
    pub s3_storage: Option<JsonS3StorageConfig>,
}

// Application's internal configuration structs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpacesConfig {
    pub endpoint_url: Option<String>,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    pub bucket_name: String,
    pub folder_prefix: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct AppConfig {
    pub spaces_config: Option<SpacesConfig>,
    pub raw_json_config: RawJsonConfig,
}

/// Where finished artifacts go.
#[derive(Debug, Clone)]
pub struct StorageSettings {
    pub local_backup_dir: PathBuf,
    pub s3: Option<SpacesConfig>,
}

/// Knobs for a single backup run.
#[derive(Debug, Clone)]
pub struct JobSettings {
    pub work_dir: PathBuf,
    pub dump_timeout: Duration,
    pub check_connection: bool,
    pub history_file: Option<PathBuf>,
}

impl AppConfig {
    pub fn load_from_json(config_path: &Path) -> Result<Self> {
        let config_content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file at {}", config_path.display()))?;
        let raw_json_config: RawJsonConfig = serde_json::from_str(&config_content).with_context(|| {
            format!("Failed to parse JSON from config file at {}", config_path.display())
        })?;

        let spaces_config = raw_json_config.s3_storage.as_ref().and_then(|s3_raw| {
            if let (Some(bucket), Some(region), Some(key_id), Some(secret)) = (
                s3_raw.bucket_name.as_ref().filter(|s| !s.is_empty()),
                s3_raw.region.as_ref().filter(|s| !s.is_empty()),
                s3_raw.access_key_id.as_ref().filter(|s| !s.is_empty()),
                s3_raw.secret_access_key.as_ref().filter(|s| !s.is_empty()),
            ) {
                Some(SpacesConfig {
                    bucket_name: bucket.clone(),
                    region: region.clone(),
                    access_key_id: key_id.clone(),
                    secret_access_key: secret.clone(),
                    endpoint_url: s3_raw.endpoint_url.clone().filter(|s| !s.is_empty()),
                    folder_prefix: s3_raw.folder_prefix.clone().filter(|s| !s.is_empty()),
                })
            } else {
                warn!(
                    "s3_storage is present in {} but bucket_name, region, access_key_id or secret_access_key is missing. S3 uploads are disabled.",
                    config_path.display()
                );
                None
            }
        });

        Ok(AppConfig { spaces_config, raw_json_config })
    }

    /// Loads an explicitly requested config file, or `config.json` when it exists.
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match explicit_path {
            Some(path) => Self::load_from_json(path),
            None => {
                let default_path = Path::new(DEFAULT_CONFIG_FILE);
                if default_path.is_file() {
                    Self::load_from_json(default_path)
                } else {
                    debug!("No {} found, using built-in defaults", DEFAULT_CONFIG_FILE);
                    Ok(AppConfig::default())
                }
            }
        }
    }
}

/// Environment variables consulted for each engine, as (user, password, host).
pub fn credential_env_vars(db_kind: DbKind) -> (&'static str, &'static str, &'static str) {
    match db_kind {
        DbKind::Mysql => ("MYSQL_USER", "MYSQL_PASSWORD", "MYSQL_HOST"),
        DbKind::Postgres => ("PG_USER", "PG_PASSWORD", "PG_HOST"),
        DbKind::Mongodb => ("MONGO_USER", "MONGO_PASSWORD", "MONGO_HOST"),
    }
}

/// Reads a non-empty variable from the process environment.
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.is_empty())
}

fn first_of(candidates: [Option<String>; 3]) -> Option<String> {
    candidates.into_iter().flatten().find(|value| !value.is_empty())
}

/// Turns CLI flags into a validated request.
///
/// Every connection field follows the same precedence: CLI flag, then the
/// engine's environment variable, then the config file, then the default.
pub fn resolve_request(
    args: &BackupArgs,
    app_config: &AppConfig,
    env: &dyn Fn(&str) -> Option<String>,
) -> std::result::Result<BackupRequest, BackupError> {
    let db_kind: DbKind = args.db_type.parse()?;
    let storage_kind: StorageKind = args.storage.parse()?;
    let backup_type: BackupType = args.backup_type.parse()?;

    let (user_var, password_var, host_var) = credential_env_vars(db_kind);
    let file = app_config.raw_json_config.credentials.get(&db_kind);

    let host = first_of([
        args.host.clone(),
        env(host_var),
        file.and_then(|c| c.host.clone()),
    ])
    .unwrap_or_else(|| "localhost".to_string());
    let user = first_of([args.user.clone(), env(user_var), file.and_then(|c| c.user.clone())]);
    let password = first_of([
        args.password.clone(),
        env(password_var),
        file.and_then(|c| c.password.clone()),
    ]);
    let port = args
        .port
        .or_else(|| file.and_then(|c| c.port))
        .unwrap_or_else(|| db_kind.default_port());

    Ok(BackupRequest {
        db_kind,
        connection: ConnectionParams {
            host,
            port,
            user,
            password,
            db_name: args.db_name.trim().to_string(),
        },
        backup_type,
        storage_kind,
        compress: args.compress,
    })
}

pub fn resolve_job_settings(args: &BackupArgs, app_config: &AppConfig) -> JobSettings {
    let raw = &app_config.raw_json_config;
    JobSettings {
        work_dir: args
            .work_dir
            .clone()
            .or_else(|| raw.work_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_WORK_DIR)),
        dump_timeout: Duration::from_secs(
            args.dump_timeout
                .or(raw.dump_timeout_secs)
                .unwrap_or(DEFAULT_DUMP_TIMEOUT_SECS),
        ),
        check_connection: !args.skip_connection_check && raw.check_connection.unwrap_or(true),
        history_file: args.history_file.clone().or_else(|| raw.history_file.clone()),
    }
}

pub fn resolve_storage_settings(args: &BackupArgs, app_config: &AppConfig) -> StorageSettings {
    StorageSettings {
        local_backup_dir: args
            .local_dir
            .clone()
            .or_else(|| app_config.raw_json_config.local_backup_dir.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_LOCAL_BACKUP_DIR)),
        s3: app_config.spaces_config.clone(),
    }
}
