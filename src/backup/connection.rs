// db-backup-cli/src/backup/connection.rs
use async_trait::async_trait;
use regex::Regex;
use sqlx::{Connection, MySqlConnection, PgConnection};
use std::sync::LazyLock;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, info};
use url::Url;

use crate::backup::request::{ConnectionParams, DbKind};
use crate::errors::{BackupError, Result};

// Database names end up in file names, so path separators are not allowed.
static DB_NAME_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9_][A-Za-z0-9_.\-]*$").expect("valid db name pattern"));

const PROBE_TIMEOUT: Duration = Duration::from_secs(15);

/// Checks the parameters every engine needs before anything touches the network.
pub fn validate_params(db_kind: DbKind, params: &ConnectionParams) -> Result<()> {
    let invalid = |message: String| BackupError::Connection { db_kind, message };

    if params.db_name.trim().is_empty() {
        return Err(invalid("database name must not be empty".to_string()));
    }
    if !DB_NAME_PATTERN.is_match(&params.db_name) {
        return Err(invalid(format!("invalid character in database name: {}", params.db_name)));
    }
    if params.host.trim().is_empty() {
        return Err(invalid("host must not be empty".to_string()));
    }
    if params.port == 0 {
        return Err(invalid("port must be greater than zero".to_string()));
    }
    Ok(())
}

/// Builds a `mysql://` or `postgres://` URL with percent-encoded credentials.
pub fn connection_url(db_kind: DbKind, params: &ConnectionParams) -> Result<Url> {
    let scheme = match db_kind {
        DbKind::Mysql => "mysql",
        DbKind::Postgres => "postgres",
        DbKind::Mongodb => "mongodb",
    };
    let invalid = |message: String| BackupError::Connection { db_kind, message };

    let mut url = Url::parse(&format!("{}://{}:{}", scheme, params.host, params.port))
        .map_err(|e| invalid(format!("invalid host {}: {}", params.host, e)))?;
    if let Some(user) = &params.user {
        url.set_username(user)
            .map_err(|_| invalid(format!("cannot use user name {}", user)))?;
    }
    if let Some(password) = &params.password {
        url.set_password(Some(password))
            .map_err(|_| invalid("cannot set password on connection URL".to_string()))?;
    }
    url.set_path(&params.db_name);
    Ok(url)
}

/// The "Connecting" stage of a backup run.
#[async_trait]
pub trait ConnectionProbe: Send + Sync {
    async fn verify(&self, db_kind: DbKind, params: &ConnectionParams) -> Result<()>;
}

/// Opens a real session for SQL engines and a TCP connection for MongoDB.
#[derive(Debug, Default, Clone, Copy)]
pub struct NetworkProbe;

#[async_trait]
impl ConnectionProbe for NetworkProbe {
    async fn verify(&self, db_kind: DbKind, params: &ConnectionParams) -> Result<()> {
        validate_params(db_kind, params)?;
        let failed = |message: String| BackupError::Connection { db_kind, message };
        debug!("Probing {} at {}:{}", db_kind, params.host, params.port);

        let attempt = async {
            match db_kind {
                DbKind::Postgres => {
                    let url = connection_url(db_kind, params)?;
                    let conn = PgConnection::connect(url.as_str()).await.map_err(|e| failed(e.to_string()))?;
                    conn.close().await.map_err(|e| failed(e.to_string()))
                }
                DbKind::Mysql => {
                    let url = connection_url(db_kind, params)?;
                    let conn = MySqlConnection::connect(url.as_str()).await.map_err(|e| failed(e.to_string()))?;
                    conn.close().await.map_err(|e| failed(e.to_string()))
                }
                DbKind::Mongodb => TcpStream::connect((params.host.as_str(), params.port))
                    .await
                    .map(|_| ())
                    .map_err(|e| failed(format!("{}:{} is not reachable: {}", params.host, params.port, e))),
            }
        };

        timeout(PROBE_TIMEOUT, attempt)
            .await
            .map_err(|_| failed(format!("no response within {} seconds", PROBE_TIMEOUT.as_secs())))??;

        info!("✅ Successfully connected to {} database {}", db_kind, params.db_name);
        Ok(())
    }
}

/// Used when connection checks are disabled. Still validates parameters.
#[derive(Debug, Default, Clone, Copy)]
pub struct ParamsOnlyProbe;

#[async_trait]
impl ConnectionProbe for ParamsOnlyProbe {
    async fn verify(&self, db_kind: DbKind, params: &ConnectionParams) -> Result<()> {
        validate_params(db_kind, params)
    }
}
