use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::block::GLOBAL_WORKSPACE_ID;
use crate::error::{BlockdeckError, Result};

pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Storage engine behind the remote service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum DbType {
    #[default]
    Sqlite3,
    Loro,
}

impl std::fmt::Display for DbType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DbType::Sqlite3 => write!(f, "sqlite3"),
            DbType::Loro => write!(f, "loro"),
        }
    }
}

impl std::str::FromStr for DbType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "sqlite3" | "sqlite" => Ok(DbType::Sqlite3),
            "loro" => Ok(DbType::Loro),
            _ => Err(format!("Invalid dbtype: {}", s)),
        }
    }
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub server_root: String,
    pub port: u16,
    pub dbtype: DbType,
    /// Connection string; a file path for both supported backends.
    pub dbconfig: String,
    pub webpath: PathBuf,
    pub filespath: PathBuf,
    pub telemetry: bool,
    /// Seconds until a session expires.
    pub session_expire_time: i64,
    /// Seconds between session refreshes.
    pub session_refresh_time: i64,
    pub enable_local_mode: bool,
    pub local_mode_socket_location: PathBuf,
    /// Workspace new blocks are scoped to.
    pub workspace_id: String,
    /// Undo depth; oldest commands are dropped beyond it.
    pub history_limit: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_root: "http://localhost:8000".to_string(),
            port: 8000,
            dbtype: DbType::Sqlite3,
            dbconfig: "./blockdeck.db".to_string(),
            webpath: PathBuf::from("./pack"),
            filespath: PathBuf::from("./files"),
            telemetry: true,
            session_expire_time: 60 * 60 * 24 * 30,
            session_refresh_time: 60 * 60 * 5,
            enable_local_mode: false,
            local_mode_socket_location: PathBuf::from("/var/tmp/blockdeck_local.socket"),
            workspace_id: GLOBAL_WORKSPACE_ID.to_string(),
            history_limit: 100,
        }
    }
}

impl Config {
    /// Read and validate a JSON config file. Missing keys take defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| {
            BlockdeckError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, defaults otherwise.
    pub fn load_or_default(path: &Path) -> Result<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.port == 0 {
            return Err(BlockdeckError::Config("port must be non-zero".to_string()));
        }
        if self.dbconfig.trim().is_empty() {
            return Err(BlockdeckError::Config("dbconfig must not be empty".to_string()));
        }
        if self.session_expire_time <= 0 || self.session_refresh_time <= 0 {
            return Err(BlockdeckError::Config(
                "session intervals must be positive".to_string(),
            ));
        }
        if self.history_limit == 0 {
            return Err(BlockdeckError::Config(
                "historyLimit must be at least 1".to_string(),
            ));
        }
        if self.enable_local_mode && self.local_mode_socket_location.as_os_str().is_empty() {
            return Err(BlockdeckError::Config(
                "localModeSocketLocation is required when local mode is enabled".to_string(),
            ));
        }
        Ok(())
    }
}
