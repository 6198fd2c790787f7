//! Configuration types.

use std::path::PathBuf;

use crate::error::ConfigError;

/// Downloader configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Address the HTTP/WS server binds to.
    pub bind_addr: String,
    /// Maximum number of downloads running at the same time.
    pub max_concurrent: usize,
    /// Directory for finished downloads.
    pub download_dir: PathBuf,
    /// Scratch directory for in-flight downloads.
    pub temp_dir: PathBuf,
    /// Path of the task database. `None` keeps everything in memory.
    pub db_path: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:5522".to_string(),
            max_concurrent: 2,
            download_dir: PathBuf::from("./downloads"),
            temp_dir: std::env::temp_dir().join("slugdl"),
            db_path: Some(PathBuf::from("./data/slugdl.db")),
        }
    }
}

impl Config {
    /// Build a config from `SLUGDL_*` environment variables, falling back
    /// to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut cfg = Self::default();

        if let Ok(addr) = std::env::var("SLUGDL_BIND_ADDR") {
            cfg.bind_addr = addr;
        }

        if let Ok(raw) = std::env::var("SLUGDL_MAX_CONCURRENT") {
            let n: usize = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "SLUGDL_MAX_CONCURRENT".to_string(),
                message: format!("expected a positive integer, got {raw:?}"),
            })?;
            if n == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "SLUGDL_MAX_CONCURRENT".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            cfg.max_concurrent = n;
        }

        if let Ok(dir) = std::env::var("SLUGDL_DOWNLOAD_DIR") {
            cfg.download_dir = PathBuf::from(dir);
        }

        if let Ok(dir) = std::env::var("SLUGDL_TEMP_DIR") {
            cfg.temp_dir = PathBuf::from(dir);
        }

        match std::env::var("SLUGDL_DB_PATH") {
            Ok(path) if path.is_empty() || path == ":memory:" => cfg.db_path = None,
            Ok(path) => cfg.db_path = Some(PathBuf::from(path)),
            Err(_) => {}
        }

        Ok(cfg)
    }

    /// Ensure the download and temp directories exist.
    pub fn ensure_dirs(&self) -> Result<(), ConfigError> {
        std::fs::create_dir_all(&self.download_dir)?;
        std::fs::create_dir_all(&self.temp_dir)?;
        Ok(())
    }
}
