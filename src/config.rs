//! Server configuration, loaded from an optional YAML file.

use std::path::Path;

use serde::Deserialize;

use crate::error::{Error, Result};

pub const DEFAULT_PORT: u16 = 1316;
pub const DEFAULT_TRIG_MODE: u8 = 3;
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000;
pub const DEFAULT_THREAD_NUM: usize = 6;
pub const DEFAULT_SQL_HOST: &str = "localhost";
pub const DEFAULT_SQL_PORT: u16 = 3306;
pub const DEFAULT_SQL_POOL_NUM: usize = 12;
pub const DEFAULT_LOG_QUEUE: usize = 1024;

/// Top-level configuration.
///
/// Trigger mode selects level vs edge notification per socket class:
/// 0 = both level, 1 = edge connections, 2 = edge listener, 3 = both edge.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub trig_mode: u8,
    pub timeout_ms: u64,
    pub open_linger: bool,
    pub thread_num: usize,
    pub sql: SqlConfig,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SqlConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub db_name: String,
    pub pool_num: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    pub enable: bool,
    /// 0 = DEBUG, 1 = INFO, 2 = WARN, 3 = ERROR.
    pub level: u8,
    pub queue_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            trig_mode: DEFAULT_TRIG_MODE,
            timeout_ms: DEFAULT_TIMEOUT_MS,
            open_linger: false,
            thread_num: DEFAULT_THREAD_NUM,
            sql: SqlConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for SqlConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_SQL_HOST.to_string(),
            port: DEFAULT_SQL_PORT,
            user: "root".to_string(),
            password: "root".to_string(),
            db_name: "webserver".to_string(),
            pool_num: DEFAULT_SQL_POOL_NUM,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            enable: true,
            level: 1,
            queue_capacity: DEFAULT_LOG_QUEUE,
        }
    }
}

impl Config {
    /// Reads the configuration from `path`, falling back to the defaults when
    /// the file does not exist. The result is always validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let config = if path.exists() {
            serde_yaml::from_str(&std::fs::read_to_string(path)?)?
        } else {
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.port < 1024 {
            return Err(Error::Config(format!(
                "port {} out of range [1024, 65535]",
                self.port
            )));
        }
        if self.trig_mode > 3 {
            return Err(Error::Config(format!(
                "trigger mode {} out of range [0, 3]",
                self.trig_mode
            )));
        }
        if self.thread_num == 0 {
            return Err(Error::Config("worker thread count must be >= 1".into()));
        }
        if self.sql.pool_num == 0 {
            return Err(Error::Config("sql pool size must be >= 1".into()));
        }
        if self.log.level > 3 {
            return Err(Error::Config(format!(
                "log level {} out of range [0, 3]",
                self.log.level
            )));
        }
        Ok(())
    }
}
