use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Rolling {
    Minutely,
    Hourly,
    #[default]
    Daily,
    Never,
}

impl From<Rolling> for Rotation {
    fn from(r: Rolling) -> Self {
        match r {
            Rolling::Minutely => Rotation::MINUTELY,
            Rolling::Hourly => Rotation::HOURLY,
            Rolling::Daily => Rotation::DAILY,
            Rolling::Never => Rotation::NEVER,
        }
    }
}

/// Logging setup for a host process. Logs go to stdout unless `file_dir`
/// is set, in which case a rolling file appender is used.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggerConfig {
    #[serde(default = "default_level")]
    pub level: String,
    pub file_dir: Option<String>,
    pub file_prefix: Option<String>,
    #[serde(default)]
    pub rolling: Rolling,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
}

fn default_level() -> String {
    "info".to_string()
}

fn default_max_files() -> usize {
    2
}

impl LoggerConfig {
    /// Reads `STEPRT_LOG_LEVEL`, `STEPRT_LOG_DIR`, `STEPRT_LOG_PREFIX` and
    /// `STEPRT_LOG_ROLLING`; unset variables keep their defaults.
    pub fn from_env() -> Self {
        let rolling = match std::env::var("STEPRT_LOG_ROLLING").ok().as_deref() {
            Some("minutely") => Rolling::Minutely,
            Some("hourly") => Rolling::Hourly,
            Some("never") => Rolling::Never,
            _ => Rolling::Daily,
        };

        Self {
            level: std::env::var("STEPRT_LOG_LEVEL").unwrap_or_else(|_| default_level()),
            file_dir: std::env::var("STEPRT_LOG_DIR").ok(),
            file_prefix: std::env::var("STEPRT_LOG_PREFIX").ok(),
            rolling,
            max_files: default_max_files(),
        }
    }

    /// Installs the global subscriber. The returned guard must be kept alive
    /// for as long as file logging should flush.
    pub fn init(&self) -> anyhow::Result<Option<WorkerGuard>> {
        let level = Level::from_str(&self.level).unwrap_or(Level::INFO);

        let Some(dir) = self.file_dir.as_deref() else {
            let _ = tracing_subscriber::fmt().with_max_level(level).try_init();
            tracing::info!("logging to stdout");
            return Ok(None);
        };

        let prefix = self.file_prefix.as_deref().unwrap_or("steprt");
        let appender = RollingFileAppender::builder()
            .rotation(self.rolling.into())
            .max_log_files(self.max_files)
            .filename_prefix(prefix)
            .build(dir)
            .with_context(|| format!("failed to create rolling appender in {dir}"))?;

        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = tracing_subscriber::fmt()
            .with_max_level(level)
            .with_ansi(false)
            .with_writer(writer)
            .try_init();

        tracing::info!(dir, prefix, rolling = ?self.rolling, "logging to file");
        Ok(Some(guard))
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            file_dir: None,
            file_prefix: None,
            rolling: Rolling::Daily,
            max_files: default_max_files(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deserializes_with_defaults() {
        let cfg: LoggerConfig = serde_json::from_value(json!({"rolling": "hourly"})).unwrap();
        assert_eq!(cfg.level, "info");
        assert_eq!(cfg.rolling, Rolling::Hourly);
        assert_eq!(cfg.max_files, 2);
        assert!(cfg.file_dir.is_none());
    }
}
