//! Configuration for the ao binary

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::scheduler::SchedulerConfig;
use crate::workload::WorkloadConfig;

/// Top-level configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[serde(default)]
    pub log_level: Option<String>,

    #[serde(default)]
    pub scheduler: SchedulerConfig,

    #[serde(default)]
    pub workload: WorkloadConfig,
}

impl Config {
    /// Default config locations, in lookup order
    fn default_paths() -> Vec<PathBuf> {
        [
            dirs::config_dir().map(|p| p.join("aosched").join("config.yml")),
            Some(PathBuf::from("aosched.yml")),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// Load config from file, or use defaults
    pub fn load(path: Option<&PathBuf>) -> Result<Self> {
        debug!(?path, "Config::load: called");
        if let Some(config_path) = path {
            return Self::load_from(config_path);
        }

        for path in Self::default_paths() {
            if path.exists() {
                debug!(path = %path.display(), "Config::load: found default config");
                return Self::load_from(&path);
            }
        }

        debug!("Config::load: no config file, using defaults");
        Ok(Config::default())
    }

    fn load_from(path: &Path) -> Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("Failed to read config {}", path.display()))?;
        let config: Config =
            serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config {}", path.display()))?;
        Ok(config)
    }

    /// Peek at the log level before logging is set up; errors are ignored
    pub fn load_log_level(path: Option<&PathBuf>) -> Option<String> {
        Self::load(path).ok().and_then(|config| config.log_level)
    }

    /// Save config to file
    pub fn save(&self, path: &Path) -> Result<()> {
        debug!(path = %path.display(), "Config::save: called");
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workload::HostMode;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, None);
        assert_eq!(config.scheduler, SchedulerConfig::default());
        assert_eq!(config.workload, WorkloadConfig::default());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ao.yml");
        std::fs::write(
            &path,
            "log_level: debug\nscheduler:\n  tick_micros: 500\nworkload:\n  tickers: 1\n  mode: non-blocking\n",
        )
        .unwrap();

        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.log_level.as_deref(), Some("debug"));
        assert_eq!(config.scheduler.tick_micros, 500);
        assert_eq!(config.scheduler.ready_queue_reserve, 20);
        assert_eq!(config.workload.tickers, 1);
        assert_eq!(config.workload.mode, HostMode::NonBlocking);
        assert_eq!(config.workload.requesters, 4);
    }

    #[test]
    fn test_load_missing_explicit_path_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.yml");
        assert!(Config::load(Some(&path)).is_err());
        assert_eq!(Config::load_log_level(Some(&path)), None);
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("saved.yml");
        let mut config = Config::default();
        config.scheduler.memory_limit = Some(8192);
        config.save(&path).unwrap();

        let loaded = Config::load(Some(&path)).unwrap();
        assert_eq!(loaded, config);
    }
}
