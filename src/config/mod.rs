// Configuration management for tonedeck
// Handles loading/saving settings, with sensible defaults when config is missing

use anyhow::Result;
use dirs::config_dir;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub engine: EngineConfig,
    pub storage: StorageConfig,
    pub remote: RemoteConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub analyser_size: usize,
    /// Position polls per second while playing
    pub frame_rate: u32,
    pub compressor_threshold_db: f32,
    pub compressor_ratio: f32,
    /// Stereo width with 3D on
    pub wide_width: f32,
    pub neutral_width: f32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub state_path: PathBuf,
    pub history_path: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            analyser_size: 256,
            frame_rate: 60,
            compressor_threshold_db: -30.0,
            compressor_ratio: 3.0,
            wide_width: 0.8,
            neutral_width: 0.5,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = app_dir();

        Self {
            engine: EngineConfig::default(),
            storage: StorageConfig {
                state_path: data_dir.join("library.db"),
                history_path: data_dir.join("history.db"),
            },
            remote: RemoteConfig { timeout_secs: 30 },
            logging: LoggingConfig {
                log_dir: data_dir.join("logs"),
            },
        }
    }
}

fn app_dir() -> PathBuf {
    config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tonedeck")
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path()?)
    }

    /// Read `path`, writing the defaults there first if it does not exist
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let content = fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            Ok(config)
        } else {
            let config = Config::default();
            config.save_to(path)?;
            Ok(config)
        }
    }

    pub fn save(&self) -> Result<()> {
        self.save_to(&Self::config_path()?)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        let content = toml::to_string_pretty(self)?;
        fs::write(path, content)?;

        Ok(())
    }

    fn config_path() -> Result<PathBuf> {
        let config_dir = config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?
            .join("tonedeck");

        Ok(config_dir.join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_config_is_created_with_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let config = Config::load_from(&path).unwrap();
        assert!(path.exists());
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.remote.timeout_secs, 30);
    }

    #[test]
    fn test_partial_engine_section_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let mut config = Config::default();
        config.storage.state_path = dir.path().join("state.db");
        config.save_to(&path).unwrap();

        let content = fs::read_to_string(&path)
            .unwrap()
            .replace("analyser_size = 256\n", "analyser_size = 512\n")
            .replace("frame_rate = 60\n", "");
        fs::write(&path, content).unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.engine.analyser_size, 512);
        assert_eq!(loaded.engine.frame_rate, 60);
        assert_eq!(loaded.storage.state_path, dir.path().join("state.db"));
    }
}
