use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use super::constants::{DEFAULT_API_VERSION, DEFAULT_PORT};
use super::error::ConfigError;

/// Structure representing the debug session configuration. Contains the REST connection,
/// acquisition parameters, and sequencer timing.
/// Configs are seralizable and deserializable to YAML using serde and serde_yaml. Every
/// field has a default, so a partial file is a valid config.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub port: u16,
    pub api_version: String,
    pub timeout_ms: u64,
    pub count_time: f64,
    pub frame_time: f64,
    pub nimages: u64,
    pub ntrigger: u64,
    pub trigger_mode: String,
    pub compression: String,
    pub images_per_file: u64,
    pub filewriter_compression: bool,
    pub restart_settle_ms: u64,
    pub poll_interval_ms: u64,
    pub finish_settle_ms: u64,
    pub plot_temperatures: bool,
    pub download_data: bool,
}

impl Default for Config {
    /// Generate a new Config object with the values used by the debug script
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            api_version: String::from(DEFAULT_API_VERSION),
            timeout_ms: 20_000,
            count_time: 1.0,
            frame_time: 1.0,
            nimages: 60,
            ntrigger: 20,
            trigger_mode: String::from("ints"),
            compression: String::from("bslz4"),
            images_per_file: 1000,
            filewriter_compression: true,
            restart_settle_ms: 3000,
            poll_interval_ms: 1000,
            finish_settle_ms: 2000,
            plot_temperatures: true,
            download_data: true,
        }
    }
}

impl Config {
    /// Read the configuration in a YAML file
    /// Returns a Config if successful
    pub fn read_config_file(config_path: &Path) -> Result<Self, ConfigError> {
        if !config_path.exists() {
            return Err(ConfigError::BadFilePath(config_path.to_path_buf()));
        }

        let yaml_str = std::fs::read_to_string(config_path)?;

        Ok(serde_yaml::from_str::<Self>(&yaml_str)?)
    }

    /// Write the configuration to a YAML file, replacing any existing file
    pub fn write_config_file(&self, config_path: &Path) -> Result<(), ConfigError> {
        let yaml_str = serde_yaml::to_string(self)?;
        std::fs::write(config_path, yaml_str)?;
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn restart_settle(&self) -> Duration {
        Duration::from_millis(self.restart_settle_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn finish_settle(&self) -> Duration {
        Duration::from_millis(self.finish_settle_ms)
    }
}
