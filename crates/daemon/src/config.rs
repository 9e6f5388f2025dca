use analysis_pipeline::SystemConfig;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Configuration for the mock sensor feeding the session
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SensorConfig {
    /// Buffer the samples are appended to
    pub buffer: String,
    /// Samples per second
    pub sample_rate_hz: f64,
    /// Samples appended per batch
    pub batch_size: usize,
    /// Sine frequency in Hz
    pub frequency_hz: f64,
    pub amplitude: f64,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            buffer: "acc".to_string(),
            sample_rate_hz: 100.0,
            batch_size: 10,
            frequency_hz: 1.0,
            amplitude: 1.0,
        }
    }
}

/// Configuration for the daemon
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    /// Pipeline description, YAML or JSON
    pub pipeline: PathBuf,
    /// Session directory for spill and state files
    pub storage_dir: Option<PathBuf>,
    /// Write every buffer's state file into `storage_dir` on shutdown
    pub save_state_on_exit: bool,
    pub sensor: SensorConfig,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            pipeline: PathBuf::from("pipelines/default.yaml"),
            storage_dir: None,
            save_state_on_exit: false,
            sensor: SensorConfig::default(),
        }
    }
}

impl DaemonConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !(self.sensor.sample_rate_hz.is_finite() && self.sensor.sample_rate_hz > 0.0) {
            bail!("sensor.sample_rate_hz must be positive");
        }
        if self.sensor.batch_size == 0 {
            bail!("sensor.batch_size must be at least 1");
        }
        if self.save_state_on_exit && self.storage_dir.is_none() {
            bail!("save_state_on_exit needs a storage_dir");
        }
        Ok(())
    }
}

/// Load daemon configuration, falling back to defaults when the file is missing
pub fn load_config(path: &Path) -> anyhow::Result<DaemonConfig> {
    if !path.exists() {
        tracing::info!("No configuration at '{}', using defaults", path.display());
        return Ok(DaemonConfig::default());
    }
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read configuration file at '{}'", path.display()))?;
    let config: DaemonConfig = serde_json::from_str(&contents)
        .with_context(|| format!("Could not parse configuration file at '{}'", path.display()))?;
    config.validate()?;
    tracing::info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Load a pipeline description. `.json` files are read as JSON, anything
/// else as YAML.
pub fn load_pipeline(path: &Path) -> anyhow::Result<SystemConfig> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Could not read pipeline at '{}'", path.display()))?;
    let config = match path.extension().and_then(|e| e.to_str()) {
        Some("json") => serde_json::from_str(&contents)?,
        _ => serde_yaml::from_str(&contents)?,
    };
    Ok(config)
}
