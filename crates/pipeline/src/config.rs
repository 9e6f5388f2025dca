//! Session configuration types and serialization

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Component, Path};

use crate::error::{PipelineError, PipelineResult};
use crate::graph::MINIMUM_COOLDOWN;
use crate::stage::{CycleRange, ModuleKind};

/// Complete description of a session: buffers, modules, scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Configuration format version
    #[serde(default = "default_version")]
    pub version: String,
    pub buffers: Vec<BufferConfig>,
    /// Modules in evaluation order
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
    #[serde(default)]
    pub analysis: AnalysisConfig,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// One named buffer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BufferConfig {
    pub name: String,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Accept a single write until cleared
    #[serde(default, rename = "static")]
    pub is_static: bool,
    /// Contents after creation and after every clear
    #[serde(default)]
    pub initial: Vec<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StorageConfig {
    Memory {
        #[serde(default)]
        size: usize,
    },
    /// Spill file location is chosen by the host per session.
    Hybrid { memory_size: usize },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Memory { size: 0 }
    }
}

/// One analysis module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModuleConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: ModuleKind,
    #[serde(default)]
    pub inputs: Vec<InputConfig>,
    #[serde(default)]
    pub outputs: Vec<OutputConfig>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub cycles: Vec<CycleRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum InputConfig {
    Buffer {
        buffer: String,
        #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    Value {
        value: f64,
        #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
}

impl InputConfig {
    pub fn buffer_name(&self) -> Option<&str> {
        match self {
            InputConfig::Buffer { buffer, .. } => Some(buffer),
            InputConfig::Value { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputConfig {
    pub buffer: String,
    #[serde(default, rename = "as", skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Replace contents instead of appending
    #[serde(default = "default_clear")]
    pub clear: bool,
}

fn default_clear() -> bool {
    true
}

/// Scheduler settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Cooldown between a request and its cycle, in seconds
    #[serde(default = "default_sleep")]
    pub sleep: f64,
    /// Buffer whose last value overrides `sleep`
    #[serde(default)]
    pub dynamic_sleep: Option<String>,
    /// Skip cycles until this buffer holds `require_fill_threshold` values
    #[serde(default)]
    pub require_fill: Option<String>,
    #[serde(default)]
    pub require_fill_threshold: usize,
    /// Buffer whose last value overrides `require_fill_threshold`
    #[serde(default)]
    pub require_fill_dynamic: Option<String>,
    /// Run cycles only on request instead of back to back
    #[serde(default)]
    pub on_user_input: bool,
}

fn default_sleep() -> f64 {
    MINIMUM_COOLDOWN
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        Self {
            sleep: default_sleep(),
            dynamic_sleep: None,
            require_fill: None,
            require_fill_threshold: 0,
            require_fill_dynamic: None,
            on_user_input: false,
        }
    }
}

impl SystemConfig {
    pub fn from_json_str(json: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_json_file(path: &Path) -> PipelineResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json_str(&text)
    }

    pub fn buffer(&self, name: &str) -> Option<&BufferConfig> {
        self.buffers.iter().find(|b| b.name == name)
    }

    pub fn has_hybrid_buffers(&self) -> bool {
        self.buffers
            .iter()
            .any(|b| matches!(b.storage, StorageConfig::Hybrid { .. }))
    }

    /// Validate the configuration
    pub fn validate(&self) -> PipelineResult<()> {
        if self.buffers.is_empty() {
            return Err(PipelineError::InvalidConfiguration {
                message: "Configuration must declare at least one buffer".to_string(),
            });
        }

        let mut names = HashSet::new();
        for buffer in &self.buffers {
            if !is_file_name(&buffer.name) {
                return Err(PipelineError::InvalidConfiguration {
                    message: format!(
                        "Buffer name '{}' must be a non-empty plain file name",
                        buffer.name
                    ),
                });
            }
            if !names.insert(buffer.name.as_str()) {
                return Err(PipelineError::DuplicateBuffer {
                    name: buffer.name.clone(),
                });
            }
        }

        let known = |name: &str| -> PipelineResult<()> {
            if names.contains(name) {
                Ok(())
            } else {
                Err(PipelineError::BufferNotFound {
                    name: name.to_string(),
                })
            }
        };

        for (index, module) in self.modules.iter().enumerate() {
            if module.outputs.is_empty() {
                return Err(PipelineError::InvalidModule {
                    module: module
                        .name
                        .clone()
                        .unwrap_or_else(|| format!("{}{}", module.kind.type_name(), index)),
                    message: "module declares no outputs".to_string(),
                });
            }
            for name in module.inputs.iter().filter_map(InputConfig::buffer_name) {
                known(name)?;
            }
            for output in &module.outputs {
                known(&output.buffer)?;
            }
        }

        let analysis = &self.analysis;
        if !analysis.sleep.is_finite() || analysis.sleep < 0.0 {
            return Err(PipelineError::InvalidConfiguration {
                message: format!("sleep must be a non-negative number, got {}", analysis.sleep),
            });
        }
        for name in [
            &analysis.dynamic_sleep,
            &analysis.require_fill,
            &analysis.require_fill_dynamic,
        ]
        .into_iter()
        .flatten()
        {
            known(name)?;
        }

        Ok(())
    }
}

// Buffer names end up in spill and state file names.
fn is_file_name(name: &str) -> bool {
    if name.contains(['/', '\\']) {
        return false;
    }
    let mut components = Path::new(name).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(part)), None) if part == name
    )
}
