//! Configuration types for the scoring crate.

use candle_core::Device;
use serde::Deserialize;
use std::path::PathBuf;

/// Where the forward pass runs.
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
#[serde(tag = "type")]
pub enum DeviceConfig {
    /// Plain CPU.
    #[serde(rename = "cpu")]
    #[default]
    Cpu,
    /// CUDA GPU with the given ordinal.
    #[serde(rename = "cuda")]
    Cuda { ordinal: usize },
}

impl DeviceConfig {
    pub fn to_candle_device(&self) -> anyhow::Result<Device> {
        match self {
            Self::Cpu => Ok(Device::Cpu),
            Self::Cuda { ordinal } => Ok(Device::new_cuda(*ordinal)?),
        }
    }
}

/// Configuration for the scoring model.
#[derive(Debug, Clone, Deserialize)]
pub struct ScoringConfig {
    /// Path to the model directory (with config.json, tokenizer.json,
    /// *.safetensors).
    pub model_path: PathBuf,
    /// Maximum total sequence length (prompt plus generated tokens).
    #[serde(default = "default_max_seq_len")]
    pub max_seq_len: usize,
    /// Device to run inference on.
    #[serde(default)]
    pub device: DeviceConfig,
}

fn default_max_seq_len() -> usize {
    2048
}

impl ScoringConfig {
    /// Create a config with the given model path and defaults.
    pub fn new(model_path: PathBuf) -> Self {
        Self {
            model_path,
            max_seq_len: default_max_seq_len(),
            device: DeviceConfig::default(),
        }
    }
}
