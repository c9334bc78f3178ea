//! Training configuration for structure-prediction runs
//!
//! This module provides the configuration structures consumed by the trainer:
//! EMA settings, numeric precision, the relaxation loss term, structural
//! metric options, the learning-rate schedule, distributed execution and
//! checkpointing.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Main training configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingConfig {
    /// Maximum number of training epochs
    pub max_epochs: usize,

    /// Optional hard cap on global optimizer steps
    pub max_steps: Option<u64>,

    /// Seed for run-internal randomness; mandatory for multi-device runs
    pub seed: Option<u64>,

    /// Numeric precision of the run
    pub precision: Precision,

    /// Whether template features are enabled in the model. Checkpoints from
    /// template-enabled runs have their template keys filtered on EMA load
    /// when this is false.
    pub template_enabled: bool,

    /// EMA shadow-weight settings
    pub ema: EmaConfig,

    /// Relaxation-potential loss term settings
    pub openmm: OpenmmLossConfig,

    /// Structural metric settings
    pub metrics: MetricsConfig,

    /// Learning-rate schedule settings
    pub schedule: LrScheduleConfig,

    /// Distributed execution settings
    pub distributed: DistributedConfig,

    /// Checkpointing and resume settings
    pub checkpoint: CheckpointConfig,

    /// Early stopping settings
    pub early_stopping: EarlyStoppingConfig,
}

/// Numeric precision of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Precision {
    /// 32-bit floating point
    Full,
    /// 16-bit floating point
    Half,
}

impl Precision {
    /// True for reduced-precision runs
    pub fn is_reduced(&self) -> bool {
        matches!(self, Precision::Half)
    }
}

/// EMA shadow-weight settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaConfig {
    /// Blend factor applied to the shadow value at each update, in [0, 1)
    pub decay: f64,
}

impl Default for EmaConfig {
    fn default() -> Self {
        Self { decay: 0.999 }
    }
}

/// Settings for the relaxation-potential loss term
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenmmLossConfig {
    /// Whether the term participates in the total loss
    pub enabled: bool,

    /// Weight of the term in the total loss
    pub weight: f64,

    /// Activation applied to the raw potential before weighting
    pub activation: OpenmmActivation,
}

impl Default for OpenmmLossConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            weight: 0.1,
            activation: OpenmmActivation::Sigmoid,
        }
    }
}

/// Activation applied to the relaxation potential.
///
/// Decided once at configuration parse time; use sites dispatch on the
/// variant, never on a string key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpenmmActivation {
    /// Logistic squashing of the potential into (0, 1)
    Sigmoid,
    /// Clamp negative potentials to zero
    Relu,
    /// Use the raw potential
    None,
}

impl OpenmmActivation {
    /// Apply the activation to a raw potential value
    pub fn apply(&self, x: f64) -> f64 {
        match self {
            OpenmmActivation::Sigmoid => 1.0 / (1.0 + (-x).exp()),
            OpenmmActivation::Relu => x.max(0.0),
            OpenmmActivation::None => x,
        }
    }
}

/// Structural metric settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Compute superimposition-based and all-atom metric families
    pub add_struct_metrics: bool,

    /// Inclusion radius in ångströms for distance-preservation scoring
    pub inclusion_radius: f64,

    /// Numerical stability epsilon; float mask entries above it count as set
    pub eps: f64,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            add_struct_metrics: false,
            inclusion_radius: 15.0,
            eps: 1e-10,
        }
    }
}

/// Learning-rate schedule settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LrScheduleConfig {
    /// Learning rate at step zero
    pub base_lr: f64,

    /// Peak learning rate reached at the end of warmup
    pub max_lr: f64,

    /// Number of linear warmup steps
    pub warmup_steps: u64,

    /// Step after which staircase decay begins
    pub start_decay_after_n_steps: u64,

    /// Width of each decay stair in steps
    pub decay_every_n_steps: u64,

    /// Multiplicative factor applied at each stair
    pub decay_factor: f64,
}

impl Default for LrScheduleConfig {
    fn default() -> Self {
        Self {
            base_lr: 0.0,
            max_lr: 1e-3,
            warmup_steps: 1000,
            start_decay_after_n_steps: 50_000,
            decay_every_n_steps: 50_000,
            decay_factor: 0.95,
        }
    }
}

/// Distributed execution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DistributedConfig {
    /// Path to a sharded-optimizer backend configuration; presence selects
    /// the sharded strategy
    pub sharded_optimizer_config: Option<PathBuf>,

    /// Accelerator devices per node
    pub device_count: usize,

    /// Participating nodes
    pub node_count: usize,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            sharded_optimizer_config: None,
            device_count: 1,
            node_count: 1,
        }
    }
}

/// Checkpointing and resume settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    /// Directory receiving consolidated checkpoints
    pub output_dir: PathBuf,

    /// Save a consolidated checkpoint every N epochs
    pub every_n_epochs: usize,

    /// Checkpoint to resume from; a consolidated file or a sharded directory
    pub resume_from: Option<PathBuf>,

    /// Restore model weights only: no step count, EMA or schedule position
    pub resume_model_weights_only: bool,
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("checkpoints"),
            every_n_epochs: 1,
            resume_from: None,
            resume_model_weights_only: false,
        }
    }
}

/// Early stopping settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EarlyStoppingConfig {
    /// Whether early stopping is active
    pub enabled: bool,

    /// Metric name monitored at validation-epoch end
    pub monitor: String,

    /// Direction in which the monitored metric improves
    pub mode: MonitorMode,

    /// Validation rounds without improvement before stopping
    pub patience: usize,

    /// Minimum change in the monitored metric that counts as improvement
    pub min_delta: f64,
}

impl Default for EarlyStoppingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            monitor: "val/lddt_ca".to_string(),
            mode: MonitorMode::Max,
            patience: 10,
            min_delta: 0.0,
        }
    }
}

/// Direction in which a monitored metric improves
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MonitorMode {
    /// Lower values are better
    Min,
    /// Higher values are better
    Max,
}

impl Default for TrainingConfig {
    fn default() -> Self {
        Self {
            max_epochs: 1,
            max_steps: None,
            seed: None,
            precision: Precision::Full,
            template_enabled: true,
            ema: EmaConfig::default(),
            openmm: OpenmmLossConfig::default(),
            metrics: MetricsConfig::default(),
            schedule: LrScheduleConfig::default(),
            distributed: DistributedConfig::default(),
            checkpoint: CheckpointConfig::default(),
            early_stopping: EarlyStoppingConfig::default(),
        }
    }
}

impl TrainingConfig {
    /// Load configuration from a JSON or YAML file, by extension
    pub fn from_file<P: AsRef<std::path::Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .context("Failed to read configuration file")?;

        let config = if path.as_ref().extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::from_str(&content).context("Failed to parse JSON configuration")?
        } else {
            serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?
        };

        Ok(config)
    }

    /// Save configuration to a file
    pub fn to_file<P: AsRef<std::path::Path>>(&self, path: P) -> Result<()> {
        let content = if path.as_ref().extension().and_then(|s| s.to_str()) == Some("json") {
            serde_json::to_string_pretty(self)
                .context("Failed to serialize configuration to JSON")?
        } else {
            serde_yaml::to_string(self).context("Failed to serialize configuration to YAML")?
        };

        std::fs::write(path.as_ref(), content).context("Failed to write configuration file")?;

        Ok(())
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.max_epochs == 0 {
            return Err(anyhow::anyhow!("Number of epochs must be greater than 0"));
        }

        if !(0.0..1.0).contains(&self.ema.decay) {
            return Err(anyhow::anyhow!("EMA decay must be in [0.0, 1.0)"));
        }

        if self.openmm.weight < 0.0 {
            return Err(anyhow::anyhow!("Relaxation loss weight must be non-negative"));
        }

        if self.metrics.inclusion_radius <= 0.0 {
            return Err(anyhow::anyhow!("Metric inclusion radius must be positive"));
        }

        if self.metrics.eps <= 0.0 {
            return Err(anyhow::anyhow!("Metric epsilon must be positive"));
        }

        if self.schedule.base_lr < 0.0 {
            return Err(anyhow::anyhow!("Base learning rate must be non-negative"));
        }

        if self.schedule.max_lr <= 0.0 {
            return Err(anyhow::anyhow!("Peak learning rate must be positive"));
        }

        if self.schedule.warmup_steps == 0 {
            return Err(anyhow::anyhow!("Warmup must span at least one step"));
        }

        if self.schedule.decay_every_n_steps == 0 {
            return Err(anyhow::anyhow!("Decay stair width must be at least one step"));
        }

        if self.schedule.decay_factor <= 0.0 || self.schedule.decay_factor > 1.0 {
            return Err(anyhow::anyhow!("Decay factor must be in (0.0, 1.0]"));
        }

        if self.distributed.device_count == 0 {
            return Err(anyhow::anyhow!("Device count must be at least 1"));
        }

        if self.distributed.node_count == 0 {
            return Err(anyhow::anyhow!("Node count must be at least 1"));
        }

        if self.checkpoint.every_n_epochs == 0 {
            return Err(anyhow::anyhow!("Checkpoint cadence must be at least one epoch"));
        }

        if self.early_stopping.enabled {
            if self.early_stopping.patience == 0 {
                return Err(anyhow::anyhow!("Early stopping patience must be at least 1"));
            }
            if self.early_stopping.min_delta < 0.0 {
                return Err(anyhow::anyhow!("Early stopping min_delta must be non-negative"));
            }
            if self.early_stopping.monitor.is_empty() {
                return Err(anyhow::anyhow!("Early stopping monitor metric must be named"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = TrainingConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_decay_out_of_range_rejected() {
        let mut config = TrainingConfig::default();
        config.ema.decay = 1.0;
        assert!(config.validate().is_err());

        config.ema.decay = -0.1;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_warmup_rejected() {
        let mut config = TrainingConfig::default();
        config.schedule.warmup_steps = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_activation_apply() {
        assert_eq!(OpenmmActivation::None.apply(-2.5), -2.5);
        assert_eq!(OpenmmActivation::Relu.apply(-2.5), 0.0);
        assert_eq!(OpenmmActivation::Relu.apply(3.0), 3.0);
        let s = OpenmmActivation::Sigmoid.apply(0.0);
        assert!((s - 0.5).abs() < 1e-12);
    }

    #[test]
    fn test_activation_parses_lowercase() {
        let a: OpenmmActivation = serde_json::from_str("\"sigmoid\"").unwrap();
        assert_eq!(a, OpenmmActivation::Sigmoid);
        let a: OpenmmActivation = serde_json::from_str("\"none\"").unwrap();
        assert_eq!(a, OpenmmActivation::None);
    }

    #[test]
    fn test_config_yaml_round_trip() {
        let config = TrainingConfig::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let parsed: TrainingConfig = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(parsed.ema.decay, config.ema.decay);
        assert_eq!(parsed.precision, config.precision);
        assert_eq!(parsed.schedule.warmup_steps, config.schedule.warmup_steps);
    }
}
