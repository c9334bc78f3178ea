//! foldtrain - Training orchestration for 3-D structure prediction models
//!
//! This crate provides the training loop around an externally supplied
//! structure prediction model: EMA-shadowed validation, warmup-decay
//! learning-rate scheduling, structural quality metrics (lDDT, dRMSD,
//! RMSD, GDT, TM-score), checkpointing with three resume shapes, and
//! early stopping on a monitored validation metric.

#![warn(missing_docs)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod config;
pub mod error;
pub mod logging;
pub mod residues;
pub mod training;

// Re-exports
pub use config::{
    CheckpointConfig, DistributedConfig, EarlyStoppingConfig, EmaConfig, LrScheduleConfig,
    MetricsConfig, MonitorMode, OpenmmActivation, OpenmmLossConfig, Precision, TrainingConfig,
};
pub use error::{Error, Result};
pub use residues::{atom_order, ATOM_TYPES, ATOM_TYPE_COUNT, CA_IDX};
pub use training::{
    Batch, EmaWeightTracker, FoldTrainer, MetricsReport, MetricsSink, ModelOptimizer,
    ModelOutput, Phase, StructuralMetricsEngine, StructureLoss, StructureModel, TrainingState,
    TrainingStatus, ValidationWeightSwapper, WarmupDecayScheduler,
};
