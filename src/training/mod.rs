//! Training-loop orchestration for structure prediction models
//!
//! This module provides the full training infrastructure: the trainer that
//! drives an externally supplied model, loss and optimizer through epochs,
//! the EMA weight shadow and the swap protocol that validates on it,
//! warmup-decay learning-rate scheduling, structural quality metrics, and
//! checkpointing in consolidated, sharded and weights-only shapes.
//!
//! # Main Components
//!
//! - [`FoldTrainer`]: Orchestrates training steps, validation rounds,
//!   checkpoints and resume
//! - [`StructuralMetricsEngine`]: Computes lDDT, dRMSD, RMSD, GDT and
//!   related scores from predicted and reference coordinates
//! - [`EmaWeightTracker`]: Exponential moving average shadow of the live
//!   parameters
//! - [`ValidationWeightSwapper`]: Swaps EMA weights in for validation and
//!   restores the live weights afterwards
//! - [`WarmupDecayScheduler`]: Linear warmup then stepwise decay schedule
//! - [`CheckpointStateManager`]: Serializes and restores full run state
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use foldtrain::config::TrainingConfig;
//! use foldtrain::training::{FoldTrainer, TracingSink};
//!
//! let config = TrainingConfig::from_file("train.yaml")?;
//! let mut trainer =
//!     FoldTrainer::new(config, model, loss, optimizer)?.with_sink(TracingSink);
//! let state = trainer.fit(&train_batches, &val_batches)?;
//! println!("finished at step {}", state.global_step);
//! ```

pub mod batch;
pub mod checkpoints;
pub mod distributed;
pub mod ema;
pub mod metrics;
pub mod model;
pub mod schedulers;
pub mod swap;
pub mod trainer;

// Tests module
#[cfg(test)]
pub mod tests;

// Batch re-exports
pub use batch::{Batch, ALL_ATOM_MASK, ALL_ATOM_POSITIONS, USE_CLAMPED_FAPE};

// Checkpoint re-exports
pub use checkpoints::{
    open_checkpoint, CheckpointSource, CheckpointStateManager, ConsolidatedCheckpoint,
    EmaFragment, ShardedCheckpoint, TensorState, TrainingCheckpoint, MODEL_NAMESPACE,
    TEMPLATE_MARKER,
};

// Distributed re-exports
pub use distributed::{select_strategy, ExecutionStrategy};

// EMA re-exports
pub use ema::EmaWeightTracker;

// Metrics re-exports
pub use metrics::{
    JsonlSink, MetricRecord, MetricsReport, MetricsSink, Phase, RecordingSink,
    StructuralMetricsEngine, TracingSink,
};

// Model interface re-exports
pub use model::{
    LossBreakdown, ModelOptimizer, ModelOutput, StructureLoss, StructureModel, OPENMM_ENERGY,
};

// Scheduler re-exports
pub use schedulers::{SchedulerStateDict, WarmupDecayScheduler, FRESH_RUN};

// Swap re-exports
pub use swap::{SwapState, ValidationWeightSwapper};

// Trainer re-exports
pub use trainer::{FoldTrainer, StepOutcome, TrainingState, TrainingStatus};
