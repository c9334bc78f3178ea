//! Collaborator interfaces for the externally provided model, loss and optimizer
//!
//! The trainer owns lifecycle and bookkeeping only. Network architecture,
//! loss internals and gradient application live behind these traits.

use std::collections::BTreeMap;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;

use crate::error::Result;
use crate::training::batch::Batch;

/// Extra-output key carrying the per-example relaxation potential
pub const OPENMM_ENERGY: &str = "openmm_energy";

/// Output of one forward pass
#[derive(Debug)]
pub struct ModelOutput {
    /// Predicted atom coordinates, shape `(B, R, A, 3)`
    pub final_atom_positions: Tensor,

    /// Additional named outputs consumed by the loss
    pub extras: BTreeMap<String, Tensor>,
}

impl ModelOutput {
    /// Output carrying only predicted coordinates
    pub fn new(final_atom_positions: Tensor) -> Self {
        Self {
            final_atom_positions,
            extras: BTreeMap::new(),
        }
    }

    /// Attach a named extra output
    pub fn with_extra(mut self, name: impl Into<String>, tensor: Tensor) -> Self {
        self.extras.insert(name.into(), tensor);
        self
    }
}

/// A structure-prediction model driven by the trainer
pub trait StructureModel {
    /// Run one forward pass on a raw (recycling-carrying) batch
    fn forward(&self, batch: &Batch) -> Result<ModelOutput>;

    /// Live parameter store; the EMA tracker reads it and the weight swapper
    /// writes into it
    fn parameters(&self) -> &VarMap;

    /// Device the model runs on
    fn device(&self) -> &Device;
}

/// Named scalar loss terms for logging
pub type LossBreakdown = BTreeMap<String, f64>;

/// Loss over model output and a recycling-collapsed batch
pub trait StructureLoss {
    /// Returns the scalar loss tensor plus its term breakdown
    fn compute(&self, output: &ModelOutput, batch: &Batch) -> Result<(Tensor, LossBreakdown)>;
}

/// Gradient application, externally owned
pub trait ModelOptimizer {
    /// Backpropagate the loss and apply one parameter update
    fn step(&mut self, loss: &Tensor) -> Result<()>;

    /// Push the scheduler's current learning rate
    fn set_learning_rate(&mut self, lr: f64);
}
