//! Batched feature tensors and the recycling-axis collapse
//!
//! A batch is a named collection of feature tensors. Raw batches carry one
//! trailing recycling axis on every feature; collapsing it selects the last
//! recycling slice, which is what loss and metric computation consume.

use std::collections::BTreeMap;

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};

/// Feature key for reference atom coordinates, shape `(B, R, A, 3)`
pub const ALL_ATOM_POSITIONS: &str = "all_atom_positions";

/// Feature key for the atom validity mask, shape `(B, R, A)`
pub const ALL_ATOM_MASK: &str = "all_atom_mask";

/// Feature key for the loss clamping switch, forced to 0 during validation
pub const USE_CLAMPED_FAPE: &str = "use_clamped_fape";

/// A named collection of feature tensors for one batch
#[derive(Debug, Clone)]
pub struct Batch {
    features: BTreeMap<String, Tensor>,
}

impl Batch {
    /// Build a batch, requiring the reference coordinate and mask features
    pub fn new(features: BTreeMap<String, Tensor>) -> Result<Self> {
        for required in [ALL_ATOM_POSITIONS, ALL_ATOM_MASK] {
            if !features.contains_key(required) {
                return Err(Error::shape(format!("batch is missing feature '{required}'")));
            }
        }
        Ok(Self { features })
    }

    /// Access a feature tensor by name
    pub fn feature(&self, name: &str) -> Result<&Tensor> {
        self.features
            .get(name)
            .ok_or_else(|| Error::shape(format!("batch has no feature '{name}'")))
    }

    /// Insert or replace a feature tensor
    pub fn insert(&mut self, name: impl Into<String>, tensor: Tensor) {
        self.features.insert(name.into(), tensor);
    }

    /// All features in name order
    pub fn features(&self) -> &BTreeMap<String, Tensor> {
        &self.features
    }

    /// Reference atom coordinates
    pub fn positions(&self) -> Result<&Tensor> {
        self.feature(ALL_ATOM_POSITIONS)
    }

    /// Atom validity mask
    pub fn mask(&self) -> Result<&Tensor> {
        self.feature(ALL_ATOM_MASK)
    }

    /// Device the batch lives on, taken from the coordinate feature
    pub fn device(&self) -> Result<Device> {
        Ok(self.positions()?.device().clone())
    }

    /// Leading batch dimension
    pub fn batch_size(&self) -> Result<usize> {
        let dims = self.positions()?.dims();
        dims.first()
            .copied()
            .ok_or_else(|| Error::shape("coordinate feature has no batch dimension"))
    }

    /// Select the last recycling slice of every feature.
    ///
    /// Each tensor loses its trailing axis; rank-0 features pass through
    /// unchanged.
    pub fn collapse_recycling(&self) -> Result<Batch> {
        let mut collapsed = BTreeMap::new();
        for (name, tensor) in &self.features {
            let rank = tensor.rank();
            if rank == 0 {
                collapsed.insert(name.clone(), tensor.clone());
                continue;
            }
            let last = rank - 1;
            let len = tensor.dims()[last];
            if len == 0 {
                return Err(Error::shape(format!("feature '{name}' has an empty recycling axis")));
            }
            let slice = tensor.narrow(last, len - 1, 1)?.squeeze(last)?;
            collapsed.insert(name.clone(), slice);
        }
        Ok(Self { features: collapsed })
    }
}
