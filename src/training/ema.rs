//! Exponential-moving-average shadow copy of the live parameters
//!
//! The shadow is updated after every optimizer step and is what validation
//! and checkpointed evaluation weights are taken from. Float parameters are
//! blended; integer buffers are copied verbatim.

use std::collections::BTreeMap;

use candle_core::{Device, Tensor};
use candle_nn::VarMap;
use tracing::debug;

use crate::error::{Error, Result};

/// EMA tracker over a live parameter store
#[derive(Debug)]
pub struct EmaWeightTracker {
    decay: f64,
    device: Device,
    shadow: BTreeMap<String, Tensor>,
}

impl EmaWeightTracker {
    /// Snapshot every live parameter onto `device`.
    ///
    /// The key set captured here is fixed for the tracker's lifetime.
    pub fn new(params: &VarMap, decay: f64, device: &Device) -> Result<Self> {
        let mut shadow = BTreeMap::new();
        let data = params.data().lock().unwrap();
        for (name, var) in data.iter() {
            let value = var.as_tensor().copy()?.to_device(device)?;
            shadow.insert(name.clone(), value);
        }
        drop(data);

        Ok(Self {
            decay,
            device: device.clone(),
            shadow,
        })
    }

    /// Blend factor applied to the shadow value at each update
    pub fn decay(&self) -> f64 {
        self.decay
    }

    /// Overwrite the blend factor, used when restoring a checkpoint fragment
    pub fn set_decay(&mut self, decay: f64) {
        self.decay = decay;
    }

    /// Device the shadow tensors live on
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Shadow values in parameter-name order
    pub fn shadow(&self) -> &BTreeMap<String, Tensor> {
        &self.shadow
    }

    /// Overwrite one shadow entry with a value of identical shape.
    ///
    /// The key must already exist; the tracker's key set never grows after
    /// construction.
    pub fn set_entry(&mut self, name: &str, value: Tensor) -> Result<()> {
        let entry = self
            .shadow
            .get_mut(name)
            .ok_or_else(|| Error::state(format!("EMA shadow has no parameter '{name}'")))?;
        if entry.dims() != value.dims() {
            return Err(Error::shape(format!(
                "EMA entry '{}' has shape {:?}, got {:?}",
                name,
                entry.dims(),
                value.dims()
            )));
        }
        *entry = value.to_device(&self.device)?;
        Ok(())
    }

    /// One EMA update from the post-step live parameters.
    ///
    /// shadow = decay * shadow + (1 - decay) * current for float entries;
    /// non-float entries take the current value verbatim.
    pub fn update(&mut self, params: &VarMap) -> Result<()> {
        let data = params.data().lock().unwrap();
        for (name, var) in data.iter() {
            let entry = self
                .shadow
                .get_mut(name)
                .ok_or_else(|| Error::state(format!(
                    "parameter '{name}' appeared after EMA construction"
                )))?;

            let current = var.as_tensor().to_device(&self.device)?;
            if current.dtype().is_float() {
                *entry = entry
                    .affine(self.decay, 0.0)?
                    .add(&current.affine(1.0 - self.decay, 0.0)?)?;
            } else {
                *entry = current.copy()?;
            }
        }
        Ok(())
    }

    /// Relocate every shadow tensor. A no-op when already on `device`.
    pub fn to_device(&mut self, device: &Device) -> Result<()> {
        if self.device.same_device(device) {
            return Ok(());
        }
        for value in self.shadow.values_mut() {
            *value = value.to_device(device)?;
        }
        self.device = device.clone();
        debug!("Relocated EMA shadow to {:?}", device.location());
        Ok(())
    }
}
