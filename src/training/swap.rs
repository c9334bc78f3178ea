//! Live/Swapped weight-swap protocol for evaluating with EMA weights
//!
//! Validation runs with the EMA shadow substituted into the live model.
//! The pre-swap training weights are cached as deep copies and written back
//! when the swap ends. Misuse of the protocol is a hard error, never a
//! silent no-op.

use std::collections::BTreeMap;

use candle_core::Tensor;
use candle_nn::VarMap;
use tracing::info;

use crate::error::{Error, Result};
use crate::training::ema::EmaWeightTracker;

/// Whose weights the live model currently runs with.
///
/// The cache of pre-swap training weights exists exactly when the state is
/// `Swapped`.
#[derive(Debug)]
pub enum SwapState {
    /// The model runs with its own training weights
    Live,
    /// The model runs with EMA weights; `cache` holds the training weights
    Swapped {
        /// Deep copies of the pre-swap live values, by parameter name
        cache: BTreeMap<String, Tensor>,
    },
}

/// Two-state controller for the EMA weight swap
#[derive(Debug)]
pub struct ValidationWeightSwapper {
    state: SwapState,
}

impl Default for ValidationWeightSwapper {
    fn default() -> Self {
        Self::new()
    }
}

impl ValidationWeightSwapper {
    /// A swapper in the `Live` state
    pub fn new() -> Self {
        Self {
            state: SwapState::Live,
        }
    }

    /// Current protocol state
    pub fn state(&self) -> &SwapState {
        &self.state
    }

    /// True when the model runs with its own training weights
    pub fn is_live(&self) -> bool {
        matches!(self.state, SwapState::Live)
    }

    /// Cache the live values and write the EMA shadow into the live model.
    ///
    /// Legal only from `Live`. Shadow coverage is verified before the first
    /// write, so a refused swap leaves every live value in place.
    pub fn swap_in(&mut self, live: &VarMap, ema: &EmaWeightTracker) -> Result<()> {
        if !self.is_live() {
            return Err(Error::state("swap_in called while weights are already swapped"));
        }

        let data = live.data().lock().unwrap();

        let shadow = ema.shadow();
        for name in data.keys() {
            if !shadow.contains_key(name) {
                return Err(Error::state(format!(
                    "EMA shadow has no value for live parameter '{name}'"
                )));
            }
        }

        let mut cache = BTreeMap::new();
        for (name, var) in data.iter() {
            cache.insert(name.clone(), var.as_tensor().copy()?);
        }

        for (name, var) in data.iter() {
            var.set(&shadow[name].to_device(var.device())?)?;
        }
        drop(data);

        self.state = SwapState::Swapped { cache };
        info!("Swapped EMA weights into the live model");
        Ok(())
    }

    /// Restore the cached training weights and discard the cache.
    ///
    /// Legal only from `Swapped`. Cache coverage is verified before the
    /// first write, and the state flips back to `Live` only once every
    /// value is restored; a refused swap-out keeps the swap intact.
    pub fn swap_out(&mut self, live: &VarMap) -> Result<()> {
        let cache = match &self.state {
            SwapState::Swapped { cache } => cache,
            SwapState::Live => {
                return Err(Error::state("swap_out called while weights are live"));
            }
        };

        let data = live.data().lock().unwrap();

        for name in data.keys() {
            if !cache.contains_key(name) {
                return Err(Error::state(format!(
                    "swap cache has no value for live parameter '{name}'"
                )));
            }
        }

        for (name, var) in data.iter() {
            var.set(&cache[name])?;
        }
        drop(data);

        self.state = SwapState::Live;
        info!("Restored training weights into the live model");
        Ok(())
    }
}
