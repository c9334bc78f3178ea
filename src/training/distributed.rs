//! Execution strategy selection for a run
//!
//! Decided once at startup from static configuration. Replication and
//! gradient communication themselves belong to the external backend; this
//! module only picks which mode the run executes under and rejects
//! incompatible combinations before any work starts.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::TrainingConfig;
use crate::error::{Error, Result};

/// How the run executes across devices
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExecutionStrategy {
    /// One process, one device
    Single,

    /// Replicated model with synchronized gradients
    DataParallel {
        /// Unused-parameter detection; always disabled for this model family
        find_unused_parameters: bool,
    },

    /// Optimizer state sharded across ranks, driven by a backend config file
    ShardedOptimizer {
        /// Path to the backend configuration
        config_path: PathBuf,
    },
}

/// Pick the execution strategy for a configuration.
///
/// A sharded optimizer wins over data parallelism; data parallelism is used
/// for any multi-device or multi-node layout; everything else runs single.
pub fn select_strategy(config: &TrainingConfig) -> Result<ExecutionStrategy> {
    let distributed = &config.distributed;

    if distributed.sharded_optimizer_config.is_some() && config.precision.is_reduced() {
        return Err(Error::config(
            "sharded optimizer training and half precision are not compatible",
        ));
    }

    let multi_device = distributed.device_count > 1 || distributed.node_count > 1;
    if multi_device && config.seed.is_none() {
        return Err(Error::config("multi-device runs require a configured seed"));
    }

    let strategy = if let Some(path) = &distributed.sharded_optimizer_config {
        ExecutionStrategy::ShardedOptimizer {
            config_path: path.clone(),
        }
    } else if multi_device {
        ExecutionStrategy::DataParallel {
            find_unused_parameters: false,
        }
    } else {
        ExecutionStrategy::Single
    };

    info!("Selected execution strategy: {:?}", strategy);
    Ok(strategy)
}
