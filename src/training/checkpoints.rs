//! Checkpoint persistence and recovery
//!
//! Two on-disk shapes exist: a consolidated single-file blob holding model
//! weights, the EMA fragment and run state, and a sharded directory produced
//! by a sharded-optimizer backend (a `latest` tag file naming a
//! `global_step<N>` subdirectory of tensor shards). Both are read through the
//! [`CheckpointSource`] abstraction, which exposes exactly a flat weight map
//! and a global step count.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use candle_core::{DType, Device, Tensor};
use candle_nn::VarMap;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::training::ema::EmaWeightTracker;
use crate::training::schedulers::SchedulerStateDict;

/// Key prefix of model parameters inside the combined wrapper state
pub const MODEL_NAMESPACE: &str = "model.";

/// Substring marking template-related parameter names
pub const TEMPLATE_MARKER: &str = "template";

/// Name of the tag file inside a sharded checkpoint directory
const LATEST_TAG_FILE: &str = "latest";

/// Tag prefix naming a shard subdirectory
const STEP_TAG_PREFIX: &str = "global_step";

/// A serialized tensor: shape, dtype and flat values.
///
/// Values travel as f64 so the blob is self-describing and
/// device-independent; the dtype string restores the original representation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TensorState {
    /// Tensor dimensions
    pub shape: Vec<usize>,

    /// Original dtype name, e.g. `f32`
    pub dtype: String,

    /// Row-major flat values
    pub data: Vec<f64>,
}

impl TensorState {
    /// Capture a tensor
    pub fn from_tensor(tensor: &Tensor) -> Result<Self> {
        let data = tensor.to_dtype(DType::F64)?.flatten_all()?.to_vec1::<f64>()?;
        Ok(Self {
            shape: tensor.dims().to_vec(),
            dtype: tensor.dtype().as_str().to_string(),
            data,
        })
    }

    /// Rebuild the tensor on `device` in its original dtype
    pub fn to_tensor(&self, device: &Device) -> Result<Tensor> {
        let dtype: DType = self.dtype.parse().map_err(|_| {
            Error::incompatible_checkpoint(format!("unknown tensor dtype '{}'", self.dtype))
        })?;
        let tensor = Tensor::from_vec(self.data.clone(), self.shape.as_slice(), device)?;
        Ok(tensor.to_dtype(dtype)?)
    }
}

/// Serialized EMA state: decay plus the shadow parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmaFragment {
    /// Blend factor at save time
    pub decay: f64,

    /// Shadow values by parameter name
    pub params: BTreeMap<String, TensorState>,
}

/// Consolidated single-file checkpoint blob
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingCheckpoint {
    /// Optimizer steps taken when the checkpoint was written
    pub global_step: u64,

    /// Epochs completed when the checkpoint was written
    pub epoch: usize,

    /// Live model weights by parameter name
    pub model: BTreeMap<String, TensorState>,

    /// EMA shadow fragment
    pub ema: EmaFragment,

    /// Scheduler position
    pub scheduler: SchedulerStateDict,

    /// Opaque optimizer state owned by the external optimizer
    pub optimizer: Option<Vec<u8>>,

    /// Save timestamp
    pub created_at: DateTime<Utc>,
}

/// One abstraction over both on-disk checkpoint shapes
pub trait CheckpointSource {
    /// Flattened weight map of the checkpoint, keys as saved
    fn extract_flat_weights(&self, device: &Device) -> Result<BTreeMap<String, Tensor>>;

    /// Global step count recorded by the checkpoint
    fn extract_global_step(&self) -> Result<u64>;
}

/// Open a checkpoint path as the matching [`CheckpointSource`]
pub fn open_checkpoint(path: &Path) -> Result<Box<dyn CheckpointSource>> {
    if path.is_dir() {
        Ok(Box::new(ShardedCheckpoint::new(path.to_path_buf())))
    } else {
        Ok(Box::new(ConsolidatedCheckpoint::new(path.to_path_buf())))
    }
}

/// A consolidated checkpoint file: either the bincode blob written by
/// [`CheckpointStateManager::save`], or a bare safetensors weight file
/// (weights only, no run state).
pub struct ConsolidatedCheckpoint {
    path: PathBuf,
}

impl ConsolidatedCheckpoint {
    /// Wrap a checkpoint file path
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    fn is_bare_weights(&self) -> bool {
        self.path.extension().and_then(|s| s.to_str()) == Some("safetensors")
    }

    fn read_blob(&self) -> Result<TrainingCheckpoint> {
        let bytes = std::fs::read(&self.path)?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

impl CheckpointSource for ConsolidatedCheckpoint {
    fn extract_flat_weights(&self, device: &Device) -> Result<BTreeMap<String, Tensor>> {
        if self.is_bare_weights() {
            return read_safetensors_file(&self.path, device);
        }
        let blob = self.read_blob()?;
        let mut weights = BTreeMap::new();
        for (name, state) in &blob.model {
            weights.insert(name.clone(), state.to_tensor(device)?);
        }
        Ok(weights)
    }

    fn extract_global_step(&self) -> Result<u64> {
        if self.is_bare_weights() {
            return Err(Error::incompatible_checkpoint(format!(
                "bare weight file {} records no global step",
                self.path.display()
            )));
        }
        Ok(self.read_blob()?.global_step)
    }
}

/// Adapter over a sharded checkpoint directory
pub struct ShardedCheckpoint {
    dir: PathBuf,
}

impl ShardedCheckpoint {
    /// Wrap a checkpoint directory path
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    fn read_tag(&self) -> Result<String> {
        let tag_path = self.dir.join(LATEST_TAG_FILE);
        let tag = std::fs::read_to_string(&tag_path).map_err(|_| {
            Error::incompatible_checkpoint(format!(
                "sharded checkpoint {} has no '{LATEST_TAG_FILE}' tag file",
                self.dir.display()
            ))
        })?;
        Ok(tag.trim().to_string())
    }
}

impl CheckpointSource for ShardedCheckpoint {
    fn extract_flat_weights(&self, device: &Device) -> Result<BTreeMap<String, Tensor>> {
        let tag = self.read_tag()?;
        let shard_dir = self.dir.join(&tag);

        let mut shard_paths = Vec::new();
        for entry in std::fs::read_dir(&shard_dir)? {
            let path = entry?.path();
            if path.extension().and_then(|s| s.to_str()) == Some("safetensors") {
                shard_paths.push(path);
            }
        }
        shard_paths.sort();

        if shard_paths.is_empty() {
            return Err(Error::incompatible_checkpoint(format!(
                "sharded checkpoint {} holds no tensor shards",
                shard_dir.display()
            )));
        }

        let mut weights = BTreeMap::new();
        for path in &shard_paths {
            for (name, tensor) in read_safetensors_file(path, device)? {
                if weights.insert(name.clone(), tensor).is_some() {
                    return Err(Error::incompatible_checkpoint(format!(
                        "parameter '{name}' appears in more than one shard"
                    )));
                }
            }
        }
        Ok(weights)
    }

    fn extract_global_step(&self) -> Result<u64> {
        let tag = self.read_tag()?;
        let step = tag
            .strip_prefix(STEP_TAG_PREFIX)
            .and_then(|s| s.parse::<u64>().ok())
            .ok_or_else(|| {
                Error::incompatible_checkpoint(format!(
                    "malformed step tag '{tag}' (expected {STEP_TAG_PREFIX}<N>)"
                ))
            })?;
        Ok(step)
    }
}

/// Read one safetensors file into a name → tensor map
fn read_safetensors_file(path: &Path, device: &Device) -> Result<BTreeMap<String, Tensor>> {
    let data = std::fs::read(path)?;
    let tensors = safetensors::SafeTensors::deserialize(&data).map_err(|e| {
        Error::incompatible_checkpoint(format!("failed to parse {}: {e}", path.display()))
    })?;

    let mut weights = BTreeMap::new();
    for (name, view) in tensors.tensors() {
        let dtype = match view.dtype() {
            safetensors::Dtype::F32 => DType::F32,
            safetensors::Dtype::F64 => DType::F64,
            safetensors::Dtype::F16 => DType::F16,
            safetensors::Dtype::BF16 => DType::BF16,
            safetensors::Dtype::U8 => DType::U8,
            safetensors::Dtype::U32 => DType::U32,
            safetensors::Dtype::I64 => DType::I64,
            other => {
                return Err(Error::incompatible_checkpoint(format!(
                    "unsupported tensor dtype {other:?} in {}",
                    path.display()
                )))
            }
        };
        let tensor = Tensor::from_raw_buffer(view.data(), dtype, view.shape(), device)?;
        weights.insert(name.to_string(), tensor);
    }
    Ok(weights)
}

/// Save, load and reconcile checkpoint state for a run
pub struct CheckpointStateManager {
    template_enabled: bool,
}

impl CheckpointStateManager {
    /// Build a manager; `template_enabled` mirrors the model configuration
    pub fn new(template_enabled: bool) -> Self {
        Self { template_enabled }
    }

    /// Capture the EMA tracker as a serializable fragment
    pub fn save_ema_fragment(&self, tracker: &EmaWeightTracker) -> Result<EmaFragment> {
        let mut params = BTreeMap::new();
        for (name, tensor) in tracker.shadow() {
            params.insert(name.clone(), TensorState::from_tensor(tensor)?);
        }
        Ok(EmaFragment {
            decay: tracker.decay(),
            params,
        })
    }

    /// Restore an EMA fragment into a tracker.
    ///
    /// With templates disabled, fragment keys naming template weights are
    /// filtered out first so checkpoints trained with templates stay loadable;
    /// this is a partial-key load, not a strict equality load. Any surviving
    /// key unknown to the tracker, or a shape mismatch, is fatal.
    pub fn load_ema_fragment(
        &self,
        fragment: &EmaFragment,
        tracker: &mut EmaWeightTracker,
    ) -> Result<()> {
        let mut filtered = 0usize;
        for (name, state) in &fragment.params {
            if !self.template_enabled && name.contains(TEMPLATE_MARKER) {
                filtered += 1;
                continue;
            }
            let existing = tracker.shadow().get(name).ok_or_else(|| {
                Error::incompatible_checkpoint(format!(
                    "EMA fragment carries unknown parameter '{name}'"
                ))
            })?;
            if existing.dims() != state.shape.as_slice() {
                return Err(Error::incompatible_checkpoint(format!(
                    "EMA parameter '{}' has shape {:?}, checkpoint has {:?}",
                    name,
                    existing.dims(),
                    state.shape
                )));
            }
            let value = state.to_tensor(tracker.device())?;
            tracker.set_entry(name, value)?;
        }
        tracker.set_decay(fragment.decay);

        if filtered > 0 {
            warn!("Filtered {filtered} template parameters from the EMA fragment");
        }
        Ok(())
    }

    /// Global step recorded by a checkpoint file or directory
    pub fn global_step_of(&self, path: &Path) -> Result<u64> {
        open_checkpoint(path)?.extract_global_step()
    }

    /// Extract weights from either checkpoint shape and key them into the
    /// wrapper namespace.
    ///
    /// Keys saved without the `model.` prefix gain it here, so bare weight
    /// dumps merge cleanly into the combined wrapper state.
    pub fn weights_only_load(
        &self,
        path: &Path,
        device: &Device,
    ) -> Result<BTreeMap<String, Tensor>> {
        let flat = open_checkpoint(path)?.extract_flat_weights(device)?;
        let mut remapped = BTreeMap::new();
        for (name, tensor) in flat {
            let key = if name.starts_with(MODEL_NAMESPACE) {
                name
            } else {
                format!("{MODEL_NAMESPACE}{name}")
            };
            remapped.insert(key, tensor);
        }
        info!("Loaded {} weight tensors from {}", remapped.len(), path.display());
        Ok(remapped)
    }

    /// Capture live model weights as serializable tensor states
    pub fn snapshot_model(&self, params: &VarMap) -> Result<BTreeMap<String, TensorState>> {
        let mut model = BTreeMap::new();
        let data = params.data().lock().unwrap();
        for (name, var) in data.iter() {
            model.insert(name.clone(), TensorState::from_tensor(var.as_tensor())?);
        }
        Ok(model)
    }

    /// Write checkpointed weights back into the live model, strict both ways
    pub fn restore_model(
        &self,
        params: &VarMap,
        model: &BTreeMap<String, TensorState>,
        device: &Device,
    ) -> Result<()> {
        let data = params.data().lock().unwrap();
        for name in model.keys() {
            if !data.contains_key(name) {
                return Err(Error::incompatible_checkpoint(format!(
                    "checkpoint carries unknown parameter '{name}'"
                )));
            }
        }
        for (name, var) in data.iter() {
            let state = model.get(name).ok_or_else(|| {
                Error::incompatible_checkpoint(format!(
                    "checkpoint is missing parameter '{name}'"
                ))
            })?;
            var.set(&state.to_tensor(device)?)?;
        }
        Ok(())
    }

    /// Serialize a consolidated checkpoint to disk
    pub fn save(&self, path: &Path, checkpoint: &TrainingCheckpoint) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let bytes = bincode::serialize(checkpoint)?;
        std::fs::write(path, bytes)?;
        info!(
            "Saved checkpoint at step {} to {}",
            checkpoint.global_step,
            path.display()
        );
        Ok(())
    }

    /// Deserialize a consolidated checkpoint from disk
    pub fn load(&self, path: &Path) -> Result<TrainingCheckpoint> {
        let bytes = std::fs::read(path)?;
        Ok(bincode::deserialize(&bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::Device;
    use candle_nn::Init;
    use std::collections::HashMap;
    use tempfile::TempDir;

    fn live_params() -> VarMap {
        let varmap = VarMap::new();
        varmap
            .get((2, 2), "trunk.weight", Init::Const(1.5), DType::F32, &Device::Cpu)
            .unwrap();
        varmap
            .get(4, "head.bias", Init::Const(-0.5), DType::F32, &Device::Cpu)
            .unwrap();
        varmap
    }

    #[test]
    fn test_tensor_state_round_trip_f32() {
        let tensor =
            Tensor::from_vec(vec![1.0f32, -2.0, 3.5, 0.25], (2, 2), &Device::Cpu).unwrap();
        let state = TensorState::from_tensor(&tensor).unwrap();
        assert_eq!(state.dtype, "f32");

        let restored = state.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(restored.dims(), &[2, 2]);
        assert_eq!(restored.dtype(), DType::F32);
        let values: Vec<f32> = restored.flatten_all().unwrap().to_vec1().unwrap();
        assert_eq!(values, vec![1.0, -2.0, 3.5, 0.25]);
    }

    #[test]
    fn test_tensor_state_round_trip_i64() {
        let tensor = Tensor::from_vec(vec![7i64, -9, 11], 3, &Device::Cpu).unwrap();
        let state = TensorState::from_tensor(&tensor).unwrap();
        let restored = state.to_tensor(&Device::Cpu).unwrap();
        assert_eq!(restored.dtype(), DType::I64);
        let values: Vec<i64> = restored.to_vec1().unwrap();
        assert_eq!(values, vec![7, -9, 11]);
    }

    #[test]
    fn test_ema_fragment_round_trip() {
        let params = live_params();
        let tracker = EmaWeightTracker::new(&params, 0.99, &Device::Cpu).unwrap();
        let manager = CheckpointStateManager::new(true);

        let fragment = manager.save_ema_fragment(&tracker).unwrap();
        assert_eq!(fragment.decay, 0.99);
        assert_eq!(fragment.params.len(), 2);

        let mut restored = EmaWeightTracker::new(&params, 0.5, &Device::Cpu).unwrap();
        manager.load_ema_fragment(&fragment, &mut restored).unwrap();
        assert_eq!(restored.decay(), 0.99);
        let values: Vec<f32> = restored.shadow()["head.bias"].to_vec1().unwrap();
        assert_eq!(values, vec![-0.5; 4]);
    }

    #[test]
    fn test_template_keys_filtered_when_disabled() {
        let params = live_params();
        let tracker = EmaWeightTracker::new(&params, 0.9, &Device::Cpu).unwrap();
        let manager = CheckpointStateManager::new(true);
        let mut fragment = manager.save_ema_fragment(&tracker).unwrap();

        // A fragment from a template-enabled run carries extra keys.
        fragment.params.insert(
            "evoformer.template_pair_stack.weight".to_string(),
            TensorState {
                shape: vec![2],
                dtype: "f32".to_string(),
                data: vec![0.0, 0.0],
            },
        );

        let mut target = EmaWeightTracker::new(&params, 0.9, &Device::Cpu).unwrap();

        // Template-disabled run: the extra key is filtered, the load succeeds.
        let filtering = CheckpointStateManager::new(false);
        filtering.load_ema_fragment(&fragment, &mut target).unwrap();

        // Template-enabled run: the key is unknown to the tracker, fatal.
        let strict = CheckpointStateManager::new(true);
        let err = strict.load_ema_fragment(&fragment, &mut target).unwrap_err();
        assert!(matches!(err, Error::IncompatibleCheckpoint(_)));
    }

    #[test]
    fn test_shape_mismatch_is_incompatible() {
        let params = live_params();
        let tracker = EmaWeightTracker::new(&params, 0.9, &Device::Cpu).unwrap();
        let manager = CheckpointStateManager::new(true);
        let mut fragment = manager.save_ema_fragment(&tracker).unwrap();

        fragment.params.get_mut("head.bias").unwrap().shape = vec![8];
        fragment.params.get_mut("head.bias").unwrap().data = vec![0.0; 8];

        let mut target = EmaWeightTracker::new(&params, 0.9, &Device::Cpu).unwrap();
        let err = manager.load_ema_fragment(&fragment, &mut target).unwrap_err();
        assert!(matches!(err, Error::IncompatibleCheckpoint(_)));
    }

    #[test]
    fn test_consolidated_global_step() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("run.ckpt");

        let params = live_params();
        let tracker = EmaWeightTracker::new(&params, 0.999, &Device::Cpu).unwrap();
        let manager = CheckpointStateManager::new(true);

        let checkpoint = TrainingCheckpoint {
            global_step: 4321,
            epoch: 3,
            model: manager.snapshot_model(&params).unwrap(),
            ema: manager.save_ema_fragment(&tracker).unwrap(),
            scheduler: SchedulerStateDict {
                last_step: 4320,
                current_lr: 1e-3,
                initial_lr: 1e-3,
            },
            optimizer: None,
            created_at: Utc::now(),
        };
        manager.save(&path, &checkpoint).unwrap();

        assert_eq!(manager.global_step_of(&path).unwrap(), 4321);

        let weights = open_checkpoint(&path)
            .unwrap()
            .extract_flat_weights(&Device::Cpu)
            .unwrap();
        assert_eq!(weights.len(), 2);
        assert!(weights.contains_key("trunk.weight"));
    }

    #[test]
    fn test_sharded_directory_step_and_weights() {
        let dir = TempDir::new().unwrap();
        let shard_dir = dir.path().join("global_step512");
        std::fs::create_dir_all(&shard_dir).unwrap();
        std::fs::write(dir.path().join("latest"), "global_step512\n").unwrap();

        let mut shard_a = HashMap::new();
        shard_a.insert(
            "trunk.weight".to_string(),
            Tensor::from_vec(vec![1.0f32, 2.0], 2, &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&shard_a, shard_dir.join("rank0.safetensors")).unwrap();

        let mut shard_b = HashMap::new();
        shard_b.insert(
            "head.bias".to_string(),
            Tensor::from_vec(vec![3.0f32], 1, &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&shard_b, shard_dir.join("rank1.safetensors")).unwrap();

        let manager = CheckpointStateManager::new(true);
        assert_eq!(manager.global_step_of(dir.path()).unwrap(), 512);

        let weights = open_checkpoint(dir.path())
            .unwrap()
            .extract_flat_weights(&Device::Cpu)
            .unwrap();
        assert_eq!(weights.len(), 2);
        let values: Vec<f32> = weights["trunk.weight"].to_vec1().unwrap();
        assert_eq!(values, vec![1.0, 2.0]);
    }

    #[test]
    fn test_sharded_directory_missing_tag() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointStateManager::new(true);
        let err = manager.global_step_of(dir.path()).unwrap_err();
        assert!(matches!(err, Error::IncompatibleCheckpoint(_)));
    }

    #[test]
    fn test_sharded_directory_malformed_tag() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("latest"), "epoch-final").unwrap();
        let manager = CheckpointStateManager::new(true);
        let err = manager.global_step_of(dir.path()).unwrap_err();
        assert!(matches!(err, Error::IncompatibleCheckpoint(_)));
    }

    #[test]
    fn test_duplicate_shard_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let shard_dir = dir.path().join("global_step7");
        std::fs::create_dir_all(&shard_dir).unwrap();
        std::fs::write(dir.path().join("latest"), "global_step7").unwrap();

        for shard in ["rank0.safetensors", "rank1.safetensors"] {
            let mut tensors = HashMap::new();
            tensors.insert(
                "trunk.weight".to_string(),
                Tensor::from_vec(vec![1.0f32], 1, &Device::Cpu).unwrap(),
            );
            candle_core::safetensors::save(&tensors, shard_dir.join(shard)).unwrap();
        }

        let err = open_checkpoint(dir.path())
            .unwrap()
            .extract_flat_weights(&Device::Cpu)
            .unwrap_err();
        assert!(matches!(err, Error::IncompatibleCheckpoint(_)));
    }

    #[test]
    fn test_weights_only_load_prefixes_bare_keys() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights.safetensors");

        let mut tensors = HashMap::new();
        tensors.insert(
            "trunk.weight".to_string(),
            Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], (2, 2), &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let manager = CheckpointStateManager::new(true);
        let weights = manager.weights_only_load(&path, &Device::Cpu).unwrap();
        assert!(weights.contains_key("model.trunk.weight"));
        assert!(!weights.contains_key("trunk.weight"));
    }

    #[test]
    fn test_bare_weight_file_has_no_step() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("weights.safetensors");

        let mut tensors = HashMap::new();
        tensors.insert(
            "w".to_string(),
            Tensor::from_vec(vec![0.0f32], 1, &Device::Cpu).unwrap(),
        );
        candle_core::safetensors::save(&tensors, &path).unwrap();

        let manager = CheckpointStateManager::new(true);
        let err = manager.global_step_of(&path).unwrap_err();
        assert!(matches!(err, Error::IncompatibleCheckpoint(_)));
    }

    #[test]
    fn test_restore_model_round_trip() {
        let params = live_params();
        let manager = CheckpointStateManager::new(true);
        let snapshot = manager.snapshot_model(&params).unwrap();

        // Disturb the live values, then restore.
        {
            let data = params.data().lock().unwrap();
            for var in data.values() {
                let zeros = var.as_tensor().zeros_like().unwrap();
                var.set(&zeros).unwrap();
            }
        }
        manager.restore_model(&params, &snapshot, &Device::Cpu).unwrap();

        let data = params.data().lock().unwrap();
        let values: Vec<f32> = data["head.bias"]
            .as_tensor()
            .flatten_all()
            .unwrap()
            .to_vec1()
            .unwrap();
        assert_eq!(values, vec![-0.5; 4]);
    }
}
