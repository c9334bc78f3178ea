//! Training orchestration: step ordering, validation rounds and resume
//!
//! The trainer owns no network internals. It drives an externally provided
//! model, loss and optimizer through a fixed per-step sequence, keeps the
//! EMA shadow and weight-swap protocol honest, schedules the learning rate,
//! aggregates validation metrics, and saves or restores run state.
//!
//! The per-step sequence never varies: device reconciliation, forward on the
//! raw batch, recycling collapse, loss, logging, scheduler and optimizer,
//! then the EMA update. Validation brackets every round with a weight swap
//! so the model is evaluated on EMA weights and trained on its own.

use std::collections::{BTreeMap, VecDeque};
use std::path::{Path, PathBuf};

use candle_core::{DType, Tensor};
use chrono::Utc;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{MonitorMode, OpenmmActivation, TrainingConfig};
use crate::error::{Error, Result};
use crate::training::batch::{Batch, USE_CLAMPED_FAPE};
use crate::training::checkpoints::{
    open_checkpoint, CheckpointStateManager, TrainingCheckpoint, MODEL_NAMESPACE,
};
use crate::training::distributed::{select_strategy, ExecutionStrategy};
use crate::training::ema::EmaWeightTracker;
use crate::training::metrics::{MetricsReport, MetricsSink, Phase, StructuralMetricsEngine};
use crate::training::model::{
    LossBreakdown, ModelOptimizer, ModelOutput, StructureLoss, StructureModel, OPENMM_ENERGY,
};
use crate::training::schedulers::WarmupDecayScheduler;
use crate::training::swap::ValidationWeightSwapper;

/// Bound on the loss window kept for the moving average
const LOSS_WINDOW: usize = 100;

/// Lifecycle phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrainingStatus {
    /// Stepping through epochs
    Running,

    /// Finished by epoch or step count
    Completed,

    /// Stopped by the validation monitor
    EarlyStopped,
}

/// Progress counters and monitor bookkeeping for one run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingState {
    /// Epochs fully completed
    pub epoch: usize,

    /// Optimizer steps taken across the run
    pub global_step: u64,

    /// Learning rate pushed at the most recent step
    pub current_lr: f64,

    /// Best monitored validation value seen so far
    pub best_monitor: Option<f64>,

    /// Validation rounds since the monitor last improved
    pub rounds_since_improvement: usize,

    /// Lifecycle phase of the run
    pub status: TrainingStatus,

    recent_losses: VecDeque<f64>,
}

impl TrainingState {
    /// Fresh counters for a new run
    pub fn new() -> Self {
        Self {
            epoch: 0,
            global_step: 0,
            current_lr: 0.0,
            best_monitor: None,
            rounds_since_improvement: 0,
            status: TrainingStatus::Running,
            recent_losses: VecDeque::new(),
        }
    }

    /// Push a training loss into the bounded window
    pub fn record_loss(&mut self, loss: f64) {
        self.recent_losses.push_back(loss);
        if self.recent_losses.len() > LOSS_WINDOW {
            self.recent_losses.pop_front();
        }
    }

    /// Mean of the recent loss window, `None` before the first step
    pub fn moving_average_loss(&self) -> Option<f64> {
        if self.recent_losses.is_empty() {
            return None;
        }
        Some(self.recent_losses.iter().sum::<f64>() / self.recent_losses.len() as f64)
    }

    /// Feed one monitored validation value; returns whether it improved.
    ///
    /// NaN never counts as improvement. Non-improving rounds age the
    /// counter that early stopping compares against its patience.
    pub fn observe_monitor(&mut self, value: f64, mode: MonitorMode, min_delta: f64) -> bool {
        let improved = if value.is_nan() {
            false
        } else {
            match (self.best_monitor, mode) {
                (None, _) => true,
                (Some(best), MonitorMode::Max) => value > best + min_delta,
                (Some(best), MonitorMode::Min) => value < best - min_delta,
            }
        };

        if improved {
            self.best_monitor = Some(value);
            self.rounds_since_improvement = 0;
        } else {
            self.rounds_since_improvement += 1;
        }
        improved
    }
}

impl Default for TrainingState {
    fn default() -> Self {
        Self::new()
    }
}

/// Scalar results of one training or validation step
#[derive(Debug, Clone)]
pub struct StepOutcome {
    /// Total loss value
    pub loss: f64,

    /// Named loss terms
    pub breakdown: LossBreakdown,

    /// Structural metric report for the batch
    pub metrics: MetricsReport,
}

/// Orchestrates training over an externally supplied model, loss and optimizer
pub struct FoldTrainer<M, L, O> {
    config: TrainingConfig,
    model: M,
    loss: L,
    optimizer: O,
    ema: EmaWeightTracker,
    swapper: ValidationWeightSwapper,
    scheduler: WarmupDecayScheduler,
    metrics: StructuralMetricsEngine,
    checkpoints: CheckpointStateManager,
    strategy: ExecutionStrategy,
    sinks: Vec<Box<dyn MetricsSink>>,
    rng: StdRng,
    state: TrainingState,
    val_reports: Vec<BTreeMap<String, f64>>,
}

impl<M, L, O> FoldTrainer<M, L, O>
where
    M: StructureModel,
    L: StructureLoss,
    O: ModelOptimizer,
{
    /// Assemble a trainer and, when configured, resume from a checkpoint.
    ///
    /// Validates the configuration, selects the execution strategy, and
    /// snapshots the model into a fresh EMA shadow on the model device.
    pub fn new(config: TrainingConfig, model: M, loss: L, optimizer: O) -> Result<Self> {
        config.validate()?;
        let strategy = select_strategy(&config)?;

        let device = model.device().clone();
        let ema = EmaWeightTracker::new(model.parameters(), config.ema.decay, &device)?;
        let scheduler = WarmupDecayScheduler::new(&config.schedule);
        let metrics = StructuralMetricsEngine::new(config.metrics.clone());
        let checkpoints = CheckpointStateManager::new(config.template_enabled);
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let mut trainer = Self {
            config,
            model,
            loss,
            optimizer,
            ema,
            swapper: ValidationWeightSwapper::new(),
            scheduler,
            metrics,
            checkpoints,
            strategy,
            sinks: Vec::new(),
            rng,
            state: TrainingState::new(),
            val_reports: Vec::new(),
        };

        if let Some(path) = trainer.config.checkpoint.resume_from.clone() {
            if trainer.config.checkpoint.resume_model_weights_only {
                trainer.load_weights_only(&path)?;
            } else {
                trainer.resume(&path)?;
            }
        }

        Ok(trainer)
    }

    /// Attach a metrics sink, consuming and returning the trainer
    pub fn with_sink(mut self, sink: impl MetricsSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    /// Attach a boxed metrics sink
    pub fn add_sink(&mut self, sink: Box<dyn MetricsSink>) {
        self.sinks.push(sink);
    }

    /// Run progress and monitor bookkeeping
    pub fn state(&self) -> &TrainingState {
        &self.state
    }

    /// Trainer configuration
    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    /// Execution strategy selected for this run
    pub fn strategy(&self) -> &ExecutionStrategy {
        &self.strategy
    }

    /// The driven model
    pub fn model(&self) -> &M {
        &self.model
    }

    /// EMA shadow of the live parameters
    pub fn ema(&self) -> &EmaWeightTracker {
        &self.ema
    }

    /// Weight-swap protocol state
    pub fn swapper(&self) -> &ValidationWeightSwapper {
        &self.swapper
    }

    /// Learning-rate schedule position
    pub fn scheduler(&self) -> &WarmupDecayScheduler {
        &self.scheduler
    }

    /// One optimizer step over a raw batch.
    ///
    /// Refused while EMA weights are swapped in; training on swapped
    /// weights would corrupt both the live model and the shadow.
    pub fn training_step(&mut self, batch: &Batch) -> Result<StepOutcome> {
        if !self.swapper.is_live() {
            return Err(Error::state(
                "training step attempted while EMA weights are swapped in",
            ));
        }

        // The shadow follows the batch device before anything touches it.
        let batch_device = batch.device()?;
        if !self.ema.device().same_device(&batch_device) {
            self.ema.to_device(&batch_device)?;
        }

        let output = self.model.forward(batch)?;
        let collapsed = batch.collapse_recycling()?;

        let (loss_tensor, mut breakdown) = self.loss.compute(&output, &collapsed)?;
        let loss_tensor = self.apply_relaxation_term(loss_tensor, &output, &mut breakdown)?;
        let loss_value = scalar_value(&loss_tensor)?;

        let metrics = self.metrics.compute(
            &output.final_atom_positions,
            collapsed.positions()?,
            collapsed.mask()?,
            true,
        )?;

        self.state.record_loss(loss_value);
        let mut scalars = metrics.as_map().clone();
        scalars.insert("loss".to_string(), loss_value);
        for (name, value) in &breakdown {
            scalars.insert(name.clone(), *value);
        }
        scalars.insert("lr".to_string(), self.scheduler.current_lr());
        self.emit(Phase::Train, self.state.global_step, &scalars)?;

        let lr = self.scheduler.step();
        self.optimizer.set_learning_rate(lr);
        self.optimizer.step(&loss_tensor)?;
        self.state.current_lr = lr;

        // The shadow blends the post-step weights.
        self.ema.update(self.model.parameters())?;

        self.state.global_step += 1;

        Ok(StepOutcome {
            loss: loss_value,
            breakdown,
            metrics,
        })
    }

    /// Swap EMA weights into the model for the coming validation round
    pub fn begin_validation_epoch(&mut self) -> Result<()> {
        self.swapper.swap_in(self.model.parameters(), &self.ema)?;
        self.val_reports.clear();
        debug!(step = self.state.global_step, "validation round started");
        Ok(())
    }

    /// Score one validation batch on the swapped-in EMA weights.
    ///
    /// The loss sees the recycling-collapsed batch with FAPE clamping
    /// forced off; engines configured for structural metrics add the
    /// superimposition family here.
    pub fn validation_step(&mut self, batch: &Batch) -> Result<StepOutcome> {
        if self.swapper.is_live() {
            return Err(Error::state(
                "validation step attempted with live weights; begin the validation round first",
            ));
        }

        let output = self.model.forward(batch)?;
        let mut collapsed = batch.collapse_recycling()?;
        let device = collapsed.device()?;
        collapsed.insert(USE_CLAMPED_FAPE, Tensor::zeros((), DType::F32, &device)?);

        let (loss_tensor, breakdown) = self.loss.compute(&output, &collapsed)?;
        let loss_value = scalar_value(&loss_tensor)?;

        let metrics = self.metrics.compute(
            &output.final_atom_positions,
            collapsed.positions()?,
            collapsed.mask()?,
            true,
        )?;

        let mut scalars = metrics.as_map().clone();
        scalars.insert("loss".to_string(), loss_value);
        for (name, value) in &breakdown {
            scalars.insert(name.clone(), *value);
        }
        self.val_reports.push(scalars);

        Ok(StepOutcome {
            loss: loss_value,
            breakdown,
            metrics,
        })
    }

    /// Close the validation round: aggregate, log, feed the monitor,
    /// restore the live weights.
    ///
    /// Per-metric aggregation skips NaN batches; a metric NaN everywhere
    /// comes out NaN. The monitored value updates the improvement counter
    /// and, when early stopping is enabled and patience is exhausted,
    /// flips the run status.
    pub fn end_validation_epoch(&mut self) -> Result<MetricsReport> {
        if self.swapper.is_live() {
            return Err(Error::state(
                "end of validation round requested with live weights",
            ));
        }

        let aggregated = aggregate_nan_skipping(&self.val_reports);
        self.val_reports.clear();

        self.emit(Phase::Val, self.state.global_step, aggregated.as_map())?;

        let stopping = self.config.early_stopping.clone();
        let monitored = aggregated.iter().find_map(|(name, value)| {
            let full = format!("{}/{name}", Phase::Val.prefix());
            (full == stopping.monitor || name == stopping.monitor).then_some(value)
        });

        match monitored {
            Some(value) => {
                let improved =
                    self.state
                        .observe_monitor(value, stopping.mode, stopping.min_delta);
                if stopping.enabled
                    && !improved
                    && self.state.rounds_since_improvement >= stopping.patience
                {
                    self.state.status = TrainingStatus::EarlyStopped;
                    info!(
                        monitor = %stopping.monitor,
                        rounds = self.state.rounds_since_improvement,
                        "early stopping triggered"
                    );
                }
            }
            None => {
                if stopping.enabled {
                    warn!(
                        "monitored metric '{}' absent from the validation report",
                        stopping.monitor
                    );
                }
            }
        }

        self.swapper.swap_out(self.model.parameters())?;
        Ok(aggregated)
    }

    /// Train over the supplied batches until an epoch, step or patience
    /// limit ends the run.
    ///
    /// Each epoch visits every training batch once, in an order drawn from
    /// the run RNG, then runs a validation round when validation batches
    /// exist, then saves a checkpoint on the configured epoch cadence. A
    /// final checkpoint is written when the run ends, whatever the reason.
    pub fn fit(&mut self, train_batches: &[Batch], val_batches: &[Batch]) -> Result<TrainingState> {
        if train_batches.is_empty() {
            return Err(Error::config("training requires at least one batch"));
        }

        info!(
            epochs = self.config.max_epochs,
            train_batches = train_batches.len(),
            val_batches = val_batches.len(),
            "starting run"
        );
        self.state.status = TrainingStatus::Running;

        'epochs: while self.state.epoch < self.config.max_epochs {
            let mut order: Vec<usize> = (0..train_batches.len()).collect();
            order.shuffle(&mut self.rng);

            for idx in order {
                self.training_step(&train_batches[idx])?;

                if let Some(max_steps) = self.config.max_steps {
                    if self.state.global_step >= max_steps {
                        info!(max_steps, "step cap reached");
                        break 'epochs;
                    }
                }
            }

            if !val_batches.is_empty() {
                self.begin_validation_epoch()?;
                for batch in val_batches {
                    self.validation_step(batch)?;
                }
                self.end_validation_epoch()?;
            }

            self.state.epoch += 1;

            if self.state.epoch % self.config.checkpoint.every_n_epochs == 0 {
                self.save_checkpoint()?;
            }

            if self.state.status == TrainingStatus::EarlyStopped {
                break;
            }
        }

        if self.state.status == TrainingStatus::Running {
            self.state.status = TrainingStatus::Completed;
        }
        self.save_checkpoint()?;
        info!(
            epochs = self.state.epoch,
            steps = self.state.global_step,
            status = ?self.state.status,
            "run finished"
        );
        Ok(self.state.clone())
    }

    /// Write a consolidated checkpoint into the configured output directory.
    ///
    /// Refused while EMA weights are swapped in, since the snapshot would
    /// capture substituted weights as if they were the live ones.
    pub fn save_checkpoint(&self) -> Result<PathBuf> {
        if !self.swapper.is_live() {
            return Err(Error::state(
                "checkpoint save attempted while EMA weights are swapped in",
            ));
        }

        let path = self.config.checkpoint.output_dir.join(format!(
            "epoch{}_step{}.ckpt",
            self.state.epoch, self.state.global_step
        ));
        let checkpoint = TrainingCheckpoint {
            global_step: self.state.global_step,
            epoch: self.state.epoch,
            model: self.checkpoints.snapshot_model(self.model.parameters())?,
            ema: self.checkpoints.save_ema_fragment(&self.ema)?,
            scheduler: self.scheduler.state_dict(),
            optimizer: None,
            created_at: Utc::now(),
        };
        self.checkpoints.save(&path, &checkpoint)?;
        Ok(path)
    }

    /// Restore a full run from a consolidated file or a sharded directory
    fn resume(&mut self, path: &Path) -> Result<()> {
        if path.is_dir() {
            self.resume_sharded(path)
        } else {
            self.resume_consolidated(path)
        }
    }

    fn resume_consolidated(&mut self, path: &Path) -> Result<()> {
        if path.extension().and_then(|s| s.to_str()) == Some("safetensors") {
            return Err(Error::incompatible_checkpoint(format!(
                "bare weight file {} carries no run state; resume it weights-only",
                path.display()
            )));
        }

        let checkpoint = self.checkpoints.load(path)?;
        let device = self.model.device().clone();

        self.checkpoints
            .restore_model(self.model.parameters(), &checkpoint.model, &device)?;
        self.checkpoints
            .load_ema_fragment(&checkpoint.ema, &mut self.ema)?;
        self.scheduler.load_state_dict(&checkpoint.scheduler);

        self.state.global_step = checkpoint.global_step;
        self.state.epoch = checkpoint.epoch;
        self.state.current_lr = self.scheduler.current_lr();

        info!(
            step = checkpoint.global_step,
            epoch = checkpoint.epoch,
            "resumed run from {}",
            path.display()
        );
        Ok(())
    }

    /// Resume from a sharded directory: merged weights plus the step tag.
    ///
    /// Sharded checkpoints carry no scheduler dictionary or epoch count.
    /// The schedule is repositioned from the step tag, the epoch counter
    /// restarts, and the EMA shadow re-snapshots the restored weights.
    fn resume_sharded(&mut self, dir: &Path) -> Result<()> {
        let device = self.model.device().clone();
        let source = open_checkpoint(dir)?;
        let weights = source.extract_flat_weights(&device)?;
        let step = source.extract_global_step()?;

        self.load_flat_into_model(&weights)?;
        self.ema = EmaWeightTracker::new(self.model.parameters(), self.config.ema.decay, &device)?;

        self.scheduler.resume_from(step as i64 - 1);
        self.state.global_step = step;
        self.state.current_lr = self.scheduler.current_lr();

        info!(step, "resumed run from sharded checkpoint {}", dir.display());
        Ok(())
    }

    /// Load model weights from either checkpoint shape, keeping counters,
    /// schedule and optimizer state fresh. The EMA shadow restarts from the
    /// loaded weights.
    fn load_weights_only(&mut self, path: &Path) -> Result<()> {
        let device = self.model.device().clone();
        let weights = self.checkpoints.weights_only_load(path, &device)?;
        self.load_flat_into_model(&weights)?;
        self.ema = EmaWeightTracker::new(self.model.parameters(), self.config.ema.decay, &device)?;
        info!("loaded model weights only from {}", path.display());
        Ok(())
    }

    /// Write a flat weight map into the live parameters, stripping the
    /// wrapper namespace. Strict in both directions: unknown and missing
    /// parameters are both fatal.
    fn load_flat_into_model(&self, weights: &BTreeMap<String, Tensor>) -> Result<()> {
        let mut stripped: BTreeMap<String, &Tensor> = BTreeMap::new();
        for (name, tensor) in weights {
            let key = name.strip_prefix(MODEL_NAMESPACE).unwrap_or(name);
            stripped.insert(key.to_string(), tensor);
        }

        let data = self.model.parameters().data().lock().unwrap();
        for name in stripped.keys() {
            if !data.contains_key(name) {
                return Err(Error::incompatible_checkpoint(format!(
                    "checkpoint carries unknown parameter '{name}'"
                )));
            }
        }
        for (name, var) in data.iter() {
            let tensor = stripped.get(name).ok_or_else(|| {
                Error::incompatible_checkpoint(format!(
                    "checkpoint is missing parameter '{name}'"
                ))
            })?;
            if var.as_tensor().dims() != tensor.dims() {
                return Err(Error::incompatible_checkpoint(format!(
                    "parameter '{}' has shape {:?}, checkpoint has {:?}",
                    name,
                    var.as_tensor().dims(),
                    tensor.dims()
                )));
            }
            var.set(tensor)?;
        }
        Ok(())
    }

    /// Fold the relaxation-potential term into the loss when configured.
    ///
    /// The model must expose the potential as an extra output; the term is
    /// the activated batch mean, weighted, and it stays in the graph.
    fn apply_relaxation_term(
        &self,
        loss: Tensor,
        output: &ModelOutput,
        breakdown: &mut LossBreakdown,
    ) -> Result<Tensor> {
        if !self.config.openmm.enabled {
            return Ok(loss);
        }

        let energy = output.extras.get(OPENMM_ENERGY).ok_or_else(|| {
            Error::state(format!(
                "relaxation loss enabled but the model produced no '{OPENMM_ENERGY}' output"
            ))
        })?;

        let mean = energy.mean_all()?;
        let activated = match self.config.openmm.activation {
            OpenmmActivation::Sigmoid => candle_nn::ops::sigmoid(&mean)?,
            OpenmmActivation::Relu => mean.relu()?,
            OpenmmActivation::None => mean,
        };
        let term = activated
            .affine(self.config.openmm.weight, 0.0)?
            .to_dtype(loss.dtype())?;

        breakdown.insert("openmm".to_string(), scalar_value(&term)?);
        Ok(loss.add(&term)?)
    }

    fn emit(&mut self, phase: Phase, step: u64, scalars: &BTreeMap<String, f64>) -> Result<()> {
        for sink in &mut self.sinks {
            sink.record(phase, step, scalars)?;
        }
        Ok(())
    }
}

/// Extract the value of a single-element tensor
fn scalar_value(tensor: &Tensor) -> Result<f64> {
    if tensor.elem_count() != 1 {
        return Err(Error::shape(format!(
            "expected a scalar tensor, got shape {:?}",
            tensor.dims()
        )));
    }
    let values: Vec<f64> = tensor.to_dtype(DType::F64)?.flatten_all()?.to_vec1()?;
    Ok(values[0])
}

/// Per-name means over a validation round, skipping NaN entries.
///
/// A name that is NaN in every report aggregates to NaN rather than
/// disappearing.
fn aggregate_nan_skipping(reports: &[BTreeMap<String, f64>]) -> MetricsReport {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for report in reports {
        for (name, value) in report {
            let entry = sums.entry(name.clone()).or_insert((0.0, 0));
            if !value.is_nan() {
                entry.0 += value;
                entry.1 += 1;
            }
        }
    }

    let mut out = MetricsReport::new();
    for (name, (sum, count)) in sums {
        let mean = if count > 0 {
            sum / count as f64
        } else {
            f64::NAN
        };
        out.insert(name, mean);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MonitorMode;

    #[test]
    fn test_state_loss_window_is_bounded() {
        let mut state = TrainingState::new();
        for i in 0..(LOSS_WINDOW + 50) {
            state.record_loss(i as f64);
        }
        let avg = state.moving_average_loss().unwrap();
        // Window holds the last LOSS_WINDOW values: 50 .. 50+LOSS_WINDOW.
        let expected = (50..50 + LOSS_WINDOW).sum::<usize>() as f64 / LOSS_WINDOW as f64;
        assert!((avg - expected).abs() < 1e-9);
    }

    #[test]
    fn test_monitor_improvement_max_mode() {
        let mut state = TrainingState::new();
        assert!(state.observe_monitor(0.5, MonitorMode::Max, 0.0));
        assert!(state.observe_monitor(0.6, MonitorMode::Max, 0.0));
        assert!(!state.observe_monitor(0.6, MonitorMode::Max, 0.0));
        assert_eq!(state.best_monitor, Some(0.6));
        assert_eq!(state.rounds_since_improvement, 1);
    }

    #[test]
    fn test_monitor_min_delta_filters_noise() {
        let mut state = TrainingState::new();
        assert!(state.observe_monitor(1.0, MonitorMode::Min, 0.1));
        assert!(!state.observe_monitor(0.95, MonitorMode::Min, 0.1));
        assert!(state.observe_monitor(0.85, MonitorMode::Min, 0.1));
        assert_eq!(state.best_monitor, Some(0.85));
    }

    #[test]
    fn test_monitor_nan_never_improves() {
        let mut state = TrainingState::new();
        assert!(!state.observe_monitor(f64::NAN, MonitorMode::Max, 0.0));
        assert_eq!(state.best_monitor, None);
        assert_eq!(state.rounds_since_improvement, 1);

        assert!(state.observe_monitor(0.3, MonitorMode::Max, 0.0));
        assert_eq!(state.rounds_since_improvement, 0);
    }

    #[test]
    fn test_aggregation_skips_nan_batches() {
        let reports = vec![
            BTreeMap::from([("lddt_ca".to_string(), 0.8), ("loss".to_string(), 2.0)]),
            BTreeMap::from([("lddt_ca".to_string(), f64::NAN), ("loss".to_string(), 4.0)]),
            BTreeMap::from([("lddt_ca".to_string(), 0.6), ("loss".to_string(), 3.0)]),
        ];
        let aggregated = aggregate_nan_skipping(&reports);
        assert!((aggregated.get("lddt_ca").unwrap() - 0.7).abs() < 1e-12);
        assert!((aggregated.get("loss").unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_aggregation_keeps_all_nan_names() {
        let reports = vec![
            BTreeMap::from([("gdtts_ca".to_string(), f64::NAN)]),
            BTreeMap::from([("gdtts_ca".to_string(), f64::NAN)]),
        ];
        let aggregated = aggregate_nan_skipping(&reports);
        assert!(aggregated.get("gdtts_ca").unwrap().is_nan());
    }

    #[test]
    fn test_aggregation_of_empty_round_is_empty() {
        let aggregated = aggregate_nan_skipping(&[]);
        assert!(aggregated.is_empty());
    }
}
