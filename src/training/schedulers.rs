//! Learning rate schedule for structure-prediction training
//!
//! One curve: linear warmup to the peak rate, a flat plateau, then staircase
//! exponential decay. The schedule is a pure function of the step index, so
//! a resumed run reproduces the exact rates of an uninterrupted one.

use serde::{Deserialize, Serialize};

use crate::config::LrScheduleConfig;

/// Sentinel step value meaning the schedule has not taken a step yet
pub const FRESH_RUN: i64 = -1;

/// Warmup / plateau / staircase-decay learning rate scheduler
#[derive(Debug, Clone)]
pub struct WarmupDecayScheduler {
    /// Learning rate at step zero
    base_lr: f64,

    /// Peak learning rate reached at the end of warmup
    max_lr: f64,

    /// Number of linear warmup steps
    warmup_steps: u64,

    /// Step after which staircase decay begins
    start_decay_after_n_steps: u64,

    /// Width of each decay stair in steps
    decay_every_n_steps: u64,

    /// Multiplicative factor applied at each stair
    decay_factor: f64,

    /// Last step taken; `FRESH_RUN` before the first step
    current_step: i64,

    /// Learning rate produced by the last step
    current_lr: f64,

    /// Baseline rate recorded for optimizer resume. On resume this is the
    /// configured peak rate, never the decayed current value.
    initial_lr: f64,
}

/// Serializable scheduler position
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerStateDict {
    /// Last step taken, `-1` for a fresh run
    pub last_step: i64,

    /// Learning rate at `last_step`
    pub current_lr: f64,

    /// Baseline rate for optimizer resume
    pub initial_lr: f64,
}

impl WarmupDecayScheduler {
    /// Build a fresh scheduler from schedule settings
    pub fn new(config: &LrScheduleConfig) -> Self {
        Self {
            base_lr: config.base_lr,
            max_lr: config.max_lr,
            warmup_steps: config.warmup_steps,
            start_decay_after_n_steps: config.start_decay_after_n_steps,
            decay_every_n_steps: config.decay_every_n_steps,
            decay_factor: config.decay_factor,
            current_step: FRESH_RUN,
            current_lr: config.base_lr,
            initial_lr: config.max_lr,
        }
    }

    /// Learning rate of the schedule at an absolute step index
    pub fn lr_at(&self, step: u64) -> f64 {
        if step <= self.warmup_steps {
            self.base_lr + (step as f64 / self.warmup_steps as f64) * self.max_lr
        } else if step > self.start_decay_after_n_steps {
            let since_decay = step - self.start_decay_after_n_steps;
            let exp = (since_decay / self.decay_every_n_steps) + 1;
            self.max_lr * self.decay_factor.powi(exp as i32)
        } else {
            self.max_lr
        }
    }

    /// Advance one step and return the new learning rate
    pub fn step(&mut self) -> f64 {
        self.current_step += 1;
        self.current_lr = self.lr_at(self.current_step as u64);
        self.current_lr
    }

    /// Last step taken, `FRESH_RUN` before the first
    pub fn last_step(&self) -> i64 {
        self.current_step
    }

    /// Learning rate produced by the last step
    pub fn current_lr(&self) -> f64 {
        self.current_lr
    }

    /// Baseline rate recorded for optimizer resume
    pub fn initial_lr(&self) -> f64 {
        self.initial_lr
    }

    /// Position the schedule after a checkpoint restore.
    ///
    /// `FRESH_RUN` leaves the schedule untouched; a step value N makes the
    /// next `step()` produce exactly the rate an uninterrupted run yields at
    /// N + 1.
    pub fn resume_from(&mut self, last_lr_step: i64) {
        if last_lr_step <= FRESH_RUN {
            return;
        }
        self.current_step = last_lr_step;
        self.current_lr = self.lr_at(last_lr_step as u64);
        self.initial_lr = self.max_lr;
    }

    /// Serializable position snapshot
    pub fn state_dict(&self) -> SchedulerStateDict {
        SchedulerStateDict {
            last_step: self.current_step,
            current_lr: self.current_lr,
            initial_lr: self.initial_lr,
        }
    }

    /// Restore a position snapshot
    pub fn load_state_dict(&mut self, state_dict: &SchedulerStateDict) {
        self.current_step = state_dict.last_step;
        self.current_lr = state_dict.current_lr;
        self.initial_lr = state_dict.initial_lr;
    }
}
