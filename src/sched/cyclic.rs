//! Cyclic cosine annealing with warm restarts

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::Scheduler;
use crate::{Error, Result};

/// Cosine Annealing with Cycle Restarts
///
/// Anneals the learning rate from `base_lr` down to `min_lr` over a cycle,
/// then restarts at `base_lr`. Each new cycle is `cycle_mult` times longer
/// than the previous one. Steps once per batch.
///
/// Formula within a cycle:
/// lr_t = min_lr + 0.5 * (base_lr - min_lr) * (1 + cos(pi * t / T))
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CosineCycleRestart {
    base_lr: f64,
    min_lr: f64,
    cycle_len: usize,
    cycle_mult: f64,
    step_in_cycle: usize,
    cycle: usize,
}

impl CosineCycleRestart {
    /// Create a cyclic cosine scheduler
    ///
    /// # Arguments
    /// * `base_lr` - Learning rate at the top of each cycle
    /// * `min_lr` - Learning rate at the bottom of each cycle
    /// * `cycle_len` - Length of the first cycle, in batches
    /// * `cycle_mult` - Growth factor for successive cycle lengths
    pub fn new(base_lr: f64, min_lr: f64, cycle_len: usize, cycle_mult: f64) -> Self {
        Self {
            base_lr,
            min_lr,
            cycle_len: cycle_len.max(1),
            cycle_mult,
            step_in_cycle: 0,
            cycle: 0,
        }
    }

    /// Completed restarts so far
    pub fn cycle(&self) -> usize {
        self.cycle
    }
}

impl Scheduler for CosineCycleRestart {
    fn step(&mut self, _metric: Option<f64>) {
        self.step_in_cycle += 1;
        if self.step_in_cycle >= self.cycle_len {
            self.step_in_cycle = 0;
            self.cycle += 1;
            self.cycle_len = ((self.cycle_len as f64 * self.cycle_mult).round() as usize).max(1);
        }
    }

    fn get_lr(&self) -> f64 {
        let progress = self.step_in_cycle as f64 / self.cycle_len as f64;
        let cosine = 0.5 * (1.0 + (PI * progress).cos());
        self.min_lr + (self.base_lr - self.min_lr) * cosine
    }

    fn is_per_batch(&self) -> bool {
        true
    }

    fn state_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<()> {
        *self = serde_json::from_value(state).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(())
    }
}
