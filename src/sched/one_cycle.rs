//! One-cycle learning rate schedule

use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use super::Scheduler;
use crate::{Error, Result};

/// One-Cycle Scheduler
///
/// A single cycle over the whole run: linear ramp from `max_lr / div_factor`
/// up to `max_lr` during the first `pct_start` fraction of `total_steps`,
/// then cosine anneal down to `max_lr / final_div_factor`. Steps once per
/// batch; the warmup is considered finished once past the ramp peak.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OneCycle {
    max_lr: f64,
    div_factor: f64,
    final_div_factor: f64,
    pct_start: f64,
    total_steps: usize,
    current_step: usize,
}

impl OneCycle {
    /// Create a one-cycle scheduler
    ///
    /// # Arguments
    /// * `max_lr` - Peak learning rate
    /// * `total_steps` - Total batches in the run
    /// * `pct_start` - Fraction of steps spent ramping up (e.g. 0.3)
    pub fn new(max_lr: f64, total_steps: usize, pct_start: f64) -> Self {
        Self {
            max_lr,
            div_factor: 25.0,
            final_div_factor: 1e4,
            pct_start: pct_start.clamp(0.0, 1.0),
            total_steps: total_steps.max(1),
            current_step: 0,
        }
    }

    /// Override the initial-lr divisor (initial lr = max_lr / div_factor)
    pub fn with_div_factor(mut self, div_factor: f64) -> Self {
        self.div_factor = div_factor;
        self
    }

    /// Override the final-lr divisor (final lr = max_lr / final_div_factor)
    pub fn with_final_div_factor(mut self, final_div_factor: f64) -> Self {
        self.final_div_factor = final_div_factor;
        self
    }

    fn ramp_steps(&self) -> usize {
        (self.pct_start * self.total_steps as f64).round() as usize
    }
}

impl Scheduler for OneCycle {
    fn step(&mut self, _metric: Option<f64>) {
        if self.current_step < self.total_steps {
            self.current_step += 1;
        }
    }

    fn get_lr(&self) -> f64 {
        let initial_lr = self.max_lr / self.div_factor;
        let final_lr = self.max_lr / self.final_div_factor;
        let ramp = self.ramp_steps();

        if self.current_step < ramp {
            let progress = self.current_step as f64 / ramp as f64;
            return initial_lr + (self.max_lr - initial_lr) * progress;
        }

        let decay_steps = self.total_steps.saturating_sub(ramp);
        if decay_steps == 0 {
            return final_lr;
        }
        let decay_step = (self.current_step - ramp).min(decay_steps);
        let progress = decay_step as f64 / decay_steps as f64;
        let cosine = 0.5 * (1.0 + (PI * progress).cos());
        final_lr + (self.max_lr - final_lr) * cosine
    }

    fn warmup_finished(&self) -> bool {
        self.current_step >= self.ramp_steps()
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
