//! Step decay learning rate scheduler

use serde::{Deserialize, Serialize};

use super::Scheduler;
use crate::{Error, Result};

/// Step Decay Scheduler
///
/// Multiplies the learning rate by `gamma` every `step_size` epochs.
///
/// Formula: lr_t = lr_initial * gamma^(floor(epoch / step_size))
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StepDecay {
    initial_lr: f64,
    gamma: f64,
    step_size: usize,
    current_epoch: usize,
}

impl StepDecay {
    /// Create a new step decay scheduler
    ///
    /// # Arguments
    /// * `initial_lr` - Starting learning rate
    /// * `step_size` - Decay every `step_size` epochs
    /// * `gamma` - Multiplicative factor (e.g. 0.1 for a 10x reduction)
    pub fn new(initial_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self { initial_lr, gamma, step_size, current_epoch: 0 }
    }
}

impl Scheduler for StepDecay {
    fn step(&mut self, _metric: Option<f64>) {
        self.current_epoch += 1;
    }

    fn get_lr(&self) -> f64 {
        if self.step_size == 0 {
            return self.initial_lr;
        }
        let num_decays = self.current_epoch / self.step_size;
        self.initial_lr * self.gamma.powi(num_decays as i32)
    }

    fn state_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<()> {
        *self = serde_json::from_value(state).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(())
    }
}
