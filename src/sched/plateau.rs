//! Plateau-triggered learning rate decay

use serde::{Deserialize, Serialize};

use super::Scheduler;
use crate::{Error, Result};

/// Direction of improvement for the monitored metric
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlateauMode {
    /// Lower is better (loss-like metrics)
    Min,
    /// Higher is better (accuracy-like metrics)
    Max,
}

/// Reduce-on-Plateau Scheduler
///
/// Decays the learning rate by `factor` once the target metric has not
/// improved for `patience` consecutive steps, with a floor at `min_lr`.
/// Steps without a metric are ignored.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReduceOnPlateau {
    mode: PlateauMode,
    factor: f64,
    patience: usize,
    min_lr: f64,
    threshold: f64,
    current_lr: f64,
    best: Option<f64>,
    num_bad_steps: usize,
}

impl ReduceOnPlateau {
    /// Create a plateau scheduler
    ///
    /// # Arguments
    /// * `initial_lr` - Starting learning rate
    /// * `mode` - Whether the metric improves downward or upward
    /// * `factor` - Multiplicative decay applied on plateau (e.g. 0.1)
    /// * `patience` - Non-improving steps tolerated before decaying
    /// * `min_lr` - Lower bound for the learning rate
    pub fn new(initial_lr: f64, mode: PlateauMode, factor: f64, patience: usize, min_lr: f64) -> Self {
        Self {
            mode,
            factor,
            patience,
            min_lr,
            threshold: 1e-4,
            current_lr: initial_lr,
            best: None,
            num_bad_steps: 0,
        }
    }

    /// Override the minimum improvement counted as progress
    pub fn with_threshold(mut self, threshold: f64) -> Self {
        self.threshold = threshold;
        self
    }

    fn improved(&self, metric: f64) -> bool {
        match (self.best, self.mode) {
            (None, _) => true,
            (Some(best), PlateauMode::Min) => metric < best - self.threshold,
            (Some(best), PlateauMode::Max) => metric > best + self.threshold,
        }
    }
}

impl Scheduler for ReduceOnPlateau {
    fn step(&mut self, metric: Option<f64>) {
        let Some(metric) = metric else {
            return;
        };
        if self.improved(metric) {
            self.best = Some(metric);
            self.num_bad_steps = 0;
        } else {
            self.num_bad_steps += 1;
            if self.num_bad_steps > self.patience {
                self.current_lr = (self.current_lr * self.factor).max(self.min_lr);
                self.num_bad_steps = 0;
            }
        }
    }

    fn get_lr(&self) -> f64 {
        self.current_lr
    }

    fn state_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<()> {
        *self = serde_json::from_value(state).map_err(|e| Error::Serialization(e.to_string()))?;
        Ok(())
    }
}
