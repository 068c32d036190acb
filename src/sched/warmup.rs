//! Linear warmup wrapper around a base scheduler

use serde_json::json;

use super::Scheduler;
use crate::{Error, Result};

/// Warmup Wrapper
///
/// Linearly ramps the learning rate from `start_lr` to `target_lr` over
/// `warmup_epochs`, then hands control to the wrapped base scheduler.
/// Metric arguments are forwarded to the base once warmup has finished.
pub struct WarmupWrapper {
    base: Box<dyn Scheduler>,
    start_lr: f64,
    target_lr: f64,
    warmup_epochs: usize,
    current_epoch: usize,
}

impl WarmupWrapper {
    /// Wrap `base` with a linear warmup phase
    ///
    /// # Arguments
    /// * `base` - Scheduler that takes over after warmup
    /// * `start_lr` - Learning rate at epoch 0 (typically initial_lr / lr_decay_factor)
    /// * `target_lr` - Learning rate reached when warmup completes
    /// * `warmup_epochs` - Length of the ramp
    pub fn new(base: Box<dyn Scheduler>, start_lr: f64, target_lr: f64, warmup_epochs: usize) -> Self {
        Self { base, start_lr, target_lr, warmup_epochs, current_epoch: 0 }
    }
}

impl Scheduler for WarmupWrapper {
    fn step(&mut self, metric: Option<f64>) {
        if self.current_epoch < self.warmup_epochs {
            self.current_epoch += 1;
        } else {
            self.base.step(metric);
        }
    }

    fn get_lr(&self) -> f64 {
        if self.warmup_epochs == 0 || self.current_epoch >= self.warmup_epochs {
            return self.base.get_lr();
        }
        let progress = self.current_epoch as f64 / self.warmup_epochs as f64;
        self.start_lr + (self.target_lr - self.start_lr) * progress
    }

    fn warmup_finished(&self) -> bool {
        self.current_epoch >= self.warmup_epochs
    }

    fn state_dict(&self) -> serde_json::Value {
        json!({
            "start_lr": self.start_lr,
            "target_lr": self.target_lr,
            "warmup_epochs": self.warmup_epochs,
            "current_epoch": self.current_epoch,
            "base": self.base.state_dict(),
        })
    }

    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<()> {
        let epoch = state["current_epoch"]
            .as_u64()
            .ok_or_else(|| Error::Serialization("missing current_epoch".to_string()))?;
        self.current_epoch = epoch as usize;
        if let Some(lr) = state["start_lr"].as_f64() {
            self.start_lr = lr;
        }
        if let Some(lr) = state["target_lr"].as_f64() {
            self.target_lr = lr;
        }
        if let Some(n) = state["warmup_epochs"].as_u64() {
            self.warmup_epochs = n as usize;
        }
        self.base.load_state_dict(state["base"].clone())
    }
}
