//! Learning-rate search support
//!
//! The engine does not run the search itself; an external tuner drives it
//! through the [`SearchTrial`] interface (suggest a candidate, receive
//! per-epoch reports, decide on pruning). The engine's part is candidate
//! quantization, duplicate rejection, and state rollback around each trial.

use std::collections::HashSet;

use crate::{Error, Result};

/// What happens to model/optimizer state once the search finishes
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LrFinderMode {
    /// Restore the pre-search snapshot after every trial and at the end
    Automatic,
    /// Keep the weights trained during the trial (fastai-style warm start)
    FastAi,
}

/// Search-space bounds for the learning-rate candidate
#[derive(Clone, Copy, Debug)]
pub struct LrFinderConfig {
    pub min_lr: f64,
    pub max_lr: f64,
    /// Quantization step for suggested candidates
    pub step: f64,
    pub mode: LrFinderMode,
}

impl LrFinderConfig {
    pub fn new(min_lr: f64, max_lr: f64, step: f64, mode: LrFinderMode) -> Result<Self> {
        if !(min_lr > 0.0 && max_lr > min_lr) {
            return Err(Error::Configuration(format!(
                "invalid lr search range [{min_lr}, {max_lr}]"
            )));
        }
        if step <= 0.0 {
            return Err(Error::Configuration(format!("invalid lr search step {step}")));
        }
        Ok(Self { min_lr, max_lr, step, mode })
    }
}

/// One trial of an external hyper-parameter search
pub trait SearchTrial: Send {
    /// Ask the tuner for a candidate value in `[low, high]` on a `step` grid
    fn suggest_float(&mut self, name: &str, low: f64, high: f64, step: f64) -> f64;

    /// Report an intermediate objective value for `step` (the epoch index)
    fn report(&mut self, value: f64, step: usize);

    /// Whether the tuner wants this trial abandoned
    fn should_prune(&self) -> bool;
}

/// Round a learning rate to six decimals, the resolution at which two
/// candidates count as the same trial
pub(crate) fn quantize_lr(lr: f64) -> f64 {
    (lr * 1e6).round() / 1e6
}

/// Bit-exact set of learning rates already tried in this search
#[derive(Default)]
pub(crate) struct SeenLrs {
    seen: HashSet<u64>,
}

impl SeenLrs {
    /// Record a quantized candidate; `false` means it was already tried
    pub(crate) fn insert(&mut self, lr: f64) -> bool {
        self.seen.insert(quantize_lr(lr).to_bits())
    }
}
