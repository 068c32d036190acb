//! Training strategy contract
//!
//! The engine orchestrates; the strategy computes. Any concrete training
//! recipe (softmax classification, mutual learning, metric learning)
//! implements this trait and is handed to the engine at construction.

use super::augment::AppliedAugment;
use super::registry::ModelRegistry;
use crate::data::{Batch, DataLoader};
use crate::model::Model;
use crate::Result;

/// Per-batch context handed to the strategy alongside the data
pub struct StepContext {
    /// Current epoch index
    pub epoch: usize,
    /// Current batch index within the epoch
    pub batch_idx: usize,
    /// Whether mutual learning between registered models is active this epoch
    pub mutual_learning_enabled: bool,
    /// Label-mixing coefficient and permutation when batch augmentation fired
    pub augment: Option<AppliedAugment>,
}

/// Result of one forward/backward step
pub struct StepOutput {
    /// Scalar loss per registered model, in registry order
    pub losses: Vec<(String, f64)>,
    /// Average training accuracy over the batch
    pub accuracy: f64,
}

/// A concrete training recipe.
///
/// `forward_backward` must compute losses for every registered model,
/// run the backward pass and the optimizer step(s), and report the scalar
/// losses plus batch accuracy. When `ctx.augment` is set, per-sample losses
/// must be mixed as `lam * loss(labels) + (1 - lam) * loss(labels[perm])`.
pub trait TrainingStrategy: Send {
    /// One training step over a batch
    fn forward_backward(
        &mut self,
        registry: &mut ModelRegistry,
        batch: &Batch,
        ctx: &StepContext,
    ) -> Result<StepOutput>;

    /// Evaluate one model variant on the test loader; returns the top-1 score
    fn evaluate(
        &mut self,
        model: &mut dyn Model,
        loader: &mut dyn DataLoader,
        epoch: usize,
        model_name: &str,
    ) -> Result<f64>;

    /// Early-exit hook consulted once per evaluated epoch. The base policy
    /// never exits; strategies with a plateau rule override this.
    fn should_stop(&mut self, _epoch: usize, _accuracy: f64, _best_metric: f64) -> bool {
        false
    }

    /// Called once after the epoch loop finishes
    fn finalize(&mut self, _registry: &mut ModelRegistry) -> Result<()> {
        Ok(())
    }
}
