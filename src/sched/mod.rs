//! Learning rate schedulers and policy wrappers
//!
//! Provides the scheduler contract plus the policies the engine drives:
//! - `StepDecay` - multiplicative decay every N epochs
//! - `WarmupWrapper` - linear warmup decorating any base scheduler
//! - `ReduceOnPlateau` - decay when the target metric stops improving
//! - `CosineCycleRestart` - per-batch cosine annealing with restarts
//! - `OneCycle` - per-batch single ramp-up / anneal-down cycle

mod cyclic;
mod one_cycle;
mod plateau;
mod step_decay;
mod warmup;


pub use cyclic::CosineCycleRestart;
pub use one_cycle::OneCycle;
pub use plateau::{PlateauMode, ReduceOnPlateau};
pub use step_decay::StepDecay;
pub use warmup::WarmupWrapper;

use crate::Result;

/// Learning rate scheduler contract.
///
/// Plateau- and warmup-style schedulers consume the current target metric;
/// all others ignore it and step unconditionally. Per-batch schedulers are
/// stepped after every batch instead of once per epoch.
pub trait Scheduler: Send {
    /// Advance the schedule. `metric` carries the current target metric
    /// (train loss or smoothed test accuracy) for policies that need it.
    fn step(&mut self, metric: Option<f64>);

    /// The learning rate the schedule currently prescribes
    fn get_lr(&self) -> f64;

    /// Whether the warmup phase has completed (true by definition for
    /// schedulers without one)
    fn warmup_finished(&self) -> bool {
        true
    }

    /// Whether this scheduler anneals per-batch rather than per-epoch
    fn is_per_batch(&self) -> bool {
        false
    }

    /// Serializable snapshot of schedule counters for checkpointing
    fn state_dict(&self) -> serde_json::Value;

    /// Restore schedule counters from a snapshot
    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<()>;
}
