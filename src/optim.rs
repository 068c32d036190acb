//! Optimizer collaborator contract
//!
//! The actual parameter update lives with the training strategy (it owns the
//! forward/backward pass); the engine only reads and writes learning rates
//! and moves optimizer state in and out for checkpointing and rollback.

use crate::Result;

/// Optimizer collaborator
pub trait Optimizer: Send {
    /// Learning rate of the first parameter group
    fn lr(&self) -> f64;

    /// Set the learning rate on all parameter groups
    fn set_lr(&mut self, lr: f64);

    /// Opaque serializable snapshot of internal state (moments, step counts)
    fn state_dict(&self) -> serde_json::Value;

    /// Restore internal state from a snapshot
    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<()>;
}
