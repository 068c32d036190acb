//! Model collaborator contract and the EMA shadow copy

use std::collections::BTreeMap;

use crate::Result;

/// Flat, serializable snapshot of a model's parameters, keyed by name
pub type StateDict = BTreeMap<String, Vec<f32>>;

/// Train/eval mode toggle, mirroring the usual deep-learning convention
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    Train,
    Eval,
}

/// Model collaborator.
///
/// The engine never looks inside a model; it only switches modes, freezes
/// and thaws parameters, and moves state dicts around for checkpointing,
/// EMA tracking and learning-rate-finder rollback.
pub trait Model: Send {
    /// Switch between training and evaluation behavior
    fn set_mode(&mut self, mode: Mode);

    /// Current mode
    fn mode(&self) -> Mode;

    /// Enable or disable gradient flow on all parameters
    fn set_trainable(&mut self, trainable: bool);

    /// Whether parameters currently receive gradients
    fn trainable(&self) -> bool;

    /// Snapshot all parameters
    fn state_dict(&self) -> StateDict;

    /// Restore all parameters from a snapshot
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()>;
}

/// Exponential-moving-average shadow of the main model's weights.
///
/// Updated once per batch, after the optimizer step:
/// `shadow = decay * shadow + (1 - decay) * weights`. The shadow is
/// independent of gradient computation and serves as an alternative
/// inference-time checkpoint.
pub struct ModelEma {
    decay: f64,
    shadow: StateDict,
}

impl ModelEma {
    /// Initialize the shadow from the model's current weights
    pub fn new(model: &dyn Model, decay: f64) -> Self {
        Self { decay, shadow: model.state_dict() }
    }

    /// Fold the model's current weights into the shadow
    pub fn update(&mut self, model: &dyn Model) {
        let current = model.state_dict();
        for (name, shadow_vals) in &mut self.shadow {
            if let Some(cur_vals) = current.get(name) {
                for (s, &c) in shadow_vals.iter_mut().zip(cur_vals) {
                    *s = (self.decay * f64::from(*s) + (1.0 - self.decay) * f64::from(c)) as f32;
                }
            }
        }
    }

    /// The shadow weights
    pub fn state_dict(&self) -> &StateDict {
        &self.shadow
    }

    pub fn decay(&self) -> f64 {
        self.decay
    }
}
