//! Crate-level error taxonomy

use thiserror::Error;

/// Errors produced by the training engine and its collaborators
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration detected before any training step
    #[error("invalid configuration: {0}")]
    Configuration(String),

    /// A requested model name is not registered
    #[error("unknown model: {0}")]
    UnknownModel(String),

    /// Training loss became NaN or infinite; the run is aborted
    #[error("loss diverged at epoch {epoch}, batch {batch}: {loss}")]
    Diverged { epoch: usize, batch: usize, loss: f64 },

    /// A learning-rate search trial was rejected; roll back and move on
    #[error("trial pruned")]
    TrialPruned,

    /// No cached state stored under the requested key
    #[error("no cached state under key: {0}")]
    CacheMiss(String),

    /// State dict or checkpoint (de)serialization failed
    #[error("serialization failed: {0}")]
    Serialization(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type for engine operations
pub type Result<T> = std::result::Result<T, Error>;
