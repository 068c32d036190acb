//! Run summary types

/// Result of a completed [`Engine::run`](super::Engine::run)
#[derive(Debug, Clone)]
pub struct RunSummary {
    /// Accuracy from the most recent evaluation
    pub accuracy: f64,
    /// Best (rounded) metric seen across the run
    pub best_metric: f64,
    /// Last epoch index that executed
    pub final_epoch: usize,
    /// Whether the run ended before max_epoch
    pub stopped_early: bool,
    /// Wall-clock duration in seconds
    pub elapsed_secs: f64,
}
