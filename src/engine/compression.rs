//! Compression controller collaborator contract

/// How far an attached compression schedule has progressed
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompressionStage {
    Uncompressed,
    PartiallyCompressed,
    FullyCompressed,
}

/// External collaborator applying structured model compression
/// (pruning / quantization-aware training) on a per-batch and per-epoch
/// schedule. Early stopping only terminates a run once the controller
/// reports [`CompressionStage::FullyCompressed`].
pub trait CompressionController: Send {
    /// Advance the epoch-level schedule
    fn epoch_step(&mut self, epoch: usize);

    /// Advance the per-batch schedule
    fn step(&mut self, batch_idx: usize);

    /// Human-readable statistics, logged once per epoch
    fn statistics(&self) -> String;

    /// Current stage of the compression schedule
    fn compression_stage(&self) -> CompressionStage;

    /// Serializable compression state, embedded in checkpoints
    fn compression_state(&self) -> serde_json::Value;
}
