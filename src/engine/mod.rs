//! Training orchestration
//!
//! [`Engine`] drives the epoch loop over a [`ModelRegistry`] of
//! (model, optimizer, scheduler) units, delegating the actual forward and
//! backward computation to a [`TrainingStrategy`]. Around the loop it
//! handles evaluation cadence, best-model selection, checkpointing with
//! `latest`/`best` symlinks, batch augmentation, an EMA shadow of the main
//! model, compression controller hooks, cooperative stop signals and
//! learning-rate search trials.

mod augment;
mod checkpoint;
mod compression;
mod core;
mod epoch;
mod interval;
mod lr_finder;
mod registry;
mod result;
mod run;
mod strategy;

#[cfg(test)]
pub(crate) mod testutil;

pub use augment::{AppliedAugment, BatchAugment};
pub use checkpoint::{load_checkpoint, save_checkpoint, Checkpoint};
pub use compression::{CompressionController, CompressionStage};
pub use self::core::{Engine, EngineConfig, TargetMetric};
pub use interval::EpochIntervalToValue;
pub use lr_finder::{LrFinderConfig, LrFinderMode, SearchTrial};
pub use registry::{ModelRegistry, RegisteredUnit, MAIN_MODEL_NAME};
pub use result::RunSummary;
pub use strategy::{StepContext, StepOutput, TrainingStrategy};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Cooperative stop signal, polled between batches and between epochs
pub trait StopSignal: Send + Sync {
    fn should_stop(&self) -> bool;
}

/// Shareable atomic stop flag; clone one half into a signal handler or
/// controlling thread and hand the other to the engine
#[derive(Clone, Default)]
pub struct StopFlag(Arc<AtomicBool>);

impl StopFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request a stop at the next poll point
    pub fn trigger(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    pub fn is_triggered(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }
}

impl StopSignal for StopFlag {
    fn should_stop(&self) -> bool {
        self.is_triggered()
    }
}
