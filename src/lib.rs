//! Training engine for image classification and re-identification models.
//!
//! The crate separates orchestration from computation: the [`Engine`] owns
//! the epoch loop, evaluation cadence, checkpointing, learning-rate policy
//! and batch augmentation, while the forward/backward math lives behind the
//! [`TrainingStrategy`] trait. Models, optimizers and data loaders plug in
//! through small collaborator traits, so the engine can drive anything that
//! can produce losses and state dicts:
//!
//! - [`engine`] - the orchestrator: registry, run loop, augmentation,
//!   checkpoints, learning-rate search
//! - [`sched`] - learning-rate schedulers (step decay, warmup, plateau,
//!   cosine cycles, one-cycle)
//! - [`meter`] - running-average metric meters
//! - [`cacher`] - keyed state snapshots for search rollback
//! - [`data`], [`model`], [`optim`] - collaborator contracts

pub mod cacher;
pub mod data;
pub mod engine;
pub mod error;
pub mod meter;
pub mod model;
pub mod optim;
pub mod sched;

pub use cacher::StateCacher;
pub use data::{Batch, DataLoader};
pub use engine::{
    BatchAugment, Engine, EngineConfig, ModelRegistry, RunSummary, StopFlag, StopSignal,
    TargetMetric, TrainingStrategy,
};
pub use error::{Error, Result};
pub use meter::{AverageMeter, MetricMeter};
pub use model::{Mode, Model, ModelEma, StateDict};
pub use optim::Optimizer;
pub use sched::Scheduler;
