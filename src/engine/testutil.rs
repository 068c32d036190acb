//! Shared stub collaborators for engine tests

use ndarray::Array4;
use rand::rngs::StdRng;
use rand::Rng;
use serde_json::json;

use super::lr_finder::SearchTrial;
use super::registry::ModelRegistry;
use super::strategy::{StepContext, StepOutput, TrainingStrategy};
use crate::data::{Batch, DataLoader};
use crate::model::{Mode, Model, StateDict};
use crate::optim::Optimizer;
use crate::sched::{Scheduler, StepDecay};
use crate::Result;

pub(crate) struct StubModel {
    pub weights: StateDict,
    pub mode: Mode,
    pub trainable: bool,
}

impl StubModel {
    pub fn new(w: Vec<f32>) -> Self {
        let mut weights = StateDict::new();
        weights.insert("w".to_string(), w);
        Self { weights, mode: Mode::Train, trainable: true }
    }

    pub fn boxed(w: Vec<f32>) -> Box<dyn Model> {
        Box::new(Self::new(w))
    }
}

impl Model for StubModel {
    fn set_mode(&mut self, mode: Mode) {
        self.mode = mode;
    }
    fn mode(&self) -> Mode {
        self.mode
    }
    fn set_trainable(&mut self, trainable: bool) {
        self.trainable = trainable;
    }
    fn trainable(&self) -> bool {
        self.trainable
    }
    fn state_dict(&self) -> StateDict {
        self.weights.clone()
    }
    fn load_state_dict(&mut self, state: &StateDict) -> Result<()> {
        self.weights = state.clone();
        Ok(())
    }
}

pub(crate) struct StubOptimizer {
    pub lr: f64,
    pub steps: usize,
}

impl StubOptimizer {
    pub fn boxed(lr: f64) -> Box<dyn Optimizer> {
        Box::new(Self { lr, steps: 0 })
    }
}

impl Optimizer for StubOptimizer {
    fn lr(&self) -> f64 {
        self.lr
    }
    fn set_lr(&mut self, lr: f64) {
        self.lr = lr;
    }
    fn state_dict(&self) -> serde_json::Value {
        json!({ "lr": self.lr, "steps": self.steps })
    }
    fn load_state_dict(&mut self, state: serde_json::Value) -> Result<()> {
        self.lr = state["lr"].as_f64().unwrap_or(self.lr);
        self.steps = state["steps"].as_u64().unwrap_or(0) as usize;
        Ok(())
    }
}

pub(crate) fn stub_scheduler(initial_lr: f64) -> Box<dyn Scheduler> {
    Box::new(StepDecay::new(initial_lr, 30, 0.1))
}

pub(crate) fn stub_registry(initial_lr: f64) -> ModelRegistry {
    ModelRegistry::single(
        StubModel::boxed(vec![1.0, 2.0, 3.0]),
        StubOptimizer::boxed(initial_lr),
        stub_scheduler(initial_lr),
    )
}

/// Deterministic loader: batch contents depend only on the RNG handed in,
/// and the first raw draw per epoch is recorded behind a shared handle so
/// seed derivation can be asserted from the outside.
pub(crate) struct StubLoader {
    pub batches: usize,
    pub batch_size: usize,
    pub first_draws: std::sync::Arc<std::sync::Mutex<Vec<f64>>>,
}

impl StubLoader {
    pub fn new(batches: usize, batch_size: usize) -> Self {
        Self {
            batches,
            batch_size,
            first_draws: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn boxed(batches: usize, batch_size: usize) -> Box<dyn DataLoader> {
        Box::new(Self::new(batches, batch_size))
    }
}

impl DataLoader for StubLoader {
    fn load(&mut self, rng: &mut StdRng) -> Vec<Batch> {
        if let Ok(mut draws) = self.first_draws.lock() {
            draws.push(rng.random::<f64>());
        }
        (0..self.batches)
            .map(|b| {
                let images =
                    Array4::from_shape_fn((self.batch_size, 1, 2, 2), |_| rng.random::<f32>());
                let labels = (0..self.batch_size).map(|i| (b + i) % 4).collect();
                Batch::new(images, labels)
            })
            .collect()
    }

    fn num_batches(&self) -> usize {
        self.batches
    }

    fn num_classes(&self) -> usize {
        4
    }

    fn class_map(&self) -> Vec<String> {
        (0..4).map(|c| format!("class_{c}")).collect()
    }
}

/// Scripted strategy: loss decays each step, accuracy follows a fixed
/// schedule per epoch, with optional divergence/failure injection.
pub(crate) struct StubStrategy {
    pub accuracies: Vec<f64>,
    pub diverge_at: Option<(usize, usize)>,
    pub fail_at: Option<(usize, usize)>,
    pub stop_after_epoch: Option<usize>,
    pub steps_taken: usize,
    /// `"<model_name>@<epoch>"` per evaluate call, behind a shared handle
    pub evaluated: std::sync::Arc<std::sync::Mutex<Vec<String>>>,
}

impl StubStrategy {
    pub fn new(accuracies: Vec<f64>) -> Self {
        Self {
            accuracies,
            diverge_at: None,
            fail_at: None,
            stop_after_epoch: None,
            steps_taken: 0,
            evaluated: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }

    pub fn boxed(accuracies: Vec<f64>) -> Box<dyn TrainingStrategy> {
        Box::new(Self::new(accuracies))
    }

    fn accuracy_for(&self, epoch: usize) -> f64 {
        self.accuracies
            .get(epoch)
            .or_else(|| self.accuracies.last())
            .copied()
            .unwrap_or(0.0)
    }
}

impl TrainingStrategy for StubStrategy {
    fn forward_backward(
        &mut self,
        _registry: &mut ModelRegistry,
        _batch: &Batch,
        ctx: &StepContext,
    ) -> Result<StepOutput> {
        if self.fail_at == Some((ctx.epoch, ctx.batch_idx)) {
            return Err(crate::Error::Serialization("injected failure".to_string()));
        }
        self.steps_taken += 1;
        let loss = if self.diverge_at == Some((ctx.epoch, ctx.batch_idx)) {
            f64::NAN
        } else {
            1.0 / self.steps_taken as f64
        };
        Ok(StepOutput {
            losses: vec![("loss".to_string(), loss)],
            accuracy: self.accuracy_for(ctx.epoch),
        })
    }

    fn evaluate(
        &mut self,
        _model: &mut dyn Model,
        _loader: &mut dyn DataLoader,
        epoch: usize,
        model_name: &str,
    ) -> Result<f64> {
        if let Ok(mut evaluated) = self.evaluated.lock() {
            evaluated.push(format!("{model_name}@{epoch}"));
        }
        Ok(self.accuracy_for(epoch))
    }

    fn should_stop(&mut self, epoch: usize, _accuracy: f64, _best_metric: f64) -> bool {
        self.stop_after_epoch.is_some_and(|e| epoch >= e)
    }
}

/// Scripted search trial. Reports and the prune flag sit behind shared
/// handles so tests can observe them after the trial is boxed away.
pub(crate) struct StubTrial {
    pub suggestions: Vec<f64>,
    next: usize,
    pub prune_flag: std::sync::Arc<std::sync::atomic::AtomicBool>,
    pub reports: std::sync::Arc<std::sync::Mutex<Vec<(f64, usize)>>>,
}

impl StubTrial {
    pub fn new(suggestions: Vec<f64>) -> Self {
        Self {
            suggestions,
            next: 0,
            prune_flag: std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false)),
            reports: std::sync::Arc::new(std::sync::Mutex::new(Vec::new())),
        }
    }
}

impl SearchTrial for StubTrial {
    fn suggest_float(&mut self, _name: &str, low: f64, _high: f64, _step: f64) -> f64 {
        let v = self.suggestions.get(self.next).copied().unwrap_or(low);
        self.next += 1;
        v
    }

    fn report(&mut self, value: f64, step: usize) {
        if let Ok(mut reports) = self.reports.lock() {
            reports.push((value, step));
        }
    }

    fn should_prune(&self) -> bool {
        self.prune_flag.load(std::sync::atomic::Ordering::Relaxed)
    }
}
