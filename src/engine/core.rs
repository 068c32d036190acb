//! Engine construction, configuration and shared orchestration state

use std::path::PathBuf;

use super::augment::BatchAugment;
use super::checkpoint::{replace_symlink, save_checkpoint, Checkpoint};
use super::compression::{CompressionController, CompressionStage};
use super::interval::EpochIntervalToValue;
use super::lr_finder::{quantize_lr, LrFinderConfig, LrFinderMode, SearchTrial, SeenLrs};
use super::registry::{ModelRegistry, MAIN_MODEL_NAME};
use super::strategy::TrainingStrategy;
use super::StopSignal;
use crate::cacher::StateCacher;
use crate::data::DataLoader;
use crate::meter::AverageMeter;
use crate::model::{Mode, ModelEma, StateDict};
use crate::{Error, Result};

/// Directory name for the EMA shadow's checkpoints
pub(crate) const EMA_MODEL_NAME: &str = "main_model_ema";

pub(crate) const LR_FINDER_MODEL_KEY: &str = "lr_finder_model";
const LR_FINDER_OPTIM_KEY: &str = "lr_finder_optimizer";

/// Which metric drives the per-epoch scheduler step and early stopping
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TargetMetric {
    /// Average training loss over the epoch
    TrainLoss,
    /// Smoothed test accuracy (requires evaluating every epoch)
    TestAcc,
}

/// Run-level configuration with the usual defaults
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub save_dir: PathBuf,
    pub max_epoch: usize,
    pub start_epoch: usize,
    /// Print a progress line every N batches
    pub print_freq: usize,
    /// Evaluate every N epochs; `None` means only on the final epoch
    pub eval_freq: Option<usize>,
    /// First epoch (1-based) at which mid-run evaluation may happen
    pub start_eval: usize,
    /// Write a checkpoint every save event, not just for new bests
    pub save_all_checkpoints: bool,
    pub early_stopping: bool,
    /// Non-improving evaluated epochs tolerated by plateau strategies
    pub train_patience: usize,
    /// Warmup lower bound is `initial_lr / lr_decay_factor`
    pub lr_decay_factor: f64,
    /// Base RNG seed; epoch `e` uses `seed + e`
    pub seed: u64,
    pub initial_lr: f64,
    pub target_metric: TargetMetric,
    /// Decay for the EMA shadow of the main model; `None` disables EMA
    pub ema_decay: Option<f64>,
    /// Epoch interval during which auxiliary models are frozen
    pub aux_freeze: Option<EpochIntervalToValue<bool>>,
    /// Epoch interval during which mutual learning is enabled
    pub mutual_learning: Option<EpochIntervalToValue<bool>>,
}

impl EngineConfig {
    pub fn new(initial_lr: f64, max_epoch: usize, save_dir: impl Into<PathBuf>) -> Self {
        Self {
            save_dir: save_dir.into(),
            max_epoch,
            start_epoch: 0,
            print_freq: 10,
            eval_freq: Some(1),
            start_eval: 0,
            save_all_checkpoints: true,
            early_stopping: false,
            train_patience: 10,
            lr_decay_factor: 1000.0,
            seed: 5,
            initial_lr,
            target_metric: TargetMetric::TrainLoss,
            ema_decay: None,
            aux_freeze: None,
            mutual_learning: None,
        }
    }

    pub fn with_start_epoch(mut self, start_epoch: usize) -> Self {
        self.start_epoch = start_epoch;
        self
    }

    pub fn with_print_freq(mut self, print_freq: usize) -> Self {
        self.print_freq = print_freq.max(1);
        self
    }

    pub fn with_eval_freq(mut self, eval_freq: Option<usize>) -> Self {
        self.eval_freq = eval_freq;
        self
    }

    pub fn with_start_eval(mut self, start_eval: usize) -> Self {
        self.start_eval = start_eval;
        self
    }

    pub fn with_save_all_checkpoints(mut self, save_all: bool) -> Self {
        self.save_all_checkpoints = save_all;
        self
    }

    pub fn with_early_stopping(mut self, train_patience: usize) -> Self {
        self.early_stopping = true;
        self.train_patience = train_patience;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_target_metric(mut self, target_metric: TargetMetric) -> Self {
        self.target_metric = target_metric;
        self
    }

    pub fn with_ema_decay(mut self, decay: f64) -> Self {
        self.ema_decay = Some(decay);
        self
    }

    pub fn with_aux_freeze(mut self, interval: EpochIntervalToValue<bool>) -> Self {
        self.aux_freeze = Some(interval);
        self
    }

    pub fn with_mutual_learning(mut self, interval: EpochIntervalToValue<bool>) -> Self {
        self.mutual_learning = Some(interval);
        self
    }

    /// Lower bound a warmup schedule should ramp up from
    pub fn warmup_floor_lr(&self) -> f64 {
        self.initial_lr / self.lr_decay_factor
    }
}

pub(crate) struct ActiveSearch {
    pub mode: LrFinderMode,
    pub trial: Box<dyn SearchTrial>,
}

/// The training orchestrator.
///
/// Owns the registered models, the training strategy and the data loaders;
/// drives epochs, evaluation, checkpointing, learning-rate policy and the
/// optional collaborators (EMA shadow, compression controller, stop signal,
/// batch augmentation, learning-rate search).
pub struct Engine {
    pub(crate) registry: ModelRegistry,
    pub(crate) strategy: Box<dyn TrainingStrategy>,
    pub(crate) train_loader: Box<dyn DataLoader>,
    pub(crate) test_loader: Box<dyn DataLoader>,
    pub(crate) config: EngineConfig,
    pub(crate) cacher: StateCacher,
    pub(crate) ema: Option<ModelEma>,
    pub(crate) compression: Option<Box<dyn CompressionController>>,
    pub(crate) stop_signal: Option<Box<dyn StopSignal>>,
    pub(crate) augment: Option<BatchAugment>,
    pub(crate) lr_finder: Option<ActiveSearch>,
    pub(crate) seen_lrs: SeenLrs,
    pub(crate) best_metric: f64,
    pub(crate) test_acc: AverageMeter,
}

impl Engine {
    pub fn new(
        registry: ModelRegistry,
        strategy: Box<dyn TrainingStrategy>,
        train_loader: Box<dyn DataLoader>,
        test_loader: Box<dyn DataLoader>,
        config: EngineConfig,
    ) -> Result<Self> {
        if registry.is_empty() {
            return Err(Error::Configuration("no models registered".to_string()));
        }
        let ema = config
            .ema_decay
            .map(|decay| ModelEma::new(registry.main().model.as_ref(), decay));
        Ok(Self {
            registry,
            strategy,
            train_loader,
            test_loader,
            config,
            cacher: StateCacher::in_memory(),
            ema,
            compression: None,
            stop_signal: None,
            augment: None,
            lr_finder: None,
            seen_lrs: SeenLrs::default(),
            best_metric: 0.0,
            test_acc: AverageMeter::new(),
        })
    }

    pub fn with_compression(mut self, controller: Box<dyn CompressionController>) -> Self {
        self.compression = Some(controller);
        self
    }

    pub fn with_stop_signal(mut self, signal: Box<dyn StopSignal>) -> Self {
        self.stop_signal = Some(signal);
        self
    }

    pub fn with_augmentation(mut self, augment: BatchAugment) -> Self {
        self.augment = Some(augment);
        self
    }

    /// Replace the default in-memory snapshot store
    pub fn with_cacher(mut self, cacher: StateCacher) -> Self {
        self.cacher = cacher;
        self
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut ModelRegistry {
        &mut self.registry
    }

    /// Best (4-decimal-rounded) evaluation metric seen so far
    pub fn best_metric(&self) -> f64 {
        self.best_metric
    }

    /// Learning rate currently set on the main optimizer
    pub fn get_current_lr(&self) -> f64 {
        self.registry.main().optimizer.lr()
    }

    /// Whether the main scheduler's warmup phase (if any) has run its course
    pub fn warmup_finished(&self) -> bool {
        self.registry.main().scheduler.warmup_finished()
    }

    /// Whether mutual learning between registered models is active at `epoch`
    pub fn mutual_learning_enabled(&self, epoch: usize) -> bool {
        match &self.config.mutual_learning {
            Some(interval) => interval.value_at(epoch),
            None => true,
        }
    }

    pub(crate) fn should_freeze_aux(&self, epoch: usize) -> bool {
        match &self.config.aux_freeze {
            Some(interval) => interval.value_at(epoch),
            None => false,
        }
    }

    /// Freeze or thaw every auxiliary model; the main model is untouched
    pub(crate) fn freeze_aux_models(&mut self, freeze: bool) {
        for unit in self.registry.units_mut().skip(1) {
            unit.model.set_trainable(!freeze);
            unit.model.set_mode(if freeze { Mode::Eval } else { Mode::Train });
        }
    }

    /// Step every per-epoch scheduler and push the prescribed rate onto its
    /// optimizer. A no-op while a learning-rate search trial is active, and
    /// for per-batch schedulers (stepped inside the batch loop).
    pub(crate) fn update_lr(&mut self, metric: Option<f64>) {
        if self.lr_finder.is_some() {
            return;
        }
        for unit in self.registry.units_mut() {
            if unit.scheduler.is_per_batch() {
                continue;
            }
            unit.scheduler.step(metric);
            unit.optimizer.set_lr(unit.scheduler.get_lr());
        }
    }

    /// Mid-run evaluation cadence; the final epoch always evaluates
    pub(crate) fn should_eval(&self, epoch: usize) -> bool {
        let next = epoch + 1;
        let max = self.config.max_epoch;
        let mid_run = match self.config.eval_freq {
            Some(freq) if freq > 0 => {
                next >= self.config.start_eval && next % freq == 0 && next != max
            }
            _ => false,
        };
        mid_run || next == max
    }

    /// Fold an evaluation result into the best-metric tracker and consult
    /// the stop policy. Returns (should_exit, is_best_candidate).
    ///
    /// The metric is rounded to four decimals before comparison, and ties
    /// count as improvements so the freshest equivalent weights win. A
    /// partially-compressed model never exits early: stopping before the
    /// compression schedule finishes would checkpoint a model that cannot
    /// reach its target sparsity.
    pub(crate) fn exit_on_plateau_and_choose_best(
        &mut self,
        epoch: usize,
        accuracy: f64,
    ) -> (bool, bool) {
        let rounded = (accuracy * 1e4).round() / 1e4;
        let mut is_candidate = false;
        if rounded >= self.best_metric {
            self.best_metric = rounded;
            is_candidate = true;
        }

        let mut should_exit = self.strategy.should_stop(epoch, accuracy, self.best_metric);
        if let Some(controller) = &self.compression {
            if controller.compression_stage() != CompressionStage::FullyCompressed {
                should_exit = false;
            }
        }
        (should_exit, is_candidate)
    }

    /// Snapshot the main model and optimizer ahead of a learning-rate search
    pub fn backup_state(&mut self) -> Result<()> {
        let model_state = self.registry.main().model.state_dict();
        self.cacher.store(LR_FINDER_MODEL_KEY, &model_state)?;
        let optim_state = self.registry.main().optimizer.state_dict();
        self.cacher.store(LR_FINDER_OPTIM_KEY, &optim_state)?;
        Ok(())
    }

    /// Roll the main model and optimizer back to the pre-search snapshot
    pub fn restore_state(&mut self) -> Result<()> {
        let model_state: StateDict = self.cacher.retrieve(LR_FINDER_MODEL_KEY)?;
        let optim_state: serde_json::Value = self.cacher.retrieve(LR_FINDER_OPTIM_KEY)?;
        let main = self.registry.main_mut();
        main.model.load_state_dict(&model_state)?;
        main.optimizer.load_state_dict(optim_state)?;
        Ok(())
    }

    /// Start a learning-rate search trial: draw a quantized candidate, set it
    /// on the main optimizer and suspend scheduler stepping for the run.
    /// Auxiliary optimizers keep their configured rates.
    ///
    /// A candidate already tried in this search rolls the state back and is
    /// rejected with [`Error::TrialPruned`].
    pub fn configure_lr_finder(
        &mut self,
        search: LrFinderConfig,
        mut trial: Box<dyn SearchTrial>,
    ) -> Result<f64> {
        let lr = quantize_lr(trial.suggest_float("lr", search.min_lr, search.max_lr, search.step));
        if !self.seen_lrs.insert(lr) {
            if self.cacher.contains(LR_FINDER_MODEL_KEY) {
                self.restore_state()?;
            }
            return Err(Error::TrialPruned);
        }
        self.registry.main_mut().optimizer.set_lr(lr);
        self.lr_finder = Some(ActiveSearch { mode: search.mode, trial });
        Ok(lr)
    }

    /// Write checkpoints for every registered model (and the EMA shadow) and
    /// swap the `latest`/`best` symlinks.
    ///
    /// With `save_all_checkpoints` off, only best candidates and the final
    /// epoch are written. `best_on_ema` points `best.json` at the EMA
    /// shadow's checkpoint instead of the main model's.
    pub(crate) fn save_models(
        &mut self,
        epoch: usize,
        is_best: bool,
        best_on_ema: bool,
    ) -> Result<()> {
        if !self.config.save_all_checkpoints && !is_best && epoch + 1 != self.config.max_epoch {
            return Ok(());
        }

        let num_classes = self.train_loader.num_classes();
        let classes_map = self.train_loader.class_map();
        let compression_state = self.compression.as_ref().map(|c| c.compression_state());
        let save_dir = self.config.save_dir.clone();
        let initial_lr = self.config.initial_lr;

        let mut main_path = None;
        for unit in self.registry.units() {
            let ckpt = Checkpoint {
                epoch,
                state_dict: unit.model.state_dict(),
                optimizer: unit.optimizer.state_dict(),
                scheduler: unit.scheduler.state_dict(),
                num_classes,
                classes_map: classes_map.clone(),
                initial_lr,
                compression_state: compression_state.clone(),
            };
            let path = save_checkpoint(&ckpt, &save_dir.join(&unit.name))?;
            let link = if unit.name == MAIN_MODEL_NAME {
                save_dir.join("latest.json")
            } else {
                save_dir.join(format!("latest_{}.json", unit.name))
            };
            replace_symlink(&path, &link)?;
            if unit.name == MAIN_MODEL_NAME {
                main_path = Some(path);
            }
        }

        let mut ema_path = None;
        if let Some(ema) = &self.ema {
            let main = self.registry.main();
            let ckpt = Checkpoint {
                epoch,
                state_dict: ema.state_dict().clone(),
                optimizer: main.optimizer.state_dict(),
                scheduler: main.scheduler.state_dict(),
                num_classes,
                classes_map,
                initial_lr,
                compression_state,
            };
            let path = save_checkpoint(&ckpt, &save_dir.join(EMA_MODEL_NAME))?;
            replace_symlink(&path, &save_dir.join(format!("latest_{EMA_MODEL_NAME}.json")))?;
            ema_path = Some(path);
        }

        if is_best {
            let target = if best_on_ema { ema_path.or(main_path) } else { main_path };
            if let Some(target) = target {
                replace_symlink(&target, &save_dir.join("best.json"))?;
            }
        }
        Ok(())
    }
}
