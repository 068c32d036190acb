//! The epoch loop and evaluation

use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;

use super::core::{Engine, TargetMetric, EMA_MODEL_NAME, LR_FINDER_MODEL_KEY};
use super::epoch::format_duration;
use super::lr_finder::LrFinderMode;
use super::registry::MAIN_MODEL_NAME;
use super::result::RunSummary;
use crate::model::Mode;
use crate::{Error, Result};

impl Engine {
    /// Train from `start_epoch` to `max_epoch`, evaluating, checkpointing
    /// and adjusting the learning rate along the way.
    ///
    /// Divergence aborts with [`Error::Diverged`]; any other strategy error
    /// is logged with its epoch and ends the run gracefully. An active
    /// learning-rate search trial suppresses checkpointing and scheduler
    /// stepping, reports each evaluation to the trial, and rolls the model
    /// back once the trial finishes (unless in fast-ai mode).
    pub fn run(&mut self) -> Result<RunSummary> {
        if self.config.start_epoch >= self.config.max_epoch {
            return Err(Error::Configuration(format!(
                "start epoch {} must precede max epoch {}",
                self.config.start_epoch, self.config.max_epoch
            )));
        }
        let needs_every_epoch = self.config.early_stopping
            || self.config.target_metric == TargetMetric::TestAcc;
        if needs_every_epoch && self.config.eval_freq != Some(1) {
            return Err(Error::Configuration(
                "early stopping and the test-accuracy target require eval_freq = 1".to_string(),
            ));
        }

        let started = Instant::now();
        let mut accuracy = 0.0;
        let mut best_on_ema = false;
        let mut stopped_early = false;
        let mut final_epoch = self.config.start_epoch;

        println!("=> start training");
        for epoch in self.config.start_epoch..self.config.max_epoch {
            final_epoch = epoch;
            let mut rng = StdRng::seed_from_u64(self.config.seed + epoch as u64);

            if let Some(controller) = &mut self.compression {
                controller.epoch_step(epoch);
            }
            let freeze = self.should_freeze_aux(epoch);
            self.freeze_aux_models(freeze);

            let stats = match self.train_epoch(epoch, &mut rng) {
                Ok(stats) => stats,
                Err(err @ Error::Diverged { .. }) => return Err(err),
                Err(err) => {
                    eprintln!("epoch {} failed: {err}; stopping run", epoch + 1);
                    stopped_early = true;
                    break;
                }
            };

            if let Some(controller) = &self.compression {
                println!("compression: {}", controller.statistics());
            }

            // the signal may have fired during the epoch's last batch, so
            // poll once more before spending work on eval and checkpoints
            let stop_requested = stats.stop_requested
                || self.stop_signal.as_ref().is_some_and(|s| s.should_stop());
            if stop_requested {
                println!("=> stop requested at epoch {}", epoch + 1);
                stopped_early = true;
                break;
            }

            let mut metric = match self.config.target_metric {
                TargetMetric::TrainLoss => stats.avg_loss,
                TargetMetric::TestAcc => self.test_acc.avg(),
            };

            if self.should_eval(epoch) {
                let (acc, ema_won) = self.eval_epoch(epoch)?;
                accuracy = acc;
                best_on_ema = ema_won;
                self.test_acc.update_if_ge_avg(acc);
                if self.config.target_metric == TargetMetric::TestAcc {
                    metric = self.test_acc.avg();
                }

                let prune = match &mut self.lr_finder {
                    Some(search) => {
                        search.trial.report(acc, epoch);
                        search.trial.should_prune()
                    }
                    None => false,
                };
                if prune {
                    self.rollback_search()?;
                    return Err(Error::TrialPruned);
                }
            }

            // scheduler step precedes checkpointing so the saved scheduler
            // state matches the epoch recorded next to it
            self.update_lr(Some(metric));

            // checkpointing runs every epoch on the last-seen accuracy, not
            // just on evaluation epochs
            let (should_exit, is_candidate) =
                self.exit_on_plateau_and_choose_best(epoch, accuracy);
            if self.lr_finder.is_none() {
                self.save_models(epoch, is_candidate, best_on_ema)?;
            }
            if self.config.early_stopping && should_exit {
                println!("=> early stopping at epoch {}", epoch + 1);
                stopped_early = true;
                break;
            }
        }

        self.strategy.finalize(&mut self.registry)?;

        if let Some(search) = self.lr_finder.take() {
            if search.mode != LrFinderMode::FastAi {
                self.restore_backup_if_present()?;
            }
        }

        let elapsed_secs = started.elapsed().as_secs_f64();
        println!("=> done, elapsed {}", format_duration(elapsed_secs));
        Ok(RunSummary {
            accuracy,
            best_metric: self.best_metric,
            final_epoch,
            stopped_early,
            elapsed_secs,
        })
    }

    /// Evaluate the main model on the test loader; returns the best of the
    /// main and EMA scores
    pub fn test(&mut self, epoch: usize) -> Result<f64> {
        self.eval_epoch(epoch).map(|(acc, _)| acc)
    }

    /// Evaluate the main model and, when present, the EMA shadow; auxiliary
    /// models are evaluated only on the final epoch, and the shadow is
    /// skipped entirely while a learning-rate search is active (it is frozen
    /// for the duration of the search). Returns
    /// (best accuracy, whether the EMA shadow strictly won).
    pub(crate) fn eval_epoch(&mut self, epoch: usize) -> Result<(f64, bool)> {
        self.registry.set_mode_all(Mode::Eval);
        let searching = self.lr_finder.is_some();

        let main_acc = self.strategy.evaluate(
            self.registry.main_mut().model.as_mut(),
            self.test_loader.as_mut(),
            epoch,
            MAIN_MODEL_NAME,
        )?;

        let mut ema_acc = None;
        if !searching {
            if let Some(ema) = &self.ema {
                let shadow = ema.state_dict().clone();
                let live = self.registry.main().model.state_dict();

                self.registry.main_mut().model.load_state_dict(&shadow)?;
                let acc = self.strategy.evaluate(
                    self.registry.main_mut().model.as_mut(),
                    self.test_loader.as_mut(),
                    epoch,
                    EMA_MODEL_NAME,
                )?;
                self.registry.main_mut().model.load_state_dict(&live)?;
                ema_acc = Some(acc);
            }
        }

        if epoch + 1 == self.config.max_epoch {
            for name in self.registry.aux_names() {
                self.strategy.evaluate(
                    self.registry.by_name_mut(&name)?.model.as_mut(),
                    self.test_loader.as_mut(),
                    epoch,
                    &name,
                )?;
            }
        }

        self.registry.set_mode_all(Mode::Train);

        let best_on_ema = ema_acc.is_some_and(|e| e > main_acc);
        let accuracy = ema_acc.map_or(main_acc, |e| e.max(main_acc));
        Ok((accuracy, best_on_ema))
    }

    fn rollback_search(&mut self) -> Result<()> {
        self.lr_finder = None;
        self.restore_backup_if_present()
    }

    fn restore_backup_if_present(&mut self) -> Result<()> {
        if self.cacher.contains(LR_FINDER_MODEL_KEY) {
            self.restore_state()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;
    use crate::data::{Batch, DataLoader};
    use crate::engine::checkpoint::load_checkpoint;
    use crate::engine::core::EngineConfig;
    use crate::engine::lr_finder::LrFinderConfig;
    use crate::engine::registry::ModelRegistry;
    use crate::engine::strategy::{StepContext, StepOutput, TrainingStrategy};
    use crate::engine::testutil::{stub_registry, StubLoader, StubStrategy, StubTrial};
    use crate::engine::StopFlag;
    use crate::model::{Model, StateDict};

    fn quiet(config: EngineConfig) -> EngineConfig {
        config.with_print_freq(1000)
    }

    /// Overwrites the main model's weights with the step count every batch,
    /// so weight movement during a run is observable from the outside.
    struct DriftingStrategy {
        step: f32,
        evaluated: Arc<Mutex<Vec<String>>>,
    }

    impl TrainingStrategy for DriftingStrategy {
        fn forward_backward(
            &mut self,
            registry: &mut ModelRegistry,
            _batch: &Batch,
            _ctx: &StepContext,
        ) -> Result<StepOutput> {
            self.step += 1.0;
            let mut drifted = StateDict::new();
            drifted.insert("w".to_string(), vec![self.step, self.step, self.step]);
            registry.main_mut().model.load_state_dict(&drifted)?;
            Ok(StepOutput { losses: vec![("loss".to_string(), 1.0)], accuracy: 0.5 })
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
            Ok(0.5)
        }
    }

    /// Trips a stop flag from inside a chosen batch, mimicking a controlling
    /// thread requesting a stop while training is mid-epoch.
    struct FlagTripStrategy {
        flag: StopFlag,
        trip_at: (usize, usize),
        evaluated: Arc<Mutex<Vec<String>>>,
    }

    impl TrainingStrategy for FlagTripStrategy {
        fn forward_backward(
            &mut self,
            _registry: &mut ModelRegistry,
            _batch: &Batch,
            ctx: &StepContext,
        ) -> Result<StepOutput> {
            if (ctx.epoch, ctx.batch_idx) == self.trip_at {
                self.flag.trigger();
            }
            Ok(StepOutput { losses: vec![("loss".to_string(), 1.0)], accuracy: 0.5 })
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
            Ok(0.5)
        }
    }

    #[test]
    fn test_run_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(
            stub_registry(0.01),
            StubStrategy::boxed(vec![0.4, 0.5, 0.6]),
            StubLoader::boxed(2, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 3, dir.path())),
        )
        .unwrap();

        let summary = engine.run().unwrap();
        assert_eq!(summary.final_epoch, 2);
        assert!(!summary.stopped_early);
        assert!((summary.accuracy - 0.6).abs() < 1e-12);
        assert!((summary.best_metric - 0.6).abs() < 1e-9);
        assert!(dir.path().join("best.json").exists());
    }

    #[test]
    fn test_start_epoch_must_precede_max() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(
            stub_registry(0.01),
            StubStrategy::boxed(vec![0.5]),
            StubLoader::boxed(1, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 3, dir.path()).with_start_epoch(3)),
        )
        .unwrap();
        assert!(matches!(engine.run(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_early_stopping_needs_every_epoch_eval() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(
            stub_registry(0.01),
            StubStrategy::boxed(vec![0.5]),
            StubLoader::boxed(1, 2),
            StubLoader::boxed(1, 2),
            quiet(
                EngineConfig::new(0.01, 3, dir.path())
                    .with_early_stopping(2)
                    .with_eval_freq(Some(2)),
            ),
        )
        .unwrap();
        assert!(matches!(engine.run(), Err(Error::Configuration(_))));
    }

    #[test]
    fn test_early_stopping_via_strategy() {
        let dir = tempfile::tempdir().unwrap();
        let mut strategy = StubStrategy::new(vec![0.5; 10]);
        strategy.stop_after_epoch = Some(2);
        let mut engine = Engine::new(
            stub_registry(0.01),
            Box::new(strategy),
            StubLoader::boxed(1, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 10, dir.path()).with_early_stopping(2)),
        )
        .unwrap();

        let summary = engine.run().unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.final_epoch, 2);
    }

    #[test]
    fn test_divergence_propagates() {
        let dir = tempfile::tempdir().unwrap();
        let mut strategy = StubStrategy::new(vec![0.5]);
        strategy.diverge_at = Some((1, 0));
        let mut engine = Engine::new(
            stub_registry(0.01),
            Box::new(strategy),
            StubLoader::boxed(2, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 5, dir.path())),
        )
        .unwrap();

        let res = engine.run();
        assert!(matches!(res, Err(Error::Diverged { epoch: 1, batch: 0, .. })));
    }

    #[test]
    fn test_strategy_error_ends_run_gracefully() {
        let dir = tempfile::tempdir().unwrap();
        let mut strategy = StubStrategy::new(vec![0.5]);
        strategy.fail_at = Some((1, 0));
        let mut engine = Engine::new(
            stub_registry(0.01),
            Box::new(strategy),
            StubLoader::boxed(2, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 5, dir.path())),
        )
        .unwrap();

        let summary = engine.run().unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.final_epoch, 1);
    }

    #[test]
    fn test_per_epoch_seed_is_base_plus_epoch() {
        use rand::Rng;

        let dir = tempfile::tempdir().unwrap();
        let loader = StubLoader::new(1, 2);
        let draws = loader.first_draws.clone();
        let mut engine = Engine::new(
            stub_registry(0.01),
            StubStrategy::boxed(vec![0.5]),
            Box::new(loader),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 3, dir.path()).with_seed(100)),
        )
        .unwrap();
        engine.run().unwrap();

        let recorded = draws.lock().unwrap().clone();
        assert_eq!(recorded.len(), 3);
        for (epoch, &draw) in recorded.iter().enumerate() {
            let expected = StdRng::seed_from_u64(100 + epoch as u64).random::<f64>();
            assert_eq!(draw, expected);
        }
    }

    #[test]
    fn test_lr_finder_reports_and_restores() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(
            stub_registry(0.01),
            StubStrategy::boxed(vec![0.4, 0.5]),
            StubLoader::boxed(1, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 2, dir.path())),
        )
        .unwrap();

        engine.backup_state().unwrap();
        let original = engine.registry().main().model.state_dict();

        let trial = StubTrial::new(vec![0.05]);
        let reports = trial.reports.clone();
        let search = LrFinderConfig::new(1e-3, 1e-1, 1e-6, LrFinderMode::Automatic).unwrap();
        engine.configure_lr_finder(search, Box::new(trial)).unwrap();

        engine.run().unwrap();

        let recorded = reports.lock().unwrap().clone();
        assert_eq!(recorded, vec![(0.4, 0), (0.5, 1)]);
        // automatic mode rolls the weights back after the trial
        assert_eq!(engine.registry().main().model.state_dict(), original);
        // no checkpoints during a search
        assert!(!dir.path().join("latest.json").exists());
    }

    #[test]
    fn test_lr_finder_prune_mid_run() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(
            stub_registry(0.01),
            StubStrategy::boxed(vec![0.1; 5]),
            StubLoader::boxed(1, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 5, dir.path())),
        )
        .unwrap();

        engine.backup_state().unwrap();
        let trial = StubTrial::new(vec![0.02]);
        trial.prune_flag.store(true, std::sync::atomic::Ordering::Relaxed);
        let search = LrFinderConfig::new(1e-3, 1e-1, 1e-6, LrFinderMode::Automatic).unwrap();
        engine.configure_lr_finder(search, Box::new(trial)).unwrap();

        assert!(matches!(engine.run(), Err(Error::TrialPruned)));
    }

    #[test]
    fn test_checkpoints_written_on_non_eval_epochs() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(
            stub_registry(0.01),
            StubStrategy::boxed(vec![0.5; 4]),
            StubLoader::boxed(1, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 4, dir.path()).with_eval_freq(Some(2))),
        )
        .unwrap();
        engine.run().unwrap();

        for epoch in 0..4 {
            assert!(
                dir.path()
                    .join(format!("main_model/checkpoint_epoch_{epoch}.json"))
                    .exists(),
                "missing checkpoint for epoch {epoch}"
            );
        }
    }

    #[test]
    fn test_checkpoint_carries_stepped_scheduler_state() {
        let dir = tempfile::tempdir().unwrap();
        let mut engine = Engine::new(
            stub_registry(0.1),
            StubStrategy::boxed(vec![0.5]),
            StubLoader::boxed(1, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.1, 1, dir.path())),
        )
        .unwrap();
        engine.registry_mut().main_mut().scheduler =
            Box::new(crate::sched::StepDecay::new(0.1, 1, 0.5));
        engine.run().unwrap();

        // the scheduler steps before the checkpoint is written
        let ckpt =
            load_checkpoint(&dir.path().join("main_model/checkpoint_epoch_0.json")).unwrap();
        assert_eq!(ckpt.scheduler["current_epoch"], 1);
    }

    #[test]
    fn test_search_trial_leaves_ema_shadow_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let evaluated = Arc::new(Mutex::new(Vec::new()));
        let strategy = DriftingStrategy { step: 0.0, evaluated: evaluated.clone() };
        let mut engine = Engine::new(
            stub_registry(0.01),
            Box::new(strategy),
            StubLoader::boxed(2, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 2, dir.path()).with_ema_decay(0.5)),
        )
        .unwrap();

        engine.backup_state().unwrap();
        let search = LrFinderConfig::new(1e-3, 1e-1, 1e-6, LrFinderMode::Automatic).unwrap();
        engine
            .configure_lr_finder(search, Box::new(StubTrial::new(vec![0.02])))
            .unwrap();
        engine.run().unwrap();

        // the trial's weights are rolled back and the shadow never followed
        // them, so both read as the pre-search snapshot
        assert_eq!(engine.registry().main().model.state_dict()["w"], vec![1.0, 2.0, 3.0]);
        let shadow = engine.ema.as_ref().unwrap().state_dict().clone();
        assert_eq!(shadow["w"], vec![1.0, 2.0, 3.0]);

        // the frozen shadow is not evaluated while the search runs
        let calls = evaluated.lock().unwrap().clone();
        assert!(!calls.is_empty());
        assert!(calls.iter().all(|c| !c.starts_with(EMA_MODEL_NAME)));
    }

    #[test]
    fn test_stop_during_last_batch_ends_epoch_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let flag = StopFlag::new();
        let evaluated = Arc::new(Mutex::new(Vec::new()));
        let strategy = FlagTripStrategy {
            flag: flag.clone(),
            trip_at: (0, 1),
            evaluated: evaluated.clone(),
        };
        let mut engine = Engine::new(
            stub_registry(0.01),
            Box::new(strategy),
            StubLoader::boxed(2, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 3, dir.path())),
        )
        .unwrap()
        .with_stop_signal(Box::new(flag));

        let summary = engine.run().unwrap();
        assert!(summary.stopped_early);
        assert_eq!(summary.final_epoch, 0);
        // a flag raised in the epoch's final batch is seen before any
        // evaluation or checkpoint work is spent on that epoch
        assert!(evaluated.lock().unwrap().is_empty());
        assert!(!dir.path().join("latest.json").exists());
    }

    #[test]
    fn test_eval_covers_ema_and_final_aux() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = stub_registry(0.01);
        registry
            .register(
                "aux_model_1",
                crate::engine::testutil::StubModel::boxed(vec![0.0]),
                crate::engine::testutil::StubOptimizer::boxed(0.01),
                crate::engine::testutil::stub_scheduler(0.01),
            )
            .unwrap();

        let strategy = StubStrategy::new(vec![0.5, 0.6]);
        let evaluated = strategy.evaluated.clone();
        let mut engine = Engine::new(
            registry,
            Box::new(strategy),
            StubLoader::boxed(1, 2),
            StubLoader::boxed(1, 2),
            quiet(EngineConfig::new(0.01, 2, dir.path()).with_ema_decay(0.9)),
        )
        .unwrap();
        engine.run().unwrap();

        // main + ema every eval epoch, aux only on the final one
        let calls = evaluated.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                "main_model@0",
                "main_model_ema@0",
                "main_model@1",
                "main_model_ema@1",
                "aux_model_1@1",
            ]
        );
        assert!(dir.path().join("latest_aux_model_1.json").exists());
        assert!(dir.path().join("latest_main_model_ema.json").exists());
    }
}
