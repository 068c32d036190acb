//! One epoch of the batch loop

use std::time::Instant;

use rand::rngs::StdRng;

use super::core::Engine;
use super::strategy::StepContext;
use crate::meter::{AverageMeter, MetricMeter};
use crate::model::Mode;
use crate::{Error, Result};

/// What an epoch hands back to the run loop
pub(crate) struct EpochStats {
    /// Average summed loss over the epoch's batches
    pub avg_loss: f64,
    /// Average training accuracy over the epoch's batches
    pub train_accuracy: f64,
    /// A cooperative stop signal fired mid-epoch
    pub stop_requested: bool,
}

impl Engine {
    /// Train every batch of one epoch.
    ///
    /// Divergence (non-finite total loss) aborts immediately; any other
    /// strategy error propagates to the run loop, which logs it and ends the
    /// run gracefully.
    pub(crate) fn train_epoch(&mut self, epoch: usize, rng: &mut StdRng) -> Result<EpochStats> {
        self.registry.main_mut().model.set_mode(Mode::Train);

        let batches = self.train_loader.load(rng);
        let num_batches = batches.len();
        let mutual_learning = self.mutual_learning_enabled(epoch);
        let searching = self.lr_finder.is_some();

        let mut losses = MetricMeter::new();
        let mut total_loss = AverageMeter::new();
        let mut accuracy = AverageMeter::new();
        let mut batch_time = AverageMeter::new();
        let mut stop_requested = false;

        for (batch_idx, mut batch) in batches.into_iter().enumerate() {
            if self.stop_signal.as_ref().is_some_and(|s| s.should_stop()) {
                stop_requested = true;
                break;
            }
            let started = Instant::now();

            if let Some(controller) = &mut self.compression {
                controller.step(batch_idx);
            }

            let applied = self
                .augment
                .as_ref()
                .and_then(|aug| aug.apply(&mut batch.images, rng));

            let ctx = StepContext {
                epoch,
                batch_idx,
                mutual_learning_enabled: mutual_learning,
                augment: applied,
            };
            let output = self.strategy.forward_backward(&mut self.registry, &batch, &ctx)?;

            let batch_loss: f64 = output.losses.iter().map(|(_, l)| l).sum();
            if !batch_loss.is_finite() {
                return Err(Error::Diverged { epoch, batch: batch_idx, loss: batch_loss });
            }

            losses.update(&output.losses);
            total_loss.update(batch_loss);
            accuracy.update(output.accuracy);

            if !searching {
                for unit in self.registry.units_mut() {
                    if unit.scheduler.is_per_batch() {
                        unit.scheduler.step(None);
                        unit.optimizer.set_lr(unit.scheduler.get_lr());
                    }
                }
            }

            // the shadow must not follow search-trial weights: rollback
            // after a pruned trial restores only the model and optimizer
            if !searching {
                if let Some(ema) = &mut self.ema {
                    ema.update(self.registry.main().model.as_ref());
                }
            }

            batch_time.update(started.elapsed().as_secs_f64());
            if (batch_idx + 1) % self.config.print_freq == 0 {
                let remaining = (self.config.max_epoch - epoch - 1) * num_batches
                    + (num_batches - batch_idx - 1);
                let eta = format_duration(batch_time.avg() * remaining as f64);
                println!(
                    "epoch: [{}/{}][{}/{}]\t{}\tacc {:.4} ({:.4})\tlr {:.6}\teta {}",
                    epoch + 1,
                    self.config.max_epoch,
                    batch_idx + 1,
                    num_batches,
                    losses,
                    accuracy.val,
                    accuracy.avg(),
                    self.get_current_lr(),
                    eta
                );
            }
        }

        Ok(EpochStats {
            avg_loss: total_loss.avg(),
            train_accuracy: accuracy.avg(),
            stop_requested,
        })
    }
}

/// Render a duration as `H:MM:SS`
pub(crate) fn format_duration(secs: f64) -> String {
    let total = secs.max(0.0).round() as u64;
    format!("{}:{:02}:{:02}", total / 3600, (total % 3600) / 60, total % 60)
}
