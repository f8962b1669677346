use std::num::NonZeroUsize;

use crate::callbacks::EpochLogs;
use crate::config::Settings;
use crate::model::TrainableModel;

/// Step decay: `initial * decay_rate ^ floor((epoch + resume_base) / decay_steps)`.
pub fn lr_decay(
    epoch: usize,
    resume_base: usize,
    initial_rate: f64,
    decay_rate: f64,
    decay_steps: NonZeroUsize,
) -> f64 {
    let decays = (epoch + resume_base) / decay_steps.get();
    initial_rate * decay_rate.powf(decays as f64)
}

/// Sets the optimizer rate before each epoch and reports it afterwards.
#[derive(Debug, Clone)]
pub struct LrScheduler {
    initial_rate: f64,
    decay_rate: f64,
    decay_steps: NonZeroUsize,
    resume_base: usize,
}

impl LrScheduler {
    pub fn new(initial_rate: f64, decay_rate: f64, decay_steps: NonZeroUsize, resume_base: usize) -> Self {
        Self {
            initial_rate,
            decay_rate,
            decay_steps,
            resume_base,
        }
    }

    pub fn from_settings(settings: &Settings) -> Self {
        Self::new(
            settings.init_learning_rate,
            settings.lr_decay_rate,
            settings.lr_decay_steps,
            settings.last_epoch_train,
        )
    }

    pub fn rate(&self, epoch: usize) -> f64 {
        lr_decay(epoch, self.resume_base, self.initial_rate, self.decay_rate, self.decay_steps)
    }

    pub fn on_epoch_begin<M: TrainableModel + ?Sized>(&self, epoch: usize, model: &mut M) {
        let rate = self.rate(epoch);
        if (rate - model.learning_rate()).abs() > f64::EPSILON * rate.abs() {
            log::debug!("epoch {}: learning rate set to {rate:e}", epoch + 1);
        }
        model.set_learning_rate(rate);
    }

    pub fn on_epoch_end<M: TrainableModel + ?Sized>(&self, logs: &mut EpochLogs, model: &M) {
        logs.insert("lr".to_string(), model.learning_rate());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn steps(n: usize) -> NonZeroUsize {
        NonZeroUsize::new(n).unwrap()
    }

    #[test]
    fn first_epochs_use_the_initial_rate() {
        assert_eq!(lr_decay(0, 0, 0.0001, 0.94, steps(130)), 0.0001);
        assert_eq!(lr_decay(129, 0, 0.0001, 0.94, steps(130)), 0.0001);
    }

    #[test]
    fn decays_once_per_block() {
        assert!((lr_decay(130, 0, 0.0001, 0.94, steps(130)) - 0.0001 * 0.94).abs() < 1e-15);
        assert!((lr_decay(265, 0, 0.0001, 0.94, steps(130)) - 0.0001 * 0.94 * 0.94).abs() < 1e-15);
    }

    #[test]
    fn resume_base_shifts_the_schedule() {
        let scheduler = LrScheduler::new(0.0001, 0.94, steps(130), 100);
        assert_eq!(scheduler.rate(29), 0.0001);
        assert!((scheduler.rate(30) - 0.0001 * 0.94).abs() < 1e-15);
    }

    #[test]
    fn schedule_is_piecewise_constant() {
        let rates: Vec<f64> = (0..40).map(|e| lr_decay(e, 0, 1.0, 0.5, steps(10))).collect();
        for block in rates.chunks(10) {
            assert!(block.iter().all(|&r| r == block[0]));
        }
        assert_eq!(rates[39], 0.125);
    }
}
