use anyhow::Result;
use std::collections::BTreeMap;

use crate::checkpoint::ModelCheckpoint;
use crate::model::TrainableModel;
use crate::schedule::LrScheduler;
use crate::validation::ValidationEvaluator;

/// Scalar metrics of one epoch, by name.
pub type EpochLogs = BTreeMap<String, f64>;

/// Epoch-boundary hooks, run in list order on the driver thread.
pub enum Callback {
    LrScheduler(LrScheduler),
    ModelCheckpoint(ModelCheckpoint),
    ValidationEvaluator(ValidationEvaluator),
}

impl Callback {
    pub fn name(&self) -> &'static str {
        match self {
            Callback::LrScheduler(_) => "lr_scheduler",
            Callback::ModelCheckpoint(_) => "model_checkpoint",
            Callback::ValidationEvaluator(_) => "validation_evaluator",
        }
    }

    pub fn on_epoch_begin<M: TrainableModel + ?Sized>(&mut self, epoch: usize, model: &mut M) -> Result<()> {
        if let Callback::LrScheduler(scheduler) = self {
            scheduler.on_epoch_begin(epoch, model);
        }
        Ok(())
    }

    pub fn on_epoch_end<M: TrainableModel + ?Sized>(
        &mut self,
        epoch: usize,
        logs: &mut EpochLogs,
        model: &mut M,
    ) -> Result<()> {
        match self {
            Callback::LrScheduler(scheduler) => scheduler.on_epoch_end(logs, model),
            Callback::ModelCheckpoint(checkpoint) => {
                checkpoint.on_epoch_end(epoch, logs, model)?;
            }
            Callback::ValidationEvaluator(evaluator) => {
                evaluator.on_epoch_end(epoch, model)?;
            }
        }
        Ok(())
    }
}

impl From<LrScheduler> for Callback {
    fn from(scheduler: LrScheduler) -> Self {
        Callback::LrScheduler(scheduler)
    }
}

impl From<ModelCheckpoint> for Callback {
    fn from(checkpoint: ModelCheckpoint) -> Self {
        Callback::ModelCheckpoint(checkpoint)
    }
}

impl From<ValidationEvaluator> for Callback {
    fn from(evaluator: ValidationEvaluator) -> Self {
        Callback::ValidationEvaluator(evaluator)
    }
}
