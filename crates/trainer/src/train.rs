use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tch::Device;

use east_data::{count_samples, load_data, Batch, BatchQueue, BatchSource};

use crate::callbacks::{Callback, EpochLogs};
use crate::checkpoint::ModelCheckpoint;
use crate::config::Settings;
use crate::model::{EastNetwork, Losses, TrainableModel};
use crate::schedule::LrScheduler;
use crate::template::{PathTemplate, Value};
use crate::validation::ValidationEvaluator;

pub const ARCHITECTURE_FILE: &str = "model.json";
pub const VALIDATION_DIR: &str = "val";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Initializing,
    Running { epoch: usize },
    Terminated,
}

/// Deletes the checkpoint directory if it exists and creates it empty.
pub fn reset_checkpoint_dir(path: &Path) -> Result<()> {
    if path.exists() {
        fs::remove_dir_all(path).with_context(|| format!("cannot remove '{}'", path.display()))?;
    }
    fs::create_dir_all(path).with_context(|| format!("cannot create '{}'", path.display()))
}

/// Path of the checkpoint a run resuming from `epoch` would have written.
fn resume_checkpoint(settings: &Settings, epoch: usize) -> Result<PathBuf> {
    let template = PathTemplate::parse(&settings.checkpoint_template)?;
    let values = BTreeMap::from([("epoch".to_string(), Value::from(epoch))]);
    Ok(settings.checkpoint_path.join(template.render(&values)?))
}

/// Drives the epoch loop and its callbacks over a model and a batch source.
pub struct Trainer<'a, M, S> {
    settings: &'a Settings,
    model: M,
    source: S,
    callbacks: Vec<Callback>,
    steps_per_epoch: f64,
    phase: Phase,
}

impl<'a, M: TrainableModel, S: BatchSource> Trainer<'a, M, S> {
    /// Builds the callbacks, restores weights and writes the architecture
    /// descriptor. The checkpoint directory must already be reset.
    pub fn initialize(
        settings: &'a Settings,
        model: M,
        source: S,
        samples: usize,
        validation: Batch,
    ) -> Result<Self> {
        anyhow::ensure!(samples > 0, "no training samples in '{}'", settings.training_data_path.display());
        let dir = &settings.checkpoint_path;
        let resume_base = settings.last_epoch_train;

        let callbacks = vec![
            Callback::from(LrScheduler::from_settings(settings)),
            Callback::from(ModelCheckpoint::new(
                dir,
                &settings.checkpoint_template,
                settings.save_checkpoint_epochs,
                resume_base,
                settings.save_weights_only,
            )?),
            Callback::from(ValidationEvaluator::new(
                validation,
                settings.batch_size,
                settings.validation_period,
                resume_base,
                &dir.join(VALIDATION_DIR),
            )?),
        ];

        let mut trainer = Self {
            settings,
            model,
            source,
            callbacks,
            steps_per_epoch: samples as f64 / settings.batch_size.get() as f64,
            phase: Phase::Initializing,
        };
        trainer.restore()?;

        log::info!("{}", trainer.model.summary());
        let architecture = dir.join(ARCHITECTURE_FILE);
        fs::write(&architecture, trainer.model.architecture_json()?)
            .with_context(|| format!("cannot write '{}'", architecture.display()))?;
        Ok(trainer)
    }

    fn restore(&mut self) -> Result<()> {
        if let Some(path) = &self.settings.restore_model {
            return self
                .model
                .load_weights(path)
                .with_context(|| format!("cannot restore model from '{}'", path.display()));
        }
        let epoch = self.settings.last_epoch_train;
        if epoch == 0 {
            return Ok(());
        }
        let path = resume_checkpoint(self.settings, epoch)?;
        self.model.load_weights(&path).with_context(|| {
            format!(
                "cannot resume from epoch {epoch} checkpoint '{}': '{}' was wiped at start, \
                 pass --restore_model with a copy stored elsewhere",
                path.display(),
                self.settings.checkpoint_path.display()
            )
        })
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn steps_per_epoch(&self) -> f64 {
        self.steps_per_epoch
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    /// Runs `max_epochs` epochs and returns each epoch's logs.
    pub fn fit(&mut self) -> Result<Vec<EpochLogs>> {
        let result = self.run_epochs();
        self.phase = Phase::Terminated;
        result
    }

    fn run_epochs(&mut self) -> Result<Vec<EpochLogs>> {
        let max_epochs = self.settings.max_epochs;
        let base = self.settings.last_epoch_train;
        let mut history = Vec::with_capacity(max_epochs);
        log::info!(
            "Training {max_epochs} epochs of {:.2} steps from epoch {base}",
            self.steps_per_epoch
        );

        for epoch in 0..max_epochs {
            self.phase = Phase::Running { epoch };
            for callback in &mut self.callbacks {
                callback.on_epoch_begin(epoch, &mut self.model)?;
            }

            let mut sum = Losses::default();
            let mut steps = 0usize;
            while (steps as f64) < self.steps_per_epoch {
                let batch = self.source.next_batch().context("cannot fetch a training batch")?;
                sum = sum.add(self.model.train_step(&batch)?);
                steps += 1;
            }
            let mean = sum.scaled(1.0 / steps.max(1) as f64);
            let mut logs = EpochLogs::from([
                ("loss".to_string(), mean.loss),
                ("pred_score_map_loss".to_string(), mean.score_map_loss),
                ("pred_geo_map_loss".to_string(), mean.geo_map_loss),
            ]);

            for callback in &mut self.callbacks {
                callback
                    .on_epoch_end(epoch, &mut logs, &mut self.model)
                    .with_context(|| format!("{} failed at epoch {}", callback.name(), base + epoch + 1))?;
            }
            log::info!(
                "Epoch {}/{}: {steps} steps, loss: {:.4}, pred_score_map_loss: {:.4}, pred_geo_map_loss: {:.4}, lr: {:e}",
                base + epoch + 1,
                base + max_epochs,
                mean.loss,
                mean.score_map_loss,
                mean.geo_map_loss,
                logs.get("lr").copied().unwrap_or(f64::NAN)
            );
            history.push(logs);
        }
        Ok(history)
    }
}

/// The whole run: reset, data, network, callbacks, restore, loop.
pub fn train(settings: &Settings) -> Result<Vec<EpochLogs>> {
    reset_checkpoint_dir(&settings.checkpoint_path)?;

    let data = settings.data_config();
    let seed = rand::random::<u64>();
    log::debug!("batch workers seeded from {seed}");
    let queue = BatchQueue::spawn(&data, settings.nb_workers, seed).context("cannot start the batch workers")?;
    let samples = count_samples(&data)?;
    let validation = load_data(&data).context("cannot load the validation data")?;
    log::info!(
        "{samples} training images, {} validation images, {} batch workers",
        validation.len(),
        queue.workers()
    );

    let device = Device::cuda_if_available();
    log::info!("Using device: {device:?}");
    let network = EastNetwork::new(&settings.model_config()?, settings.init_learning_rate, device)?;

    let mut trainer = Trainer::initialize(settings, network, queue, samples, validation)?;
    trainer.fit()
}
