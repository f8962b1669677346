use anyhow::{Context, Result};
use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use crate::callbacks::EpochLogs;
use crate::model::TrainableModel;
use crate::template::{PathTemplate, TemplateError, Value};

/// Saves the model every `period` epochs under a templated file name.
#[derive(Debug, Clone)]
pub struct ModelCheckpoint {
    dir: PathBuf,
    template: PathTemplate,
    period: usize,
    resume_base: usize,
    save_weights_only: bool,
    epochs_since_last_save: usize,
}

impl ModelCheckpoint {
    pub fn new(
        dir: impl Into<PathBuf>,
        template: &str,
        period: NonZeroUsize,
        resume_base: usize,
        save_weights_only: bool,
    ) -> Result<Self, TemplateError> {
        Ok(Self {
            dir: dir.into(),
            template: PathTemplate::parse(template)?,
            period: period.get(),
            resume_base,
            save_weights_only,
            epochs_since_last_save: 0,
        })
    }

    /// Where the checkpoint of `true_epoch` goes, given the epoch's logs.
    pub fn path_for(&self, true_epoch: usize, logs: &EpochLogs) -> Result<PathBuf, TemplateError> {
        let mut values: BTreeMap<String, Value> = logs.iter().map(|(k, &v)| (k.clone(), Value::Float(v))).collect();
        values.insert("epoch".to_string(), Value::from(true_epoch));
        Ok(self.dir.join(self.template.render(&values)?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Returns the written path, if this epoch saved one.
    pub fn on_epoch_end<M: TrainableModel + ?Sized>(
        &mut self,
        epoch: usize,
        logs: &EpochLogs,
        model: &M,
    ) -> Result<Option<PathBuf>> {
        self.epochs_since_last_save += 1;
        if self.epochs_since_last_save < self.period {
            return Ok(None);
        }
        self.epochs_since_last_save = 0;

        let true_epoch = self.resume_base + epoch + 1;
        let path = self.path_for(true_epoch, logs)?;
        let saved = if self.save_weights_only {
            model.save_weights(&path)
        } else {
            model.save(&path)
        };
        saved.with_context(|| format!("cannot write checkpoint '{}'", path.display()))?;
        log::info!("Epoch {true_epoch}: saved checkpoint to '{}'", path.display());
        Ok(Some(path))
    }
}
