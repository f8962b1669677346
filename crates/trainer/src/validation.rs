use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};

use east_data::Batch;

use crate::model::{Losses, TrainableModel};

pub const SCALARS_FILE: &str = "scalars.jsonl";

#[derive(Debug, Serialize)]
struct ScalarEvent<'a> {
    step: usize,
    tag: &'a str,
    value: f64,
}

/// Append-only stream of `{"step", "tag", "value"}` JSON lines.
pub struct MetricsWriter {
    path: PathBuf,
    writer: BufWriter<File>,
}

impl MetricsWriter {
    pub fn create(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("cannot create '{}'", dir.display()))?;
        let path = dir.join(SCALARS_FILE);
        let file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("cannot open '{}'", path.display()))?;
        Ok(Self {
            path,
            writer: BufWriter::new(file),
        })
    }

    pub fn scalar(&mut self, step: usize, tag: &str, value: f64) -> Result<()> {
        serde_json::to_writer(&mut self.writer, &ScalarEvent { step, tag, value })?;
        self.writer.write_all(b"\n")?;
        Ok(())
    }

    pub fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .with_context(|| format!("cannot write '{}'", self.path.display()))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Periodically measures the losses on the fixed validation set.
pub struct ValidationEvaluator {
    data: Batch,
    batch_size: usize,
    period: usize,
    resume_base: usize,
    writer: MetricsWriter,
}

impl ValidationEvaluator {
    pub fn new(
        data: Batch,
        batch_size: NonZeroUsize,
        period: NonZeroUsize,
        resume_base: usize,
        log_dir: &Path,
    ) -> Result<Self> {
        Ok(Self {
            data,
            batch_size: batch_size.get(),
            period: period.get(),
            resume_base,
            writer: MetricsWriter::create(log_dir)?,
        })
    }

    /// Sample-weighted mean of the losses over every validation chunk.
    pub fn evaluate<M: TrainableModel + ?Sized>(&self, model: &M) -> Result<Losses> {
        let total = self.data.len();
        anyhow::ensure!(total > 0, "validation set is empty");
        let mut sum = Losses::default();
        for chunk in self.data.chunks(self.batch_size) {
            let weight = chunk.len() as f64 / total as f64;
            sum = sum.add(model.evaluate(&chunk)?.scaled(weight));
        }
        Ok(sum)
    }

    pub fn on_epoch_end<M: TrainableModel + ?Sized>(&mut self, epoch: usize, model: &M) -> Result<Option<Losses>> {
        if (epoch + 1) % self.period != 0 {
            return Ok(None);
        }
        let losses = self.evaluate(model)?;
        let step = epoch + self.resume_base + 1;
        log::info!(
            "Epoch {step}: val_loss: {:.4}, val_score_map_loss: {:.4}, val_geo_map_loss: {:.4}",
            losses.loss,
            losses.score_map_loss,
            losses.geo_map_loss
        );
        self.writer.scalar(step, "loss", losses.loss)?;
        self.writer.scalar(step, "pred_score_map_loss", losses.score_map_loss)?;
        self.writer.scalar(step, "pred_geo_map_loss", losses.geo_map_loss)?;
        self.writer.flush()?;
        Ok(Some(losses))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metrics_are_json_lines() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = MetricsWriter::create(&dir.path().join("val")).unwrap();
        writer.scalar(5, "loss", 0.25).unwrap();
        writer.scalar(5, "pred_geo_map_loss", 0.125).unwrap();
        writer.flush().unwrap();

        let content = fs::read_to_string(writer.path()).unwrap();
        let lines: Vec<serde_json::Value> = content.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["step"], 5);
        assert_eq!(lines[0]["tag"], "loss");
        assert_eq!(lines[1]["value"], 0.125);
    }
}
