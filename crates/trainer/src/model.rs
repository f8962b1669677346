use anyhow::{Context, Result};
use ndarray::Array4;
use std::collections::HashMap;
use std::path::Path;
use tch::{nn, nn::OptimizerConfig, Device, Kind, Tensor};

use east_core::losses::{dice_loss, rbox_loss, TrainingMasks};
use east_core::safetensors_util::{load_safetensors, save_safetensors, ARCHITECTURE_KEY};
use east_core::{EastModel, ModelConfig};
use east_data::Batch;

/// Weight of the dice loss inside the score map objective.
pub const SCORE_MAP_LOSS_WEIGHT: f64 = 0.01;
/// Share of the loss kept for text below `min_text_size`.
pub const SMALL_TEXT_WEIGHT: f64 = 0.0;
/// Weights of the score map and geometry objectives in the total loss.
pub const LOSS_WEIGHTS: [f64; 2] = [1.0, 1.0];

/// Total loss and its two parts, as reported for one batch or averaged.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Losses {
    pub loss: f64,
    pub score_map_loss: f64,
    pub geo_map_loss: f64,
}

impl Losses {
    pub fn scaled(self, factor: f64) -> Losses {
        Losses {
            loss: self.loss * factor,
            score_map_loss: self.score_map_loss * factor,
            geo_map_loss: self.geo_map_loss * factor,
        }
    }

    pub fn add(self, other: Losses) -> Losses {
        Losses {
            loss: self.loss + other.loss,
            score_map_loss: self.score_map_loss + other.score_map_loss,
            geo_map_loss: self.geo_map_loss + other.geo_map_loss,
        }
    }
}

/// What the driver and its callbacks need from a network.
pub trait TrainableModel {
    fn learning_rate(&self) -> f64;
    fn set_learning_rate(&mut self, rate: f64);

    /// One optimizer step on `batch`.
    fn train_step(&mut self, batch: &Batch) -> Result<Losses>;

    /// Forward-only losses on `batch`, no gradients and no randomness.
    fn evaluate(&self, batch: &Batch) -> Result<Losses>;

    fn save_weights(&self, path: &Path) -> Result<()>;

    /// Weights plus the architecture descriptor.
    fn save(&self, path: &Path) -> Result<()>;

    fn load_weights(&mut self, path: &Path) -> Result<()>;

    fn architecture_json(&self) -> Result<String>;

    fn summary(&self) -> String;
}

/// The EAST network, its Adam optimizer and the wired losses.
pub struct EastNetwork {
    vs: nn::VarStore,
    model: EastModel,
    optimizer: nn::Optimizer,
    learning_rate: f64,
    device: Device,
}

impl EastNetwork {
    pub fn new(config: &ModelConfig, learning_rate: f64, device: Device) -> Result<Self> {
        let vs = nn::VarStore::new(device);
        let model = EastModel::new(&vs.root(), config);
        let optimizer = nn::Adam::default().build(&vs, learning_rate)?;
        Ok(Self {
            vs,
            model,
            optimizer,
            learning_rate,
            device,
        })
    }

    pub fn config(&self) -> &ModelConfig {
        &self.model.config
    }

    /// (score map loss, geo map loss, weighted total) for one batch.
    fn losses(&self, batch: &BatchTensors, train: bool) -> (Tensor, Tensor, Tensor) {
        let (score, geo) = self.model.forward_t(&batch.images, train);
        let masks = TrainingMasks {
            overly_small_text_region: &batch.overly_small_text_region,
            text_region_boundary: &batch.text_region_boundary,
        };
        let score_loss = dice_loss(masks, SCORE_MAP_LOSS_WEIGHT, SMALL_TEXT_WEIGHT)(&batch.score_map, &score);
        let geo_loss = rbox_loss(masks, SMALL_TEXT_WEIGHT, &batch.score_map)(&batch.geo_map, &geo);
        let total = &score_loss * LOSS_WEIGHTS[0] + &geo_loss * LOSS_WEIGHTS[1];
        (score_loss, geo_loss, total)
    }
}

struct BatchTensors {
    images: Tensor,
    overly_small_text_region: Tensor,
    text_region_boundary: Tensor,
    score_map: Tensor,
    geo_map: Tensor,
}

impl BatchTensors {
    fn new(batch: &Batch, device: Device) -> Result<Self> {
        Ok(Self {
            images: to_tensor(&batch.images, device)?,
            overly_small_text_region: to_tensor(&batch.overly_small_text_region_training_mask, device)?,
            text_region_boundary: to_tensor(&batch.text_region_boundary_training_mask, device)?,
            score_map: to_tensor(&batch.score_map, device)?,
            geo_map: to_tensor(&batch.geo_map, device)?,
        })
    }
}

fn to_tensor(array: &Array4<f32>, device: Device) -> Result<Tensor> {
    let shape: Vec<i64> = array.shape().iter().map(|&d| d as i64).collect();
    let contiguous = array.as_standard_layout();
    let data = contiguous.as_slice().context("batch array is not contiguous")?;
    Ok(Tensor::from_slice(data).view(shape.as_slice()).to(device))
}

fn scalar(t: &Tensor) -> f64 {
    t.double_value(&[])
}

impl TrainableModel for EastNetwork {
    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, rate: f64) {
        self.optimizer.set_lr(rate);
        self.learning_rate = rate;
    }

    fn train_step(&mut self, batch: &Batch) -> Result<Losses> {
        let tensors = BatchTensors::new(batch, self.device)?;
        let (score_loss, geo_loss, total) = self.losses(&tensors, true);
        self.optimizer.backward_step(&total);
        Ok(Losses {
            loss: scalar(&total),
            score_map_loss: scalar(&score_loss),
            geo_map_loss: scalar(&geo_loss),
        })
    }

    fn evaluate(&self, batch: &Batch) -> Result<Losses> {
        let tensors = BatchTensors::new(batch, self.device)?;
        let (score_loss, geo_loss, total) = tch::no_grad(|| self.losses(&tensors, false));
        Ok(Losses {
            loss: scalar(&total),
            score_map_loss: scalar(&score_loss),
            geo_map_loss: scalar(&geo_loss),
        })
    }

    fn save_weights(&self, path: &Path) -> Result<()> {
        save_safetensors(&self.vs, path, None)
    }

    fn save(&self, path: &Path) -> Result<()> {
        let metadata = HashMap::from([(ARCHITECTURE_KEY.to_string(), self.architecture_json()?)]);
        save_safetensors(&self.vs, path, Some(metadata))
    }

    fn load_weights(&mut self, path: &Path) -> Result<()> {
        if path.extension().is_some_and(|ext| ext == "safetensors") {
            let report = load_safetensors(&mut self.vs, path)?;
            log::info!(
                "restored {} tensors from '{}' ({} missing, {} unexpected)",
                report.loaded,
                path.display(),
                report.missing.len(),
                report.unexpected.len()
            );
        } else {
            self.vs
                .load(path)
                .with_context(|| format!("cannot load weights '{}'", path.display()))?;
            log::info!("restored weights from '{}'", path.display());
        }
        Ok(())
    }

    fn architecture_json(&self) -> Result<String> {
        self.model.config.to_json()
    }

    fn summary(&self) -> String {
        let mut variables: Vec<(String, Tensor)> = self.vs.variables().into_iter().collect();
        variables.sort_by(|a, b| a.0.cmp(&b.0));

        let mut out = String::from("EAST model\n");
        let mut total = 0i64;
        let mut trainable = 0i64;
        for (name, tensor) in &variables {
            let count: i64 = tensor.size().iter().product();
            total += count;
            if tensor.requires_grad() {
                trainable += count;
            }
            out.push_str(&format!("  {name:<48} {:<20} {count}\n", format!("{:?}", tensor.size())));
        }
        out.push_str(&format!(
            "Total params: {total}\nTrainable params: {trainable}\nNon-trainable params: {}",
            total - trainable
        ));
        out
    }
}
