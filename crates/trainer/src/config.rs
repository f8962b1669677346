use anyhow::Result;
use clap::{ArgAction, Parser};
use std::num::NonZeroUsize;
use std::path::PathBuf;

use east_core::ModelConfig;
use east_data::{DataConfig, Geometry};

/// Hyperparameters of one training run. Parsed once, read-only afterwards.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "east-train",
    about = "Train an EAST scene text detector",
    rename_all = "snake_case"
)]
pub struct Settings {
    /// Input image side for training.
    #[arg(long, default_value_t = 512)]
    pub input_size: usize,

    #[arg(long, default_value = "16")]
    pub batch_size: NonZeroUsize,

    /// Threads producing training batches.
    #[arg(long, default_value_t = 4)]
    pub nb_workers: usize,

    #[arg(long, default_value_t = 0.0001)]
    pub init_learning_rate: f64,

    #[arg(long, default_value_t = 0.94)]
    pub lr_decay_rate: f64,

    /// Epochs between two learning rate decays.
    #[arg(long, default_value = "130")]
    pub lr_decay_steps: NonZeroUsize,

    #[arg(long, default_value_t = 800)]
    pub max_epochs: usize,

    /// Directory for checkpoints, the architecture and validation logs.
    /// Wiped at start.
    #[arg(long, default_value = "tmp/east_resnet_50_rbox")]
    pub checkpoint_path: PathBuf,

    /// Save a checkpoint every this many epochs.
    #[arg(long, default_value = "10")]
    pub save_checkpoint_epochs: NonZeroUsize,

    /// Epoch the run resumes from; offsets every reported epoch.
    #[arg(long, default_value_t = 0)]
    pub last_epoch_train: usize,

    /// Weights to start from.
    #[arg(long)]
    pub restore_model: Option<PathBuf>,

    #[arg(long, default_value = "../data/ICDAR2015/train_data")]
    pub training_data_path: PathBuf,

    #[arg(long, default_value = "../data/MLT/val_data_latin")]
    pub validation_data_path: PathBuf,

    /// Images are shrunk to this large side before cropping.
    #[arg(long, default_value_t = 1280)]
    pub max_image_large_side: usize,

    /// Images are shrunk until no text instance is larger than this.
    #[arg(long, default_value_t = 800)]
    pub max_text_size: usize,

    /// Text instances smaller than this are ignored by the losses.
    #[arg(long, default_value_t = 10)]
    pub min_text_size: usize,

    #[arg(long, default_value_t = 0.1)]
    pub min_crop_side_ratio: f64,

    #[arg(long, default_value = "RBOX")]
    pub geometry: Geometry,

    /// Hide the warnings the data pipeline emits for skipped samples.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub suppress_warnings_and_error_messages: bool,

    /// Run validation every this many epochs.
    #[arg(long, default_value = "5")]
    pub validation_period: NonZeroUsize,

    /// Checkpoint file name. `{epoch}` and the epoch logs can be referenced.
    #[arg(long, default_value = "model-{epoch:02d}.safetensors")]
    pub checkpoint_template: String,

    /// Save bare weights instead of weights plus architecture.
    #[arg(long, default_value_t = true, action = ArgAction::Set)]
    pub save_weights_only: bool,

    /// YAML file describing the network widths.
    #[arg(long)]
    pub model_config: Option<PathBuf>,
}

impl Settings {
    pub fn data_config(&self) -> DataConfig {
        DataConfig {
            input_size: self.input_size,
            batch_size: self.batch_size.get(),
            training_data_path: self.training_data_path.clone(),
            validation_data_path: self.validation_data_path.clone(),
            max_image_large_side: self.max_image_large_side,
            max_text_size: self.max_text_size,
            min_text_size: self.min_text_size,
            min_crop_side_ratio: self.min_crop_side_ratio,
            geometry: self.geometry,
        }
    }

    /// Network layout from `--model_config`, or the default one. The input
    /// size always comes from `--input_size`.
    pub fn model_config(&self) -> Result<ModelConfig> {
        let input_size = self.input_size as i64;
        let Some(path) = &self.model_config else {
            return Ok(ModelConfig::for_input_size(input_size));
        };
        let mut config = ModelConfig::from_yaml(path)?;
        if config.input_size != input_size {
            log::warn!(
                "model config '{}' has input_size {}, using --input_size {}",
                path.display(),
                config.input_size,
                input_size
            );
            config.input_size = input_size;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_reference_run() {
        let settings = Settings::try_parse_from(["east-train"]).unwrap();
        assert_eq!(settings.input_size, 512);
        assert_eq!(settings.batch_size.get(), 16);
        assert_eq!(settings.lr_decay_steps.get(), 130);
        assert_eq!(settings.checkpoint_path, PathBuf::from("tmp/east_resnet_50_rbox"));
        assert_eq!(settings.restore_model, None);
        assert_eq!(settings.geometry, Geometry::Rbox);
        assert!(settings.suppress_warnings_and_error_messages);
        assert_eq!(settings.checkpoint_template, "model-{epoch:02d}.safetensors");
    }

    #[test]
    fn flags_are_snake_case() {
        let settings = Settings::try_parse_from([
            "east-train",
            "--batch_size",
            "4",
            "--last_epoch_train",
            "30",
            "--restore_model",
            "weights.safetensors",
            "--suppress_warnings_and_error_messages",
            "false",
        ])
        .unwrap();
        assert_eq!(settings.batch_size.get(), 4);
        assert_eq!(settings.last_epoch_train, 30);
        assert_eq!(settings.restore_model, Some(PathBuf::from("weights.safetensors")));
        assert!(!settings.suppress_warnings_and_error_messages);
        assert_eq!(settings.data_config().batch_size, 4);
    }

    #[test]
    fn coercion_rejects_bad_values() {
        for args in [
            ["east-train", "--batch_size", "0"],
            ["east-train", "--nb_workers", "-1"],
            ["east-train", "--save_checkpoint_epochs", "0"],
            ["east-train", "--geometry", "QUAD"],
            ["east-train", "--init_learning_rate", "fast"],
        ] {
            assert!(Settings::try_parse_from(args).is_err(), "{args:?} was accepted");
        }
    }

    #[test]
    fn input_size_flag_overrides_model_config() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("model.yaml");
        let yaml = serde_json::to_string(&ModelConfig::for_input_size(256)).unwrap();
        std::fs::write(&path, yaml).unwrap();

        let settings = Settings::try_parse_from([
            "east-train",
            "--input_size",
            "128",
            "--model_config",
            path.to_str().unwrap(),
        ])
        .unwrap();
        let config = settings.model_config().unwrap();
        assert_eq!(config.input_size, 128);
        assert_eq!(config.geometry_scale, 256.0);
    }
}
