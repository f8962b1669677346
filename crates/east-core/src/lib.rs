pub mod config;
pub mod layers;
pub mod losses;
pub mod model;
pub mod safetensors_util;

pub use config::{ModelConfig, OUTPUT_STRIDE};
pub use losses::{dice_loss, rbox_loss, TrainingMasks};
pub use model::EastModel;
