pub mod callbacks;
pub mod checkpoint;
pub mod config;
pub mod model;
pub mod schedule;
pub mod template;
pub mod train;
pub mod validation;

pub use callbacks::{Callback, EpochLogs};
pub use config::Settings;
pub use model::{EastNetwork, Losses, TrainableModel};
pub use train::{reset_checkpoint_dir, train, Phase, Trainer};
