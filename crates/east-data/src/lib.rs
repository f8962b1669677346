pub mod annotation;
pub mod augment;
pub mod config;
pub mod error;
pub mod generator;
pub mod geometry;
pub mod queue;
pub mod sample;
pub mod targets;

pub use config::{DataConfig, Geometry};
pub use error::{DataError, Result};
pub use generator::{count_samples, generator, load_data, BatchGenerator, BatchSource};
pub use queue::{BatchQueue, MAX_QUEUE_SIZE};
pub use sample::{Batch, Sample};
