use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Output maps are produced at this fraction of the input resolution.
pub const OUTPUT_STRIDE: i64 = 4;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Side of the square input image, in pixels.
    pub input_size: i64,
    /// Channel count of the stride-2 stem convolution.
    pub stem_channels: i64,
    /// Channel counts of the four backbone stages (1/4, 1/8, 1/16, 1/32).
    pub backbone_channels: Vec<i64>,
    /// Channel counts of the three feature-merging stages, deepest first.
    pub merge_channels: Vec<i64>,
    /// Channel count of the shared 3x3 conv in front of the output heads.
    pub head_channels: i64,
    /// Batch norm epsilon.
    pub batch_norm_eps: f64,
    /// Maximum distance the geometry head can regress, in input pixels.
    pub geometry_scale: f64,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self::for_input_size(512)
    }
}

impl ModelConfig {
    pub fn for_input_size(input_size: i64) -> Self {
        Self {
            input_size,
            stem_channels: 32,
            backbone_channels: vec![64, 128, 256, 512],
            merge_channels: vec![128, 64, 32],
            head_channels: 32,
            batch_norm_eps: 1e-5,
            geometry_scale: input_size as f64,
        }
    }

    pub fn from_yaml<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .with_context(|| format!("cannot read model config '{}'", path.display()))?;
        let config: ModelConfig = serde_yaml::from_str(&content)
            .with_context(|| format!("invalid model config '{}'", path.display()))?;
        config.check()?;
        Ok(config)
    }

    /// Side of the score and geometry maps.
    pub fn output_size(&self) -> i64 {
        self.input_size / OUTPUT_STRIDE
    }

    /// Architecture descriptor written next to the checkpoints.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    fn check(&self) -> Result<()> {
        anyhow::ensure!(
            self.backbone_channels.len() == 4,
            "backbone_channels needs 4 stages, got {}",
            self.backbone_channels.len()
        );
        anyhow::ensure!(
            self.merge_channels.len() == 3,
            "merge_channels needs 3 stages, got {}",
            self.merge_channels.len()
        );
        anyhow::ensure!(
            self.input_size % 32 == 0,
            "input_size must be a multiple of 32, got {}",
            self.input_size
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn yaml_round_trips_through_file() {
        let config = ModelConfig::for_input_size(256);
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_yaml::to_string(&config).unwrap()).unwrap();

        let loaded = ModelConfig::from_yaml(file.path()).unwrap();
        assert_eq!(loaded, config);
        assert_eq!(loaded.output_size(), 64);
    }

    #[test]
    fn rejects_wrong_stage_count() {
        let mut config = ModelConfig::default();
        config.backbone_channels.pop();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{}", serde_yaml::to_string(&config).unwrap()).unwrap();

        let err = ModelConfig::from_yaml(file.path()).unwrap_err();
        assert!(err.to_string().contains("backbone_channels"));
    }
}
