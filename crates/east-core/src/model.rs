use std::f64::consts::FRAC_PI_2;
use tch::{nn, nn::ModuleT, Tensor};

use crate::config::ModelConfig;
use crate::layers::{ConvBnRelu, Stage};

/// One step of the EAST feature-merging branch: upsample the deeper map,
/// concatenate the skip feature, then 1x1 and 3x3 convolutions.
#[derive(Debug)]
struct MergeBlock {
    reduce: ConvBnRelu,
    refine: ConvBnRelu,
}

impl MergeBlock {
    fn new(vs: &nn::Path, c_deep: i64, c_skip: i64, c_out: i64, eps: f64) -> Self {
        Self {
            reduce: ConvBnRelu::new(&(vs / "reduce"), c_deep + c_skip, c_out, 1, 1, eps),
            refine: ConvBnRelu::new(&(vs / "refine"), c_out, c_out, 3, 1, eps),
        }
    }

    fn forward_t(&self, deep: &Tensor, skip: &Tensor, train: bool) -> Tensor {
        let size = skip.size();
        let up = deep.upsample_nearest2d(&size[2..], None, None);
        let merged = Tensor::cat(&[&up, skip], 1);
        self.refine
            .forward_t(&self.reduce.forward_t(&merged, train), train)
    }
}

/// EAST text detector: a strided conv backbone, a U-shaped merging
/// branch, and score/RBOX heads at 1/4 of the input resolution.
#[derive(Debug)]
pub struct EastModel {
    stem: ConvBnRelu,
    stages: Vec<Stage>,
    merges: Vec<MergeBlock>,
    head: ConvBnRelu,
    score: nn::Conv2D,
    distances: nn::Conv2D,
    angle: nn::Conv2D,
    pub config: ModelConfig,
}

impl EastModel {
    pub fn new(vs: &nn::Path, config: &ModelConfig) -> Self {
        let eps = config.batch_norm_eps;
        let stem = ConvBnRelu::new(&(vs / "stem"), 3, config.stem_channels, 3, 2, eps);

        let mut stages = Vec::new();
        let mut c_in = config.stem_channels;
        for (i, &c_out) in config.backbone_channels.iter().enumerate() {
            stages.push(Stage::new(&(vs / "backbone" / i), c_in, c_out, eps));
            c_in = c_out;
        }

        // Deepest feature first; skips walk back up the backbone.
        let mut merges = Vec::new();
        let mut c_deep = c_in;
        for (i, &c_out) in config.merge_channels.iter().enumerate() {
            let c_skip = config.backbone_channels[config.backbone_channels.len() - 2 - i];
            merges.push(MergeBlock::new(&(vs / "merge" / i), c_deep, c_skip, c_out, eps));
            c_deep = c_out;
        }

        let head = ConvBnRelu::new(&(vs / "head"), c_deep, config.head_channels, 3, 1, eps);
        let score = nn::conv2d(vs / "score", config.head_channels, 1, 1, Default::default());
        let distances = nn::conv2d(vs / "distances", config.head_channels, 4, 1, Default::default());
        let angle = nn::conv2d(vs / "angle", config.head_channels, 1, 1, Default::default());

        Self {
            stem,
            stages,
            merges,
            head,
            score,
            distances,
            angle,
            config: config.clone(),
        }
    }

    /// images: [batch, 3, input_size, input_size]
    /// Returns (score [batch, 1, h, w], geometry [batch, 5, h, w]) with
    /// h = w = input_size / 4. Geometry channels are the distances to the
    /// top, right, bottom and left box edges followed by the box angle.
    pub fn forward_t(&self, images: &Tensor, train: bool) -> (Tensor, Tensor) {
        let mut x = self.stem.forward_t(images, train);
        let mut features = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            x = stage.forward_t(&x, train);
            features.push(x.shallow_clone());
        }

        let mut h = features[features.len() - 1].shallow_clone();
        for (i, merge) in self.merges.iter().enumerate() {
            h = merge.forward_t(&h, &features[features.len() - 2 - i], train);
        }
        let h = self.head.forward_t(&h, train);

        let score = h.apply(&self.score).sigmoid();
        let distances = h.apply(&self.distances).sigmoid() * self.config.geometry_scale;
        let angle = (h.apply(&self.angle).sigmoid() - 0.5) * FRAC_PI_2;
        let geometry = Tensor::cat(&[distances, angle], 1);

        (score, geometry)
    }
}

unsafe impl Send for EastModel {}
unsafe impl Sync for EastModel {}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{Device, Kind};

    #[test]
    fn output_maps_are_quarter_resolution() {
        let vs = nn::VarStore::new(Device::Cpu);
        let config = ModelConfig {
            stem_channels: 4,
            backbone_channels: vec![4, 8, 8, 8],
            merge_channels: vec![8, 4, 4],
            head_channels: 4,
            ..ModelConfig::for_input_size(64)
        };
        let model = EastModel::new(&vs.root(), &config);

        let images = Tensor::rand(&[2, 3, 64, 64], (Kind::Float, Device::Cpu));
        let (score, geometry) = model.forward_t(&images, false);

        assert_eq!(score.size(), vec![2, 1, 16, 16]);
        assert_eq!(geometry.size(), vec![2, 5, 16, 16]);

        let max_angle = geometry.narrow(1, 4, 1).abs().max().double_value(&[]);
        assert!(max_angle <= FRAC_PI_2 / 2.0 + 1e-6);
    }
}
