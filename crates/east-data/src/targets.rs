use ndarray::{Array2, Array3};

use crate::annotation::TextRegion;
use crate::geometry::{self, RotatedRect};

/// Target maps are sampled every `STRIDE` input pixels.
pub const STRIDE: usize = 4;

/// Per-image training targets at `input_size / STRIDE` resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct Targets {
    /// 1 inside the shrunk core of every readable text region.
    pub score_map: Array2<f32>,
    /// [5, h, w]: distances to top, right, bottom, left edge, then angle.
    pub geo_map: Array3<f32>,
    /// 0 over don't-care text and text smaller than `min_text_size`.
    pub overly_small_text_region_training_mask: Array2<f32>,
    /// 0 over the band between a text region and its shrunk core.
    pub text_region_boundary_training_mask: Array2<f32>,
}

/// Rasterises RBOX targets for an `input_size` square image.
pub fn generate_rbox(input_size: usize, regions: &[TextRegion], min_text_size: f32) -> Targets {
    let side = input_size / STRIDE;
    let mut score_map = Array2::<f32>::zeros((side, side));
    let mut geo_map = Array3::<f32>::zeros((5, side, side));
    let mut small_mask = Array2::<f32>::ones((side, side));
    let mut boundary_mask = Array2::<f32>::ones((side, side));

    for region in regions {
        let quad = &region.quad;
        let core = geometry::shrink(quad);
        let rect = RotatedRect::enclosing(quad);
        let (height, width) = geometry::side_lengths(quad);
        let ignored = region.dont_care || height.min(width) < min_text_size;

        let (x0, y0, x1, y1) = geometry::bounds(quad);
        let cell = |v: f32| ((v / STRIDE as f32).max(0.0) as usize).min(side.saturating_sub(1));
        for gy in cell(y0)..=cell(y1.ceil()) {
            for gx in cell(x0)..=cell(x1.ceil()) {
                let p = [(gx * STRIDE) as f32, (gy * STRIDE) as f32];
                if !geometry::contains(quad, p) {
                    continue;
                }
                if ignored {
                    small_mask[[gy, gx]] = 0.0;
                }
                if !geometry::contains(&core, p) {
                    boundary_mask[[gy, gx]] = 0.0;
                    continue;
                }
                if region.dont_care {
                    continue;
                }
                score_map[[gy, gx]] = 1.0;
                let d = rect.distances(p);
                for (c, value) in d.into_iter().enumerate() {
                    geo_map[[c, gy, gx]] = value;
                }
                geo_map[[4, gy, gx]] = rect.angle;
            }
        }
    }

    Targets {
        score_map,
        geo_map,
        overly_small_text_region_training_mask: small_mask,
        text_region_boundary_training_mask: boundary_mask,
    }
}
