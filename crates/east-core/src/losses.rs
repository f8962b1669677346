//! Loss factories for the two EAST outputs.
//!
//! Both losses share the training mask
//! `min(overly_small_text_region + small_text_weight, 1) * text_region_boundary`,
//! which removes don't-care text, undersized text and the band between a
//! text polygon and its shrunk core from the objective.

use tch::{Kind, Tensor};

const DICE_EPS: f64 = 1e-5;
const ANGLE_WEIGHT: f64 = 20.0;

/// Per-batch auxiliary maps that gate both losses, shaped [batch, 1, h, w].
#[derive(Debug, Clone, Copy)]
pub struct TrainingMasks<'a> {
    pub overly_small_text_region: &'a Tensor,
    pub text_region_boundary: &'a Tensor,
}

impl TrainingMasks<'_> {
    fn combined(&self, small_text_weight: f64) -> Tensor {
        (self.overly_small_text_region + small_text_weight).clamp_max(1.0) * self.text_region_boundary
    }
}

/// Dice loss on the score map, scaled by `loss_weight`.
pub fn dice_loss<'a>(
    masks: TrainingMasks<'a>,
    loss_weight: f64,
    small_text_weight: f64,
) -> impl Fn(&Tensor, &Tensor) -> Tensor + 'a {
    move |y_true: &Tensor, y_pred: &Tensor| {
        let mask = masks.combined(small_text_weight);
        let intersection = (y_true * y_pred * &mask).sum(Kind::Float);
        let union = (y_true * &mask).sum(Kind::Float) + (y_pred * &mask).sum(Kind::Float) + DICE_EPS;
        (1.0 - intersection * 2.0 / union) * loss_weight
    }
}

/// IoU + angle loss on the RBOX geometry, counted only on text pixels.
///
/// Geometry channels: distance to top, right, bottom, left edge, angle.
pub fn rbox_loss<'a>(
    masks: TrainingMasks<'a>,
    small_text_weight: f64,
    target_score_map: &'a Tensor,
) -> impl Fn(&Tensor, &Tensor) -> Tensor + 'a {
    move |y_true: &Tensor, y_pred: &Tensor| {
        let gt = y_true.split(1, 1);
        let pred = y_pred.split(1, 1);

        let area_gt = (&gt[0] + &gt[2]) * (&gt[1] + &gt[3]);
        let area_pred = (&pred[0] + &pred[2]) * (&pred[1] + &pred[3]);
        let w_union = gt[1].min_other(&pred[1]) + gt[3].min_other(&pred[3]);
        let h_union = gt[0].min_other(&pred[0]) + gt[2].min_other(&pred[2]);
        let area_intersect = w_union * h_union;
        let area_union = area_gt + area_pred - &area_intersect;

        let aabb_loss = -((area_intersect + 1.0) / (area_union + 1.0)).log();
        let angle_loss = 1.0 - (&pred[4] - &gt[4]).cos();
        let geo_loss: Tensor = aabb_loss + angle_loss * ANGLE_WEIGHT;

        let mask = masks.combined(small_text_weight);
        (geo_loss * target_score_map * mask).mean(Kind::Float)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::Device;

    fn ones(shape: &[i64]) -> Tensor {
        Tensor::ones(shape, (Kind::Float, Device::Cpu))
    }

    #[test]
    fn dice_loss_vanishes_on_perfect_prediction() {
        let small = ones(&[1, 1, 4, 4]);
        let boundary = ones(&[1, 1, 4, 4]);
        let masks = TrainingMasks {
            overly_small_text_region: &small,
            text_region_boundary: &boundary,
        };
        let score = ones(&[1, 1, 4, 4]);

        let loss = dice_loss(masks, 1.0, 0.0)(&score, &score).double_value(&[]);
        assert!(loss.abs() < 1e-4);

        let empty = Tensor::zeros(&[1, 1, 4, 4], (Kind::Float, Device::Cpu));
        let loss = dice_loss(masks, 0.01, 0.0)(&score, &empty).double_value(&[]);
        assert!((loss - 0.01).abs() < 1e-6);
    }

    #[test]
    fn rbox_loss_is_zero_for_matching_boxes_and_grows_with_angle() {
        let small = ones(&[1, 1, 2, 2]);
        let boundary = ones(&[1, 1, 2, 2]);
        let score = ones(&[1, 1, 2, 2]);
        let masks = TrainingMasks {
            overly_small_text_region: &small,
            text_region_boundary: &boundary,
        };
        let distances = ones(&[1, 4, 2, 2]) * 8.0;
        let flat = Tensor::cat(&[&distances, &Tensor::zeros(&[1, 1, 2, 2], (Kind::Float, Device::Cpu))], 1);
        let tilted = Tensor::cat(&[&distances, &(ones(&[1, 1, 2, 2]) * 0.5)], 1);

        let loss = rbox_loss(masks, 0.0, &score);
        assert!(loss(&flat, &flat).double_value(&[]).abs() < 1e-6);
        assert!(loss(&flat, &tilted).double_value(&[]) > 1.0);
    }

    #[test]
    fn masked_pixels_do_not_contribute() {
        let small = Tensor::zeros(&[1, 1, 2, 2], (Kind::Float, Device::Cpu));
        let boundary = ones(&[1, 1, 2, 2]);
        let score = ones(&[1, 1, 2, 2]);
        let masks = TrainingMasks {
            overly_small_text_region: &small,
            text_region_boundary: &boundary,
        };
        let gt = ones(&[1, 5, 2, 2]);
        let pred = ones(&[1, 5, 2, 2]) * 3.0;

        assert_eq!(rbox_loss(masks, 0.0, &score)(&gt, &pred).double_value(&[]), 0.0);
        assert!(rbox_loss(masks, 1.0, &score)(&gt, &pred).double_value(&[]) > 0.0);
    }
}
