use image::RgbImage;
use ndarray::{s, Array3, Array4, Axis};
use std::ops::Range;

use crate::targets::{Targets, STRIDE};

const MEAN: [f32; 3] = [0.485, 0.456, 0.406];
const STD: [f32; 3] = [0.229, 0.224, 0.225];

/// One training patch with its targets.
#[derive(Debug, Clone)]
pub struct Sample {
    /// [3, input_size, input_size], ImageNet-normalised RGB.
    pub image: Array3<f32>,
    pub targets: Targets,
}

impl Sample {
    pub fn new(image: &RgbImage, targets: Targets) -> Self {
        Self {
            image: image_to_array(image),
            targets,
        }
    }
}

pub fn image_to_array(image: &RgbImage) -> Array3<f32> {
    let (w, h) = image.dimensions();
    let mut array = Array3::<f32>::zeros((3, h as usize, w as usize));
    for (x, y, pixel) in image.enumerate_pixels() {
        for c in 0..3 {
            array[[c, y as usize, x as usize]] = (pixel[c] as f32 / 255.0 - MEAN[c]) / STD[c];
        }
    }
    array
}

/// A stack of samples laid out NCHW, ready to become tensors.
#[derive(Debug, Clone, PartialEq)]
pub struct Batch {
    pub images: Array4<f32>,
    pub overly_small_text_region_training_mask: Array4<f32>,
    pub text_region_boundary_training_mask: Array4<f32>,
    pub score_map: Array4<f32>,
    pub geo_map: Array4<f32>,
}

impl Batch {
    /// All-zero batch; score maps and masks have side `input_size / 4`.
    pub fn zeros(len: usize, input_size: usize, geo_channels: usize) -> Self {
        let side = input_size / STRIDE;
        Self {
            images: Array4::zeros((len, 3, input_size, input_size)),
            overly_small_text_region_training_mask: Array4::zeros((len, 1, side, side)),
            text_region_boundary_training_mask: Array4::zeros((len, 1, side, side)),
            score_map: Array4::zeros((len, 1, side, side)),
            geo_map: Array4::zeros((len, geo_channels, side, side)),
        }
    }

    /// Stacks samples that all share one input size.
    pub fn from_samples(samples: &[Sample]) -> Self {
        let input_size = samples.first().map_or(0, |s| s.image.shape()[1]);
        let geo_channels = samples.first().map_or(5, |s| s.targets.geo_map.shape()[0]);
        let mut batch = Batch::zeros(samples.len(), input_size, geo_channels);
        for (i, sample) in samples.iter().enumerate() {
            let t = &sample.targets;
            batch.images.index_axis_mut(Axis(0), i).assign(&sample.image);
            batch
                .overly_small_text_region_training_mask
                .slice_mut(s![i, 0, .., ..])
                .assign(&t.overly_small_text_region_training_mask);
            batch
                .text_region_boundary_training_mask
                .slice_mut(s![i, 0, .., ..])
                .assign(&t.text_region_boundary_training_mask);
            batch.score_map.slice_mut(s![i, 0, .., ..]).assign(&t.score_map);
            batch.geo_map.index_axis_mut(Axis(0), i).assign(&t.geo_map);
        }
        batch
    }

    pub fn len(&self) -> usize {
        self.images.shape()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Copies the samples in `range`, which must lie within the batch.
    pub fn slice(&self, range: Range<usize>) -> Batch {
        let take = |a: &Array4<f32>| a.slice(s![range.start..range.end, .., .., ..]).to_owned();
        Batch {
            images: take(&self.images),
            overly_small_text_region_training_mask: take(&self.overly_small_text_region_training_mask),
            text_region_boundary_training_mask: take(&self.text_region_boundary_training_mask),
            score_map: take(&self.score_map),
            geo_map: take(&self.geo_map),
        }
    }

    /// Consecutive sub-batches of at most `size` samples.
    pub fn chunks(&self, size: usize) -> impl Iterator<Item = Batch> + '_ {
        let size = size.max(1);
        (0..self.len())
            .step_by(size)
            .map(move |start| self.slice(start..(start + size).min(self.len())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::targets::generate_rbox;

    #[test]
    fn normalises_pixels_channel_first() {
        let image = RgbImage::from_pixel(2, 1, image::Rgb([255, 0, 128]));
        let array = image_to_array(&image);
        assert_eq!(array.shape(), &[3, 1, 2]);
        assert!((array[[0, 0, 1]] - (1.0 - 0.485) / 0.229).abs() < 1e-5);
        assert!((array[[1, 0, 0]] + 0.456 / 0.224).abs() < 1e-5);
    }

    #[test]
    fn stacks_and_chunks_samples() {
        let samples: Vec<Sample> = (0..5)
            .map(|i| Sample::new(&RgbImage::from_pixel(16, 16, image::Rgb([i * 10, 0, 0])), generate_rbox(16, &[], 10.0)))
            .collect();
        let batch = Batch::from_samples(&samples);
        assert_eq!(batch.len(), 5);
        assert_eq!(batch.geo_map.shape(), &[5, 5, 4, 4]);
        assert_eq!(batch.text_region_boundary_training_mask.sum(), 5.0 * 16.0);

        let sizes: Vec<usize> = batch.chunks(2).map(|b| b.len()).collect();
        assert_eq!(sizes, vec![2, 2, 1]);
        assert_eq!(batch.slice(4..5).images, batch.images.slice(s![4..5, .., .., ..]).to_owned());
    }
}
