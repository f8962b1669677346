//! Rescaling, cropping and padding of an image together with its text regions.

use image::imageops::{self, FilterType};
use image::RgbImage;
use rand::seq::SliceRandom;
use rand::Rng;

use crate::annotation::TextRegion;
use crate::geometry;

/// Random crop attempts before giving up and keeping the whole image.
const MAX_CROP_TRIES: usize = 50;

pub type Annotated = (RgbImage, Vec<TextRegion>);

/// Resizes by `factor`, keeping regions aligned with the new pixels.
pub fn rescale(image: &RgbImage, regions: &[TextRegion], factor: f32) -> Annotated {
    let (w, h) = image.dimensions();
    let new_w = ((w as f32 * factor).round() as u32).max(1);
    let new_h = ((h as f32 * factor).round() as u32).max(1);
    resize_to(image, regions, new_w, new_h)
}

fn resize_to(image: &RgbImage, regions: &[TextRegion], new_w: u32, new_h: u32) -> Annotated {
    let (w, h) = image.dimensions();
    if (new_w, new_h) == (w, h) {
        return (image.clone(), regions.to_vec());
    }
    let sx = new_w as f32 / w as f32;
    let sy = new_h as f32 / h as f32;
    let resized = imageops::resize(image, new_w, new_h, FilterType::Triangle);
    let regions = regions
        .iter()
        .map(|r| TextRegion {
            quad: geometry::scale(&r.quad, sx, sy),
            dont_care: r.dont_care,
        })
        .collect();
    (resized, regions)
}

/// Largest rescale factor that keeps the larger image side within
/// `max_side` and every text region within `max_text_size` pixels.
pub fn max_factor(image: &RgbImage, regions: &[TextRegion], max_side: usize, max_text_size: usize) -> f32 {
    let (w, h) = image.dimensions();
    let side_cap = max_side as f32 / w.max(h).max(1) as f32;
    let largest_text = regions
        .iter()
        .map(|r| {
            let (x0, y0, x1, y1) = geometry::bounds(&r.quad);
            (x1 - x0).max(y1 - y0)
        })
        .fold(0.0f32, f32::max);
    if largest_text > 0.0 {
        side_cap.min(max_text_size as f32 / largest_text)
    } else {
        side_cap
    }
}

/// Shrinks the image so its larger side is at most `max_side`.
pub fn fit_large_side(image: &RgbImage, regions: &[TextRegion], max_side: usize) -> Annotated {
    let (w, h) = image.dimensions();
    let large = w.max(h) as f32;
    if large <= max_side as f32 {
        return (image.clone(), regions.to_vec());
    }
    rescale(image, regions, max_side as f32 / large)
}

/// Picks a random window whose sides are at least `min_crop_side_ratio` of
/// the image and whose borders avoid cutting through text.
///
/// With `crop_background` only windows without any whole text region are
/// accepted; otherwise only windows containing at least one. Regions that
/// do not fit entirely in the window are dropped. When no window qualifies
/// the input is returned unchanged.
pub fn crop_area<R: Rng>(
    image: &RgbImage,
    regions: &[TextRegion],
    min_crop_side_ratio: f64,
    crop_background: bool,
    rng: &mut R,
) -> Annotated {
    let (w, h) = (image.width() as usize, image.height() as usize);
    let (pad_w, pad_h) = (w / 10, h / 10);
    let mut w_free = vec![true; w + 2 * pad_w];
    let mut h_free = vec![true; h + 2 * pad_h];
    for region in regions {
        let (x0, y0, x1, y1) = geometry::bounds(&region.quad);
        let x1 = (x1.ceil().max(0.0) as usize).min(w.saturating_sub(1));
        let y1 = (y1.ceil().max(0.0) as usize).min(h.saturating_sub(1));
        let x0 = (x0.floor().max(0.0) as usize).min(x1);
        let y0 = (y0.floor().max(0.0) as usize).min(y1);
        w_free[x0 + pad_w..=x1 + pad_w].fill(false);
        h_free[y0 + pad_h..=y1 + pad_h].fill(false);
    }
    let w_axis: Vec<usize> = (0..w_free.len()).filter(|&i| w_free[i]).collect();
    let h_axis: Vec<usize> = (0..h_free.len()).filter(|&i| h_free[i]).collect();
    if w_axis.is_empty() || h_axis.is_empty() {
        return (image.clone(), regions.to_vec());
    }

    let window = |axis: &[usize], pad: usize, len: usize, rng: &mut R| {
        let a = *axis.choose(rng).unwrap_or(&pad);
        let b = *axis.choose(rng).unwrap_or(&pad);
        let clip = |v: usize| v.saturating_sub(pad).min(len.saturating_sub(1));
        (clip(a.min(b)), clip(a.max(b)))
    };

    for _ in 0..MAX_CROP_TRIES {
        let (x_min, x_max) = window(&w_axis, pad_w, w, &mut *rng);
        let (y_min, y_max) = window(&h_axis, pad_h, h, &mut *rng);
        if ((x_max - x_min) as f64) < min_crop_side_ratio * w as f64
            || ((y_max - y_min) as f64) < min_crop_side_ratio * h as f64
        {
            continue;
        }

        let (fx0, fy0, fx1, fy1) = (x_min as f32, y_min as f32, x_max as f32, y_max as f32);
        let selected: Vec<TextRegion> = regions
            .iter()
            .filter(|r| r.quad.iter().all(|&[x, y]| x >= fx0 && x <= fx1 && y >= fy0 && y <= fy1))
            .map(|r| TextRegion {
                quad: geometry::translate(&r.quad, -fx0, -fy0),
                dont_care: r.dont_care,
            })
            .collect();
        if selected.is_empty() != crop_background {
            continue;
        }

        let cropped = imageops::crop_imm(
            image,
            x_min as u32,
            y_min as u32,
            (x_max - x_min + 1) as u32,
            (y_max - y_min + 1) as u32,
        )
        .to_image();
        return (cropped, selected);
    }

    (image.clone(), regions.to_vec())
}

/// Pads to a square at least `input_size` wide (content at the top-left)
/// and resizes the square to `input_size`.
pub fn pad_and_resize(image: &RgbImage, regions: &[TextRegion], input_size: usize) -> Annotated {
    let (w, h) = image.dimensions();
    let side = w.max(h).max(input_size as u32);
    let mut canvas = RgbImage::new(side, side);
    imageops::replace(&mut canvas, image, 0, 0);
    resize_to(&canvas, regions, input_size as u32, input_size as u32)
}
