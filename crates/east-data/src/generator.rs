//! Turns a directory of annotated images into batches of training targets.

use std::fs;
use std::path::{Path, PathBuf};

use image::RgbImage;
use log::{debug, warn};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};

use crate::annotation::{self, TextRegion};
use crate::augment;
use crate::config::DataConfig;
use crate::error::{DataError, Result};
use crate::sample::{Batch, Sample};
use crate::targets::generate_rbox;

const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Rescale factors drawn for every training sample.
pub const RANDOM_SCALES: [f32; 4] = [0.5, 1.0, 2.0, 3.0];

/// Share of training samples cropped from text-free background.
pub const BACKGROUND_RATIO: f64 = 3.0 / 8.0;

/// Consecutive failures tolerated per image before a generator gives up.
const FAILURES_PER_IMAGE: usize = 10;

/// Anything that hands out training batches one at a time.
pub trait BatchSource {
    fn next_batch(&mut self) -> Result<Batch>;
}

/// Image files of `dir`, sorted by path.
pub fn list_images(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|e| DataError::io(dir, e))?;
    let mut images = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| DataError::io(dir, e))?.path();
        let is_image = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()));
        if is_image && path.is_file() {
            images.push(path);
        }
    }
    images.sort();
    Ok(images)
}

/// Number of training images; one pass over them is one epoch.
pub fn count_samples(cfg: &DataConfig) -> Result<usize> {
    Ok(list_images(&cfg.training_data_path)?.len())
}

fn read_annotated(path: &Path) -> Result<(RgbImage, Vec<TextRegion>)> {
    let image = image::open(path)
        .map_err(|source| DataError::Image {
            path: path.to_path_buf(),
            source,
        })?
        .to_rgb8();
    let regions = annotation::load(path)?;
    let regions = annotation::validate(regions, image.width(), image.height());
    Ok((image, regions))
}

/// One randomly scaled and cropped training sample.
pub fn training_sample<R: Rng>(path: &Path, cfg: &DataConfig, background: bool, rng: &mut R) -> Result<Sample> {
    let (image, regions) = read_annotated(path)?;

    let scale = *RANDOM_SCALES.choose(rng).unwrap_or(&1.0);
    let cap = augment::max_factor(&image, &regions, cfg.max_image_large_side, cfg.max_text_size);
    let (image, regions) = augment::rescale(&image, &regions, scale.min(cap));

    let (image, regions) = augment::crop_area(&image, &regions, cfg.min_crop_side_ratio, background, rng);
    if background && !regions.is_empty() {
        return Err(DataError::TextInBackgroundCrop(path.to_path_buf()));
    }
    if !background && regions.is_empty() {
        return Err(DataError::NoTextInCrop(path.to_path_buf()));
    }

    let (image, regions) = augment::pad_and_resize(&image, &regions, cfg.input_size);
    let targets = generate_rbox(cfg.input_size, &regions, cfg.min_text_size as f32);
    Ok(Sample::new(&image, targets))
}

/// The whole image, shrunk to `max_image_large_side`, padded and resized.
pub fn validation_sample(path: &Path, cfg: &DataConfig) -> Result<Sample> {
    let (image, regions) = read_annotated(path)?;
    let (image, regions) = augment::fit_large_side(&image, &regions, cfg.max_image_large_side);
    let (image, regions) = augment::pad_and_resize(&image, &regions, cfg.input_size);
    let targets = generate_rbox(cfg.input_size, &regions, cfg.min_text_size as f32);
    Ok(Sample::new(&image, targets))
}

/// Loads the validation set as one batch. Same input, same batch.
pub fn load_data(cfg: &DataConfig) -> Result<Batch> {
    let dir = &cfg.validation_data_path;
    let images = list_images(dir)?;
    if images.is_empty() {
        return Err(DataError::EmptyDataset(dir.clone()));
    }

    let mut samples = Vec::with_capacity(images.len());
    let mut failures = 0;
    for path in &images {
        match validation_sample(path, cfg) {
            Ok(sample) => samples.push(sample),
            Err(e) => {
                warn!("skipping validation image: {e}");
                failures += 1;
            }
        }
    }
    if samples.is_empty() {
        return Err(DataError::NoUsableSamples {
            dir: dir.clone(),
            failures,
        });
    }
    Ok(Batch::from_samples(&samples))
}

/// Endless stream of shuffled, augmented training batches.
pub struct BatchGenerator {
    cfg: DataConfig,
    images: Vec<PathBuf>,
    order: Vec<usize>,
    cursor: usize,
    rng: StdRng,
}

impl BatchGenerator {
    pub fn new(cfg: DataConfig, seed: u64) -> Result<Self> {
        let images = list_images(&cfg.training_data_path)?;
        Self::with_images(cfg, images, seed)
    }

    pub fn with_images(cfg: DataConfig, images: Vec<PathBuf>, seed: u64) -> Result<Self> {
        if images.is_empty() {
            return Err(DataError::EmptyDataset(cfg.training_data_path.clone()));
        }
        let order = (0..images.len()).collect();
        Ok(Self {
            cfg,
            images,
            order,
            cursor: 0,
            rng: StdRng::seed_from_u64(seed),
        })
    }

    fn next_image(&mut self) -> PathBuf {
        if self.cursor == 0 {
            self.order.shuffle(&mut self.rng);
        }
        let path = self.images[self.order[self.cursor]].clone();
        self.cursor = (self.cursor + 1) % self.order.len();
        path
    }
}

impl BatchSource for BatchGenerator {
    fn next_batch(&mut self) -> Result<Batch> {
        let limit = self.images.len() * FAILURES_PER_IMAGE;
        let mut samples = Vec::with_capacity(self.cfg.batch_size);
        let mut failures = 0;
        while samples.len() < self.cfg.batch_size {
            let path = self.next_image();
            let background = self.rng.gen_bool(BACKGROUND_RATIO);
            match training_sample(&path, &self.cfg, background, &mut self.rng) {
                Ok(sample) => {
                    failures = 0;
                    samples.push(sample);
                }
                Err(e @ (DataError::NoTextInCrop(_) | DataError::TextInBackgroundCrop(_))) => {
                    failures += 1;
                    debug!("{e}");
                }
                Err(e) => {
                    failures += 1;
                    warn!("skipping training image: {e}");
                }
            }
            if failures > limit {
                return Err(DataError::NoUsableSamples {
                    dir: self.cfg.training_data_path.clone(),
                    failures,
                });
            }
        }
        Ok(Batch::from_samples(&samples))
    }
}

impl Iterator for BatchGenerator {
    type Item = Result<Batch>;

    fn next(&mut self) -> Option<Self::Item> {
        Some(self.next_batch())
    }
}

/// Infinite generator over the training directory.
pub fn generator(cfg: &DataConfig, seed: u64) -> Result<BatchGenerator> {
    BatchGenerator::new(cfg.clone(), seed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn write_sample(dir: &Path, name: &str, annotation: Option<&str>) {
        let mut image = RgbImage::from_pixel(128, 96, Rgb([20, 20, 20]));
        for x in 20..100 {
            for y in 30..60 {
                image.put_pixel(x, y, Rgb([230, 230, 230]));
            }
        }
        image.save(dir.join(format!("{name}.png"))).unwrap();
        if let Some(text) = annotation {
            fs::write(dir.join(format!("gt_{name}.txt")), text).unwrap();
        }
    }

    fn config(dir: &Path) -> DataConfig {
        DataConfig {
            input_size: 64,
            batch_size: 3,
            training_data_path: dir.to_path_buf(),
            validation_data_path: dir.to_path_buf(),
            ..DataConfig::default()
        }
    }

    #[test]
    fn lists_and_counts_images_only() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path(), "img_2", Some("20,30,100,30,100,60,20,60,TEXT\n"));
        write_sample(dir.path(), "img_1", Some("20,30,100,30,100,60,20,60,TEXT\n"));
        fs::write(dir.path().join("notes.md"), "not an image").unwrap();

        let images = list_images(dir.path()).unwrap();
        assert_eq!(images, vec![dir.path().join("img_1.png"), dir.path().join("img_2.png")]);
        assert_eq!(count_samples(&config(dir.path())).unwrap(), 2);
    }

    #[test]
    fn validation_set_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path(), "img_1", Some("20,30,100,30,100,60,20,60,TEXT\n"));
        write_sample(dir.path(), "img_2", None);

        let cfg = config(dir.path());
        let first = load_data(&cfg).unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first.images.shape(), &[1, 3, 64, 64]);
        assert!(first.score_map.sum() > 0.0);
        assert_eq!(first, load_data(&cfg).unwrap());
    }

    #[test]
    fn empty_directory_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());
        assert!(matches!(load_data(&cfg), Err(DataError::EmptyDataset(_))));
        assert!(matches!(generator(&cfg, 0), Err(DataError::EmptyDataset(_))));
    }

    #[test]
    fn generator_yields_full_batches() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path(), "img_1", Some("20,30,100,30,100,60,20,60,TEXT\n"));
        write_sample(dir.path(), "img_2", Some("10,10,60,10,60,40,10,40,###\n70,50,120,50,120,80,70,80,more\n"));

        let mut batches = generator(&config(dir.path()), 11).unwrap();
        for _ in 0..2 {
            let batch = batches.next().unwrap().unwrap();
            assert_eq!(batch.len(), 3);
            assert_eq!(batch.score_map.shape(), &[3, 1, 16, 16]);
            assert_eq!(batch.geo_map.shape(), &[3, 5, 16, 16]);
        }
    }

    #[test]
    fn gives_up_after_too_many_failures() {
        let dir = tempfile::tempdir().unwrap();
        write_sample(dir.path(), "img_1", None);

        let mut batches = generator(&config(dir.path()), 3).unwrap();
        match batches.next_batch() {
            Err(DataError::NoUsableSamples { failures, .. }) => assert_eq!(failures, 11),
            other => panic!("unexpected result {other:?}"),
        }
    }
}
