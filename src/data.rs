//! Training images: random high-res crops and their low-res counterparts.

use std::path::{Path, PathBuf};

use image::{imageops, RgbImage};
use rand::Rng;
use tch::{Device, Kind, Tensor};
use tracing::{info, warn};

use crate::compare::ResampleFilter;
use crate::error::{Result, SrError};

/// Filter that synthesises training inputs, the same resize `compare --filter bicubic` runs.
pub const TRAINING_FILTER: ResampleFilter = ResampleFilter::Bicubic;

/// `(H, W, 3)` bytes -> `(3, H, W)` floats in `[0, 1]`.
pub fn rgb_to_tensor(img: &RgbImage) -> Tensor {
    let (width, height) = (img.width() as i64, img.height() as i64);
    Tensor::from_slice(img.as_raw())
        .view([height, width, 3])
        .permute([2, 0, 1])
        .to_kind(Kind::Float)
        / 255.0
}

/// Largest size `<= crop_size` divisible by `scale_factor`.
pub fn valid_crop_size(crop_size: i64, scale_factor: i64) -> i64 {
    crop_size - crop_size % scale_factor
}

/// Anti-aliased bicubic downsampling of one high-res crop.
pub fn downsample(high_res: &RgbImage, scale_factor: i64) -> RgbImage {
    TRAINING_FILTER.downsample(high_res, scale_factor as u32)
}

fn is_image(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| extensions.iter().any(|valid| valid.eq_ignore_ascii_case(ext)))
        .unwrap_or(false)
}

#[derive(Debug)]
pub struct TrainingSet {
    images: Vec<RgbImage>,
    crop_size: i64,
    scale_factor: i64,
}

impl TrainingSet {
    /// Every readable image in `dir` at least `crop_size` on both sides.
    pub fn load_dir<P: AsRef<Path>>(dir: P, crop_size: i64, scale_factor: i64) -> Result<TrainingSet> {
        let extensions: Vec<String> = image::ImageFormat::all()
            .flat_map(|format| format.extensions_str())
            .map(|ext| ext.to_string())
            .collect();

        let mut paths: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| is_image(path, &extensions))
            .collect();
        // read_dir order is filesystem dependent
        paths.sort();

        let mut images = Vec::with_capacity(paths.len());
        for path in paths {
            images.push(image::open(&path)?.to_rgb8());
        }
        info!(dir = %dir.as_ref().display(), images = images.len(), "scanned training images");
        TrainingSet::from_images(images, crop_size, scale_factor)
    }

    /// Images smaller than the crop are dropped.
    pub fn from_images(images: Vec<RgbImage>, crop_size: i64, scale_factor: i64) -> Result<TrainingSet> {
        if scale_factor < 1 {
            return Err(SrError::InvalidConfiguration(format!(
                "scale factor must be positive, got {scale_factor}"
            )));
        }
        let crop_size = valid_crop_size(crop_size, scale_factor);
        if crop_size < scale_factor {
            return Err(SrError::InvalidConfiguration(format!(
                "crop size must be at least the scale factor {scale_factor}"
            )));
        }
        let total = images.len();
        let images: Vec<RgbImage> = images
            .into_iter()
            .filter(|img| img.width() as i64 >= crop_size && img.height() as i64 >= crop_size)
            .collect();
        if images.len() < total {
            warn!(skipped = total - images.len(), crop_size, "skipped images smaller than the crop");
        }
        if images.is_empty() {
            return Err(SrError::InvalidConfiguration(format!(
                "no training image is at least {crop_size}x{crop_size}"
            )));
        }
        Ok(TrainingSet { images, crop_size, scale_factor })
    }

    pub fn len(&self) -> usize {
        self.images.len()
    }

    pub fn is_empty(&self) -> bool {
        self.images.is_empty()
    }

    pub fn crop_size(&self) -> i64 {
        self.crop_size
    }

    fn random_crop<R: Rng>(&self, rng: &mut R) -> RgbImage {
        let img = &self.images[rng.gen_range(0..self.images.len())];
        let size = self.crop_size as u32;
        let left = rng.gen_range(0..=img.width() - size);
        let top = rng.gen_range(0..=img.height() - size);
        imageops::crop_imm(img, left, top, size, size).to_image()
    }

    /// `(low_res, high_res)` batch on `device`.
    pub fn sample<R: Rng>(&self, rng: &mut R, batch_size: i64, device: Device) -> (Tensor, Tensor) {
        let (low_res, high_res): (Vec<Tensor>, Vec<Tensor>) = (0..batch_size)
            .map(|_| {
                let crop = self.random_crop(rng);
                (rgb_to_tensor(&downsample(&crop, self.scale_factor)), rgb_to_tensor(&crop))
            })
            .unzip();
        (
            Tensor::stack(&low_res, 0).to_device(device),
            Tensor::stack(&high_res, 0).to_device(device),
        )
    }
}
