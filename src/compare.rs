//! Downsample a reference image, super-resolve it and score the result.

use std::path::PathBuf;

use clap::ValueEnum;
use image::{imageops, imageops::FilterType, RgbImage};
use tch::{nn, Device, Kind, Tensor};
use tracing::info;

use crate::checkpoint::Checkpoint;
use crate::data::rgb_to_tensor;
use crate::error::{Result, SrError};
use crate::generator::Generator;
use crate::metrics::{psnr, ssim};

/// Filter used to synthesise the low-resolution input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum ResampleFilter {
    Nearest,
    #[default]
    Linear,
    /// Mean of each `scale x scale` cell.
    Box,
    Bicubic,
    Gaussian,
    Lanczos,
}

impl ResampleFilter {
    /// Shrinks `img` by the integer factor `scale_factor` on both axes.
    pub fn downsample(self, img: &RgbImage, scale_factor: u32) -> RgbImage {
        let (width, height) = (img.width() / scale_factor, img.height() / scale_factor);
        let filter = match self {
            ResampleFilter::Nearest => FilterType::Nearest,
            ResampleFilter::Linear => FilterType::Triangle,
            ResampleFilter::Bicubic => FilterType::CatmullRom,
            ResampleFilter::Gaussian => FilterType::Gaussian,
            ResampleFilter::Lanczos => FilterType::Lanczos3,
            ResampleFilter::Box => return box_downsample(img, scale_factor),
        };
        imageops::resize(img, width, height, filter)
    }
}

fn box_downsample(img: &RgbImage, scale_factor: u32) -> RgbImage {
    let (width, height) = (img.width() / scale_factor, img.height() / scale_factor);
    let mut out = RgbImage::new(width, height);
    let cell = scale_factor * scale_factor;
    for (x, y, pixel) in out.enumerate_pixels_mut() {
        let mut sums = [0u32; 3];
        for dy in 0..scale_factor {
            for dx in 0..scale_factor {
                let src = img.get_pixel(x * scale_factor + dx, y * scale_factor + dy);
                for (sum, value) in sums.iter_mut().zip(src.0) {
                    *sum += value as u32;
                }
            }
        }
        pixel.0 = sums.map(|sum| ((sum + cell / 2) / cell) as u8);
    }
    out
}

#[derive(Debug, Clone)]
pub struct CompareConfig {
    pub checkpoint: PathBuf,
    pub image: PathBuf,
    pub scale_factor: i64,
    pub filter: ResampleFilter,
    /// `(width, height)` of the top-left crop; the whole image when `None`.
    pub crop: Option<(u32, u32)>,
    /// Where to write the super-resolved image.
    pub output: Option<PathBuf>,
}

impl Default for CompareConfig {
    fn default() -> Self {
        Self {
            checkpoint: PathBuf::new(),
            image: PathBuf::new(),
            scale_factor: 16,
            filter: ResampleFilter::default(),
            crop: None,
            output: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompareReport {
    pub psnr: f64,
    pub ssim: f64,
    pub low_res: (u32, u32),
    pub high_res: (u32, u32),
}

/// Parses `WIDTHxHEIGHT`.
pub fn parse_crop(text: &str) -> Result<(u32, u32)> {
    let invalid = || SrError::InvalidConfiguration(format!("crop must look like 1072x480, got {text:?}"));
    let (width, height) = text.split_once(|c| c == 'x' || c == 'X').ok_or_else(invalid)?;
    let width = width.trim().parse().map_err(|_| invalid())?;
    let height = height.trim().parse().map_err(|_| invalid())?;
    Ok((width, height))
}

/// Top-left crop of `img`, clipped to the image and rounded down to a multiple of `scale_factor`.
pub fn reference_crop(img: &RgbImage, crop: Option<(u32, u32)>, scale_factor: u32) -> Result<RgbImage> {
    let (width, height) = crop.unwrap_or((img.width(), img.height()));
    let width = width.min(img.width()) / scale_factor * scale_factor;
    let height = height.min(img.height()) / scale_factor * scale_factor;
    if width == 0 || height == 0 {
        return Err(SrError::InvalidConfiguration(format!(
            "reference image {}x{} is smaller than the scale factor {scale_factor}",
            img.width(),
            img.height()
        )));
    }
    Ok(imageops::crop_imm(img, 0, 0, width, height).to_image())
}

/// `[0, 1]` floats rounded to the nearest 8-bit level.
pub fn to_pixels(xs: &Tensor) -> Tensor {
    (xs * 255.0).round().clamp(0.0, 255.0).to_kind(Kind::Uint8)
}

/// Runs `generator` on a reference image downsampled with `filter` and scores it against the crop.
///
/// Returns the `(3, H, W)` `u8` image that was scored, ready to be written out.
pub fn evaluate(
    generator: &Generator,
    reference: &RgbImage,
    filter: ResampleFilter,
    device: Device,
) -> Result<(CompareReport, Tensor)> {
    let scale_factor = generator.scale_factor() as u32;
    let low_res = filter.downsample(reference, scale_factor);
    let input = rgb_to_tensor(&low_res).unsqueeze(0).to_device(device);
    let output = generator.generate(&input)?.squeeze_dim(0).to_device(Device::Cpu);

    let target = rgb_to_tensor(reference);
    let pixels = to_pixels(&output);
    let scored = pixels.to_kind(Kind::Float) / 255.0;
    let report = CompareReport {
        psnr: psnr(&target, &scored)?,
        ssim: ssim(&target, &scored)?,
        low_res: (low_res.width(), low_res.height()),
        high_res: (reference.width(), reference.height()),
    };
    Ok((report, pixels))
}

pub fn compare(config: &CompareConfig, device: Device) -> Result<CompareReport> {
    let mut vs = nn::VarStore::new(device);
    let generator = Generator::new(&vs.root(), config.scale_factor)?;
    Checkpoint::load_into(&config.checkpoint, &mut vs)?;

    let original = image::open(&config.image)?.to_rgb8();
    let reference = reference_crop(&original, config.crop, config.scale_factor as u32)?;
    let (report, pixels) = evaluate(&generator, &reference, config.filter, device)?;
    info!(
        image = %config.image.display(),
        filter = ?config.filter,
        low_res = ?report.low_res,
        high_res = ?report.high_res,
        psnr = report.psnr,
        ssim = report.ssim,
        "compared"
    );

    if let Some(path) = &config.output {
        tch::vision::image::save(&pixels, path)?;
        info!(path = %path.display(), "saved super-resolved image");
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn gradient(width: u32, height: u32) -> RgbImage {
        RgbImage::from_fn(width, height, |x, y| Rgb([(x * 7) as u8, (y * 5) as u8, 128]))
    }

    #[test]
    fn crop_spec_parses() {
        assert_eq!(parse_crop("1072x480").unwrap(), (1072, 480));
        assert_eq!(parse_crop("64X32").unwrap(), (64, 32));
        assert!(matches!(parse_crop("64"), Err(SrError::InvalidConfiguration(_))));
        assert!(matches!(parse_crop("ax4"), Err(SrError::InvalidConfiguration(_))));
    }

    #[test]
    fn crop_rounds_to_scale_and_clips_to_image() {
        let img = gradient(30, 21);
        let crop = reference_crop(&img, Some((100, 19)), 4).unwrap();
        assert_eq!(crop.dimensions(), (28, 16));
        assert!(reference_crop(&img, Some((3, 3)), 4).is_err());
    }

    #[test]
    fn every_filter_divides_dimensions() {
        let img = gradient(32, 16);
        for filter in ResampleFilter::value_variants() {
            assert_eq!(filter.downsample(&img, 4).dimensions(), (8, 4), "{filter:?}");
        }
    }

    #[test]
    fn box_filter_averages_cells() {
        let img = RgbImage::from_fn(2, 2, |x, _| if x == 0 { Rgb([0, 0, 0]) } else { Rgb([100, 200, 50]) });
        let out = box_downsample(&img, 2);
        assert_eq!(out.get_pixel(0, 0).0, [50, 100, 25]);
    }

    #[test]
    fn evaluate_scores_generator_output() {
        let vs = nn::VarStore::new(Device::Cpu);
        let generator = Generator::new(&vs.root(), 2).unwrap();
        let reference = gradient(16, 12);
        let (report, pixels) = evaluate(&generator, &reference, ResampleFilter::Box, Device::Cpu).unwrap();
        assert_eq!(pixels.size(), vec![3, 12, 16]);
        assert_eq!(pixels.kind(), Kind::Uint8);
        assert_eq!(report.low_res, (8, 6));
        assert_eq!(report.high_res, (16, 12));
        assert!(report.psnr.is_finite());
        assert!(report.ssim <= 1.0);
    }

    #[test]
    fn pixels_round_to_nearest_level() {
        let xs = Tensor::from_slice(&[0.0f32, 0.998 / 255.0, 1.4 / 255.0, 254.6 / 255.0, 1.0]);
        let pixels = Vec::<u8>::try_from(to_pixels(&xs)).unwrap();
        assert_eq!(pixels, vec![0, 1, 1, 255, 255]);
    }

    #[test]
    fn saved_image_is_the_scored_image() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sr.png");
        let vs = nn::VarStore::new(Device::Cpu);
        let generator = Generator::new(&vs.root(), 2).unwrap();
        let reference = gradient(16, 12);
        let (report, pixels) = evaluate(&generator, &reference, ResampleFilter::Bicubic, Device::Cpu).unwrap();
        tch::vision::image::save(&pixels, &path).unwrap();

        let written = rgb_to_tensor(&image::open(&path).unwrap().to_rgb8());
        assert!(written.equal(&(pixels.to_kind(Kind::Float) / 255.0)));
        assert_eq!(psnr(&rgb_to_tensor(&reference), &written).unwrap(), report.psnr);
    }
}
