//! Image similarity metrics for images with values in `[0, 1]`.

use tch::{Kind, Tensor};

use crate::error::{Result, SrError};

const DATA_RANGE: f64 = 1.0;
const SSIM_WINDOW: i64 = 7;
const SSIM_K1: f64 = 0.01;
const SSIM_K2: f64 = 0.03;

fn check_pair(context: &'static str, a: &Tensor, b: &Tensor) -> Result<Vec<i64>> {
    let size = a.size();
    if size != b.size() {
        return Err(SrError::shape(context, &size, &b.size()));
    }
    Ok(size)
}

/// Peak signal-to-noise ratio in dB; infinite for identical images.
pub fn psnr(reference: &Tensor, test: &Tensor) -> Result<f64> {
    check_pair("psnr", reference, test)?;
    let mse = (reference.to_kind(Kind::Double) - test.to_kind(Kind::Double))
        .square()
        .mean(Kind::Double)
        .double_value(&[]);
    if mse == 0.0 {
        return Ok(f64::INFINITY);
    }
    Ok(10.0 * (DATA_RANGE * DATA_RANGE / mse).log10())
}

/// Mean structural similarity over every channel.
///
/// Accepts `(C, H, W)` or `(B, C, H, W)`; local statistics come from a 7x7
/// uniform window over the valid region, with sample covariances.
pub fn ssim(reference: &Tensor, test: &Tensor) -> Result<f64> {
    let size = check_pair("ssim", reference, test)?;
    let (height, width) = match size[..] {
        [_, h, w] | [_, _, h, w] => (h, w),
        _ => return Err(SrError::shape("ssim", &[-1, -1, -1], &size)),
    };
    if height < SSIM_WINDOW || width < SSIM_WINDOW {
        return Err(SrError::shape("ssim", &[-1, SSIM_WINDOW, SSIM_WINDOW], &size));
    }

    let planes = |t: &Tensor| t.to_kind(Kind::Double).reshape([-1, 1, height, width]);
    let (x, y) = (planes(reference), planes(test));
    let window = |t: &Tensor| {
        t.avg_pool2d([SSIM_WINDOW, SSIM_WINDOW], [1, 1], [0, 0], false, true, None::<i64>)
    };

    let samples = (SSIM_WINDOW * SSIM_WINDOW) as f64;
    let cov_norm = samples / (samples - 1.0);
    let (ux, uy) = (window(&x), window(&y));
    let vx = (window(&(&x * &x)) - &ux * &ux) * cov_norm;
    let vy = (window(&(&y * &y)) - &uy * &uy) * cov_norm;
    let vxy = (window(&(&x * &y)) - &ux * &uy) * cov_norm;

    let c1 = (SSIM_K1 * DATA_RANGE).powi(2);
    let c2 = (SSIM_K2 * DATA_RANGE).powi(2);
    let numerator = (&ux * &uy * 2.0 + c1) * (vxy * 2.0 + c2);
    let denominator = (ux.square() + uy.square() + c1) * (vx + vy + c2);
    Ok((numerator / denominator).mean(Kind::Double).double_value(&[]))
}
