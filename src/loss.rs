//! Generator objective: adversarial + content + perceptual + total variation.

use std::path::Path;

use tch::{Device, Kind, Reduction, Tensor};
use tracing::debug;

use crate::error::{Result, SrError};
use crate::features::{FeatureExtractor, Vgg16Features};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LossWeights {
    pub content: f64,
    pub adversarial: f64,
    pub perceptual: f64,
    pub total_variation: f64,
}

impl Default for LossWeights {
    fn default() -> Self {
        Self {
            content: 1.0,
            adversarial: 0.001,
            perceptual: 0.006,
            total_variation: 2e-8,
        }
    }
}

/// How the perceptual term compares generated and target images.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PerceptualMode {
    /// Pixel-space MSE, the same value as the content term.
    #[default]
    PixelMirror,
    /// MSE between feature maps of a frozen extractor.
    FeatureSpace,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LossConfig {
    pub weights: LossWeights,
    pub perceptual: PerceptualMode,
}

/// Every unweighted term plus the weighted total handed to the optimizer.
#[derive(Debug)]
pub struct LossBreakdown {
    pub adversarial: Tensor,
    pub content: Tensor,
    pub perceptual: Tensor,
    pub total_variation: Tensor,
    pub total: Tensor,
}

/// Total variation of a `(B, C, H, W)` batch.
///
/// Squared differences between vertical and horizontal neighbours, each sum
/// divided by its number of neighbour pairs, then `2 * (h + w) / B`. An axis of
/// length 1 has no pairs and contributes nothing.
pub fn total_variation(xs: &Tensor) -> Result<Tensor> {
    let size = xs.size();
    let (batch_size, channels, height, width) = match size[..] {
        [b, c, h, w] if b > 0 => (b, c, h, w),
        _ => return Err(SrError::shape("total variation input", &[-1, -1, -1, -1], &size)),
    };
    let axis_tv = |dim: i64, len: i64, pairs: i64| {
        if len < 2 {
            return Tensor::from(0f32).to_device(xs.device());
        }
        let diff = xs.narrow(dim, 1, len - 1) - xs.narrow(dim, 0, len - 1);
        diff.square().sum(Kind::Float) / pairs as f64
    };
    let h_tv = axis_tv(2, height, channels * (height - 1) * width);
    let w_tv = axis_tv(3, width, channels * height * (width - 1));
    Ok((h_tv + w_tv) * 2.0 / batch_size as f64)
}

/// `1 - mean(D(real)) + mean(D(fake))`, minimised by the discriminator.
pub fn discriminator_loss(real_out: &Tensor, fake_out: &Tensor) -> Tensor {
    (fake_out.mean(Kind::Float) - real_out.mean(Kind::Float)) + 1.0
}

fn check_shapes(d_out: &Tensor, generated: &Tensor, target: &Tensor) -> Result<()> {
    let generated_size = generated.size();
    if generated_size.len() != 4 {
        return Err(SrError::shape("generated image", &[-1, 3, -1, -1], &generated_size));
    }
    let target_size = target.size();
    if target_size != generated_size {
        return Err(SrError::shape("target image", &generated_size, &target_size));
    }
    let d_size = d_out.size();
    if d_size != [generated_size[0]] {
        return Err(SrError::shape("discriminator output", &[generated_size[0]], &d_size));
    }
    Ok(())
}

#[derive(Debug)]
pub struct GeneratorLoss {
    config: LossConfig,
    extractor: Option<Box<dyn FeatureExtractor>>,
}

impl GeneratorLoss {
    /// Loss without a feature network; only valid in pixel-mirror mode.
    pub fn new(config: LossConfig) -> Result<GeneratorLoss> {
        if config.perceptual == PerceptualMode::FeatureSpace {
            return Err(SrError::InvalidConfiguration(
                "feature-space perceptual loss needs a feature extractor".to_string(),
            ));
        }
        Ok(GeneratorLoss { config, extractor: None })
    }

    pub fn with_feature_extractor(
        config: LossConfig,
        extractor: Box<dyn FeatureExtractor>,
    ) -> GeneratorLoss {
        GeneratorLoss { config, extractor: Some(extractor) }
    }

    /// Loads pretrained VGG-16 weights as the frozen feature network.
    pub fn with_vgg16<P: AsRef<Path>>(
        config: LossConfig,
        weights: P,
        device: Device,
    ) -> Result<GeneratorLoss> {
        let extractor = Vgg16Features::load(weights, device)?;
        Ok(Self::with_feature_extractor(config, Box::new(extractor)))
    }

    pub fn config(&self) -> &LossConfig {
        &self.config
    }

    fn perceptual(&self, generated: &Tensor, target: &Tensor) -> Result<Tensor> {
        match (self.config.perceptual, &self.extractor) {
            (PerceptualMode::PixelMirror, _) => {
                Ok(generated.mse_loss(target, Reduction::Mean))
            }
            (PerceptualMode::FeatureSpace, Some(extractor)) => {
                let generated_features = extractor.features(generated);
                let target_features = extractor.features(target);
                Ok(generated_features.mse_loss(&target_features, Reduction::Mean))
            }
            (PerceptualMode::FeatureSpace, None) => Err(SrError::InvalidConfiguration(
                "feature-space perceptual loss needs a feature extractor".to_string(),
            )),
        }
    }

    pub fn breakdown(
        &self,
        d_out: &Tensor,
        generated: &Tensor,
        target: &Tensor,
    ) -> Result<LossBreakdown> {
        check_shapes(d_out, generated, target)?;
        let weights = &self.config.weights;

        let adversarial = (d_out.ones_like() - d_out).mean(Kind::Float);
        let content = generated.mse_loss(target, Reduction::Mean);
        let perceptual = self.perceptual(generated, target)?;
        let total_variation = total_variation(generated)?;

        let total = &content * weights.content
            + &adversarial * weights.adversarial
            + &perceptual * weights.perceptual
            + &total_variation * weights.total_variation;

        debug!(
            adversarial = adversarial.double_value(&[]),
            content = content.double_value(&[]),
            perceptual = perceptual.double_value(&[]),
            total_variation = total_variation.double_value(&[]),
            "generator loss terms"
        );
        Ok(LossBreakdown { adversarial, content, perceptual, total_variation, total })
    }

    /// Weighted scalar loss, differentiable w.r.t. the generated image.
    pub fn forward(&self, d_out: &Tensor, generated: &Tensor, target: &Tensor) -> Result<Tensor> {
        Ok(self.breakdown(d_out, generated, target)?.total)
    }
}
