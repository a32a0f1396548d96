use tch::{nn, Tensor};
use tracing::info;

use crate::blocks::{self, ResidualBlock, UpsampleBlock};
use crate::error::{Result, SrError};
use crate::mode::Mode;

pub const CHANNELS: i64 = 3;
pub const FEATURES: i64 = 64;
pub const RESIDUAL_BLOCKS: usize = 5;

/// Number of 2x upsample blocks needed for `scale_factor`.
///
/// Only powers of two from 2 upward are accepted, anything else would need a
/// fractional block count.
pub fn upsample_block_count(scale_factor: i64) -> Result<usize> {
    if scale_factor < 2 || scale_factor & (scale_factor - 1) != 0 {
        return Err(SrError::InvalidConfiguration(format!(
            "scale factor must be a power of two >= 2, got {scale_factor}"
        )));
    }
    Ok(scale_factor.trailing_zeros() as usize)
}

/// Super-resolution generator.
///
/// entry conv + prelu (R0) -> residual blocks -> conv + bn, added back onto R0
/// -> upsample blocks -> output conv -> `(tanh + 1) / 2`.
#[derive(Debug)]
pub struct Generator {
    entry: nn::SequentialT,
    residuals: Vec<ResidualBlock>,
    merge: nn::SequentialT,
    tail: nn::SequentialT,
    scale_factor: i64,
}

impl Generator {
    pub fn new(path: &nn::Path, scale_factor: i64) -> Result<Generator> {
        let upsample_blocks = upsample_block_count(scale_factor)?;

        let block1 = path / "block1";
        let entry = nn::seq_t()
            .add(nn::conv2d(&block1 / 0, CHANNELS, FEATURES,
                            9, nn::ConvConfig { padding: 4, ..Default::default() }))
            .add(blocks::prelu(&block1 / 1));

        let residuals = (0..RESIDUAL_BLOCKS)
            .map(|i| ResidualBlock::new(path / format!("block{}", i + 2), FEATURES))
            .collect();

        let block7 = path / "block7";
        let merge = nn::seq_t()
            .add(blocks::conv3x3(&block7 / 0, FEATURES, FEATURES, 1))
            .add(nn::batch_norm2d(&block7 / 1, FEATURES, Default::default()));

        let block8 = path / "block8";
        let mut tail = nn::seq_t();
        for i in 0..upsample_blocks {
            tail = tail.add(UpsampleBlock::new(&block8 / i, FEATURES));
        }
        let tail = tail.add(nn::conv2d(&block8 / upsample_blocks, FEATURES, CHANNELS,
                                       9, nn::ConvConfig { padding: 4, ..Default::default() }));

        info!(scale_factor, upsample_blocks, "built generator");
        Ok(Generator { entry, residuals, merge, tail, scale_factor })
    }

    pub fn scale_factor(&self) -> i64 {
        self.scale_factor
    }

    pub fn forward(&self, xs: &Tensor, mode: Mode) -> Tensor {
        let train = mode.is_train();
        let r0 = xs.apply_t(&self.entry, train);
        let features = self
            .residuals
            .iter()
            .fold(r0.shallow_clone(), |acc, block| block.forward(&acc, mode));
        let merged = features.apply_t(&self.merge, train) + &r0;
        let out = merged.apply_t(&self.tail, train);
        (out.tanh() + 1.0) / 2.0
    }

    /// Inference entry point: eval mode, no gradient tracking.
    ///
    /// The input must be `(B, 3, H, W)` with `B >= 1`; the output is
    /// `(B, 3, H * scale, W * scale)` with values in `[0, 1]`.
    pub fn generate(&self, low_res: &Tensor) -> Result<Tensor> {
        let size = low_res.size();
        if size.len() != 4 || size[0] < 1 || size[1] != CHANNELS {
            return Err(SrError::shape("generator input", &[-1, CHANNELS, -1, -1], &size));
        }
        Ok(tch::no_grad(|| self.forward(low_res, Mode::Eval)))
    }
}

impl nn::ModuleT for Generator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.forward(xs, Mode::from(train))
    }
}
