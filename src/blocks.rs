//! Small layers shared by the networks: parametric/leaky activations, the
//! residual refinement block and the sub-pixel upsampling block.

use tch::{nn, Tensor};

use crate::mode::Mode;

pub(crate) fn conv3x3(p: nn::Path, c_in: i64, c_out: i64, stride: i64) -> nn::Conv2D {
    nn::conv2d(p, c_in, c_out, 3, nn::ConvConfig { stride, padding: 1, ..Default::default() })
}

/// Leaky ReLU with an arbitrary negative slope.
pub fn leaky_relu(slope: f64) -> impl Fn(&Tensor) -> Tensor + Send + 'static {
    move |xs| xs.maximum(&(xs * slope))
}

/// PReLU with one learned slope shared across channels.
#[derive(Debug)]
pub struct PRelu {
    pub weight: Tensor,
}

pub fn prelu(p: nn::Path) -> PRelu {
    PRelu { weight: p.var("weight", &[1], nn::Init::Const(0.25)) }
}

impl nn::Module for PRelu {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.prelu(&self.weight)
    }
}

/// conv -> bn -> prelu -> conv -> bn, plus the identity shortcut.
#[derive(Debug)]
pub struct ResidualBlock {
    conv1: nn::Conv2D,
    bn1: nn::BatchNorm,
    prelu: PRelu,
    conv2: nn::Conv2D,
    bn2: nn::BatchNorm,
}

impl ResidualBlock {
    pub fn new(p: nn::Path, channels: i64) -> ResidualBlock {
        ResidualBlock {
            conv1: conv3x3(&p / "conv1", channels, channels, 1),
            bn1: nn::batch_norm2d(&p / "bn1", channels, Default::default()),
            prelu: prelu(&p / "prelu"),
            conv2: conv3x3(&p / "conv2", channels, channels, 1),
            bn2: nn::batch_norm2d(&p / "bn2", channels, Default::default()),
        }
    }

    pub fn forward(&self, xs: &Tensor, mode: Mode) -> Tensor {
        let train = mode.is_train();
        let residual = xs
            .apply(&self.conv1)
            .apply_t(&self.bn1, train)
            .apply(&self.prelu)
            .apply(&self.conv2)
            .apply_t(&self.bn2, train);
        xs + residual
    }
}

impl nn::ModuleT for ResidualBlock {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.forward(xs, Mode::from(train))
    }
}

/// Doubles height and width: conv to 4x the channels, pixel shuffle back to
/// the original channel count, prelu.
#[derive(Debug)]
pub struct UpsampleBlock {
    conv: nn::Conv2D,
    prelu: PRelu,
}

impl UpsampleBlock {
    pub const UP_SCALE: i64 = 2;

    pub fn new(p: nn::Path, channels: i64) -> UpsampleBlock {
        let expanded = channels * Self::UP_SCALE * Self::UP_SCALE;
        UpsampleBlock {
            conv: conv3x3(&p / "conv", channels, expanded, 1),
            prelu: prelu(&p / "prelu"),
        }
    }
}

impl nn::Module for UpsampleBlock {
    fn forward(&self, xs: &Tensor) -> Tensor {
        xs.apply(&self.conv)
            .pixel_shuffle(Self::UP_SCALE)
            .apply(&self.prelu)
    }
}
