//! Single-image super-resolution with an adversarially trained generator.
//!
//! The networks are built on `tch`: [`Generator`] upsamples by a power-of-two
//! factor, [`Discriminator`] scores realism, and [`GeneratorLoss`] combines
//! adversarial, pixel, perceptual and total-variation terms. [`train`] and
//! [`compare`] drive them end to end.

pub mod blocks;
pub mod checkpoint;
pub mod compare;
pub mod data;
pub mod discriminator;
pub mod error;
pub mod features;
pub mod generator;
pub mod logging;
pub mod loss;
pub mod metrics;
pub mod mode;
pub mod train;

pub use checkpoint::Checkpoint;
pub use discriminator::Discriminator;
pub use error::{Result, SrError};
pub use features::{FeatureExtractor, Vgg16Features};
pub use generator::Generator;
pub use loss::{GeneratorLoss, LossBreakdown, LossConfig, LossWeights, PerceptualMode};
pub use mode::Mode;
