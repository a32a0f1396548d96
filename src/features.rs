//! Frozen feature networks used by the perceptual loss term.

use std::path::Path;

use tch::{nn, Device, Tensor};
use tracing::info;

use crate::error::Result;

/// Read-only image -> feature map function.
pub trait FeatureExtractor: std::fmt::Debug + Send {
    fn features(&self, xs: &Tensor) -> Tensor;
}

/// Conv widths of the VGG-16 trunk, `None` marks a 2x2 max-pool.
const VGG16_LAYOUT: [Option<i64>; 18] = [
    Some(64), Some(64), None,
    Some(128), Some(128), None,
    Some(256), Some(256), Some(256), None,
    Some(512), Some(512), Some(512), None,
    Some(512), Some(512), Some(512), None,
];

/// The 31 convolutional layers of VGG-16 with every parameter frozen.
#[derive(Debug)]
pub struct Vgg16Features {
    vs: nn::VarStore,
    net: nn::SequentialT,
}

fn vgg16_trunk(p: &nn::Path) -> (nn::SequentialT, usize) {
    let features = p / "features";
    let mut net = nn::seq_t();
    let mut index = 0usize;
    let mut c_in = 3;
    for layer in VGG16_LAYOUT {
        match layer {
            Some(c_out) => {
                net = net
                    .add(nn::conv2d(&features / index, c_in, c_out, 3,
                                    nn::ConvConfig { padding: 1, ..Default::default() }))
                    .add_fn(|xs| xs.relu());
                c_in = c_out;
                index += 2;
            }
            None => {
                net = net.add_fn(|xs| xs.max_pool2d_default(2));
                index += 1;
            }
        }
    }
    (net, index)
}

impl Vgg16Features {
    /// Randomly initialised trunk, frozen.
    pub fn new(device: Device) -> Vgg16Features {
        let mut vs = nn::VarStore::new(device);
        let (net, layers) = vgg16_trunk(&vs.root());
        vs.freeze();
        info!(layers, "built frozen vgg16 feature trunk");
        Vgg16Features { vs, net }
    }

    /// Trunk with pretrained weights read from `path` (keys `features.{i}.{weight,bias}`).
    pub fn load<P: AsRef<Path>>(path: P, device: Device) -> Result<Vgg16Features> {
        let mut extractor = Vgg16Features::new(device);
        extractor.vs.load(path.as_ref())?;
        info!(path = %path.as_ref().display(), "loaded vgg16 weights");
        Ok(extractor)
    }

    pub fn var_store(&self) -> &nn::VarStore {
        &self.vs
    }
}

impl FeatureExtractor for Vgg16Features {
    fn features(&self, xs: &Tensor) -> Tensor {
        xs.apply_t(&self.net, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::kind;

    #[test]
    fn trunk_has_31_layers_and_frozen_weights() {
        let extractor = Vgg16Features::new(Device::Cpu);
        let variables = extractor.var_store().variables();
        assert_eq!(variables.len(), 26);
        assert!(variables.contains_key("features.0.weight"));
        assert!(variables.contains_key("features.28.bias"));
        assert!(variables.values().all(|v| !v.requires_grad()));
    }

    #[test]
    fn feature_map_is_downsampled_32x() {
        let extractor = Vgg16Features::new(Device::Cpu);
        let xs = Tensor::rand([1, 3, 64, 32], kind::FLOAT_CPU);
        assert_eq!(extractor.features(&xs).size(), vec![1, 512, 2, 1]);
    }
}
