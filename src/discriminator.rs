use tch::{nn, Tensor};
use tracing::info;

use crate::blocks::{conv3x3, leaky_relu};
use crate::mode::Mode;

const SLOPE: f64 = 0.2;

/// (in, out, stride, batch norm) for each 3x3 stage.
const STAGES: [(i64, i64, i64, bool); 7] = [
    (3, 64, 1, false),
    (64, 64, 2, true),
    (64, 128, 1, true),
    (128, 256, 1, true),
    (256, 256, 2, true),
    (256, 512, 1, true),
    (512, 512, 2, true),
];

/// Realism classifier: one probability of "real" per batch element.
#[derive(Debug)]
pub struct Discriminator {
    net: nn::SequentialT,
}

impl Discriminator {
    pub fn new(path: &nn::Path) -> Discriminator {
        let net_path = path / "net";
        let mut index = 0usize;
        let mut net = nn::seq_t();
        for (c_in, c_out, stride, norm) in STAGES {
            net = net.add(conv3x3(&net_path / index, c_in, c_out, stride));
            index += 1;
            if norm {
                net = net.add(nn::batch_norm2d(&net_path / index, c_out, Default::default()));
                index += 1;
            }
            net = net.add_fn(leaky_relu(SLOPE));
            index += 1;
        }

        net = net.add_fn(|xs| xs.adaptive_avg_pool2d([1, 1]));
        index += 1;
        net = net
            .add(nn::conv2d(&net_path / index, 512, 1024, 1, Default::default()))
            .add_fn(leaky_relu(SLOPE));
        index += 2;
        let net = net.add(nn::conv2d(&net_path / index, 1024, 1, 1, Default::default()));

        info!(layers = index + 1, "built discriminator");
        Discriminator { net }
    }

    /// `(B, 3, H, W)` -> `(B,)` in `(0, 1)`.
    pub fn forward(&self, xs: &Tensor, mode: Mode) -> Tensor {
        let batch_size = xs.size()[0];
        xs.apply_t(&self.net, mode.is_train())
            .view([batch_size])
            .sigmoid()
    }
}

impl nn::ModuleT for Discriminator {
    fn forward_t(&self, xs: &Tensor, train: bool) -> Tensor {
        self.forward(xs, Mode::from(train))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tch::{kind, Device};

    #[test]
    fn keys_match_sequential_indices() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _discriminator = Discriminator::new(&vs.root());
        let variables = vs.variables();
        for key in ["net.0.weight", "net.2.weight", "net.3.running_mean", "net.18.bias",
                    "net.21.weight", "net.23.bias"] {
            assert!(variables.contains_key(key), "missing {key}");
        }
        assert!(!variables.contains_key("net.1.weight"));
    }

    #[test]
    fn probabilities_for_train_and_eval() {
        let vs = nn::VarStore::new(Device::Cpu);
        let discriminator = Discriminator::new(&vs.root());
        let xs = Tensor::rand([2, 3, 24, 20], kind::FLOAT_CPU);
        for mode in [Mode::Train, Mode::Eval] {
            let ys = discriminator.forward(&xs, mode);
            assert_eq!(ys.size(), vec![2]);
            assert!(ys.min().double_value(&[]) > 0.0);
            assert!(ys.max().double_value(&[]) < 1.0);
        }
    }

    #[test]
    fn running_stats_only_move_in_train_mode() {
        let vs = nn::VarStore::new(Device::Cpu);
        let discriminator = Discriminator::new(&vs.root());
        let running_var = || vs.variables()["net.3.running_var"].copy();
        let xs = Tensor::rand([2, 3, 16, 16], kind::FLOAT_CPU);

        let initial = running_var();
        let _ = discriminator.forward(&xs, Mode::Eval);
        assert!(running_var().equal(&initial));

        let _ = discriminator.forward(&xs, Mode::Train);
        assert!(!running_var().equal(&initial));
    }
}
