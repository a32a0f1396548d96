use srgan::{Generator, Mode, SrError};
use tch::{kind, nn, Device, Tensor};

fn generator(scale_factor: i64) -> (nn::VarStore, Generator) {
    let vs = nn::VarStore::new(Device::Cpu);
    let generator = Generator::new(&vs.root(), scale_factor).unwrap();
    (vs, generator)
}

fn assert_unit_range(ys: &Tensor) {
    assert!(ys.min().double_value(&[]) >= 0.0);
    assert!(ys.max().double_value(&[]) <= 1.0);
}

#[test]
fn scale_4_on_32x32() {
    let (_vs, generator) = generator(4);
    let xs = Tensor::rand([1, 3, 32, 32], kind::FLOAT_CPU);
    let ys = generator.generate(&xs).unwrap();
    assert_eq!(ys.size(), vec![1, 3, 128, 128]);
    assert_unit_range(&ys);
}

#[test]
fn scale_16_on_non_square_batch() {
    let (_vs, generator) = generator(16);
    let xs = Tensor::rand([2, 3, 30, 67], kind::FLOAT_CPU);
    let ys = generator.generate(&xs).unwrap();
    assert_eq!(ys.size(), vec![2, 3, 480, 1072]);
}

#[test]
fn every_power_of_two_scales_exactly() {
    for k in 1..=5u32 {
        let scale = 2i64.pow(k);
        let (_vs, generator) = generator(scale);
        assert_eq!(generator.scale_factor(), scale);
        for &(h, w) in &[(3, 5), (4, 4)] {
            let xs = Tensor::rand([1, 3, h, w], kind::FLOAT_CPU);
            let ys = generator.generate(&xs).unwrap();
            assert_eq!(ys.size(), vec![1, 3, h * scale, w * scale]);
        }
    }
}

#[test]
fn output_in_unit_range_for_extreme_inputs() {
    let (_vs, generator) = generator(2);
    for xs in [
        Tensor::zeros([2, 3, 8, 8], kind::FLOAT_CPU),
        Tensor::ones([2, 3, 8, 8], kind::FLOAT_CPU),
        Tensor::randn([2, 3, 8, 8], kind::FLOAT_CPU) * 1000.0,
    ] {
        assert_unit_range(&generator.generate(&xs).unwrap());
        assert_unit_range(&generator.forward(&xs, Mode::Train));
    }
}

#[test]
fn non_power_of_two_scale_is_rejected() {
    let vs = nn::VarStore::new(Device::Cpu);
    for scale in [6, 1, 0, 3] {
        assert!(matches!(
            Generator::new(&vs.root(), scale),
            Err(SrError::InvalidConfiguration(_))
        ));
    }
}

#[test]
fn generate_rejects_non_image_tensors() {
    let (_vs, generator) = generator(2);
    let flat = Tensor::rand([3, 8, 8], kind::FLOAT_CPU);
    assert!(matches!(generator.generate(&flat), Err(SrError::ShapeMismatch { .. })));
}
