use srgan::{Checkpoint, Generator, SrError};
use tch::{kind, nn, Device, Tensor};

#[test]
fn restored_generator_reproduces_outputs() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("generator_x2.ot");
    let xs = Tensor::rand([1, 3, 10, 12], kind::FLOAT_CPU);

    let source_vs = nn::VarStore::new(Device::Cpu);
    let source = Generator::new(&source_vs.root(), 2).unwrap();
    Checkpoint::save_var_store(&source_vs, &path).unwrap();
    let expected = source.generate(&xs).unwrap();

    let mut restored_vs = nn::VarStore::new(Device::Cpu);
    let restored = Generator::new(&restored_vs.root(), 2).unwrap();
    assert!(!restored.generate(&xs).unwrap().equal(&expected));
    Checkpoint::load_into(&path, &mut restored_vs).unwrap();
    assert!(restored.generate(&xs).unwrap().equal(&expected));
}

#[test]
fn checkpoint_for_another_scale_is_rejected() {
    let x2_vs = nn::VarStore::new(Device::Cpu);
    let _x2 = Generator::new(&x2_vs.root(), 2).unwrap();
    let checkpoint = Checkpoint::from_var_store(&x2_vs);

    let mut x4_vs = nn::VarStore::new(Device::Cpu);
    let _x4 = Generator::new(&x4_vs.root(), 4).unwrap();
    assert!(matches!(checkpoint.apply(&mut x4_vs), Err(SrError::LoadError(_))));
}
