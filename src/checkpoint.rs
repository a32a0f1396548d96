//! Versioned parameter snapshots, validated against a `VarStore` on load.

use std::collections::BTreeMap;
use std::path::Path;

use tch::{nn, Device, Tensor};
use tracing::info;

use crate::error::{Result, SrError};

pub const FORMAT_VERSION: i64 = 1;
const VERSION_KEY: &str = "__format_version__";

/// Flat `layer.param -> tensor` mapping for one network, kept on the CPU.
#[derive(Debug)]
pub struct Checkpoint {
    version: i64,
    tensors: BTreeMap<String, Tensor>,
}

impl Checkpoint {
    pub fn from_var_store(vs: &nn::VarStore) -> Checkpoint {
        let tensors: BTreeMap<String, Tensor> = tch::no_grad(|| {
            vs.variables()
                .into_iter()
                .map(|(name, var)| (name, var.to_device(Device::Cpu).copy()))
                .collect()
        });
        Checkpoint { version: FORMAT_VERSION, tensors }
    }

    pub fn version(&self) -> i64 {
        self.version
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.tensors.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Option<&Tensor> {
        self.tensors.get(key)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let mut named: Vec<(&str, Tensor)> = self
            .tensors
            .iter()
            .map(|(name, tensor)| (name.as_str(), tensor.shallow_clone()))
            .collect();
        named.push((VERSION_KEY, Tensor::from_slice(&[self.version])));
        Tensor::save_multi(&named, path.as_ref())?;
        info!(path = %path.as_ref().display(), tensors = self.tensors.len(), "saved checkpoint");
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Checkpoint> {
        let mut named = Tensor::load_multi(path.as_ref())?;
        let position = named
            .iter()
            .position(|(name, _)| name == VERSION_KEY)
            .ok_or_else(|| SrError::LoadError(format!(
                "{} has no {VERSION_KEY} entry",
                path.as_ref().display()
            )))?;
        let (_, version) = named.swap_remove(position);
        let version = read_version(&version)
            .ok_or_else(|| SrError::LoadError(format!(
                "{} has a malformed {VERSION_KEY} entry of shape {:?}",
                path.as_ref().display(),
                version.size()
            )))?;
        if version != FORMAT_VERSION {
            return Err(SrError::LoadError(format!(
                "unsupported checkpoint version {version}, expected {FORMAT_VERSION}"
            )));
        }
        info!(path = %path.as_ref().display(), tensors = named.len(), "loaded checkpoint");
        Ok(Checkpoint { version, tensors: named.into_iter().collect() })
    }

    /// Copies every tensor into `vs`.
    ///
    /// Keys must match the store exactly and every shape must agree; nothing is
    /// written unless the whole layout validates.
    pub fn apply(&self, vs: &mut nn::VarStore) -> Result<()> {
        let variables = vs.variables();

        let mut missing: Vec<&str> = variables
            .keys()
            .filter(|name| !self.tensors.contains_key(*name))
            .map(String::as_str)
            .collect();
        missing.sort_unstable();
        let unexpected: Vec<&str> = self
            .keys()
            .filter(|name| !variables.contains_key(*name))
            .collect();
        if !missing.is_empty() || !unexpected.is_empty() {
            return Err(SrError::LoadError(format!(
                "missing keys {missing:?}, unexpected keys {unexpected:?}"
            )));
        }

        for (name, var) in variables.iter() {
            let saved = &self.tensors[name];
            if saved.size() != var.size() {
                return Err(SrError::LoadError(format!(
                    "{name}: checkpoint shape {:?}, model shape {:?}",
                    saved.size(),
                    var.size()
                )));
            }
        }

        tch::no_grad(|| -> Result<()> {
            for (name, mut var) in variables {
                var.f_copy_(&self.tensors[&name].to_device(var.device()))?;
            }
            Ok(())
        })
    }

    /// Snapshots `vs` and writes it to `path`.
    pub fn save_var_store<P: AsRef<Path>>(vs: &nn::VarStore, path: P) -> Result<()> {
        Checkpoint::from_var_store(vs).save(path)
    }

    /// Reads `path` and applies it to `vs`.
    pub fn load_into<P: AsRef<Path>>(path: P, vs: &mut nn::VarStore) -> Result<()> {
        Checkpoint::load(path)?.apply(vs)
    }
}

/// The single integer stored under the version key, whatever its rank.
fn read_version(version: &Tensor) -> Option<i64> {
    if version.numel() != 1 || version.is_floating_point() {
        return None;
    }
    version.reshape([1]).f_int64_value(&[0]).ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blocks::ResidualBlock;
    use tch::kind;

    #[test]
    fn round_trip_preserves_parameters() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("res.ot");

        let source = nn::VarStore::new(Device::Cpu);
        let _block = ResidualBlock::new(source.root() / "res", 4);
        Checkpoint::save_var_store(&source, &path).unwrap();

        let mut target = nn::VarStore::new(Device::Cpu);
        let _block = ResidualBlock::new(target.root() / "res", 4);
        Checkpoint::load_into(&path, &mut target).unwrap();

        let (source_vars, target_vars) = (source.variables(), target.variables());
        for (name, var) in source_vars.iter() {
            assert!(var.equal(&target_vars[name]), "{name} differs");
        }
    }

    #[test]
    fn checkpoint_carries_version_and_keys() {
        let vs = nn::VarStore::new(Device::Cpu);
        let _block = ResidualBlock::new(vs.root() / "res", 2);
        let checkpoint = Checkpoint::from_var_store(&vs);
        assert_eq!(checkpoint.version(), FORMAT_VERSION);
        assert_eq!(checkpoint.len(), vs.variables().len());
        assert!(checkpoint.keys().any(|k| k == "res.conv1.weight"));
        assert!(checkpoint.get(VERSION_KEY).is_none());
    }

    #[test]
    fn shape_mismatch_is_a_load_error() {
        let small = nn::VarStore::new(Device::Cpu);
        let _block = ResidualBlock::new(small.root() / "res", 2);
        let checkpoint = Checkpoint::from_var_store(&small);

        let mut wide = nn::VarStore::new(Device::Cpu);
        let _block = ResidualBlock::new(wide.root() / "res", 8);
        let before = wide.variables()["res.conv1.weight"].copy();
        assert!(matches!(checkpoint.apply(&mut wide), Err(SrError::LoadError(_))));
        assert!(before.equal(&wide.variables()["res.conv1.weight"]));
    }

    #[test]
    fn missing_version_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("raw.ot");
        let t = Tensor::rand([2, 2], kind::FLOAT_CPU);
        Tensor::save_multi(&[("weight", &t)], &path).unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(SrError::LoadError(_))));
    }

    #[test]
    fn unknown_version_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("future.ot");
        let t = Tensor::rand([2, 2], kind::FLOAT_CPU);
        let version = Tensor::from_slice(&[FORMAT_VERSION + 1]);
        Tensor::save_multi(&[("weight", &t), (VERSION_KEY, &version)], &path).unwrap();
        assert!(matches!(Checkpoint::load(&path), Err(SrError::LoadError(_))));
    }

    #[test]
    fn malformed_version_is_a_load_error() {
        let dir = tempfile::tempdir().unwrap();
        let t = Tensor::rand([2, 2], kind::FLOAT_CPU);
        let empty = Tensor::zeros([0], kind::INT64_CPU);
        let pair = Tensor::from_slice(&[FORMAT_VERSION, FORMAT_VERSION]);
        let float = Tensor::from_slice(&[FORMAT_VERSION as f32]);
        for (i, version) in [empty, pair, float].iter().enumerate() {
            let path = dir.path().join(format!("bad{i}.ot"));
            Tensor::save_multi(&[("weight", &t), (VERSION_KEY, version)], &path).unwrap();
            assert!(matches!(Checkpoint::load(&path), Err(SrError::LoadError(_))));
        }
    }

    #[test]
    fn scalar_version_is_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scalar.ot");
        let t = Tensor::rand([2, 2], kind::FLOAT_CPU);
        let version = Tensor::from(FORMAT_VERSION);
        Tensor::save_multi(&[("weight", &t), (VERSION_KEY, &version)], &path).unwrap();
        let checkpoint = Checkpoint::load(&path).unwrap();
        assert_eq!(checkpoint.version(), FORMAT_VERSION);
        assert_eq!(checkpoint.len(), 1);
    }
}
