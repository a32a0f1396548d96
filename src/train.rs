//! Alternating discriminator / generator optimisation.

use std::fs;
use std::path::{Path, PathBuf};

use rand::thread_rng;
use tch::{nn, nn::OptimizerConfig, Device, Tensor};
use tqdm::tqdm;
use tracing::{debug, info};

use crate::checkpoint::Checkpoint;
use crate::data::TrainingSet;
use crate::discriminator::Discriminator;
use crate::error::{Result, SrError};
use crate::generator::{upsample_block_count, Generator};
use crate::loss::{discriminator_loss, GeneratorLoss, LossConfig, PerceptualMode};
use crate::mode::Mode;

#[derive(Debug, Clone)]
pub struct TrainConfig {
    pub dataset: PathBuf,
    pub out_dir: PathBuf,
    pub scale_factor: i64,
    pub crop_size: i64,
    pub batch_size: i64,
    pub lr: f64,
    pub iters: i64,
    pub checkpoint_every: i64,
    pub loss: LossConfig,
    /// Pretrained VGG-16 trunk, required for feature-space perceptual loss.
    pub vgg_weights: Option<PathBuf>,
}

impl Default for TrainConfig {
    fn default() -> Self {
        Self {
            dataset: PathBuf::new(),
            out_dir: PathBuf::from("checkpoints"),
            scale_factor: 4,
            crop_size: 88,
            batch_size: 16,
            lr: 1e-4,
            iters: 10_000,
            checkpoint_every: 100,
            loss: LossConfig::default(),
            vgg_weights: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrainReport {
    pub iterations: i64,
    pub generator_loss: f64,
    pub discriminator_loss: f64,
}

pub fn generator_checkpoint_path(out_dir: &Path, scale_factor: i64) -> PathBuf {
    out_dir.join(format!("generator_x{scale_factor}.ot"))
}

pub fn discriminator_checkpoint_path(out_dir: &Path) -> PathBuf {
    out_dir.join("discriminator.ot")
}

fn build_loss(config: &TrainConfig, device: Device) -> Result<GeneratorLoss> {
    match (config.loss.perceptual, &config.vgg_weights) {
        (PerceptualMode::FeatureSpace, Some(weights)) => {
            GeneratorLoss::with_vgg16(config.loss, weights, device)
        }
        _ => GeneratorLoss::new(config.loss),
    }
}

fn validate(config: &TrainConfig) -> Result<()> {
    upsample_block_count(config.scale_factor)?;
    if config.batch_size < 1 || config.iters < 1 || config.checkpoint_every < 1 {
        return Err(SrError::InvalidConfiguration(
            "batch size, iterations and checkpoint interval must be positive".to_string(),
        ));
    }
    Ok(())
}

fn save_checkpoints(config: &TrainConfig, g_vs: &nn::VarStore, d_vs: &nn::VarStore) -> Result<()> {
    Checkpoint::save_var_store(g_vs, generator_checkpoint_path(&config.out_dir, config.scale_factor))?;
    Checkpoint::save_var_store(d_vs, discriminator_checkpoint_path(&config.out_dir))
}

/// Trains from `config.dataset`, resuming from checkpoints already in `config.out_dir`.
pub fn train(config: &TrainConfig, device: Device) -> Result<TrainReport> {
    validate(config)?;
    let dataset = TrainingSet::load_dir(&config.dataset, config.crop_size, config.scale_factor)?;
    train_on(config, &dataset, device)
}

/// Training loop over an already loaded [`TrainingSet`].
pub fn train_on(config: &TrainConfig, dataset: &TrainingSet, device: Device) -> Result<TrainReport> {
    validate(config)?;

    // Build Generator
    let mut g_vs = nn::VarStore::new(device);
    let generator = Generator::new(&g_vs.root(), config.scale_factor)?;
    let mut optimizer_g = nn::adam(0.9, 0.999, 0.).build(&g_vs, config.lr)?;

    // Build Discriminator
    let mut d_vs = nn::VarStore::new(device);
    let discriminator = Discriminator::new(&d_vs.root());
    let mut optimizer_d = nn::adam(0.9, 0.999, 0.).build(&d_vs, config.lr)?;

    let loss = build_loss(config, device)?;

    fs::create_dir_all(&config.out_dir)?;
    let g_path = generator_checkpoint_path(&config.out_dir, config.scale_factor);
    if g_path.is_file() {
        Checkpoint::load_into(&g_path, &mut g_vs)?;
        info!(path = %g_path.display(), "resumed generator");
    }
    let d_path = discriminator_checkpoint_path(&config.out_dir);
    if d_path.is_file() {
        Checkpoint::load_into(&d_path, &mut d_vs)?;
        info!(path = %d_path.display(), "resumed discriminator");
    }

    info!(
        images = dataset.len(),
        scale_factor = config.scale_factor,
        crop_size = dataset.crop_size(),
        batch_size = config.batch_size,
        lr = config.lr,
        iters = config.iters,
        "training"
    );

    let mut rng = thread_rng();
    let mut report = TrainReport { iterations: 0, generator_loss: f64::NAN, discriminator_loss: f64::NAN };
    for i in tqdm(0..config.iters) {
        let (low_res, high_res) = dataset.sample(&mut rng, config.batch_size, device);

        // Train Discriminator
        d_vs.unfreeze();
        g_vs.freeze();
        let d_loss = {
            let fake = generator.forward(&low_res, Mode::Train).detach();
            let real_out = discriminator.forward(&high_res, Mode::Train);
            let fake_out = discriminator.forward(&fake, Mode::Train);
            discriminator_loss(&real_out, &fake_out)
        };
        optimizer_d.backward_step(&d_loss);

        // Train Generator
        d_vs.freeze();
        g_vs.unfreeze();
        let g_loss: Tensor = {
            let fake = generator.forward(&low_res, Mode::Train);
            let fake_out = discriminator.forward(&fake, Mode::Train);
            loss.forward(&fake_out, &fake, &high_res)?
        };
        optimizer_g.backward_step(&g_loss);

        report = TrainReport {
            iterations: i + 1,
            generator_loss: g_loss.double_value(&[]),
            discriminator_loss: d_loss.double_value(&[]),
        };
        debug!(iteration = i + 1, g_loss = report.generator_loss, d_loss = report.discriminator_loss);

        if (i + 1) % config.checkpoint_every == 0 {
            info!(
                iteration = i + 1,
                g_loss = report.generator_loss,
                d_loss = report.discriminator_loss,
                "checkpoint"
            );
            save_checkpoints(config, &g_vs, &d_vs)?;
        }
    }

    if report.iterations % config.checkpoint_every != 0 {
        save_checkpoints(config, &g_vs, &d_vs)?;
    }
    Ok(report)
}
