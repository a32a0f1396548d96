use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tch::Device;
use tracing::info;

use srgan::compare::{self, CompareConfig, ResampleFilter};
use srgan::logging::init_tracing;
use srgan::train::{self, TrainConfig};
use srgan::{LossConfig, PerceptualMode};

#[derive(Parser, Debug)]
#[command(version, about = "SRGAN super-resolution via Rust.", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Train a generator/discriminator pair on a directory of images.
    Train(TrainArgs),
    /// Downsample a reference image, super-resolve it and report PSNR/SSIM.
    Compare(CompareArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Perceptual {
    /// Pixel MSE, same as the content term.
    Pixel,
    /// MSE between frozen VGG-16 feature maps.
    Feature,
}

#[derive(clap::Args, Debug)]
struct TrainArgs {
    #[arg(short, long)]
    dataset: PathBuf,
    #[arg(short, long, default_value = "checkpoints")]
    out: PathBuf,
    #[arg(short, long, default_value_t = 4)]
    scale: i64,
    #[arg(long, default_value_t = 88)]
    crop_size: i64,
    #[arg(long, default_value_t = 16)]
    batch_size: i64,
    #[arg(long, default_value_t = 0.0001)]
    lr: f64,
    #[arg(short, long, default_value_t = 10000)]
    iters: i64,
    #[arg(long, default_value_t = 100)]
    checkpoint_every: i64,
    #[arg(long, value_enum, default_value_t = Perceptual::Pixel)]
    perceptual: Perceptual,
    #[arg(long)]
    vgg_weights: Option<PathBuf>,
}

#[derive(clap::Args, Debug)]
struct CompareArgs {
    #[arg(short, long)]
    checkpoint: PathBuf,
    #[arg(long)]
    image: PathBuf,
    #[arg(short, long, default_value_t = 16)]
    scale: i64,
    #[arg(short, long, value_enum, default_value_t = ResampleFilter::Linear)]
    filter: ResampleFilter,
    /// Top-left crop as WIDTHxHEIGHT, e.g. 1072x480.
    #[arg(long)]
    crop: Option<String>,
    #[arg(short, long)]
    out: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_tracing()?;
    let args = Args::parse();

    print_oss_license();

    let device = Device::cuda_if_available();
    info!(?device, "selected device");

    match args.command {
        Command::Train(args) => run_train(args, device),
        Command::Compare(args) => run_compare(args, device),
    }
}

fn run_train(args: TrainArgs, device: Device) -> Result<()> {
    let perceptual = match args.perceptual {
        Perceptual::Pixel => PerceptualMode::PixelMirror,
        Perceptual::Feature => PerceptualMode::FeatureSpace,
    };
    if perceptual == PerceptualMode::FeatureSpace && args.vgg_weights.is_none() {
        bail!("--perceptual feature needs --vgg-weights. See the --help option for details.")
    }

    let config = TrainConfig {
        dataset: args.dataset,
        out_dir: args.out,
        scale_factor: args.scale,
        crop_size: args.crop_size,
        batch_size: args.batch_size,
        lr: args.lr,
        iters: args.iters,
        checkpoint_every: args.checkpoint_every,
        loss: LossConfig { perceptual, ..Default::default() },
        vgg_weights: args.vgg_weights,
    };
    let report = train::train(&config, device)
        .with_context(|| format!("training on {}", config.dataset.display()))?;

    println!(
        "{}: G_LOSS({:.6}) D_LOSS({:.6})",
        report.iterations, report.generator_loss, report.discriminator_loss
    );
    println!(
        "Saved: {}",
        train::generator_checkpoint_path(&config.out_dir, config.scale_factor).display()
    );
    Ok(())
}

fn run_compare(args: CompareArgs, device: Device) -> Result<()> {
    let crop = args.crop.as_deref().map(compare::parse_crop).transpose()?;
    let config = CompareConfig {
        checkpoint: args.checkpoint,
        image: args.image,
        scale_factor: args.scale,
        filter: args.filter,
        crop,
        output: args.out,
    };
    let report = compare::compare(&config, device)
        .with_context(|| format!("comparing {}", config.image.display()))?;

    println!("Low Resolution: {}x{}", report.low_res.0, report.low_res.1);
    println!("High Resolution: {}x{}", report.high_res.0, report.high_res.1);
    println!("PSNR: {}, SSIM: {}", report.psnr, report.ssim);
    Ok(())
}

fn print_oss_license() {
    println!("OSS Library: PyTorch");
    println!("URL: https://github.com/pytorch/pytorch");
    println!("License: 3-Clause BSD License");
    println!();
    println!("OSS Library: tch-rs");
    println!("URL: https://github.com/LaurentMazare/tch-rs");
    println!("License: MIT License");
    println!();
    println!("OSS Library: image");
    println!("URL: https://github.com/image-rs/image");
    println!("License: MIT OR Apache-2.0");
    println!("--------");
    println!();
}
