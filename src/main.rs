#![recursion_limit = "256"]

use anyhow::Context;
use burn::{
    backend::{wgpu::WgpuDevice, Autodiff, Wgpu},
    config::Config,
};
use clap::Parser;
use progan::{
    model::ModelKind,
    training::{loss::GanType, train, TrainingConfig},
};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

type MyBackend = Wgpu<f32>;
type MyAutodiffBackend = Autodiff<MyBackend>;

/// Trains a progressively-growing GAN on a folder of images.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Directory searched recursively for jpg and png images
    data_dir: PathBuf,

    /// Where samples, checkpoints and config.json are written
    #[arg(short, long, default_value = "/tmp/progan")]
    artifact_dir: PathBuf,

    /// Training config JSON; flags below override its values
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// original, least_square, wasserstein or wasserstein-GP
    #[arg(short, long)]
    gan_type: Option<GanType>,

    /// Train the fixed-resolution DCGAN instead of the progressive networks
    #[arg(long)]
    baseline: bool,

    #[arg(long)]
    latent_dim: Option<usize>,

    #[arg(long)]
    g_channels: Option<usize>,

    #[arg(long)]
    d_channels: Option<usize>,

    #[arg(long)]
    max_channels: Option<usize>,

    /// Final image resolution of the progressive networks
    #[arg(long)]
    resolution: Option<usize>,

    /// Critic updates per generator update
    #[arg(long)]
    n_critic: Option<usize>,

    #[arg(long)]
    mb_size: Option<usize>,

    /// Stable epochs per stage
    #[arg(short, long)]
    epochs: Option<usize>,

    /// Fade-in length in iterations
    #[arg(long)]
    fade_iters: Option<usize>,

    #[arg(short = 'r', long)]
    learning_rate: Option<f64>,

    #[arg(long)]
    seed: Option<u64>,
}

impl Args {
    fn training_config(&self) -> anyhow::Result<TrainingConfig> {
        let mut config = match &self.config {
            Some(path) => TrainingConfig::load(path)
                .with_context(|| format!("failed to load config {}", path.display()))?,
            None => TrainingConfig::new(),
        };

        if let Some(gan_type) = self.gan_type {
            config.gan_type = gan_type;
        }
        if self.baseline {
            config.model.kind = ModelKind::Baseline;
        }
        if let Some(latent_dim) = self.latent_dim {
            config.model.progressive.latent_dim = latent_dim;
            config.model.baseline.latent_dim = latent_dim;
        }
        if let Some(g_channels) = self.g_channels {
            config.model.progressive.g_channels = g_channels;
            config.model.baseline.g_channels = g_channels;
        }
        if let Some(d_channels) = self.d_channels {
            config.model.progressive.d_channels = d_channels;
            config.model.baseline.d_channels = d_channels;
        }
        if let Some(max_channels) = self.max_channels {
            config.model.progressive.max_channels = max_channels;
        }
        if let Some(resolution) = self.resolution {
            config.model.progressive.resolution = resolution;
        }
        if self.n_critic.is_some() {
            config.n_critic = self.n_critic;
        }
        if let Some(mb_size) = self.mb_size {
            config.mb_size = mb_size;
        }
        if let Some(epochs) = self.epochs {
            config.epochs = epochs;
        }
        if self.fade_iters.is_some() {
            config.fade_iters = self.fade_iters;
        }
        if self.learning_rate.is_some() {
            config.learning_rate = self.learning_rate;
        }
        if let Some(seed) = self.seed {
            config.seed = seed;
        }

        Ok(config)
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let args = Args::parse();
    let config = args.training_config()?;
    let device = WgpuDevice::default();

    train::<MyAutodiffBackend>(&args.artifact_dir, &args.data_dir, config, &device)
        .with_context(|| format!("training on {} failed", args.data_dir.display()))?;

    Ok(())
}
