pub mod fade;
pub mod loss;
pub mod metrics;
pub mod step;

use burn::{
    config::Config,
    data::{dataloader::DataLoaderBuilder, dataset::Dataset},
    module::AutodiffModule,
    optim::{AdamConfig, Optimizer, RmsPropConfig},
    prelude::*,
    tensor::{backend::AutodiffBackend, Distribution},
};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::{
    checkpoint::{checkpoint_paths, save_checkpoint},
    data::{ImageBatcher, ImageFolderDataset},
    error::{ProGanError, Result},
    model::{generate_images, ops::downsample, GanCritic, GanGenerator, Growth, ModelConfig, ModelKind},
    training::{
        fade::FadeScheduler,
        loss::{GanType, LossStrategy, OptimizerSettings},
        step::TrainingStep,
    },
    utils::save_image,
};

// ////////////////////////////////////////////////////////////////////////////
// Configuration
#[derive(Config, Debug)]
pub struct TrainingConfig {
    #[config(default = "ModelConfig::new()")]
    pub model: ModelConfig,
    #[config(default = "GanType::WassersteinGp")]
    pub gan_type: GanType,
    /// Critic updates per generator update; defaults per `gan_type`.
    pub n_critic: Option<usize>,
    /// Overrides the learning rate of the `gan_type` optimizer defaults.
    pub learning_rate: Option<f64>,
    /// Images per critic update.
    #[config(default = 16)]
    pub mb_size: usize,
    /// Stable epochs run at every stage.
    #[config(default = 10)]
    pub epochs: usize,
    /// Length of each fade-in, in epochs.
    #[config(default = 10)]
    pub fade_epochs: usize,
    /// Length of each fade-in in iterations; takes precedence over `fade_epochs`.
    pub fade_iters: Option<usize>,
    #[config(default = 42)]
    pub seed: u64,
    #[config(default = 2)]
    pub num_workers: usize,
    /// Size of the fixed latent sample rendered after every epoch.
    #[config(default = 16)]
    pub num_examples: usize,
    /// Save checkpoints every `checkpoint_interval` epochs; 0 saves only at the end.
    #[config(default = 5)]
    pub checkpoint_interval: usize,
}

impl TrainingConfig {
    pub fn n_critic(&self) -> usize {
        self.n_critic
            .unwrap_or_else(|| self.gan_type.default_n_critic())
    }

    pub fn optimizer(&self) -> OptimizerSettings {
        let settings = self.gan_type.default_optimizer();

        match self.learning_rate {
            Some(learning_rate) => settings.with_learning_rate(learning_rate),
            None => settings,
        }
    }

    /// Images per data batch: one minibatch for each critic update.
    pub fn batch_size(&self) -> usize {
        self.mb_size * self.n_critic()
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_critic() == 0 {
            return Err(ProGanError::InvalidConfig("n_critic must be >= 1".into()));
        }
        if self.mb_size == 0 {
            return Err(ProGanError::InvalidConfig("mb_size must be >= 1".into()));
        }
        if self.num_examples == 0 {
            return Err(ProGanError::InvalidConfig("num_examples must be >= 1".into()));
        }
        if self.optimizer().learning_rate() <= 0.0 {
            return Err(ProGanError::InvalidConfig("learning_rate must be > 0".into()));
        }
        if self.model.kind == ModelKind::Progressive {
            self.model.progressive.num_stages()?;
        }

        Ok(())
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Training

struct RunContext<'a, B: Backend> {
    config: &'a TrainingConfig,
    artifact_dir: &'a Path,
    fixed_noise: Tensor<B, 2>,
    epochs_done: usize,
}

impl<B: AutodiffBackend> RunContext<'_, B> {
    fn sample_path(&self, growth: Growth, epoch: usize) -> PathBuf {
        let phase = if growth.alpha.is_some() { "fade" } else { "stable" };

        self.artifact_dir
            .join("samples")
            .join(format!("stage{}-{phase}-epoch{epoch}.png", growth.stage))
    }

    /// Logs and resets the epoch metrics, renders the fixed latent sample and
    /// saves periodic checkpoints.
    fn end_epoch<G, D, OG, OD>(
        &mut self,
        step: &mut TrainingStep<B, G, D, OG, OD>,
        generator: &G,
        discriminator: &D,
        growth: Growth,
        epoch: usize,
    ) -> Result<()>
    where
        G: GanGenerator<B> + AutodiffModule<B>,
        D: GanCritic<B> + AutodiffModule<B>,
        OG: Optimizer<G, B>,
        OD: Optimizer<D, B>,
    {
        let summary = step.metrics().summary();
        info!(
            stage = growth.stage,
            fade = growth.alpha.is_some(),
            epoch,
            g_loss = summary.generator,
            d_fake_loss = summary.discriminator_fake,
            d_real_loss = summary.discriminator_real,
            "epoch finished: {summary}"
        );
        step.reset_metrics();

        let path = self.sample_path(growth, epoch);
        let images = generate_images(generator, self.fixed_noise.clone(), growth)?;
        save_image(images, 4, &path).map_err(|source| ProGanError::Image { path, source })?;

        self.epochs_done += 1;
        let interval = self.config.checkpoint_interval;
        if interval > 0 && self.epochs_done % interval == 0 {
            let tag = format!("epoch{}", self.epochs_done);
            self.save_checkpoints(generator, discriminator, &tag)?;
        }

        Ok(())
    }

    fn save_checkpoints<G, D>(&self, generator: &G, discriminator: &D, tag: &str) -> Result<()>
    where
        G: AutodiffModule<B>,
        D: AutodiffModule<B>,
    {
        let (gen_path, disc_path) = checkpoint_paths(self.artifact_dir, tag);
        save_checkpoint(generator.clone(), &gen_path)?;
        save_checkpoint(discriminator.clone(), &disc_path)?;
        info!(tag, "saved checkpoints");

        Ok(())
    }
}

fn fit<B, G, D, OG, OD>(
    ctx: &mut RunContext<'_, B>,
    data_dir: &Path,
    mut step: TrainingStep<B, G, D, OG, OD>,
    mut generator: G,
    mut discriminator: D,
    device: &B::Device,
) -> Result<()>
where
    B: AutodiffBackend,
    G: GanGenerator<B> + AutodiffModule<B>,
    D: GanCritic<B> + AutodiffModule<B>,
    OG: Optimizer<G, B>,
    OD: Optimizer<D, B>,
{
    let config = ctx.config;
    let batch_size = config.batch_size();
    let num_stages = generator.num_stages();
    let full_resolution = generator.resolution(num_stages - 1);

    let dataset = ImageFolderDataset::new(data_dir, full_resolution)?;
    let fade_length = config.fade_iters.unwrap_or_else(|| {
        FadeScheduler::from_epochs(dataset.len(), batch_size, config.fade_epochs).phase_length()
    });

    let mut builder = DataLoaderBuilder::new(ImageBatcher)
        .batch_size(batch_size)
        .shuffle(config.seed)
        .set_device(device.clone());
    if config.num_workers > 0 {
        builder = builder.num_workers(config.num_workers);
    }
    let dataloader = builder.build(dataset);

    for stage in 0..num_stages {
        let resolution = generator.resolution(stage);
        let factor = full_resolution / resolution;
        info!(stage, resolution, "growing stage");

        // stage 0 has nothing to fade from
        let mut fade = FadeScheduler::new(if stage == 0 { 0 } else { fade_length });
        let mut epoch = 0;
        while !fade.is_complete() {
            let start = fade.step();
            for batch in dataloader.iter() {
                let Some(alpha) = fade.alpha() else { break };
                if batch.size() < step.n_critic() {
                    debug!(size = batch.size(), "skipping short batch");
                    continue;
                }

                let real = downsample(batch.channels_first(), factor);
                (generator, discriminator) =
                    step.step(generator, discriminator, real, Growth::fading(stage, alpha))?;
                fade.advance();
            }
            if fade.step() == start {
                return Err(ProGanError::InvalidConfig(format!(
                    "no batch holds the {} images one step needs",
                    step.n_critic()
                )));
            }

            let alpha = fade.alpha().unwrap_or(1.0);
            ctx.end_epoch(&mut step, &generator, &discriminator, Growth::fading(stage, alpha), epoch)?;
            epoch += 1;
        }

        for epoch in 0..config.epochs {
            let growth = Growth::stable(stage);
            for batch in dataloader.iter() {
                if batch.size() < step.n_critic() {
                    debug!(size = batch.size(), "skipping short batch");
                    continue;
                }

                let real = downsample(batch.channels_first(), factor);
                (generator, discriminator) = step.step(generator, discriminator, real, growth)?;
            }

            if step.metrics().generator.count() == 0 {
                warn!(stage, epoch, "epoch ran no training step");
            }
            ctx.end_epoch(&mut step, &generator, &discriminator, growth, epoch)?;
        }
    }

    ctx.save_checkpoints(&generator, &discriminator, "final")?;
    info!(iterations = step.iteration(), "training finished");

    Ok(())
}

fn fit_with_optimizer<B, G, D>(
    ctx: &mut RunContext<'_, B>,
    data_dir: &Path,
    generator: G,
    discriminator: D,
    device: &B::Device,
) -> Result<()>
where
    B: AutodiffBackend,
    G: GanGenerator<B> + AutodiffModule<B>,
    D: GanCritic<B> + AutodiffModule<B>,
{
    let config = ctx.config;
    let strategy = LossStrategy::new(config.gan_type);
    let n_critic = config.n_critic();

    match config.optimizer() {
        OptimizerSettings::Adam {
            learning_rate,
            beta_1,
            beta_2,
        } => {
            let optimizer = AdamConfig::new().with_beta_1(beta_1).with_beta_2(beta_2);
            let step = TrainingStep::new(
                strategy,
                n_critic,
                learning_rate,
                optimizer.init(),
                optimizer.init(),
            )?;
            fit(ctx, data_dir, step, generator, discriminator, device)
        }
        OptimizerSettings::RmsProp { learning_rate } => {
            let optimizer = RmsPropConfig::new();
            let step = TrainingStep::new(
                strategy,
                n_critic,
                learning_rate,
                optimizer.init(),
                optimizer.init(),
            )?;
            fit(ctx, data_dir, step, generator, discriminator, device)
        }
    }
}

/// Grows the networks stage by stage on the images under `data_dir`,
/// writing samples, checkpoints and `config.json` into `artifact_dir`.
pub fn train<B: AutodiffBackend>(
    artifact_dir: &Path,
    data_dir: &Path,
    config: TrainingConfig,
    device: &B::Device,
) -> Result<()> {
    config.validate()?;
    std::fs::create_dir_all(artifact_dir.join("samples"))?;
    std::fs::create_dir_all(artifact_dir.join("checkpoints"))?;
    config.save(artifact_dir.join("config.json"))?;
    B::seed(config.seed);

    info!(
        gan_type = %config.gan_type,
        n_critic = config.n_critic(),
        batch_size = config.batch_size(),
        "starting training"
    );

    let fixed_noise = Tensor::<B, 2>::random(
        [config.num_examples, config.model.latent_dim()],
        Distribution::Normal(0.0, 1.0),
        device,
    );
    let mut ctx = RunContext {
        config: &config,
        artifact_dir,
        fixed_noise,
        epochs_done: 0,
    };

    match config.model.kind {
        ModelKind::Progressive => {
            let model = config.model.init::<B>(device)?;
            fit_with_optimizer(&mut ctx, data_dir, model.generator, model.discriminator, device)
        }
        ModelKind::Baseline => {
            let (generator, discriminator) = config.model.init_baseline::<B>(device)?;
            fit_with_optimizer(&mut ctx, data_dir, generator, discriminator, device)
        }
    }
}
