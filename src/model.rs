pub mod baseline;
pub mod discriminator;
pub mod generator;
pub mod layers;
pub mod ops;

use burn::{module::Module, prelude::*};
use serde::{Deserialize, Serialize};

use crate::error::{ProGanError, Result};
use crate::model::{
    baseline::{BaselineConfig, BaselineDiscriminator, BaselineGenerator},
    discriminator::{Discriminator, DiscriminatorConfig},
    generator::{Generator, GeneratorConfig},
};

/// Which stage the networks run at and, while that stage fades in, how far.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Growth {
    pub stage: usize,
    pub alpha: Option<f32>,
}

impl Growth {
    pub fn stable(stage: usize) -> Self {
        Self { stage, alpha: None }
    }

    pub fn fading(stage: usize, alpha: f32) -> Self {
        Self {
            stage,
            alpha: Some(alpha),
        }
    }
}

/// Generator side of an adversarial pair, as driven by the training step.
pub trait GanGenerator<B: Backend> {
    fn latent_dim(&self) -> usize;
    fn num_stages(&self) -> usize;
    fn resolution(&self, stage: usize) -> usize;
    /// Maps `[batch, latent_dim]` noise to `[batch, 3, r, r]` images.
    fn generate(&self, noise: Tensor<B, 2>, growth: Growth) -> Tensor<B, 4>;
}

/// Critic side of an adversarial pair: `[batch, 3, r, r]` images to `[batch, 1]` scores.
pub trait GanCritic<B: Backend> {
    fn critique(&self, images: Tensor<B, 4>, growth: Growth) -> Tensor<B, 2>;
}

/// Generates `[batch, r, r, 3]` images with values in [-1, 1], detached from
/// any autodiff graph.
pub fn generate_images<B: Backend, G: GanGenerator<B>>(
    generator: &G,
    noise: Tensor<B, 2>,
    growth: Growth,
) -> Result<Tensor<B, 4>> {
    let num_stages = generator.num_stages();
    if growth.stage >= num_stages {
        return Err(ProGanError::StageOutOfRange {
            stage: growth.stage,
            num_stages,
        });
    }

    let [_, latent_dim] = noise.dims();
    if latent_dim != generator.latent_dim() {
        return Err(ProGanError::ShapeMismatch {
            stage: growth.stage,
            expected: vec![noise.dims()[0], generator.latent_dim()],
            actual: noise.dims().to_vec(),
        });
    }

    Ok(generator
        .generate(noise, growth)
        .detach()
        .permute([0, 2, 3, 1]))
}

impl<B: Backend> GanGenerator<B> for Generator<B> {
    fn latent_dim(&self) -> usize {
        Generator::latent_dim(self)
    }

    fn num_stages(&self) -> usize {
        Generator::num_stages(self)
    }

    fn resolution(&self, stage: usize) -> usize {
        Generator::resolution(self, stage)
    }

    fn generate(&self, noise: Tensor<B, 2>, growth: Growth) -> Tensor<B, 4> {
        self.forward(noise, growth).rgb
    }
}

impl<B: Backend> GanCritic<B> for Discriminator<B> {
    fn critique(&self, images: Tensor<B, 4>, growth: Growth) -> Tensor<B, 2> {
        self.forward(images, growth)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ModelKind {
    #[serde(rename = "progressive")]
    Progressive,
    #[serde(rename = "baseline")]
    Baseline,
}

#[derive(Config, Debug)]
pub struct ProGanConfig {
    #[config(default = 128)]
    pub latent_dim: usize,
    /// Width of the finest generator stage; coarser stages double it.
    #[config(default = 16)]
    pub g_channels: usize,
    /// Width of the finest discriminator stage; coarser stages double it.
    #[config(default = 16)]
    pub d_channels: usize,
    #[config(default = 256)]
    pub max_channels: usize,
    #[config(default = 4)]
    pub base_resolution: usize,
    #[config(default = 64)]
    pub resolution: usize,
}

impl ProGanConfig {
    /// Number of stages from `base_resolution` up to `resolution`.
    pub fn num_stages(&self) -> Result<usize> {
        for (name, value) in [
            ("latent_dim", self.latent_dim),
            ("g_channels", self.g_channels),
            ("d_channels", self.d_channels),
            ("max_channels", self.max_channels),
            ("base_resolution", self.base_resolution),
        ] {
            if value == 0 {
                return Err(ProGanError::InvalidConfig(format!("{name} must be > 0")));
            }
        }

        let ratio = self.resolution / self.base_resolution;
        if self.resolution % self.base_resolution != 0 || !ratio.is_power_of_two() {
            return Err(ProGanError::InvalidConfig(format!(
                "resolution {} is not base_resolution {} times a power of two",
                self.resolution, self.base_resolution
            )));
        }

        Ok(ratio.trailing_zeros() as usize + 1)
    }

    pub fn generator(&self) -> Result<GeneratorConfig> {
        let channels = self.stage_channels(self.g_channels)?;

        Ok(GeneratorConfig::new(self.latent_dim, channels).with_base_resolution(self.base_resolution))
    }

    pub fn discriminator(&self) -> Result<DiscriminatorConfig> {
        let channels = self.stage_channels(self.d_channels)?;

        Ok(DiscriminatorConfig::new(channels, self.max_channels)
            .with_base_resolution(self.base_resolution))
    }

    // coarsest first: stage k gets finest * 2^(K-1-k), capped
    fn stage_channels(&self, finest: usize) -> Result<Vec<usize>> {
        let num_stages = self.num_stages()?;

        Ok((0..num_stages)
            .map(|stage| {
                finest
                    .saturating_mul(1 << (num_stages - 1 - stage))
                    .min(self.max_channels)
            })
            .collect())
    }
}

#[derive(Config, Debug)]
pub struct ModelConfig {
    #[config(default = "ModelKind::Progressive")]
    pub kind: ModelKind,
    #[config(default = "ProGanConfig::new()")]
    pub progressive: ProGanConfig,
    #[config(default = "BaselineConfig::new()")]
    pub baseline: BaselineConfig,
}

#[derive(Module, Debug)]
pub struct Model<B: Backend> {
    pub generator: Generator<B>,
    pub discriminator: Discriminator<B>,
}

impl ModelConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Model<B>> {
        let generator = self.progressive.generator()?.init(device)?;
        let discriminator = self.progressive.discriminator()?.init(device)?;

        Ok(Model {
            generator,
            discriminator,
        })
    }

    pub fn init_baseline<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<(BaselineGenerator<B>, BaselineDiscriminator<B>)> {
        Ok((
            self.baseline.init_generator(device)?,
            self.baseline.init_discriminator(device)?,
        ))
    }

    pub fn latent_dim(&self) -> usize {
        match self.kind {
            ModelKind::Progressive => self.progressive.latent_dim,
            ModelKind::Baseline => self.baseline.latent_dim,
        }
    }
}
