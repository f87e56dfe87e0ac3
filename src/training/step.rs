use burn::{
    module::{AutodiffModule, ModuleVisitor, ParamId},
    optim::{GradientsParams, Optimizer},
    prelude::*,
    tensor::{backend::AutodiffBackend, cast::ToElement, Distribution},
};
use std::marker::PhantomData;

use crate::{
    error::{ProGanError, Result},
    model::{GanCritic, GanGenerator, Growth},
    training::{
        loss::{gradient_penalty, LossStrategy, WeightClip},
        metrics::GanMetrics,
    },
};

// ////////////////////////////////////////////////////////////////////////////
// Helpers
#[derive(Clone, Debug)]
pub struct DiscOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
    pub fake_loss: Tensor<B, 1>,
    pub real_loss: Tensor<B, 1>,
    pub penalty: Option<Tensor<B, 1>>,
}

#[derive(Clone, Debug)]
pub struct GenOutput<B: Backend> {
    pub loss: Tensor<B, 1>,
}

fn latent_noise<B: Backend>(batch_size: usize, latent_dim: usize, device: &B::Device) -> Tensor<B, 2> {
    Tensor::random([batch_size, latent_dim], Distribution::Normal(0.0, 1.0), device)
}

fn calc_disc_loss<B, D>(
    real: Tensor<B, 4>,
    fake: Tensor<B, 4>,
    discriminator: &D,
    growth: Growth,
    strategy: &LossStrategy,
) -> DiscOutput<B>
where
    B: AutodiffBackend,
    D: GanCritic<B>,
{
    let fake_out = discriminator.critique(fake.clone(), growth);
    let fake_loss = strategy.loss(fake_out, strategy.fake_label);

    let real_out = discriminator.critique(real.clone(), growth);
    let real_loss = strategy.loss(real_out, strategy.real_label);

    let loss = (fake_loss.clone() + real_loss.clone()) * 0.5;

    match strategy.gradient_penalty {
        Some(weight) => {
            let penalty = gradient_penalty(|x| discriminator.critique(x, growth), real, fake);
            DiscOutput {
                loss: loss + penalty.clone() * weight,
                fake_loss,
                real_loss,
                penalty: Some(penalty),
            }
        }
        None => DiscOutput {
            loss,
            fake_loss,
            real_loss,
            penalty: None,
        },
    }
}

fn calc_gen_loss<B, G, D>(
    noise: Tensor<B, 2>,
    generator: &G,
    discriminator: &D,
    growth: Growth,
    strategy: &LossStrategy,
) -> GenOutput<B>
where
    B: AutodiffBackend,
    G: GanGenerator<B>,
    D: GanCritic<B>,
{
    let generated_images = generator.generate(noise, growth);
    let adversarial_out = discriminator.critique(generated_images, growth);

    GenOutput {
        loss: strategy.loss(adversarial_out, strategy.gen_label),
    }
}

struct GradientNorm<'a> {
    grads: &'a GradientsParams,
    total: f32,
}

impl<B: AutodiffBackend> ModuleVisitor<B> for GradientNorm<'_> {
    fn visit_float<const D: usize>(&mut self, id: ParamId, _tensor: &Tensor<B, D>) {
        if let Some(grad) = self.grads.get::<B::InnerBackend, D>(id) {
            self.total += grad.abs().sum().into_scalar().to_f32();
        }
    }
}

/// L1 norm of the gradients `module` holds in `grads`; NaN or infinite as
/// soon as one entry is.
fn gradient_norm<B, M>(module: &M, grads: &GradientsParams) -> f32
where
    B: AutodiffBackend,
    M: AutodiffModule<B>,
{
    let mut visitor = GradientNorm { grads, total: 0.0 };
    module.visit(&mut visitor);

    visitor.total
}

// ////////////////////////////////////////////////////////////////////////////
// Training step

/// One critic-then-generator update cycle per minibatch.
///
/// Owns both optimizers and the epoch metrics; the networks themselves are
/// moved in and handed back by [`TrainingStep::step`].
pub struct TrainingStep<B, G, D, OG, OD>
where
    B: AutodiffBackend,
{
    strategy: LossStrategy,
    n_critic: usize,
    gen_lr: f64,
    disc_lr: f64,
    gen_optimizer: OG,
    disc_optimizer: OD,
    metrics: GanMetrics,
    iteration: usize,
    _marker: PhantomData<(B, G, D)>,
}

impl<B, G, D, OG, OD> TrainingStep<B, G, D, OG, OD>
where
    B: AutodiffBackend,
    G: GanGenerator<B> + AutodiffModule<B>,
    D: GanCritic<B> + AutodiffModule<B>,
    OG: Optimizer<G, B>,
    OD: Optimizer<D, B>,
{
    pub fn new(
        strategy: LossStrategy,
        n_critic: usize,
        learning_rate: f64,
        gen_optimizer: OG,
        disc_optimizer: OD,
    ) -> Result<Self> {
        if n_critic == 0 {
            return Err(ProGanError::InvalidConfig("n_critic must be >= 1".into()));
        }

        Ok(Self {
            strategy,
            n_critic,
            gen_lr: learning_rate,
            disc_lr: learning_rate,
            gen_optimizer,
            disc_optimizer,
            metrics: GanMetrics::default(),
            iteration: 0,
            _marker: PhantomData,
        })
    }

    /// Runs `n_critic` discriminator updates on consecutive sub-batches of
    /// `real` (`[batch, 3, r, r]`, channels-first), then one generator update.
    pub fn step(
        &mut self,
        generator: G,
        mut discriminator: D,
        real: Tensor<B, 4>,
        growth: Growth,
    ) -> Result<(G, D)> {
        self.validate(&generator, &real, growth)?;

        let [batch_size, ..] = real.dims();
        let mb_size = batch_size / self.n_critic;
        let latent_dim = generator.latent_dim();
        let device = real.device();

        for idx in 0..self.n_critic {
            let real_batch = real.clone().narrow(0, idx * mb_size, mb_size);
            let noise = latent_noise::<B>(mb_size, latent_dim, &device);
            let fake_batch = generator.generate(noise, growth).detach();

            let disc_out = calc_disc_loss(
                real_batch,
                fake_batch,
                &discriminator,
                growth,
                &self.strategy,
            );
            if let Some(penalty) = &disc_out.penalty {
                self.ensure_finite("gradient penalty", penalty.clone().into_scalar().to_f32(), growth)?;
            }
            let disc_loss = disc_out.loss.clone().into_scalar().to_f32();
            self.ensure_finite("discriminator loss", disc_loss, growth)?;
            let fake_loss = disc_out.fake_loss.clone().into_scalar().to_f32();
            let real_loss = disc_out.real_loss.clone().into_scalar().to_f32();

            let grads = disc_out.loss.backward();
            let grads = GradientsParams::from_grads(grads, &discriminator);
            self.ensure_finite(
                "discriminator gradients",
                gradient_norm::<B, _>(&discriminator, &grads),
                growth,
            )?;
            discriminator = self.disc_optimizer.step(self.disc_lr, discriminator, grads);

            if let Some(bound) = self.strategy.weight_clip {
                discriminator = discriminator.map(&mut WeightClip::symmetric(bound));
            }

            self.metrics.discriminator_fake.update(fake_loss);
            self.metrics.discriminator_real.update(real_loss);
        }

        // train generator
        let noise = latent_noise::<B>(mb_size, latent_dim, &device);
        let gen_out = calc_gen_loss(noise, &generator, &discriminator, growth, &self.strategy);
        let gen_loss = gen_out.loss.clone().into_scalar().to_f32();
        self.ensure_finite("generator loss", gen_loss, growth)?;

        let grads = gen_out.loss.backward();
        let grads = GradientsParams::from_grads(grads, &generator);
        self.ensure_finite("generator gradients", gradient_norm::<B, _>(&generator, &grads), growth)?;
        let generator = self.gen_optimizer.step(self.gen_lr, generator, grads);
        self.metrics.generator.update(gen_loss);

        self.iteration += 1;

        Ok((generator, discriminator))
    }

    fn validate(&self, generator: &G, real: &Tensor<B, 4>, growth: Growth) -> Result<()> {
        let num_stages = generator.num_stages();
        if growth.stage >= num_stages {
            return Err(ProGanError::StageOutOfRange {
                stage: growth.stage,
                num_stages,
            });
        }
        if let Some(alpha) = growth.alpha {
            if !(0.0..=1.0).contains(&alpha) {
                return Err(ProGanError::InvalidConfig(format!(
                    "fade-in alpha {alpha} is outside [0, 1]"
                )));
            }
        }

        let side = generator.resolution(growth.stage);
        let [batch_size, channels, height, width] = real.dims();
        if batch_size < self.n_critic || [channels, height, width] != [3, side, side] {
            return Err(ProGanError::ShapeMismatch {
                stage: growth.stage,
                expected: vec![batch_size.max(self.n_critic), 3, side, side],
                actual: vec![batch_size, channels, height, width],
            });
        }

        Ok(())
    }

    fn ensure_finite(&self, quantity: &'static str, value: f32, growth: Growth) -> Result<()> {
        if value.is_finite() {
            return Ok(());
        }

        Err(ProGanError::NonFinite {
            quantity,
            value,
            stage: growth.stage,
            iteration: self.iteration,
            gan_type: self.strategy.gan_type,
        })
    }

    pub fn metrics(&self) -> &GanMetrics {
        &self.metrics
    }

    pub fn reset_metrics(&mut self) {
        self.metrics.reset();
    }

    pub fn iteration(&self) -> usize {
        self.iteration
    }

    pub fn n_critic(&self) -> usize {
        self.n_critic
    }

    pub fn strategy(&self) -> &LossStrategy {
        &self.strategy
    }
}
