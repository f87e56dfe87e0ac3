use burn::{
    module::{ModuleMapper, ParamId},
    nn::loss::{BinaryCrossEntropyLossConfig, MseLoss, Reduction},
    prelude::*,
    tensor::{backend::AutodiffBackend, Distribution},
};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Weight of the gradient penalty in the critic loss.
pub const GRADIENT_PENALTY_WEIGHT: f32 = 10.0;
/// Bound of the critic weights under plain Wasserstein training.
pub const WEIGHT_CLIP: f32 = 0.01;

// central-difference step along the normalised input gradient
const PENALTY_DIFF_STEP: f32 = 1e-2;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum GanType {
    #[serde(rename = "original")]
    Original,
    #[serde(rename = "least_square")]
    LeastSquare,
    #[serde(rename = "wasserstein")]
    Wasserstein,
    #[serde(rename = "wasserstein-GP")]
    WassersteinGp,
}

impl GanType {
    pub fn as_str(&self) -> &'static str {
        match self {
            GanType::Original => "original",
            GanType::LeastSquare => "least_square",
            GanType::Wasserstein => "wasserstein",
            GanType::WassersteinGp => "wasserstein-GP",
        }
    }

    /// Critic updates per generator update.
    pub fn default_n_critic(&self) -> usize {
        match self {
            GanType::Original | GanType::LeastSquare => 1,
            GanType::Wasserstein | GanType::WassersteinGp => 5,
        }
    }

    pub fn default_optimizer(&self) -> OptimizerSettings {
        match self {
            GanType::Original | GanType::LeastSquare => OptimizerSettings::Adam {
                learning_rate: 2e-4,
                beta_1: 0.5,
                beta_2: 0.999,
            },
            GanType::Wasserstein => OptimizerSettings::RmsProp {
                learning_rate: 5e-5,
            },
            GanType::WassersteinGp => OptimizerSettings::Adam {
                learning_rate: 1e-4,
                beta_1: 0.0,
                beta_2: 0.9,
            },
        }
    }
}

impl fmt::Display for GanType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for GanType {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "original" => Ok(GanType::Original),
            "least_square" => Ok(GanType::LeastSquare),
            "wasserstein" => Ok(GanType::Wasserstein),
            "wasserstein-GP" => Ok(GanType::WassersteinGp),
            other => Err(format!(
                "unknown gan type `{other}`, expected original, least_square, wasserstein or wasserstein-GP"
            )),
        }
    }
}

/// Optimizer family and hyper-parameters for both networks.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum OptimizerSettings {
    Adam {
        learning_rate: f64,
        beta_1: f32,
        beta_2: f32,
    },
    RmsProp {
        learning_rate: f64,
    },
}

impl OptimizerSettings {
    pub fn learning_rate(&self) -> f64 {
        match self {
            OptimizerSettings::Adam { learning_rate, .. }
            | OptimizerSettings::RmsProp { learning_rate } => *learning_rate,
        }
    }

    pub fn with_learning_rate(self, learning_rate: f64) -> Self {
        match self {
            OptimizerSettings::Adam { beta_1, beta_2, .. } => OptimizerSettings::Adam {
                learning_rate,
                beta_1,
                beta_2,
            },
            OptimizerSettings::RmsProp { .. } => OptimizerSettings::RmsProp { learning_rate },
        }
    }
}

/// Labels, loss function and critic regularisation of one GAN variant,
/// resolved once from its [`GanType`].
#[derive(Clone, Debug, PartialEq)]
pub struct LossStrategy {
    pub gan_type: GanType,
    pub real_label: f32,
    pub fake_label: f32,
    /// Target the generator pushes its samples' scores towards.
    pub gen_label: f32,
    pub weight_clip: Option<f32>,
    pub gradient_penalty: Option<f32>,
}

impl LossStrategy {
    pub fn new(gan_type: GanType) -> Self {
        let (real_label, fake_label) = match gan_type {
            GanType::Original | GanType::LeastSquare => (0.0, 1.0),
            GanType::Wasserstein | GanType::WassersteinGp => (-1.0, 1.0),
        };

        Self {
            gan_type,
            real_label,
            fake_label,
            gen_label: real_label,
            weight_clip: (gan_type == GanType::Wasserstein).then_some(WEIGHT_CLIP),
            gradient_penalty: (gan_type == GanType::WassersteinGp)
                .then_some(GRADIENT_PENALTY_WEIGHT),
        }
    }

    /// Mean loss of `[batch, 1]` critic outputs against a constant label.
    pub fn loss<B: Backend>(&self, predictions: Tensor<B, 2>, label: f32) -> Tensor<B, 1> {
        let device = predictions.device();

        match self.gan_type {
            GanType::Original => {
                let targets = Tensor::<B, 2, Int>::full(predictions.dims(), label as i32, &device);
                BinaryCrossEntropyLossConfig::new()
                    .with_logits(true)
                    .init(&device)
                    .forward(predictions, targets)
            }
            GanType::LeastSquare => {
                let targets = Tensor::<B, 2>::full(predictions.dims(), label, &device);
                MseLoss::new().forward(predictions, targets, Reduction::Mean)
            }
            GanType::Wasserstein | GanType::WassersteinGp => {
                predictions.mul_scalar(label).mean()
            }
        }
    }
}

/// Penalises critic input-gradient norms that deviate from 1 along random
/// interpolations between real and fake samples.
///
/// The input gradient is taken with a first backward pass; the differentiable
/// norm is then the critic's central-difference slope along that (detached,
/// normalised) gradient direction, so parameter gradients only need
/// first-order autodiff.
pub fn gradient_penalty<B, F>(critic: F, real: Tensor<B, 4>, fake: Tensor<B, 4>) -> Tensor<B, 1>
where
    B: AutodiffBackend,
    F: Fn(Tensor<B, 4>) -> Tensor<B, 2>,
{
    let [batch_size, channels, height, width] = real.dims();
    let device = real.device();

    let coeff = Tensor::<B, 4>::random([batch_size, 1, 1, 1], Distribution::Uniform(0.0, 1.0), &device);
    let interp = (real * coeff.clone() + fake * coeff.neg().add_scalar(1.0)).detach();

    let tracked = interp.clone().require_grad();
    let grads = critic(tracked.clone()).sum().backward();
    let gradient = tracked
        .grad(&grads)
        .unwrap_or_else(|| interp.clone().inner().zeros_like());

    let norm = gradient
        .clone()
        .reshape([batch_size, channels * height * width])
        .powf_scalar(2.0)
        .sum_dim(1)
        .sqrt()
        .reshape([batch_size, 1, 1, 1]);
    let direction = gradient / norm.add_scalar(1e-12);
    let step = Tensor::<B, 4>::from_inner(direction).mul_scalar(PENALTY_DIFF_STEP);

    let slope = (critic(interp.clone() + step.clone()) - critic(interp - step))
        .div_scalar(2.0 * PENALTY_DIFF_STEP);

    slope.sub_scalar(1.0).powf_scalar(2.0).mean()
}

/// Module mapper clamping the conv kernels and dense weights of a module into
/// `[min, max]`. Rank-1 tensors (biases, batch norm scale, shift and running
/// statistics) pass through untouched.
#[derive(Clone, Debug)]
pub struct WeightClip {
    pub min: f32,
    pub max: f32,
}

impl WeightClip {
    pub fn symmetric(bound: f32) -> Self {
        Self {
            min: -bound,
            max: bound,
        }
    }
}

impl<B: AutodiffBackend> ModuleMapper<B> for WeightClip {
    fn map_float<const D: usize>(&mut self, _id: ParamId, tensor: Tensor<B, D>) -> Tensor<B, D> {
        if D < 2 {
            return tensor;
        }

        let is_require_grad = tensor.is_require_grad();

        let mut tensor = Tensor::from_inner(tensor.inner().clamp(self.min, self.max));

        if is_require_grad {
            tensor = tensor.require_grad();
        }
        tensor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        model::baseline::BaselineConfig,
        utils::{parameter_stats, weight_stats},
        TestAutodiffBackend,
    };

    type B = TestAutodiffBackend;

    /// Linear critic `x -> <x, w>` whose input gradient is `w` everywhere.
    fn linear_critic(
        norm: f32,
        size: usize,
        device: &<B as Backend>::Device,
    ) -> impl Fn(Tensor<B, 4>) -> Tensor<B, 2> {
        let weight = Tensor::<B, 2>::full([size, 1], norm / (size as f32).sqrt(), device);

        move |images: Tensor<B, 4>| images.flatten::<2>(1, 3).matmul(weight.clone())
    }

    #[test]
    fn test_labels_per_variant() {
        let original = LossStrategy::new(GanType::Original);
        assert_eq!((original.real_label, original.fake_label, original.gen_label), (0.0, 1.0, 0.0));
        assert_eq!(original.weight_clip, None);
        assert_eq!(original.gradient_penalty, None);

        let wasserstein = LossStrategy::new(GanType::Wasserstein);
        assert_eq!(
            (wasserstein.real_label, wasserstein.fake_label, wasserstein.gen_label),
            (-1.0, 1.0, -1.0)
        );
        assert_eq!(wasserstein.weight_clip, Some(0.01));
        assert_eq!(wasserstein.gradient_penalty, None);

        let gp = LossStrategy::new(GanType::WassersteinGp);
        assert_eq!(gp.weight_clip, None);
        assert_eq!(gp.gradient_penalty, Some(10.0));
    }

    #[test]
    fn test_loss_values() {
        let device = Default::default();
        let predictions = Tensor::<B, 2>::from_floats([[2.0], [-1.0]], &device);

        let wasserstein = LossStrategy::new(GanType::Wasserstein);
        let value = wasserstein.loss(predictions.clone(), -1.0).into_scalar();
        assert!((value + 0.5).abs() < 1e-6);

        let least_square = LossStrategy::new(GanType::LeastSquare);
        // ((2 - 1)^2 + (-1 - 1)^2) / 2
        let value = least_square.loss(predictions.clone(), 1.0).into_scalar();
        assert!((value - 2.5).abs() < 1e-6);

        let original = LossStrategy::new(GanType::Original);
        let zeros = Tensor::<B, 2>::zeros([2, 1], &device);
        // BCE of logit 0 is ln 2 for either label
        let value = original.loss(zeros, 1.0).into_scalar();
        assert!((value - std::f32::consts::LN_2).abs() < 1e-5);
    }

    #[test]
    fn test_gan_type_names_round_trip() {
        for gan_type in [
            GanType::Original,
            GanType::LeastSquare,
            GanType::Wasserstein,
            GanType::WassersteinGp,
        ] {
            assert_eq!(gan_type.as_str().parse::<GanType>(), Ok(gan_type));
        }
        assert!("wgan".parse::<GanType>().is_err());
        assert_eq!(GanType::WassersteinGp.default_n_critic(), 5);
        assert_eq!(GanType::Original.default_n_critic(), 1);
    }

    #[test]
    fn test_gradient_penalty_vanishes_at_unit_norm() {
        let device = Default::default();
        let real = Tensor::<B, 4>::random([4, 3, 4, 4], Distribution::Uniform(-1.0, 1.0), &device);
        let fake = Tensor::<B, 4>::random([4, 3, 4, 4], Distribution::Uniform(-1.0, 1.0), &device);

        let penalty = gradient_penalty(linear_critic(1.0, 48, &device), real, fake).into_scalar();

        assert!(penalty >= 0.0);
        assert!(penalty < 1e-3, "penalty {penalty}");
    }

    #[test]
    fn test_gradient_penalty_grows_away_from_unit_norm() {
        let device = Default::default();
        let real = Tensor::<B, 4>::random([4, 3, 4, 4], Distribution::Uniform(-1.0, 1.0), &device);
        let fake = Tensor::<B, 4>::random([4, 3, 4, 4], Distribution::Uniform(-1.0, 1.0), &device);

        let near = gradient_penalty(linear_critic(1.5, 48, &device), real.clone(), fake.clone())
            .into_scalar();
        let far = gradient_penalty(linear_critic(3.0, 48, &device), real, fake).into_scalar();

        // (1.5 - 1)^2 and (3 - 1)^2
        assert!((near - 0.25).abs() < 1e-2, "near {near}");
        assert!((far - 4.0).abs() < 5e-2, "far {far}");
        assert!(near < far);
    }

    #[test]
    fn test_weight_clip_bounds_values() {
        let device = Default::default();
        let tensor = Tensor::<B, 2>::from_floats([[-0.5, 0.005], [0.02, -0.001]], &device).require_grad();

        let mut clip = WeightClip::symmetric(0.01);
        let clipped = ModuleMapper::<B>::map_float(&mut clip, ParamId::new(), tensor);

        assert!(clipped.is_require_grad());
        assert_eq!(
            clipped.into_data().to_vec::<f32>().unwrap(),
            vec![-0.01, 0.005, 0.01, -0.001]
        );
    }

    #[test]
    fn test_weight_clip_skips_vectors() {
        let device = Default::default();
        let tensor = Tensor::<B, 1>::from_floats([-0.5, 2.0], &device).require_grad();

        let mut clip = WeightClip::symmetric(0.01);
        let mapped = ModuleMapper::<B>::map_float(&mut clip, ParamId::new(), tensor);

        assert!(mapped.is_require_grad());
        assert_eq!(mapped.into_data().to_vec::<f32>().unwrap(), vec![-0.5, 2.0]);
    }

    #[test]
    fn test_weight_clip_keeps_batch_norm_state() {
        let device = Default::default();
        let discriminator = BaselineConfig::new()
            .with_d_channels(4)
            .init_discriminator::<B>(&device)
            .unwrap();

        let clipped = discriminator.map(&mut WeightClip::symmetric(0.01));

        // batch norm gamma and running variance start at 1
        assert!(weight_stats(&clipped).max_abs <= 0.01);
        assert!(parameter_stats(&clipped).max_abs >= 1.0);
    }
}
