use burn::{
    module::Module,
    nn::{LeakyRelu, LeakyReluConfig},
    prelude::*,
};

use crate::error::{ProGanError, Result};
use crate::model::{
    layers::{
        EqualizedConv2d, EqualizedConv2dConfig, EqualizedLinear, EqualizedLinearConfig,
        LATENT_PROJECTION_GAIN,
    },
    ops::{fade_in, pixel_norm, upsample},
    Growth,
};

/// Stage 0: latent vector to the smallest feature map.
#[derive(Module, Debug)]
pub struct GeneratorRoot<B: Backend> {
    dense: EqualizedLinear<B>,
    conv: EqualizedConv2d<B>,
    to_rgb: EqualizedConv2d<B>,
    lrelu: LeakyRelu,
    latent_dim: usize,
    resolution: usize,
}

impl<B: Backend> GeneratorRoot<B> {
    pub fn forward(&self, noise: Tensor<B, 2>) -> Tensor<B, 4> {
        let [batch_size, _] = noise.dims();

        let x = pixel_norm(self.lrelu.forward(self.dense.forward(noise)));
        let x = x.reshape([batch_size, self.latent_dim, self.resolution, self.resolution]);

        pixel_norm(self.lrelu.forward(self.conv.forward(x)))
    }
}

/// Stage k > 0: doubles the resolution of the previous stage's features.
#[derive(Module, Debug)]
pub struct GeneratorStage<B: Backend> {
    conv1: EqualizedConv2d<B>,
    conv2: EqualizedConv2d<B>,
    to_rgb: EqualizedConv2d<B>,
    lrelu: LeakyRelu,
}

impl<B: Backend> GeneratorStage<B> {
    pub fn forward(&self, previous: Tensor<B, 4>) -> Tensor<B, 4> {
        let x = upsample(previous);
        let x = pixel_norm(self.lrelu.forward(self.conv1.forward(x)));

        pixel_norm(self.lrelu.forward(self.conv2.forward(x)))
    }
}

#[derive(Clone, Debug)]
pub struct GeneratorOutput<B: Backend> {
    pub features: Tensor<B, 4>,
    pub rgb: Tensor<B, 4>,
}

/// Progressive generator: a root stage followed by upsampling stages,
/// coarsest first.
#[derive(Module, Debug)]
pub struct Generator<B: Backend> {
    root: GeneratorRoot<B>,
    stages: Vec<GeneratorStage<B>>,
    base_resolution: usize,
}

impl<B: Backend> Generator<B> {
    /// Runs stages `0..=growth.stage` and returns the last stage's features and
    /// image. With `growth.alpha` set, the image is blended with the upsampled
    /// image of the stage before it.
    ///
    /// # Panics
    /// If `growth.stage >= self.num_stages()`.
    pub fn forward(&self, noise: Tensor<B, 2>, growth: Growth) -> GeneratorOutput<B> {
        let stage = growth.stage;
        let root = self.root.forward(noise);

        let (features, previous) = self.stages[..stage]
            .iter()
            .fold((root, None), |(x, _), block| (block.forward(x.clone()), Some(x)));

        let rgb = self.to_rgb(stage, features.clone());
        let rgb = match (growth.alpha, previous) {
            (Some(alpha), Some(previous)) => {
                let previous_rgb = upsample(self.to_rgb(stage - 1, previous));
                fade_in(alpha, previous_rgb, rgb)
            }
            _ => rgb,
        };

        GeneratorOutput { features, rgb }
    }

    fn to_rgb(&self, stage: usize, features: Tensor<B, 4>) -> Tensor<B, 4> {
        match stage {
            0 => self.root.to_rgb.forward(features),
            _ => self.stages[stage - 1].to_rgb.forward(features),
        }
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len() + 1
    }

    pub fn resolution(&self, stage: usize) -> usize {
        self.base_resolution << stage
    }

    pub fn latent_dim(&self) -> usize {
        self.root.latent_dim
    }
}

#[derive(Config, Debug)]
pub struct GeneratorConfig {
    pub latent_dim: usize,
    /// Feature width of every stage, coarsest first.
    pub channels: Vec<usize>,
    #[config(default = 4)]
    pub base_resolution: usize,
}

impl GeneratorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Generator<B>> {
        let Some(&root_channels) = self.channels.first() else {
            return Err(ProGanError::InvalidConfig(
                "generator needs at least one stage".into(),
            ));
        };
        let lrelu = LeakyReluConfig::new().with_negative_slope(0.2).init();
        let side = self.base_resolution;

        let root = GeneratorRoot {
            dense: EqualizedLinearConfig::new(self.latent_dim, self.latent_dim * side * side)
                .with_gain(LATENT_PROJECTION_GAIN)
                .init(device)?,
            conv: EqualizedConv2dConfig::new([self.latent_dim, root_channels], 3).init(device)?,
            to_rgb: EqualizedConv2dConfig::new([root_channels, 3], 1).init(device)?,
            lrelu: lrelu.clone(),
            latent_dim: self.latent_dim,
            resolution: side,
        };

        let stages = self
            .channels
            .windows(2)
            .map(|pair| {
                let [previous, current] = [pair[0], pair[1]];
                Ok(GeneratorStage {
                    conv1: EqualizedConv2dConfig::new([previous, current], 3).init(device)?,
                    conv2: EqualizedConv2dConfig::new([current, current], 3).init(device)?,
                    to_rgb: EqualizedConv2dConfig::new([current, 3], 1).init(device)?,
                    lrelu: lrelu.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Generator {
            root,
            stages,
            base_resolution: side,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assert_close, TestAutodiffBackend, TestBackend};
    use burn::tensor::Distribution;

    fn generator(device: &<TestBackend as Backend>::Device) -> Generator<TestBackend> {
        GeneratorConfig::new(8, vec![16, 8, 4])
            .init::<TestBackend>(device)
            .unwrap()
    }

    #[test]
    fn test_stage_resolution_doubles() {
        let device = Default::default();
        let generator = generator(&device);
        assert_eq!(generator.num_stages(), 3);

        for stage in 0..generator.num_stages() {
            let noise = Tensor::<TestBackend, 2>::random([2, 8], Distribution::Normal(0.0, 1.0), &device);
            let output = generator.forward(noise, Growth::stable(stage));
            let side = 4 << stage;

            assert_eq!(output.rgb.dims(), [2, 3, side, side]);
            let [_, _, height, width] = output.features.dims();
            assert_eq!([height, width], [side, side]);
            assert_eq!(generator.resolution(stage), side);
        }
    }

    #[test]
    fn test_root_features_are_pixel_normalised() {
        let device = Default::default();
        let generator = generator(&device);
        let noise = Tensor::<TestBackend, 2>::random([2, 8], Distribution::Normal(0.0, 1.0), &device);

        let features = generator.forward(noise, Growth::stable(0)).features;
        assert_eq!(features.dims(), [2, 16, 4, 4]);

        let mean_square = features
            .powf_scalar(2.0)
            .mean_dim(1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        // leaky-ReLU of an all-zero activation can leave a zero vector; all others are unit
        assert!(mean_square.iter().all(|v| *v < 1.0 + 1e-3));
    }

    #[test]
    fn test_fade_endpoints() {
        let device = Default::default();
        let generator = generator(&device);
        let noise = Tensor::<TestBackend, 2>::random([2, 8], Distribution::Normal(0.0, 1.0), &device);

        let stable = generator.forward(noise.clone(), Growth::stable(2)).rgb;
        let faded_in = generator.forward(noise.clone(), Growth::fading(2, 1.0)).rgb;
        let previous = generator.forward(noise.clone(), Growth::stable(1)).rgb;
        let faded_out = generator.forward(noise, Growth::fading(2, 0.0)).rgb;

        assert_close(
            &faded_in.into_data().to_vec::<f32>().unwrap(),
            &stable.into_data().to_vec::<f32>().unwrap(),
            1e-5,
        );
        assert_close(
            &faded_out.into_data().to_vec::<f32>().unwrap(),
            &upsample(previous).into_data().to_vec::<f32>().unwrap(),
            1e-5,
        );
    }

    #[test]
    fn test_alpha_is_ignored_at_root() {
        let device = Default::default();
        let generator = generator(&device);
        let noise = Tensor::<TestBackend, 2>::random([1, 8], Distribution::Normal(0.0, 1.0), &device);

        let stable = generator.forward(noise.clone(), Growth::stable(0)).rgb;
        let faded = generator.forward(noise, Growth::fading(0, 0.5)).rgb;

        assert_eq!(
            stable.into_data().to_vec::<f32>().unwrap(),
            faded.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_fading_stage_backward() {
        let device = Default::default();
        let generator = GeneratorConfig::new(8, vec![16, 8, 4])
            .init::<TestAutodiffBackend>(&device)
            .unwrap();
        let noise =
            Tensor::<TestAutodiffBackend, 2>::random([2, 8], Distribution::Normal(0.0, 1.0), &device)
                .require_grad();

        let rgb = generator.forward(noise.clone(), Growth::fading(1, 0.5)).rgb;
        assert_eq!(rgb.dims(), [2, 3, 8, 8]);

        let grads = rgb.sum().backward();
        let grad = noise.grad(&grads).unwrap();

        assert_eq!(grad.dims(), [2, 8]);
        assert!(grad
            .into_data()
            .to_vec::<f32>()
            .unwrap()
            .iter()
            .all(|v| v.is_finite()));
    }

    #[test]
    fn test_empty_channel_table_is_rejected() {
        let device = Default::default();
        let result = GeneratorConfig::new(8, vec![]).init::<TestBackend>(&device);
        assert!(matches!(result, Err(ProGanError::InvalidConfig(_))));
    }
}
