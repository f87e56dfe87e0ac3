use burn::{
    module::Module,
    nn::{LeakyRelu, LeakyReluConfig},
    prelude::*,
};

use crate::error::{ProGanError, Result};
use crate::model::{
    layers::{EqualizedConv2d, EqualizedConv2dConfig, EqualizedLinear, EqualizedLinearConfig},
    ops::{downsample, fade_in, minibatch_stddev},
    Growth,
};

/// Stage 0: collapses the smallest feature map to one critic score.
#[derive(Module, Debug)]
pub struct DiscriminatorTerminal<B: Backend> {
    from_rgb: EqualizedConv2d<B>,
    conv: EqualizedConv2d<B>,
    dense: EqualizedLinear<B>,
    out: EqualizedLinear<B>,
    lrelu: LeakyRelu,
}

impl<B: Backend> DiscriminatorTerminal<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 2> {
        let output = minibatch_stddev(input);
        let output = self.lrelu.forward(self.conv.forward(output));

        let output = output.flatten::<2>(1, 3);
        let output = self.lrelu.forward(self.dense.forward(output));

        self.out.forward(output)
    }
}

/// Stage k > 0: two convolutions then a 2x average-pool downsample.
#[derive(Module, Debug)]
pub struct DiscriminatorStage<B: Backend> {
    from_rgb: EqualizedConv2d<B>,
    conv1: EqualizedConv2d<B>,
    conv2: EqualizedConv2d<B>,
    lrelu: LeakyRelu,
}

impl<B: Backend> DiscriminatorStage<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.lrelu.forward(self.conv1.forward(input));
        let output = self.lrelu.forward(self.conv2.forward(output));

        downsample(output, 2)
    }
}

/// Progressive critic, stages stored coarsest first and evaluated from the
/// entry stage down to the terminal one.
#[derive(Module, Debug)]
pub struct Discriminator<B: Backend> {
    terminal: DiscriminatorTerminal<B>,
    stages: Vec<DiscriminatorStage<B>>,
    lrelu: LeakyRelu,
    base_resolution: usize,
}

impl<B: Backend> Discriminator<B> {
    /// Scores RGB images of the resolution of `growth.stage`.
    ///
    /// With `growth.alpha` set, the entry stage's output is blended with the
    /// downsampled input routed through the next coarser stage's `from_rgb`.
    ///
    /// # Panics
    /// If `growth.stage >= self.num_stages()`.
    pub fn forward(&self, images: Tensor<B, 4>, growth: Growth) -> Tensor<B, 2> {
        let stage = growth.stage;
        let mut x = self.lrelu.forward(self.from_rgb(stage, images.clone()));

        if stage > 0 {
            x = self.stages[stage - 1].forward(x);

            if let Some(alpha) = growth.alpha {
                let skip = self.from_rgb(stage - 1, downsample(images, 2));
                x = fade_in(alpha, self.lrelu.forward(skip), x);
            }
        }

        let x = self.stages[..stage.saturating_sub(1)]
            .iter()
            .rev()
            .fold(x, |x, block| block.forward(x));

        self.terminal.forward(x)
    }

    fn from_rgb(&self, stage: usize, images: Tensor<B, 4>) -> Tensor<B, 4> {
        match stage {
            0 => self.terminal.from_rgb.forward(images),
            _ => self.stages[stage - 1].from_rgb.forward(images),
        }
    }

    pub fn num_stages(&self) -> usize {
        self.stages.len() + 1
    }

    pub fn resolution(&self, stage: usize) -> usize {
        self.base_resolution << stage
    }
}

#[derive(Config, Debug)]
pub struct DiscriminatorConfig {
    /// Entry width of every stage, coarsest first.
    pub channels: Vec<usize>,
    pub max_channels: usize,
    #[config(default = 4)]
    pub base_resolution: usize,
}

impl DiscriminatorConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Discriminator<B>> {
        let Some(&terminal_channels) = self.channels.first() else {
            return Err(ProGanError::InvalidConfig(
                "discriminator needs at least one stage".into(),
            ));
        };
        let lrelu = LeakyReluConfig::new().with_negative_slope(0.2).init();
        let side = self.base_resolution;
        let wide = (terminal_channels * 2).min(self.max_channels);

        let terminal = DiscriminatorTerminal {
            from_rgb: EqualizedConv2dConfig::new([3, terminal_channels], 1).init(device)?,
            // +1 for the minibatch standard deviation channel
            conv: EqualizedConv2dConfig::new([terminal_channels + 1, wide], 3).init(device)?,
            dense: EqualizedLinearConfig::new(wide * side * side, wide).init(device)?,
            out: EqualizedLinearConfig::new(wide, 1)
                .with_gain(1.0)
                .init(device)?,
            lrelu: lrelu.clone(),
        };

        // stage k feeds stage k - 1, so its second conv widens to that stage's entry width
        let stages = self
            .channels
            .windows(2)
            .map(|pair| {
                let [coarser, current] = [pair[0], pair[1]];
                Ok(DiscriminatorStage {
                    from_rgb: EqualizedConv2dConfig::new([3, current], 1).init(device)?,
                    conv1: EqualizedConv2dConfig::new([current, current], 3).init(device)?,
                    conv2: EqualizedConv2dConfig::new([current, coarser], 3).init(device)?,
                    lrelu: lrelu.clone(),
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Discriminator {
            terminal,
            stages,
            lrelu,
            base_resolution: side,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assert_close, TestBackend};
    use burn::tensor::Distribution;

    fn discriminator(device: &<TestBackend as Backend>::Device) -> Discriminator<TestBackend> {
        DiscriminatorConfig::new(vec![16, 8, 4], 16)
            .init::<TestBackend>(device)
            .unwrap()
    }

    fn images(side: usize, device: &<TestBackend as Backend>::Device) -> Tensor<TestBackend, 4> {
        Tensor::random([3, 3, side, side], Distribution::Uniform(-1.0, 1.0), device)
    }

    #[test]
    fn test_every_stage_scores_its_resolution() {
        let device = Default::default();
        let discriminator = discriminator(&device);
        assert_eq!(discriminator.num_stages(), 3);

        for stage in 0..discriminator.num_stages() {
            let side = discriminator.resolution(stage);
            let scores = discriminator.forward(images(side, &device), Growth::stable(stage));
            assert_eq!(scores.dims(), [3, 1]);

            let faded = discriminator.forward(images(side, &device), Growth::fading(stage, 0.5));
            assert_eq!(faded.dims(), [3, 1]);
        }
    }

    #[test]
    fn test_fade_endpoints() {
        let device = Default::default();
        let discriminator = discriminator(&device);
        let input = images(16, &device);

        let stable = discriminator.forward(input.clone(), Growth::stable(2));
        let faded_in = discriminator.forward(input.clone(), Growth::fading(2, 1.0));
        let coarse = discriminator.forward(downsample(input.clone(), 2), Growth::stable(1));
        let faded_out = discriminator.forward(input, Growth::fading(2, 0.0));

        assert_close(
            &faded_in.into_data().to_vec::<f32>().unwrap(),
            &stable.into_data().to_vec::<f32>().unwrap(),
            1e-4,
        );
        assert_close(
            &faded_out.into_data().to_vec::<f32>().unwrap(),
            &coarse.into_data().to_vec::<f32>().unwrap(),
            1e-4,
        );
    }

    #[test]
    fn test_terminal_uses_unit_gain() {
        let device = Default::default();
        let discriminator = discriminator(&device);

        // wide = min(2 * 16, 16) = 16 -> out layer fan-in 16, gain 1
        assert!((discriminator.terminal.out.weight_scale() - 0.25).abs() < 1e-6);
        assert!((discriminator.terminal.dense.weight_scale() - (2.0f32 / 256.0).sqrt()).abs() < 1e-6);
    }
}
