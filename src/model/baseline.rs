//! Non-progressive DCGAN pair at a fixed 64x64 resolution.
//!
//! Trained by the same step as the progressive networks; it has one stage and
//! ignores fade-in.

use burn::{
    module::Module,
    nn::{
        conv::{Conv2d, Conv2dConfig, ConvTranspose2d, ConvTranspose2dConfig},
        BatchNorm, BatchNormConfig, Initializer, LeakyRelu, LeakyReluConfig, PaddingConfig2d,
        Relu,
    },
    prelude::*,
};

use crate::error::{ProGanError, Result};
use crate::model::{GanCritic, GanGenerator, Growth};

pub const BASELINE_RESOLUTION: usize = 64;

const INITIALIZER: Initializer = Initializer::Normal {
    mean: 0.0,
    std: 0.02,
};

#[derive(Module, Debug)]
pub struct DeconvBlock<B: Backend> {
    deconv: ConvTranspose2d<B>,
    bn: BatchNorm<B, 2>,
    relu: Relu,
}

impl<B: Backend> DeconvBlock<B> {
    /// Kernel 4; stride 1 without padding maps 1x1 to 4x4, stride 2 with
    /// padding 1 doubles the resolution.
    pub fn new(channels: [usize; 2], stride: usize, device: &B::Device) -> Self {
        let padding = if stride == 1 { 0 } else { 1 };
        let deconv = ConvTranspose2dConfig::new(channels, [4, 4])
            .with_stride([stride, stride])
            .with_padding([padding, padding])
            .with_initializer(INITIALIZER)
            .init(device);
        let bn = BatchNormConfig::new(channels[1]).init(device);

        Self {
            deconv,
            bn,
            relu: Relu::new(),
        }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.deconv.forward(input);
        let output = self.bn.forward(output);
        self.relu.forward(output)
    }
}

#[derive(Module, Debug)]
pub struct DiscBlock<B: Backend> {
    conv: Conv2d<B>,
    bn: Option<BatchNorm<B, 2>>,
    lrelu: LeakyRelu,
}

impl<B: Backend> DiscBlock<B> {
    /// Kernel 4, stride 2, padding 1: halves the resolution.
    pub fn new(channels: [usize; 2], batch_norm: bool, device: &B::Device) -> Self {
        let conv = Conv2dConfig::new(channels, [4, 4])
            .with_stride([2, 2])
            .with_padding(PaddingConfig2d::Explicit(1, 1))
            .with_initializer(INITIALIZER)
            .init(device);
        let bn = batch_norm.then(|| BatchNormConfig::new(channels[1]).init(device));
        let lrelu = LeakyReluConfig::new().with_negative_slope(0.2).init();

        Self { conv, bn, lrelu }
    }

    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let output = self.conv.forward(input);
        let output = match &self.bn {
            Some(bn) => bn.forward(output),
            None => output,
        };
        self.lrelu.forward(output)
    }
}

#[derive(Module, Debug)]
pub struct BaselineGenerator<B: Backend> {
    layer_1: DeconvBlock<B>,
    layer_2: DeconvBlock<B>,
    layer_3: DeconvBlock<B>,
    layer_4: DeconvBlock<B>,
    out_layer: ConvTranspose2d<B>,
    latent_dim: usize,
}

impl<B: Backend> BaselineGenerator<B> {
    pub fn forward(&self, noise: Tensor<B, 2>) -> Tensor<B, 4> {
        let [batch_size, latent_dim] = noise.dims();
        let output = noise.reshape([batch_size, latent_dim, 1, 1]);

        let output = self.layer_1.forward(output); // 4x4
        let output = self.layer_2.forward(output); // 8x8
        let output = self.layer_3.forward(output); // 16x16
        let output = self.layer_4.forward(output); // 32x32
        let output = self.out_layer.forward(output); // 64x64

        burn::tensor::activation::tanh(output)
    }
}

#[derive(Module, Debug)]
pub struct BaselineDiscriminator<B: Backend> {
    disc_layer_1: DiscBlock<B>,
    disc_layer_2: DiscBlock<B>,
    disc_layer_3: DiscBlock<B>,
    disc_layer_4: DiscBlock<B>,
    out_layer: Conv2d<B>,
}

impl<B: Backend> BaselineDiscriminator<B> {
    pub fn forward(&self, images: Tensor<B, 4>) -> Tensor<B, 2> {
        let output = self.disc_layer_1.forward(images); // 32x32
        let output = self.disc_layer_2.forward(output); // 16x16
        let output = self.disc_layer_3.forward(output); // 8x8
        let output = self.disc_layer_4.forward(output); // 4x4

        // 4x4 valid convolution -> one logit per image
        self.out_layer.forward(output).flatten::<2>(1, 3)
    }
}

impl<B: Backend> GanGenerator<B> for BaselineGenerator<B> {
    fn latent_dim(&self) -> usize {
        self.latent_dim
    }

    fn num_stages(&self) -> usize {
        1
    }

    fn resolution(&self, _stage: usize) -> usize {
        BASELINE_RESOLUTION
    }

    fn generate(&self, noise: Tensor<B, 2>, _growth: Growth) -> Tensor<B, 4> {
        self.forward(noise)
    }
}

impl<B: Backend> GanCritic<B> for BaselineDiscriminator<B> {
    fn critique(&self, images: Tensor<B, 4>, _growth: Growth) -> Tensor<B, 2> {
        self.forward(images)
    }
}

#[derive(Config, Debug)]
pub struct BaselineConfig {
    #[config(default = 128)]
    pub latent_dim: usize,
    #[config(default = 64)]
    pub g_channels: usize,
    #[config(default = 64)]
    pub d_channels: usize,
}

impl BaselineConfig {
    fn validate(&self) -> Result<()> {
        if self.latent_dim == 0 || self.g_channels == 0 || self.d_channels == 0 {
            return Err(ProGanError::InvalidConfig(
                "baseline latent_dim, g_channels and d_channels must be > 0".into(),
            ));
        }
        Ok(())
    }

    pub fn init_generator<B: Backend>(&self, device: &B::Device) -> Result<BaselineGenerator<B>> {
        self.validate()?;
        let channels = self.g_channels;

        Ok(BaselineGenerator {
            layer_1: DeconvBlock::new([self.latent_dim, channels * 8], 1, device),
            layer_2: DeconvBlock::new([channels * 8, channels * 4], 2, device),
            layer_3: DeconvBlock::new([channels * 4, channels * 2], 2, device),
            layer_4: DeconvBlock::new([channels * 2, channels], 2, device),
            out_layer: ConvTranspose2dConfig::new([channels, 3], [4, 4])
                .with_stride([2, 2])
                .with_padding([1, 1])
                .with_initializer(INITIALIZER)
                .init(device),
            latent_dim: self.latent_dim,
        })
    }

    pub fn init_discriminator<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Result<BaselineDiscriminator<B>> {
        self.validate()?;
        let channels = self.d_channels;

        Ok(BaselineDiscriminator {
            disc_layer_1: DiscBlock::new([3, channels], false, device),
            disc_layer_2: DiscBlock::new([channels, channels * 2], true, device),
            disc_layer_3: DiscBlock::new([channels * 2, channels * 4], true, device),
            disc_layer_4: DiscBlock::new([channels * 4, channels * 8], true, device),
            out_layer: Conv2dConfig::new([channels * 8, 1], [4, 4])
                .with_initializer(INITIALIZER)
                .init(device),
        })
    }
}
