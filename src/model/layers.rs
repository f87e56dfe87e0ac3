use burn::{
    module::Param,
    prelude::*,
    tensor::{module::conv2d, ops::ConvOptions, Distribution},
};
use std::f32::consts::SQRT_2;

use crate::error::{ProGanError, Result};

// ////////////////////////////////////////////////////////////////////////////
// Equalized learning rate

/// Runtime weight scale `gain / sqrt(fan_in)` of an equalized layer.
///
/// `fan_in` is the product of every weight dimension except `output_axis`.
/// The scale is fixed when the layer is built and only read afterwards.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct WeightScale(f32);

impl WeightScale {
    pub fn new(shape: &[usize], output_axis: usize, gain: f32) -> Result<Self> {
        let fan_in: usize = shape
            .iter()
            .enumerate()
            .filter(|(axis, _)| *axis != output_axis)
            .map(|(_, dim)| *dim)
            .product();

        if fan_in == 0 || output_axis >= shape.len() {
            return Err(ProGanError::ZeroFanIn {
                shape: shape.to_vec(),
            });
        }

        Ok(Self(gain / (fan_in as f32).sqrt()))
    }

    pub fn value(&self) -> f32 {
        self.0
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Conv2d

#[derive(Config, Debug)]
pub struct EqualizedConv2dConfig {
    pub channels: [usize; 2],
    pub kernel_size: usize,
    #[config(default = "std::f32::consts::SQRT_2")]
    pub gain: f32,
}

impl EqualizedConv2dConfig {
    /// Weights are drawn from N(0, 1); the scale carries the He constant.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<EqualizedConv2d<B>> {
        let [in_channels, out_channels] = self.channels;
        let shape = [out_channels, in_channels, self.kernel_size, self.kernel_size];
        let scale = WeightScale::new(&shape, 0, self.gain)?;

        let weight = Tensor::<B, 4>::random(shape, Distribution::Normal(0.0, 1.0), device);
        let bias = Tensor::<B, 1>::zeros([out_channels], device);

        Ok(EqualizedConv2d {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
            scale: scale.value(),
            padding: self.kernel_size / 2,
        })
    }
}

/// Stride-1 "same" convolution whose raw weight is scaled on every call.
#[derive(Module, Debug)]
pub struct EqualizedConv2d<B: Backend> {
    weight: Param<Tensor<B, 4>>, // [out, in, k, k]
    bias: Param<Tensor<B, 1>>,
    scale: f32,
    padding: usize,
}

impl<B: Backend> EqualizedConv2d<B> {
    pub fn forward(&self, input: Tensor<B, 4>) -> Tensor<B, 4> {
        let weight = self.weight.val().mul_scalar(self.scale);

        conv2d(
            input,
            weight,
            Some(self.bias.val()),
            ConvOptions::new([1, 1], [self.padding, self.padding], [1, 1], 1),
        )
    }

    pub fn weight_scale(&self) -> f32 {
        self.scale
    }

    pub fn out_channels(&self) -> usize {
        self.weight.val().dims()[0]
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Linear

#[derive(Config, Debug)]
pub struct EqualizedLinearConfig {
    pub d_input: usize,
    pub d_output: usize,
    #[config(default = "std::f32::consts::SQRT_2")]
    pub gain: f32,
}

impl EqualizedLinearConfig {
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<EqualizedLinear<B>> {
        let shape = [self.d_input, self.d_output];
        let scale = WeightScale::new(&shape, 1, self.gain)?;

        let weight = Tensor::<B, 2>::random(shape, Distribution::Normal(0.0, 1.0), device);
        let bias = Tensor::<B, 1>::zeros([self.d_output], device);

        Ok(EqualizedLinear {
            weight: Param::from_tensor(weight),
            bias: Param::from_tensor(bias),
            scale: scale.value(),
        })
    }
}

#[derive(Module, Debug)]
pub struct EqualizedLinear<B: Backend> {
    weight: Param<Tensor<B, 2>>, // [in, out]
    bias: Param<Tensor<B, 1>>,
    scale: f32,
}

impl<B: Backend> EqualizedLinear<B> {
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let weight = self.weight.val().mul_scalar(self.scale);

        input.matmul(weight) + self.bias.val().unsqueeze()
    }

    pub fn weight_scale(&self) -> f32 {
        self.scale
    }
}

/// Gain of the generator's latent projection, as in the published ProGAN.
pub const LATENT_PROJECTION_GAIN: f32 = SQRT_2 / 4.0;
