use burn::{
    module::{Module, ModuleVisitor, ParamId},
    prelude::*,
    tensor::cast::ToElement,
};
use image::{
    buffer::ConvertBuffer,
    error::{ParameterError, ParameterErrorKind},
    ImageError, ImageResult, Rgb32FImage, RgbImage,
};
use std::path::Path;

/// Writes `[n, height, width, 3]` images with values in [-1, 1] as one PNG
/// grid, `ncol` images per row.
pub fn save_image<B: Backend, Q: AsRef<Path>>(
    images: Tensor<B, 4>,
    ncol: u32,
    path: Q,
) -> ImageResult<()> {
    let [count, height, width, channels] = images.dims();
    if channels != 3 {
        return Err(ImageError::Parameter(ParameterError::from_kind(
            ParameterErrorKind::DimensionMismatch,
        )));
    }
    let (height, width) = (height as u32, width as u32);
    let ncol = ncol.max(1);
    let nrow = (count as u32).div_ceil(ncol);

    // The Rgb32 should be in range 0.0-1.0
    let images = images.add_scalar(1.0).div_scalar(2.0).clamp(0.0, 1.0);

    let mut imgbuf = RgbImage::new(ncol * width, nrow * height);
    for idx in 0..count {
        let image: Tensor<B, 3> = images.clone().slice([idx..idx + 1]).squeeze(0);
        let image = image.into_data().iter::<f32>().collect::<Vec<f32>>();

        let Some(image) = Rgb32FImage::from_vec(width, height, image) else {
            return Err(ImageError::Parameter(ParameterError::from_kind(
                ParameterErrorKind::DimensionMismatch,
            )));
        };
        let image: RgbImage = image.convert();

        let (col, row) = (idx as u32 % ncol, idx as u32 / ncol);
        for (x, y, pixel) in image.enumerate_pixels() {
            imgbuf.put_pixel(col * width + x, row * height + y, *pixel);
        }
    }
    imgbuf.save(path)
}

/// Summary of every float parameter of a module.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ParameterStats {
    pub l2_norm: f32,
    pub max_abs: f32,
    pub num_params: usize,
}

#[derive(Default)]
struct StatsVisitor {
    min_rank: usize,
    square_sum: f64,
    max_abs: f32,
    num_params: usize,
}

impl<B: Backend> ModuleVisitor<B> for StatsVisitor {
    fn visit_float<const D: usize>(&mut self, _id: ParamId, tensor: &Tensor<B, D>) {
        if D < self.min_rank {
            return;
        }

        let square_sum = tensor.clone().powf_scalar(2.0).sum().into_scalar().to_f64();
        let max_abs = tensor.clone().abs().max().into_scalar().to_f32();

        self.square_sum += square_sum;
        self.max_abs = self.max_abs.max(max_abs);
        self.num_params += tensor.shape().num_elements();
    }
}

pub fn parameter_stats<B: Backend, M: Module<B>>(module: &M) -> ParameterStats {
    collect_stats(module, 0)
}

/// Same as [`parameter_stats`], restricted to conv kernels and dense weight
/// matrices (tensors of rank 2 or more).
pub fn weight_stats<B: Backend, M: Module<B>>(module: &M) -> ParameterStats {
    collect_stats(module, 2)
}

fn collect_stats<B: Backend, M: Module<B>>(module: &M, min_rank: usize) -> ParameterStats {
    let mut visitor = StatsVisitor {
        min_rank,
        ..Default::default()
    };
    module.visit(&mut visitor);

    ParameterStats {
        l2_norm: visitor.square_sum.sqrt() as f32,
        max_abs: visitor.max_abs,
        num_params: visitor.num_params,
    }
}
