//! Stateless tensor operations shared by the generator and discriminator chains.
//!
//! Every 4D tensor here is channels-first: `[batch, channels, height, width]`.

use burn::{nn::pool::AvgPool2dConfig, prelude::*};

const PIXEL_NORM_EPSILON: f32 = 1e-8;
const STDDEV_EPSILON: f32 = 1e-8;

/// Normalises each feature vector to unit root-mean-square.
///
/// The mean is taken over dim 1 only, which is the feature axis of a dense
/// activation `[batch, features]` and the channel axis of a feature map.
pub fn pixel_norm<B: Backend, const D: usize>(x: Tensor<B, D>) -> Tensor<B, D> {
    let norm = x
        .clone()
        .powf_scalar(2.0)
        .mean_dim(1)
        .add_scalar(PIXEL_NORM_EPSILON)
        .sqrt();

    x / norm
}

/// Appends the batch-wide mean standard deviation as one extra channel.
pub fn minibatch_stddev<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    let [batch_size, _, height, width] = x.dims();
    let device = x.device();

    // [1, C, H, W]; features that do not vary across the batch report exactly 0
    let variance = x.clone().var_bias(0);
    let constant = variance.clone().lower_equal_elem(STDDEV_EPSILON);
    let stddev = variance
        .add_scalar(STDDEV_EPSILON)
        .sqrt()
        .mask_fill(constant, 0.0)
        .mean()
        .reshape([1, 1, 1, 1]);
    let stat_channel = Tensor::<B, 4>::ones([batch_size, 1, height, width], &device) * stddev;

    Tensor::cat(vec![x, stat_channel], 1)
}

/// Linear blend `(1 - alpha) * old + alpha * new`.
///
/// # Panics
/// When `old` and `new` differ in shape. The chains always blend two paths
/// of the same stage, so a mismatch means the stage table is malformed.
pub fn fade_in<B: Backend, const D: usize>(
    alpha: f32,
    old: Tensor<B, D>,
    new: Tensor<B, D>,
) -> Tensor<B, D> {
    assert_eq!(
        old.dims(),
        new.dims(),
        "fade_in: blended tensors must have the same shape"
    );

    old.mul_scalar(1.0 - alpha) + new.mul_scalar(alpha)
}

/// Bilinear 2x upsampling with half-pixel centres and clamped edges.
///
/// Each output pixel is `0.75 * nearest + 0.25 * next nearest` along both
/// axes. Built from slicing and concatenation so it backpropagates on every
/// backend.
pub fn upsample<B: Backend>(x: Tensor<B, 4>) -> Tensor<B, 4> {
    upsample_axis(upsample_axis(x, 3), 2)
}

fn upsample_axis<B: Backend>(x: Tensor<B, 4>, dim: usize) -> Tensor<B, 4> {
    let size = x.dims()[dim];
    let (previous, next) = if size == 1 {
        (x.clone(), x.clone())
    } else {
        let first = x.clone().narrow(dim, 0, 1);
        let last = x.clone().narrow(dim, size - 1, 1);
        (
            Tensor::cat(vec![first, x.clone().narrow(dim, 0, size - 1)], dim),
            Tensor::cat(vec![x.clone().narrow(dim, 1, size - 1), last], dim),
        )
    };

    let even = x.clone().mul_scalar(0.75) + previous.mul_scalar(0.25);
    let odd = x.mul_scalar(0.75) + next.mul_scalar(0.25);

    let mut shape = even.dims();
    shape[dim] *= 2;
    // [.., size, 2, ..] flattens to even/odd interleaved
    Tensor::stack::<5>(vec![even, odd], dim + 1).reshape(shape)
}

/// Average pooling with kernel and stride `factor`.
pub fn downsample<B: Backend>(x: Tensor<B, 4>, factor: usize) -> Tensor<B, 4> {
    if factor <= 1 {
        return x;
    }

    AvgPool2dConfig::new([factor, factor])
        .with_strides([factor, factor])
        .init()
        .forward(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{assert_close, TestAutodiffBackend, TestBackend};
    use burn::tensor::Distribution;

    #[test]
    fn test_fade_in_endpoints() {
        let device = Default::default();
        let old = Tensor::<TestBackend, 4>::random([2, 3, 4, 4], Distribution::Default, &device);
        let new = Tensor::<TestBackend, 4>::random([2, 3, 4, 4], Distribution::Default, &device);

        let at_zero = fade_in(0.0, old.clone(), new.clone());
        let at_one = fade_in(1.0, old.clone(), new.clone());

        assert_eq!(
            at_zero.into_data().to_vec::<f32>().unwrap(),
            old.into_data().to_vec::<f32>().unwrap()
        );
        assert_eq!(
            at_one.into_data().to_vec::<f32>().unwrap(),
            new.into_data().to_vec::<f32>().unwrap()
        );
    }

    #[test]
    fn test_fade_in_is_linear() {
        let device = Default::default();
        let old = Tensor::<TestBackend, 2>::full([2, 3], 2.0, &device);
        let new = Tensor::<TestBackend, 2>::full([2, 3], 5.0, &device);

        let blended = fade_in(0.3, old, new);

        assert_close(&blended.into_data().to_vec::<f32>().unwrap(), &[2.9; 6], 1e-6);
    }

    #[test]
    #[should_panic(expected = "same shape")]
    fn test_fade_in_rejects_mismatched_shapes() {
        let device = Default::default();
        let old = Tensor::<TestBackend, 4>::zeros([1, 3, 4, 4], &device);
        let new = Tensor::<TestBackend, 4>::zeros([1, 3, 8, 8], &device);

        fade_in(0.5, old, new);
    }

    #[test]
    fn test_pixel_norm_known_vector() {
        let device = Default::default();
        // one sample, 2 channels, 1x1 spatial
        let x = Tensor::<TestBackend, 4>::from_floats([[[[3.0]], [[4.0]]]], &device);

        let output = pixel_norm(x);

        assert_eq!(output.dims(), [1, 2, 1, 1]);
        assert_close(
            &output.into_data().to_vec::<f32>().unwrap(),
            &[0.848_528, 1.131_371],
            1e-4,
        );
    }

    #[test]
    fn test_pixel_norm_unit_mean_square_per_position() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::random(
            [3, 8, 5, 5],
            Distribution::Normal(0.0, 4.0),
            &device,
        );

        let mean_square = pixel_norm(x).powf_scalar(2.0).mean_dim(1);

        assert_eq!(mean_square.dims(), [3, 1, 5, 5]);
        let values = mean_square.into_data().to_vec::<f32>().unwrap();
        assert_close(&values, &vec![1.0; values.len()], 1e-4);
    }

    #[test]
    fn test_pixel_norm_dense_features() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 2>::from_floats([[3.0, 4.0], [-1.0, 1.0]], &device);

        let output = pixel_norm(x).into_data().to_vec::<f32>().unwrap();

        assert_close(&output, &[0.848_528, 1.131_371, -1.0, 1.0], 1e-4);
    }

    #[test]
    fn test_minibatch_stddev_identical_samples() {
        let device = Default::default();
        let sample = Tensor::<TestBackend, 4>::random([1, 4, 3, 3], Distribution::Default, &device);
        let x = Tensor::cat(vec![sample.clone(), sample.clone(), sample], 0);

        let output = minibatch_stddev(x);

        assert_eq!(output.dims(), [3, 5, 3, 3]);
        let stat = output.narrow(1, 4, 1).into_data().to_vec::<f32>().unwrap();
        assert_eq!(stat.len(), 27);
        assert!(stat.iter().all(|v| *v == 0.0));
    }

    #[test]
    fn test_minibatch_stddev_broadcasts_one_value() {
        let device = Default::default();
        // feature a: {0, 2} -> std 1, feature b: {1, 4} -> std 1.5
        let x = Tensor::<TestBackend, 4>::from_floats(
            [[[[0.0]], [[1.0]]], [[[2.0]], [[4.0]]]],
            &device,
        );

        let stat = minibatch_stddev(x)
            .narrow(1, 2, 1)
            .into_data()
            .to_vec::<f32>()
            .unwrap();

        assert_close(&stat, &[1.25, 1.25], 1e-4);
    }

    #[test]
    fn test_minibatch_stddev_gradient_is_finite_for_identical_samples() {
        let device = Default::default();
        let sample = Tensor::<TestBackend, 4>::random([1, 2, 2, 2], Distribution::Default, &device);
        let x = Tensor::<TestAutodiffBackend, 4>::from_inner(Tensor::cat(vec![sample.clone(), sample], 0))
            .require_grad();

        let grads = minibatch_stddev(x.clone()).sum().backward();
        let grad = x.grad(&grads).unwrap().into_data().to_vec::<f32>().unwrap();

        assert!(grad.iter().all(|v| v.is_finite()));
    }

    #[test]
    fn test_upsample_interpolates_half_pixel() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::from_floats([[[[0.0, 4.0]]]], &device);

        let up = upsample(x);

        assert_eq!(up.dims(), [1, 1, 2, 4]);
        assert_close(
            &up.into_data().to_vec::<f32>().unwrap(),
            &[0.0, 1.0, 3.0, 4.0, 0.0, 1.0, 3.0, 4.0],
            1e-6,
        );
    }

    #[test]
    fn test_upsample_backward() {
        let device = Default::default();
        let x = Tensor::<TestAutodiffBackend, 4>::random([2, 3, 4, 4], Distribution::Default, &device)
            .require_grad();

        let grads = upsample(x.clone()).sum().backward();
        let grad = x.grad(&grads).unwrap();

        // every input pixel carries a total weight of 2 along each axis
        assert_eq!(grad.dims(), [2, 3, 4, 4]);
        assert_close(&grad.into_data().to_vec::<f32>().unwrap(), &[4.0; 96], 1e-5);
    }

    #[test]
    fn test_resampling_shapes() {
        let device = Default::default();
        let x = Tensor::<TestBackend, 4>::ones([2, 3, 4, 4], &device);

        let up = upsample(x);
        assert_eq!(up.dims(), [2, 3, 8, 8]);
        assert_close(&up.clone().into_data().to_vec::<f32>().unwrap(), &[1.0; 384], 1e-5);

        assert_eq!(downsample(up.clone(), 2).dims(), [2, 3, 4, 4]);
        assert_eq!(downsample(up.clone(), 4).dims(), [2, 3, 2, 2]);
        assert_eq!(downsample(up, 1).dims(), [2, 3, 8, 8]);
    }
}
