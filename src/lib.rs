//! Progressively-growing GAN on top of `burn`.
//!
//! The generator and discriminator are chains of resolution stages grown from
//! a small base resolution to the target one, with every new stage faded in
//! over a fixed number of iterations. [`training::train`] drives the growth
//! schedule; [`training::step::TrainingStep`] performs one adversarial update
//! under any of the four supported loss formulations.

pub mod checkpoint;
pub mod data;
pub mod error;
pub mod model;
pub mod training;
pub mod utils;

pub use error::{ProGanError, Result};

#[cfg(test)]
pub(crate) type TestBackend = burn::backend::NdArray<f32>;

#[cfg(test)]
pub(crate) type TestAutodiffBackend = burn::backend::Autodiff<TestBackend>;

#[cfg(test)]
pub(crate) fn assert_close(actual: &[f32], expected: &[f32], tolerance: f32) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");

    for (idx, (a, e)) in actual.iter().zip(expected).enumerate() {
        assert!(
            (a - e).abs() <= tolerance,
            "element {idx}: {a} differs from {e} by more than {tolerance}"
        );
    }
}
