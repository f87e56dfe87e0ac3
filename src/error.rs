use std::path::PathBuf;
use thiserror::Error;

use crate::training::loss::GanType;

pub type Result<T, E = ProGanError> = std::result::Result<T, E>;

/// Fatal conditions raised while building or training the networks.
///
/// None of these are retried: a training run that hits one is aborted with
/// enough context to find the stage and iteration that produced it.
#[derive(Debug, Error)]
pub enum ProGanError {
    #[error("weight of shape {shape:?} has zero fan-in")]
    ZeroFanIn { shape: Vec<usize> },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("stage {stage} is out of range for a {num_stages}-stage network")]
    StageOutOfRange { stage: usize, num_stages: usize },

    #[error("stage {stage}: expected input of shape {expected:?}, got {actual:?}")]
    ShapeMismatch {
        stage: usize,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("non-finite {quantity} ({value}) at stage {stage}, iteration {iteration}, gan type {gan_type}")]
    NonFinite {
        quantity: &'static str,
        value: f32,
        stage: usize,
        iteration: usize,
        gan_type: GanType,
    },

    #[error("no images found under {}", .0.display())]
    EmptyDataset(PathBuf),

    #[error("failed to decode {}: {source}", path.display())]
    Image {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("checkpoint {}: {message}", path.display())]
    Checkpoint { path: PathBuf, message: String },

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
