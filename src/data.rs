use burn::{
    data::{dataloader::batcher::Batcher, dataset::Dataset},
    prelude::*,
};
use image::imageops::FilterType;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use crate::error::{ProGanError, Result};

// ////////////////////////////////////////////////////////////////////////////
// Dataset

/// One RGB image, row-major `[height, width, 3]`, values in [-1, 1].
#[derive(Debug, Clone, PartialEq)]
pub struct ImageItem {
    pub pixels: Vec<f32>,
    pub height: usize,
    pub width: usize,
}

impl ImageItem {
    pub fn load<P: AsRef<Path>>(path: P, resolution: usize) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path).map_err(|source| ProGanError::Image {
            path: path.to_path_buf(),
            source,
        })?;

        let side = resolution as u32;
        let image = image.resize_exact(side, side, FilterType::Triangle).to_rgb8();
        let pixels = image
            .into_raw()
            .into_iter()
            .map(|value| value as f32 / 127.5 - 1.0)
            .collect();

        Ok(Self {
            pixels,
            height: resolution,
            width: resolution,
        })
    }
}

/// Every jpg/png image below a root directory, resized to a square
/// resolution and held in memory.
#[derive(Debug, Clone)]
pub struct ImageFolderDataset {
    items: Vec<ImageItem>,
}

impl ImageFolderDataset {
    pub fn new<P: AsRef<Path>>(root: P, resolution: usize) -> Result<Self> {
        let root = root.as_ref();
        let paths = image_paths(root);
        if paths.is_empty() {
            return Err(ProGanError::EmptyDataset(root.to_path_buf()));
        }

        let items = paths
            .iter()
            .map(|path| ImageItem::load(path, resolution))
            .collect::<Result<Vec<_>>>()?;
        tracing::info!(images = items.len(), resolution, root = %root.display(), "loaded dataset");

        Ok(Self { items })
    }
}

fn image_paths(root: &Path) -> Vec<PathBuf> {
    let mut paths = WalkDir::new(root)
        .into_iter()
        .filter_map(|e| e.ok())
        .map(|entry| entry.into_path())
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| matches!(ext.to_ascii_lowercase().as_str(), "jpg" | "jpeg" | "png"))
        })
        .collect::<Vec<_>>();
    paths.sort();
    paths
}

impl Dataset<ImageItem> for ImageFolderDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        self.items.get(index).cloned()
    }

    fn len(&self) -> usize {
        self.items.len()
    }
}

// ////////////////////////////////////////////////////////////////////////////
// Batcher

/// Real images, `[batch, height, width, 3]` with values in [-1, 1].
#[derive(Debug, Clone)]
pub struct ImageBatch<B: Backend> {
    pub images: Tensor<B, 4>,
}

impl<B: Backend> ImageBatch<B> {
    /// The batch as `[batch, 3, height, width]`, the layout the networks use.
    pub fn channels_first(&self) -> Tensor<B, 4> {
        self.images.clone().permute([0, 3, 1, 2])
    }

    pub fn size(&self) -> usize {
        self.images.dims()[0]
    }
}

#[derive(Debug, Clone, Default)]
pub struct ImageBatcher;

impl<B: Backend> Batcher<B, ImageItem, ImageBatch<B>> for ImageBatcher {
    fn batch(&self, items: Vec<ImageItem>, device: &B::Device) -> ImageBatch<B> {
        let images = items
            .into_iter()
            .map(|item| {
                let data = TensorData::new(item.pixels, [item.height, item.width, 3]);
                Tensor::<B, 3>::from_data(data, device).unsqueeze_dim(0)
            })
            .collect::<Vec<_>>();

        ImageBatch {
            images: Tensor::cat(images, 0),
        }
    }
}
