//! Burn dataset integration
//!
//! [`ImageDataset`] implements Burn's `Dataset` trait over a split's samples,
//! decoding images lazily, and [`ImageBatcher`] is its Burn `Batcher`.
//! [`SplitLoader`] turns a dataset into an iterator of [`ImageBatch`]es on any
//! backend, shuffled and augmented per epoch for training or in file order
//! for evaluation.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use burn::data::dataloader::batcher::Batcher;
use burn::data::dataset::Dataset;
use burn::prelude::*;
use image::imageops::FilterType;
use image::{ImageReader, RgbImage};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;

use crate::dataset::augmentation::Augmenter;
use crate::dataset::Sample;
use crate::utils::error::{ExperimentError, Result};

/// ImageNet channel statistics; pretrained backbones expect inputs normalized with them.
pub const IMAGENET_MEAN: [f32; 3] = [0.485, 0.456, 0.406];
pub const IMAGENET_STD: [f32; 3] = [0.229, 0.224, 0.225];

/// A single decoded image ready for batching
#[derive(Clone, Debug)]
pub struct ImageItem {
    /// Image data as flattened CHW float array [3 * H * W], values in [0, 1]
    pub image: Vec<f32>,
    pub label: usize,
    pub path: PathBuf,
}

impl ImageItem {
    /// Load, resize and convert an image. Grayscale scans are expanded to RGB.
    pub fn from_path(
        path: &Path,
        label: usize,
        image_size: usize,
        augment: Option<(&Augmenter, u64)>,
    ) -> Result<Self> {
        let img = ImageReader::open(path)
            .map_err(|e| ExperimentError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .with_guessed_format()
            .map_err(|e| ExperimentError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .decode()
            .map_err(|e| ExperimentError::ImageLoad(path.to_path_buf(), e.to_string()))?
            .resize_exact(image_size as u32, image_size as u32, FilterType::Triangle);

        let rgb = match augment {
            Some((augmenter, seed)) => augmenter.apply(img, seed),
            None => img.to_rgb8(),
        };

        Ok(Self {
            image: to_chw(&rgb),
            label,
            path: path.to_path_buf(),
        })
    }
}

fn to_chw(rgb: &RgbImage) -> Vec<f32> {
    let (width, height) = (rgb.width() as usize, rgb.height() as usize);
    let plane = width * height;
    let mut image = vec![0.0f32; 3 * plane];
    for (x, y, pixel) in rgb.enumerate_pixels() {
        let offset = y as usize * width + x as usize;
        for c in 0..3 {
            image[c * plane + offset] = pixel[c] as f32 / 255.0;
        }
    }
    image
}

/// Lazily-decoded dataset over one split
#[derive(Debug, Clone)]
pub struct ImageDataset {
    samples: Vec<Sample>,
    image_size: usize,
    augmenter: Option<Augmenter>,
}

impl ImageDataset {
    pub fn new(samples: Vec<Sample>, image_size: usize) -> Self {
        Self {
            samples,
            image_size,
            augmenter: None,
        }
    }

    /// Enable training-time augmentation for shuffled passes
    pub fn with_augmentation(mut self, augmenter: Augmenter) -> Self {
        self.augmenter = Some(augmenter);
        self
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn image_size(&self) -> usize {
        self.image_size
    }

    /// Load item `index`, augmented from `augment_seed` when augmentation is on
    pub fn load(&self, index: usize, augment_seed: Option<u64>) -> Result<ImageItem> {
        let sample = self.samples.get(index).ok_or_else(|| {
            ExperimentError::Dataset(format!("index {index} out of range ({})", self.samples.len()))
        })?;
        let augment = match (&self.augmenter, augment_seed) {
            (Some(augmenter), Some(seed)) => Some((augmenter, seed)),
            _ => None,
        };
        ImageItem::from_path(&sample.path, sample.label, self.image_size, augment)
    }
}

impl Dataset<ImageItem> for ImageDataset {
    fn get(&self, index: usize) -> Option<ImageItem> {
        match self.load(index, None) {
            Ok(item) => Some(item),
            Err(err) => {
                tracing::warn!("{}", err);
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.samples.len()
    }
}

/// A batch of images and their labels
#[derive(Clone, Debug)]
pub struct ImageBatch<B: Backend> {
    /// Normalized images with shape [batch_size, 3, height, width]
    pub images: Tensor<B, 4>,
    /// Class indices with shape [batch_size]
    pub targets: Tensor<B, 1, Int>,
    /// Host copy of the class indices
    pub labels: Vec<usize>,
}

/// Builds normalized batches from decoded items on one device
#[derive(Clone, Debug)]
pub struct ImageBatcher<B: Backend> {
    device: B::Device,
    image_size: usize,
}

impl<B: Backend> ImageBatcher<B> {
    pub fn new(device: B::Device, image_size: usize) -> Self {
        Self { device, image_size }
    }
}

impl<B: Backend> Batcher<ImageItem, ImageBatch<B>> for ImageBatcher<B> {
    fn batch(&self, items: Vec<ImageItem>) -> ImageBatch<B> {
        let batch_size = items.len();
        let plane = self.image_size * self.image_size;

        let mut images_data = Vec::with_capacity(batch_size * 3 * plane);
        for item in &items {
            for (i, value) in item.image.iter().enumerate() {
                let c = i / plane;
                images_data.push((value - IMAGENET_MEAN[c]) / IMAGENET_STD[c]);
            }
        }

        let images = Tensor::<B, 4>::from_floats(
            TensorData::new(images_data, [batch_size, 3, self.image_size, self.image_size]),
            &self.device,
        );

        let labels: Vec<usize> = items.iter().map(|item| item.label).collect();
        let targets = Tensor::<B, 1, Int>::from_data(
            TensorData::new(labels.iter().map(|&l| l as i64).collect::<Vec<_>>(), [batch_size]),
            &self.device,
        );

        ImageBatch {
            images,
            targets,
            labels,
        }
    }
}

/// Iteration order for one pass over a split
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOrder {
    /// File order, no augmentation (evaluation)
    Sequential,
    /// Seeded shuffle with augmentation (training)
    Shuffled { seed: u64 },
}

/// Labeled-batch iterator factory for one split
#[derive(Clone, Debug)]
pub struct SplitLoader {
    dataset: Arc<ImageDataset>,
    batch_size: usize,
}

impl SplitLoader {
    pub fn new(dataset: ImageDataset, batch_size: usize) -> Self {
        Self {
            dataset: Arc::new(dataset),
            batch_size: batch_size.max(1),
        }
    }

    pub fn dataset(&self) -> &ImageDataset {
        &self.dataset
    }

    pub fn len(&self) -> usize {
        self.dataset.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn num_batches(&self) -> usize {
        self.len().div_ceil(self.batch_size)
    }

    /// Iterate the split in batches on `device`. Batches are built on demand
    /// so only one batch of images is resident at a time.
    pub fn batches<'a, B: Backend>(
        &'a self,
        device: &'a B::Device,
        order: BatchOrder,
    ) -> impl Iterator<Item = Result<ImageBatch<B>>> + 'a {
        let mut indices: Vec<usize> = (0..self.len()).collect();
        let augment_base = match order {
            BatchOrder::Sequential => None,
            BatchOrder::Shuffled { seed } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                indices.shuffle(&mut rng);
                Some(seed)
            }
        };

        let chunks: Vec<Vec<usize>> = indices
            .chunks(self.batch_size)
            .map(|chunk| chunk.to_vec())
            .collect();
        let batcher = ImageBatcher::<B>::new(device.clone(), self.dataset.image_size());

        chunks.into_iter().map(move |chunk| {
            let items = chunk
                .iter()
                .map(|&index| {
                    let seed = augment_base.map(|base| base ^ (index as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15));
                    self.dataset.load(index, seed)
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(batcher.batch(items))
        })
    }
}
