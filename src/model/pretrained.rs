//! Pretrained backbone weights
//!
//! ImageNet weights are the torchvision checkpoints, fetched once into
//! `<weights_dir>/ImageNet/`. RadImageNet weights must already sit at
//! `<weights_dir>/RadImageNet/<Backbone>.pt`.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use burn::{
    module::Module,
    record::{FullPrecisionSettings, Recorder},
    tensor::backend::Backend,
};
use burn_import::pytorch::{LoadArgs, PyTorchFileRecorder};

use super::backbone::BackboneNet;
use super::densenet::{self, DenseNet121};
use super::resnet::{self, ResNet18, ResNet50};
use crate::config::{Backbone, PretrainSource};
use crate::utils::error::{ExperimentError, Result};

const TORCHVISION_BASE_URL: &str = "https://download.pytorch.org/models";

/// File name of the torchvision ImageNet checkpoint for a backbone
pub fn imagenet_file_name(backbone: Backbone) -> &'static str {
    match backbone {
        Backbone::ResNet18 => "resnet18-f37072fd.pth",
        Backbone::ResNet50 => "resnet50-0676ba61.pth",
        Backbone::DenseNet121 => "densenet121-a639ec97.pth",
    }
}

/// Where the weight file for `source` is expected; `None` for random init
pub fn weights_path(weights_dir: &Path, backbone: Backbone, source: PretrainSource) -> Option<PathBuf> {
    match source {
        PretrainSource::ImageNet => Some(weights_dir.join("ImageNet").join(imagenet_file_name(backbone))),
        PretrainSource::RadImageNet => Some(weights_dir.join("RadImageNet").join(format!("{backbone}.pt"))),
        PretrainSource::None => None,
    }
}

/// Download the torchvision checkpoint unless it is already cached
pub fn ensure_imagenet_weights(weights_dir: &Path, backbone: Backbone) -> Result<PathBuf> {
    let file_name = imagenet_file_name(backbone);
    let path = weights_dir.join("ImageNet").join(file_name);
    if path.exists() {
        tracing::debug!("Using cached ImageNet weights at {:?}", path);
        return Ok(path);
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let url = format!("{TORCHVISION_BASE_URL}/{file_name}");
    tracing::info!("Downloading ImageNet weights for {backbone} from {url}");

    let response = reqwest::blocking::get(&url)
        .and_then(|r| r.error_for_status())
        .map_err(|e| ExperimentError::Download(format!("{url}: {e}")))?;
    let bytes = response
        .bytes()
        .map_err(|e| ExperimentError::Download(format!("{url}: {e}")))?;

    // Staged as `.part` until fully written
    let partial = path.with_extension("part");
    let mut file = File::create(&partial)?;
    file.write_all(&bytes)?;
    file.sync_all()?;
    fs::rename(&partial, &path)?;

    tracing::info!("Saved {} bytes to {:?}", bytes.len(), path);
    Ok(path)
}

fn load_module<B, M>(module: M, path: &Path, remaps: Vec<(String, String)>, device: &B::Device) -> Result<M>
where
    B: Backend,
    M: Module<B>,
{
    let args = remaps
        .into_iter()
        .fold(LoadArgs::new(path.to_path_buf()), |args, (pattern, replacement)| {
            args.with_key_remap(&pattern, &replacement)
        });
    let record = PyTorchFileRecorder::<FullPrecisionSettings>::default()
        .load::<M::Record>(args, device)
        .map_err(|e| ExperimentError::Model(format!("Failed to load weights from {:?}: {:?}", path, e)))?;
    Ok(module.load_record(record))
}

/// Build a backbone and initialise it from `source`
pub fn load_backbone<B: Backend>(
    backbone: Backbone,
    source: PretrainSource,
    weights_dir: &Path,
    device: &B::Device,
) -> Result<BackboneNet<B>> {
    let (path, imagenet) = match source {
        PretrainSource::None => {
            tracing::info!("Initialising {backbone} from scratch");
            return Ok(BackboneNet::new(backbone, device));
        }
        PretrainSource::ImageNet => (ensure_imagenet_weights(weights_dir, backbone)?, true),
        PretrainSource::RadImageNet => {
            let path = weights_dir.join("RadImageNet").join(format!("{backbone}.pt"));
            if !path.exists() {
                return Err(ExperimentError::PretrainedWeightsMissing {
                    backbone: backbone.to_string(),
                    path,
                });
            }
            (path, false)
        }
    };

    tracing::info!("Loading {source} weights for {backbone} from {:?}", path);
    let net = match backbone {
        Backbone::ResNet18 => {
            let remaps = if imagenet { resnet::torchvision_key_remaps() } else { resnet::radimagenet_key_remaps() };
            BackboneNet::ResNet18(load_module(ResNet18::new(device), &path, remaps, device)?)
        }
        Backbone::ResNet50 => {
            let remaps = if imagenet { resnet::torchvision_key_remaps() } else { resnet::radimagenet_key_remaps() };
            BackboneNet::ResNet50(load_module(ResNet50::new(device), &path, remaps, device)?)
        }
        Backbone::DenseNet121 => {
            let remaps = if imagenet {
                densenet::torchvision_key_remaps()
            } else {
                densenet::radimagenet_key_remaps()
            };
            BackboneNet::DenseNet121(load_module(DenseNet121::new(device), &path, remaps, device)?)
        }
    };
    Ok(net)
}
