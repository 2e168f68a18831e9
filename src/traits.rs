use std::path::{Path, PathBuf};

use image::RgbImage;
use ndarray::Array2;

use crate::errors::Result;

/// One evaluated sample: ground truth and prediction for the same image.
#[derive(Debug, Clone, PartialEq)]
pub struct LabelPair {
    /// Identifier relative to the dataset root, reused for visualisation output paths.
    pub key: PathBuf,
    pub ground_truth: Array2<u32>,
    pub prediction: Array2<u32>,
    /// Input image, when visualisations were requested.
    pub image: Option<RgbImage>,
}

/// Where the evaluation driver gets its samples from.
///
/// The driver only depends on this trait, so tests can feed label maps from memory instead of
/// from disk.
pub trait LabelPairSource: Send + Sync {
    /// Keys of every sample, in a stable order.
    fn keys(&self) -> Result<Vec<PathBuf>>;

    /// Loads the sample identified by `key`.
    fn load(&self, key: &Path) -> Result<LabelPair>;
}
